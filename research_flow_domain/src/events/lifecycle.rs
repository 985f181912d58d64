// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Lifecycle Events
//!
//! Typed events published on the in-process event bus whenever a flow or task
//! changes state, or an error is reported. An event is `{kind, timestamp,
//! payload}`; payloads are JSON so subscribers (metrics, operators' sinks)
//! can consume them without depending on entity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::value_objects::{FlowId, TaskId};

/// Every event kind the engine publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskRegistered,
    TaskReady,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    TaskTimeout,
    FlowCreated,
    FlowStarted,
    FlowCompleted,
    FlowFailed,
    FlowCancelled,
    ErrorReported,
}

impl EventKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskRegistered => "task_registered",
            EventKind::TaskReady => "task_ready",
            EventKind::TaskStarted => "task_started",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskFailed => "task_failed",
            EventKind::TaskCancelled => "task_cancelled",
            EventKind::TaskTimeout => "task_timeout",
            EventKind::FlowCreated => "flow_created",
            EventKind::FlowStarted => "flow_started",
            EventKind::FlowCompleted => "flow_completed",
            EventKind::FlowFailed => "flow_failed",
            EventKind::FlowCancelled => "flow_cancelled",
            EventKind::ErrorReported => "error_reported",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event instance.
    pub event_id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Convenience constructor for task lifecycle events.
    pub fn task(kind: EventKind, task_id: TaskId, name: &str) -> Self {
        Self::new(
            kind,
            json!({
                "task_id": task_id.to_string(),
                "name": name,
            }),
        )
    }

    /// Convenience constructor for flow lifecycle events.
    pub fn flow(kind: EventKind, flow_id: FlowId, topic: &str) -> Self {
        Self::new(
            kind,
            json!({
                "flow_id": flow_id.to_string(),
                "topic": topic,
            }),
        )
    }

    /// Adds a field to the payload object, returning self for chaining.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.payload {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_event_payload() {
        let id = TaskId::new();
        let event = Event::task(EventKind::TaskStarted, id, "worker").with_field("execution_id", "abc");

        assert_eq!(event.kind, EventKind::TaskStarted);
        assert_eq!(event.payload["task_id"], id.to_string());
        assert_eq!(event.payload["name"], "worker");
        assert_eq!(event.payload["execution_id"], "abc");
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::flow(EventKind::FlowCompleted, FlowId::new(), "topic");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("flow_completed"));
    }
}
