// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Entity
//!
//! Internal unit of work for the scheduler. One task runs per flow, but the
//! type is deliberately generic: any asynchronous job can be registered.
//!
//! ## Dispatch model
//!
//! There is exactly one dispatch model: a task's work is an async closure
//! returning a [`TaskFuture`]. Arguments are captured by the closure rather
//! than carried as a separate args/kwargs record; blocking work must be
//! wrapped by the submitter (for example via `spawn_blocking`) before
//! registration. Because every task is asynchronous, mixed sync/async
//! dependency chains cannot exist.
//!
//! ## Invariants
//!
//! - A task is RUNNING only if every dependency is COMPLETED
//! - A task in WAITING has at least one unfinished dependency
//! - Terminal states (COMPLETED, FAILED, CANCELLED, TIMEOUT) are absorbing
//!
//! The scheduler owns enforcement; this entity exposes the transitions and
//! refuses illegal ones.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FlowError;
use crate::value_objects::TaskId;

/// Future produced by a task's work closure.
pub type TaskFuture = BoxFuture<'static, Result<Value, FlowError>>;

/// A task's work: an async closure invoked once per execution.
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Task priority levels, ordered LOW < NORMAL < HIGH < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Waiting,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    /// True for absorbing states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal scheduler unit of work.
///
/// The cancel handle into the runtime (join handle) is held by the scheduler,
/// keyed by this task's id.
#[derive(Clone)]
pub struct Task {
    task_id: TaskId,
    name: String,
    function: TaskFn,
    priority: TaskPriority,
    dependencies: BTreeSet<TaskId>,
    status: TaskStatus,
    timeout: Option<Duration>,
    tags: Vec<String>,
    metadata: BTreeMap<String, Value>,
    result: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a PENDING task.
    pub fn new(
        task_id: TaskId,
        name: impl Into<String>,
        function: TaskFn,
        priority: TaskPriority,
        dependencies: BTreeSet<TaskId>,
        timeout: Option<Duration>,
        tags: Vec<String>,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            task_id,
            name: name.into(),
            function,
            priority,
            dependencies,
            status: TaskStatus::Pending,
            timeout,
            tags,
            metadata,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    // --- accessors -------------------------------------------------------

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The work closure, for the scheduler's dispatch path.
    pub fn function(&self) -> TaskFn {
        Arc::clone(&self.function)
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn dependencies(&self) -> &BTreeSet<TaskId> {
        &self.dependencies
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Scheduler ordering key: priority descending, then registration order.
    pub fn scheduling_key(&self) -> (std::cmp::Reverse<TaskPriority>, DateTime<Utc>, TaskId) {
        (std::cmp::Reverse(self.priority), self.created_at, self.task_id)
    }

    // --- transitions (enforced by the scheduler) -------------------------

    /// PENDING/WAITING → RUNNING.
    pub fn mark_running(&mut self) -> Result<(), FlowError> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Waiting => {
                self.status = TaskStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            other => Err(self.illegal_transition("run", other)),
        }
    }

    /// PENDING → WAITING (unfinished dependencies observed).
    pub fn mark_waiting(&mut self) -> Result<(), FlowError> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Waiting => {
                self.status = TaskStatus::Waiting;
                Ok(())
            }
            other => Err(self.illegal_transition("wait", other)),
        }
    }

    /// WAITING → PENDING (all dependencies now COMPLETED).
    pub fn mark_ready(&mut self) -> Result<(), FlowError> {
        match self.status {
            TaskStatus::Waiting => {
                self.status = TaskStatus::Pending;
                Ok(())
            }
            other => Err(self.illegal_transition("ready", other)),
        }
    }

    /// RUNNING → COMPLETED with a result value.
    pub fn mark_completed(&mut self, result: Value) -> Result<(), FlowError> {
        match self.status {
            TaskStatus::Running => {
                self.status = TaskStatus::Completed;
                self.result = Some(result);
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            other => Err(self.illegal_transition("complete", other)),
        }
    }

    /// Any non-terminal → FAILED with an error message.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), FlowError> {
        if self.status.is_terminal() {
            return Err(self.illegal_transition("fail", self.status));
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// PENDING/WAITING/RUNNING → CANCELLED.
    pub fn mark_cancelled(&mut self) -> Result<(), FlowError> {
        if self.status.is_terminal() {
            return Err(self.illegal_transition("cancel", self.status));
        }
        self.status = TaskStatus::Cancelled;
        self.error = Some("cancelled".to_string());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// RUNNING → TIMEOUT after the deadline elapsed.
    pub fn mark_timed_out(&mut self) -> Result<(), FlowError> {
        match self.status {
            TaskStatus::Running => {
                self.status = TaskStatus::Timeout;
                self.error = Some(format!(
                    "timed out after {:?}",
                    self.timeout.unwrap_or(Duration::ZERO)
                ));
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            other => Err(self.illegal_transition("time out", other)),
        }
    }

    fn illegal_transition(&self, action: &str, from: TaskStatus) -> FlowError {
        FlowError::state(format!(
            "Cannot {} task {} ({}) from status {}",
            action, self.task_id, self.name, from
        ))
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("task_id", &self.task_id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("dependencies", &self.dependencies)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_fn() -> TaskFn {
        Arc::new(|| Box::pin(async { Ok(Value::Null) }))
    }

    fn task(priority: TaskPriority) -> Task {
        Task::new(
            TaskId::new(),
            "test-task",
            noop_fn(),
            priority,
            BTreeSet::new(),
            None,
            vec![],
            BTreeMap::new(),
        )
    }

    /// Tests priority ordering used by the scheduler queue.
    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    /// Tests the scheduling key orders by priority desc, then age.
    #[test]
    fn test_scheduling_key_order() {
        let high = task(TaskPriority::High);
        std::thread::sleep(Duration::from_millis(2));
        let normal_old = task(TaskPriority::Normal);
        std::thread::sleep(Duration::from_millis(2));
        let normal_new = task(TaskPriority::Normal);

        let mut tasks = vec![&normal_new, &normal_old, &high];
        tasks.sort_by_key(|t| t.scheduling_key());

        let order: Vec<TaskId> = tasks.iter().map(|t| t.task_id()).collect();
        assert_eq!(order, vec![high.task_id(), normal_old.task_id(), normal_new.task_id()]);
    }

    /// Tests the legal lifecycle and terminal absorption.
    #[test]
    fn test_transitions() {
        let mut t = task(TaskPriority::Normal);

        t.mark_waiting().unwrap();
        t.mark_ready().unwrap();
        t.mark_running().unwrap();
        t.mark_completed(Value::from("done")).unwrap();

        assert_eq!(t.status(), TaskStatus::Completed);
        assert!(t.completed_at().is_some());

        // Terminal is absorbing
        assert!(t.mark_running().is_err());
        assert!(t.mark_cancelled().is_err());
        assert!(t.mark_failed("late").is_err());
    }

    /// Tests failure from WAITING (dependency failed) is legal.
    #[test]
    fn test_fail_from_waiting() {
        let mut t = task(TaskPriority::Normal);
        t.mark_waiting().unwrap();
        t.mark_failed("dependency failed").unwrap();
        assert_eq!(t.status(), TaskStatus::Failed);
    }

    /// Tests timeout transition records the deadline in the error.
    #[test]
    fn test_timeout_transition() {
        let mut t = Task::new(
            TaskId::new(),
            "slow",
            noop_fn(),
            TaskPriority::Normal,
            BTreeSet::new(),
            Some(Duration::from_secs(5)),
            vec![],
            BTreeMap::new(),
        );
        t.mark_running().unwrap();
        t.mark_timed_out().unwrap();
        assert_eq!(t.status(), TaskStatus::Timeout);
        assert!(t.error().unwrap().contains("timed out"));
    }
}
