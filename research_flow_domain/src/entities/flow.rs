// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Flow Entity
//!
//! One scheduled research run and its lifecycle.
//!
//! ## Status machine
//!
//! ```text
//!              ┌──────────> CANCELLED
//!              │                ^
//! PENDING ──> RUNNING ──┬──> COMPLETED
//!                       └──> FAILED
//! ```
//!
//! Terminal states (COMPLETED, FAILED, CANCELLED) are absorbing: every
//! transition method rejects moves out of them. `progress == 1.0` holds
//! exactly when the flow is COMPLETED; observer-reported progress is capped
//! just below full until [`Flow::complete`] runs.
//!
//! ## Ownership
//!
//! The flow manager exclusively owns the map of flows; the executing worker
//! mutates a flow's [`ReportState`] only while the flow is RUNNING.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Configuration;
use crate::entities::report_state::{ReportState, Section};
use crate::error::FlowError;
use crate::value_objects::{FlowId, Progress};

/// Largest progress an observer callback may record before completion, so
/// that `progress == 1.0` identifies COMPLETED exactly.
const PRE_COMPLETION_CAP: f64 = 0.99;

/// Flow lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl FlowStatus {
    /// True for absorbing states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowStatus::Completed | FlowStatus::Failed | FlowStatus::Cancelled)
    }

    /// True while the flow counts against the admission cap.
    pub fn is_active(&self) -> bool {
        matches!(self, FlowStatus::Pending | FlowStatus::Running)
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Pending => "pending",
            FlowStatus::Running => "running",
            FlowStatus::Completed => "completed",
            FlowStatus::Failed => "failed",
            FlowStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final payload of a completed flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    /// Topic the run answered.
    pub topic: String,

    /// Final section tree.
    pub sections: Vec<Section>,

    /// Markdown rendering of the section tree.
    pub formatted: String,

    /// Run provenance (search api used, mode, depth, timings).
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// One scheduled research run.
#[derive(Debug, Clone)]
pub struct Flow {
    flow_id: FlowId,
    topic: String,
    config: Configuration,
    metadata: BTreeMap<String, Value>,
    previous_result: Option<FlowResult>,
    state: ReportState,
    status: FlowStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    progress: Progress,
    result: Option<FlowResult>,
}

impl Flow {
    /// Creates a flow in PENDING with a fresh [`ReportState`].
    pub fn new(
        flow_id: FlowId,
        topic: impl Into<String>,
        config: Configuration,
        previous_result: Option<FlowResult>,
        metadata: BTreeMap<String, Value>,
    ) -> Result<Self, FlowError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(FlowError::validation("Flow topic must not be empty"));
        }

        let state = match &previous_result {
            Some(previous) => ReportState::continuation(
                topic.clone(),
                previous.topic.clone(),
                previous.sections.clone(),
                config.clone(),
            )?,
            None => ReportState::new(topic.clone(), config.clone()),
        };

        Ok(Self {
            flow_id,
            topic,
            config,
            metadata,
            previous_result,
            state,
            status: FlowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            progress: Progress::NONE,
            result: None,
        })
    }

    // --- accessors -------------------------------------------------------

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn previous_result(&self) -> Option<&FlowResult> {
        self.previous_result.as_ref()
    }

    pub fn state(&self) -> &ReportState {
        &self.state
    }

    /// Mutable access to the report state for the executing worker.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::State`] unless the flow is RUNNING; terminal
    /// flows are frozen.
    pub fn state_mut(&mut self) -> Result<&mut ReportState, FlowError> {
        if self.status != FlowStatus::Running {
            return Err(FlowError::state(format!(
                "Report state of flow {} is frozen (status {})",
                self.flow_id, self.status
            )));
        }
        Ok(&mut self.state)
    }

    /// Replaces the report state wholesale (used when the worker hands back
    /// the state it drove through the pipeline).
    pub fn install_state(&mut self, state: ReportState) -> Result<(), FlowError> {
        if self.status != FlowStatus::Running {
            return Err(FlowError::state(format!(
                "Cannot install state on flow {} in status {}",
                self.flow_id, self.status
            )));
        }
        self.state = state;
        Ok(())
    }

    pub fn status(&self) -> FlowStatus {
        self.status
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

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn result(&self) -> Option<&FlowResult> {
        self.result.as_ref()
    }

    // --- transitions -----------------------------------------------------

    /// PENDING → RUNNING.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::State`] from any other status.
    pub fn start(&mut self) -> Result<(), FlowError> {
        if self.status != FlowStatus::Pending {
            return Err(self.illegal_transition("start"));
        }
        self.status = FlowStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// RUNNING → COMPLETED, recording the result and pinning progress to
    /// 1.0.
    pub fn complete(&mut self, result: FlowResult) -> Result<(), FlowError> {
        if self.status != FlowStatus::Running {
            return Err(self.illegal_transition("complete"));
        }
        self.status = FlowStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        self.progress = Progress::COMPLETE;
        Ok(())
    }

    /// RUNNING → FAILED, recording the error message.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), FlowError> {
        if self.status != FlowStatus::Running {
            return Err(self.illegal_transition("fail"));
        }
        self.status = FlowStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    /// PENDING or RUNNING → CANCELLED. The result field is never set for a
    /// cancelled flow.
    pub fn cancel(&mut self) -> Result<(), FlowError> {
        if !self.status.is_active() {
            return Err(self.illegal_transition("cancel"));
        }
        self.status = FlowStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.error = Some("cancelled".to_string());
        Ok(())
    }

    /// Advances progress monotonically while RUNNING.
    ///
    /// Regressions are ignored; values at or above 1.0 are capped just below
    /// full until [`Flow::complete`] runs. Calls in any other status are
    /// no-ops (late observer callbacks after a cancel must not resurrect the
    /// record).
    pub fn advance_progress(&mut self, fraction: f64) {
        if self.status != FlowStatus::Running {
            return;
        }
        self.progress
            .advance_to(Progress::saturating(fraction.min(PRE_COMPLETION_CAP)));
    }

    fn illegal_transition(&self, action: &str) -> FlowError {
        FlowError::state(format!(
            "Cannot {} flow {} from status {}",
            action, self.flow_id, self.status
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> Flow {
        Flow::new(
            FlowId::new(),
            "photosynthesis",
            Configuration::default(),
            None,
            BTreeMap::new(),
        )
        .unwrap()
    }

    fn result_for(flow: &Flow) -> FlowResult {
        FlowResult {
            topic: flow.topic().to_string(),
            sections: vec![Section::new("Introduction")],
            formatted: "# Introduction\n".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    /// Tests the happy-path lifecycle PENDING → RUNNING → COMPLETED.
    #[test]
    fn test_lifecycle_happy_path() {
        let mut f = flow();
        assert_eq!(f.status(), FlowStatus::Pending);
        assert!(f.started_at().is_none());

        f.start().unwrap();
        assert_eq!(f.status(), FlowStatus::Running);
        assert!(f.started_at().is_some());

        let result = result_for(&f);
        f.complete(result).unwrap();
        assert_eq!(f.status(), FlowStatus::Completed);
        assert!(f.completed_at().is_some());
        assert!(f.progress().is_complete());
        assert!(f.result().is_some());
    }

    /// Tests that terminal states are absorbing.
    #[test]
    fn test_terminal_states_absorb() {
        let mut f = flow();
        f.start().unwrap();
        f.fail("boom").unwrap();

        assert!(f.start().is_err());
        assert!(f.cancel().is_err());
        let result = result_for(&f);
        assert!(f.complete(result).is_err());
        assert_eq!(f.status(), FlowStatus::Failed);
    }

    /// Tests cancellation from PENDING and from RUNNING, and that a cancelled
    /// flow records no result.
    #[test]
    fn test_cancellation_paths() {
        let mut pending = flow();
        pending.cancel().unwrap();
        assert_eq!(pending.status(), FlowStatus::Cancelled);
        assert_eq!(pending.error(), Some("cancelled"));
        assert!(pending.completed_at().is_some());
        assert!(pending.result().is_none());

        let mut running = flow();
        running.start().unwrap();
        running.cancel().unwrap();
        assert_eq!(running.status(), FlowStatus::Cancelled);
        assert!(running.result().is_none());
    }

    /// Tests that progress is monotonic, capped below 1.0 until completion,
    /// and frozen after terminal states.
    #[test]
    fn test_progress_invariants() {
        let mut f = flow();

        // Ignored while PENDING
        f.advance_progress(0.5);
        assert_eq!(f.progress().value(), 0.0);

        f.start().unwrap();
        f.advance_progress(0.5);
        assert_eq!(f.progress().value(), 0.5);

        // Regression ignored
        f.advance_progress(0.2);
        assert_eq!(f.progress().value(), 0.5);

        // Capped below full before completion
        f.advance_progress(1.0);
        assert!(f.progress().value() < 1.0);

        f.cancel().unwrap();
        let frozen = f.progress().value();
        f.advance_progress(0.9);
        assert_eq!(f.progress().value(), frozen);
        assert!(!f.progress().is_complete());
    }

    /// Tests that the frozen-state rule blocks mutation outside RUNNING.
    #[test]
    fn test_state_frozen_outside_running() {
        let mut f = flow();
        assert!(f.state_mut().is_err());

        f.start().unwrap();
        assert!(f.state_mut().is_ok());

        f.fail("boom").unwrap();
        assert!(f.state_mut().is_err());
    }

    /// Tests continuation flows seed the state from the previous result.
    #[test]
    fn test_previous_result_seeds_state() {
        let previous = FlowResult {
            topic: "solar panels".to_string(),
            sections: vec![Section::with_content("Findings", "prior")],
            formatted: String::new(),
            metadata: BTreeMap::new(),
        };
        let f = Flow::new(
            FlowId::new(),
            "perovskite cells",
            Configuration::default(),
            Some(previous),
            BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(f.state().previous_topic(), Some("solar panels"));
        assert!(f.state().has_section("Findings"));
    }

    /// Tests that an empty topic is rejected at construction.
    #[test]
    fn test_empty_topic_rejected() {
        let err = Flow::new(
            FlowId::new(),
            "   ",
            Configuration::default(),
            None,
            BTreeMap::new(),
        );
        assert!(err.is_err());
    }
}
