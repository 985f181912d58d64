// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Control API
//!
//! Transport-agnostic control operations over the engine (REST is one
//! possible realization, layered by the host). Every operation authenticates
//! the supplied credential through the pluggable [`AuthGate`] and authorizes
//! it against the permission mapped to the operation:
//!
//! | Operation | Permission |
//! |---|---|
//! | start_flows, start_continuous, cancel_flow | `research:write` |
//! | list_flows, get_flow | `research:read` |
//! | error_stats, error_visualize, error_trends, alert management | `admin:access` |
//!
//! Failures convert to the [`ErrorEnvelope`] for transports via
//! [`ControlApi::envelope`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use research_flow_domain::{
    AuthGate, Configuration, Credential, Flow, FlowError, FlowId, FlowResult, FlowStatus,
    Principal,
};

use crate::application::services::FlowManager;
use crate::infrastructure::config::RuntimeEnv;
use crate::infrastructure::reporting::{
    AlertRule, ErrorGroup, ErrorReporter, ErrorStats, GroupBy, TrendInterval,
};

use super::envelope::ErrorEnvelope;

/// Permission guarding flow mutation.
pub const RESEARCH_WRITE: &str = "research:write";

/// Permission guarding flow inspection.
pub const RESEARCH_READ: &str = "research:read";

/// Permission guarding operator endpoints.
pub const ADMIN_ACCESS: &str = "admin:access";

/// Allow-everything gate for embedded hosts that authenticate upstream.
pub struct OpenAuthGate;

#[async_trait]
impl AuthGate for OpenAuthGate {
    async fn authenticate(&self, _credential: &Credential) -> Result<Principal, FlowError> {
        Ok(Principal::new(
            "anonymous",
            [RESEARCH_READ, RESEARCH_WRITE, ADMIN_ACCESS],
        ))
    }
}

/// Wire snapshot of one flow.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSnapshot {
    pub flow_id: String,
    pub topic: String,
    pub status: FlowStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    /// Present only for COMPLETED flows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FlowResult>,
}

impl FlowSnapshot {
    fn from_flow(flow: &Flow) -> Self {
        Self {
            flow_id: flow.flow_id().to_string(),
            topic: flow.topic().to_string(),
            status: flow.status(),
            created_at: flow.created_at(),
            started_at: flow.started_at(),
            completed_at: flow.completed_at(),
            progress: flow.progress().value(),
            error: flow.error().map(str::to_string),
            metadata: flow.metadata().clone(),
            result: if flow.status() == FlowStatus::Completed {
                flow.result().cloned()
            } else {
                None
            },
        }
    }
}

/// Response of `start_flows`.
#[derive(Debug, Clone, Serialize)]
pub struct StartFlowsResponse {
    pub flow_ids: Vec<String>,
    pub accepted_count: usize,
    /// Envelopes for topics refused at admission.
    pub rejected: Vec<ErrorEnvelope>,
}

/// Transport-agnostic control surface.
pub struct ControlApi {
    manager: Arc<FlowManager>,
    reporter: Arc<ErrorReporter>,
    auth: Arc<dyn AuthGate>,
    env: RuntimeEnv,
}

impl ControlApi {
    /// Wires the control surface.
    pub fn new(
        manager: Arc<FlowManager>,
        reporter: Arc<ErrorReporter>,
        auth: Arc<dyn AuthGate>,
        env: RuntimeEnv,
    ) -> Self {
        Self {
            manager,
            reporter,
            auth,
            env,
        }
    }

    /// Converts an operation failure to the wire envelope.
    pub fn envelope(&self, err: &FlowError) -> ErrorEnvelope {
        ErrorEnvelope::from_error(err, self.env)
    }

    async fn authorize(&self, credential: &Credential, permission: &str) -> Result<Principal, FlowError> {
        let principal = self.auth.authenticate(credential).await?;
        if !self.auth.authorize(&principal, permission) {
            return Err(FlowError::Authorization(format!(
                "Subject '{}' lacks permission '{}'",
                principal.subject, permission
            )));
        }
        Ok(principal)
    }

    /// Creates and starts one flow per topic, respecting admission. Topics
    /// refused at the cap are reported in `rejected`; accepted flows are
    /// unaffected.
    pub async fn start_flows(
        &self,
        credential: &Credential,
        topics: Vec<String>,
        config: Option<Configuration>,
        metadata: BTreeMap<String, Value>,
    ) -> Result<StartFlowsResponse, FlowError> {
        self.authorize(credential, RESEARCH_WRITE).await?;

        let mut flow_ids = Vec::new();
        let mut rejected = Vec::new();
        for topic in topics {
            match self
                .manager
                .create_flow(topic, config.clone(), None, metadata.clone(), None)
            {
                Ok(flow_id) => flow_ids.push(flow_id),
                Err(err) => rejected.push(self.envelope(&err)),
            }
        }

        for flow_id in &flow_ids {
            self.manager.start_flow(*flow_id)?;
        }

        Ok(StartFlowsResponse {
            accepted_count: flow_ids.len(),
            flow_ids: flow_ids.iter().map(FlowId::to_string).collect(),
            rejected,
        })
    }

    /// Creates and starts a continuation flow seeded from a COMPLETED
    /// previous flow.
    ///
    /// # Errors
    ///
    /// - [`FlowError::NotFound`] for an unknown previous flow
    /// - [`FlowError::State`] when the previous flow has no result yet
    pub async fn start_continuous(
        &self,
        credential: &Credential,
        previous_flow_id: &str,
        new_topic: impl Into<String>,
        config: Option<Configuration>,
    ) -> Result<String, FlowError> {
        self.authorize(credential, RESEARCH_WRITE).await?;

        let previous_id = FlowId::parse(previous_flow_id)?;
        let previous = self
            .manager
            .get_flow(previous_id)
            .ok_or_else(|| FlowError::not_found(format!("Flow {} not found", previous_id)))?;
        let previous_result = previous
            .result()
            .cloned()
            .ok_or_else(|| FlowError::state(format!("Flow {} has no result to continue from", previous_id)))?;

        let config = config.or_else(|| Some(previous.config().clone()));
        let flow_id = self.manager.create_flow(
            new_topic,
            config,
            Some(previous_result),
            BTreeMap::new(),
            None,
        )?;
        self.manager.start_flow(flow_id)?;
        Ok(flow_id.to_string())
    }

    /// Lists flows with progress and timestamps, optionally filtered.
    pub async fn list_flows(
        &self,
        credential: &Credential,
        statuses: Option<Vec<FlowStatus>>,
    ) -> Result<Vec<FlowSnapshot>, FlowError> {
        self.authorize(credential, RESEARCH_READ).await?;
        Ok(self
            .manager
            .list_flows(statuses.as_deref())
            .iter()
            .map(FlowSnapshot::from_flow)
            .collect())
    }

    /// Fetches one flow snapshot; the result payload is present once the
    /// flow COMPLETED.
    pub async fn get_flow(&self, credential: &Credential, flow_id: &str) -> Result<FlowSnapshot, FlowError> {
        self.authorize(credential, RESEARCH_READ).await?;
        let flow_id = FlowId::parse(flow_id)?;
        self.manager
            .get_flow(flow_id)
            .map(|flow| FlowSnapshot::from_flow(&flow))
            .ok_or_else(|| FlowError::not_found(format!("Flow {} not found", flow_id)))
    }

    /// Cancels a flow; idempotent on terminal flows (returns false).
    pub async fn cancel_flow(&self, credential: &Credential, flow_id: &str) -> Result<bool, FlowError> {
        self.authorize(credential, RESEARCH_WRITE).await?;
        let flow_id = FlowId::parse(flow_id)?;
        Ok(self.manager.cancel_flow(flow_id))
    }

    /// Aggregate error counters.
    pub async fn error_stats(&self, credential: &Credential) -> Result<ErrorStats, FlowError> {
        self.authorize(credential, ADMIN_ACCESS).await?;
        Ok(self.reporter.stats())
    }

    /// Grouped error view over a recent window.
    pub async fn error_visualize(
        &self,
        credential: &Credential,
        group_by: GroupBy,
        time_range: Duration,
        max_errors: usize,
    ) -> Result<Vec<ErrorGroup>, FlowError> {
        self.authorize(credential, ADMIN_ACCESS).await?;
        Ok(self.reporter.visualize(group_by, time_range, max_errors))
    }

    /// Severity trends over equal intervals of a recent window.
    pub async fn error_trends(
        &self,
        credential: &Credential,
        time_range: Duration,
        intervals: usize,
    ) -> Result<Vec<TrendInterval>, FlowError> {
        self.authorize(credential, ADMIN_ACCESS).await?;
        Ok(self.reporter.trends(time_range, intervals))
    }

    /// Registered alert rules.
    pub async fn alert_configs(&self, credential: &Credential) -> Result<Vec<AlertRule>, FlowError> {
        self.authorize(credential, ADMIN_ACCESS).await?;
        Ok(self.reporter.alert_rules())
    }

    /// Registers an alert rule, returning its index.
    pub async fn add_alert(&self, credential: &Credential, rule: AlertRule) -> Result<usize, FlowError> {
        self.authorize(credential, ADMIN_ACCESS).await?;
        Ok(self.reporter.add_alert_rule(rule))
    }

    /// Removes an alert rule by index.
    pub async fn remove_alert(&self, credential: &Credential, index: usize) -> Result<bool, FlowError> {
        self.authorize(credential, ADMIN_ACCESS).await?;
        Ok(self.reporter.remove_alert_rule(index))
    }
}
