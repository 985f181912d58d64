// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Flow Manager
//!
//! Admission, registry, lifecycle, cancellation and cleanup of research
//! flows.
//!
//! ## Admission and backpressure
//!
//! [`FlowManager::create_flow`] refuses with [`FlowError::ResourceExhausted`]
//! once `max_concurrent_flows` flows are PENDING or RUNNING. Worker-level
//! backpressure lives in the scheduler (`max_workers`), provider-level in the
//! search registry.
//!
//! ## Execution wrapper
//!
//! A started flow runs as one scheduler task. The wrapper catches every
//! pipeline failure (flow → FAILED, never a crashed worker), maps
//! cancellation (flow → CANCELLED, result discarded), and on success records
//! the formatted result and pins progress to 1.0. Engine progress callbacks
//! advance `flow.progress` monotonically; regressions are ignored. Flow-level
//! retries are deliberately absent - retries live in the resilience layer
//! around each external call.
//!
//! ## Locking
//!
//! The flow registry is guarded by a single lock; the execution wrapper
//! takes local copies for the long pipeline run and re-locks only to settle
//! results.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use research_flow_bootstrap::CancellationToken;
use research_flow_domain::{
    Configuration, Event, EventKind, Flow, FlowError, FlowId, FlowResult, FlowStatus, TaskId,
    TaskPriority,
};

use crate::application::pipeline::{
    build_engine, parsing, NodePhase, ProgressCallback, StageContext,
};
use crate::application::pipeline::stages::ModelProvider;
use crate::infrastructure::logging::CorrelationContext;
use crate::infrastructure::reporting::ErrorReporter;
use crate::infrastructure::runtime::{EventBus, TaskOptions, TaskScheduler};
use crate::infrastructure::search::SearchRegistry;

/// Default admission cap.
pub const DEFAULT_MAX_CONCURRENT_FLOWS: usize = 10;

/// Metadata key selecting a flow's scheduler priority
/// (`low|normal|high|critical`).
pub const PRIORITY_METADATA_KEY: &str = "priority";

struct FlowSlot {
    flow: Flow,
    token: CancellationToken,
    task_id: Option<TaskId>,
}

/// Owns the map of flows and drives their lifecycle.
pub struct FlowManager {
    slots: Mutex<HashMap<FlowId, FlowSlot>>,
    max_concurrent_flows: usize,
    scheduler: Arc<TaskScheduler>,
    search: Arc<SearchRegistry>,
    models: Arc<dyn ModelProvider>,
    reporter: Arc<ErrorReporter>,
}

impl FlowManager {
    /// Creates a manager wired to its collaborators.
    pub fn new(
        max_concurrent_flows: usize,
        scheduler: Arc<TaskScheduler>,
        search: Arc<SearchRegistry>,
        models: Arc<dyn ModelProvider>,
        reporter: Arc<ErrorReporter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            max_concurrent_flows: max_concurrent_flows.max(1),
            scheduler,
            search,
            models,
            reporter,
        })
    }

    /// Event bus shared with the scheduler.
    pub fn bus(&self) -> Arc<EventBus> {
        self.scheduler.bus()
    }

    /// Admission cap.
    pub fn max_concurrent_flows(&self) -> usize {
        self.max_concurrent_flows
    }

    /// Creates a flow in PENDING.
    ///
    /// # Errors
    ///
    /// - [`FlowError::ResourceExhausted`] when the admission cap is reached
    ///   (existing flows are unaffected)
    /// - [`FlowError::Validation`] for an empty topic or duplicate
    ///   caller-supplied id
    pub fn create_flow(
        &self,
        topic: impl Into<String>,
        config: Option<Configuration>,
        previous_result: Option<FlowResult>,
        metadata: BTreeMap<String, Value>,
        flow_id: Option<FlowId>,
    ) -> Result<FlowId, FlowError> {
        let config = config.unwrap_or_default();
        config.validate()?;

        let flow_id = flow_id.unwrap_or_default();
        let event = {
            let mut slots = self.slots.lock();

            let active = slots.values().filter(|s| s.flow.status().is_active()).count();
            if active >= self.max_concurrent_flows {
                return Err(FlowError::resource_exhausted(format!(
                    "Maximum number of concurrent flows reached ({})",
                    self.max_concurrent_flows
                )));
            }

            if slots.contains_key(&flow_id) {
                return Err(FlowError::validation(format!("Flow id {} already exists", flow_id)));
            }

            let flow = Flow::new(flow_id, topic, config, previous_result, metadata)?;
            let event = Event::flow(EventKind::FlowCreated, flow_id, flow.topic());
            slots.insert(
                flow_id,
                FlowSlot {
                    flow,
                    token: CancellationToken::new(),
                    task_id: None,
                },
            );
            event
        };

        self.bus().publish(&event);
        info!(flow_id = %flow_id, "flow created");
        Ok(flow_id)
    }

    /// Snapshot of one flow.
    pub fn get_flow(&self, flow_id: FlowId) -> Option<Flow> {
        self.slots.lock().get(&flow_id).map(|s| s.flow.clone())
    }

    /// Snapshots of flows, optionally filtered by status.
    pub fn list_flows(&self, statuses: Option<&[FlowStatus]>) -> Vec<Flow> {
        let slots = self.slots.lock();
        let mut flows: Vec<Flow> = slots
            .values()
            .filter(|s| statuses.map_or(true, |wanted| wanted.contains(&s.flow.status())))
            .map(|s| s.flow.clone())
            .collect();
        flows.sort_by_key(|f| f.flow_id());
        flows
    }

    /// Cancels a PENDING or RUNNING flow: signals its token, cancels its
    /// scheduler task, stamps `completed_at`. Returns false otherwise;
    /// cancelling a terminal flow never alters its record.
    pub fn cancel_flow(self: &Arc<Self>, flow_id: FlowId) -> bool {
        let (event, task_id) = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&flow_id) else {
                return false;
            };
            if slot.flow.cancel().is_err() {
                return false;
            }
            slot.token.cancel();
            (
                Event::flow(EventKind::FlowCancelled, flow_id, slot.flow.topic()),
                slot.task_id,
            )
        };

        if let Some(task_id) = task_id {
            self.scheduler.cancel(task_id);
        }
        self.bus().publish(&event);
        info!(flow_id = %flow_id, "flow cancelled");
        true
    }

    /// Starts a PENDING flow: transitions to RUNNING and submits its
    /// pipeline run to the scheduler at the flow's configured priority.
    /// Returns false when the flow is not PENDING.
    ///
    /// # Errors
    ///
    /// Propagates scheduler registration failures; the flow is failed in
    /// that case rather than left RUNNING.
    pub fn start_flow(self: &Arc<Self>, flow_id: FlowId) -> Result<bool, FlowError> {
        let (token, priority, topic) = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&flow_id) else {
                return Ok(false);
            };
            if slot.flow.status() != FlowStatus::Pending {
                return Ok(false);
            }
            slot.flow.start()?;
            (slot.token.clone(), flow_priority(&slot.flow), slot.flow.topic().to_string())
        };

        let manager = Arc::clone(self);
        let run_token = token.clone();
        let function: research_flow_domain::TaskFn = Arc::new(move || {
            let manager = Arc::clone(&manager);
            let token = run_token.clone();
            Box::pin(async move { manager.execute_flow(flow_id, token).await })
        });

        let register_result = self.scheduler.register(
            format!("research-flow:{}", flow_id),
            function,
            TaskOptions {
                priority,
                tags: vec!["research-flow".to_string()],
                ..Default::default()
            },
        );

        match register_result {
            Ok(task_id) => {
                {
                    let mut slots = self.slots.lock();
                    if let Some(slot) = slots.get_mut(&flow_id) {
                        slot.task_id = Some(task_id);
                    }
                }
                self.bus().publish(&Event::flow(EventKind::FlowStarted, flow_id, &topic));
                self.scheduler.execute(task_id)?;
                Ok(true)
            }
            Err(err) => {
                let mut slots = self.slots.lock();
                if let Some(slot) = slots.get_mut(&flow_id) {
                    let _ = slot.flow.fail(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Attempts to start every PENDING flow; returns how many started.
    pub fn start_all_pending(self: &Arc<Self>) -> Result<usize, FlowError> {
        let pending: Vec<FlowId> = {
            let slots = self.slots.lock();
            slots
                .values()
                .filter(|s| s.flow.status() == FlowStatus::Pending)
                .map(|s| s.flow.flow_id())
                .collect()
        };

        let mut started = 0;
        for flow_id in pending {
            if self.start_flow(flow_id)? {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Waits until `flow_id` reaches a terminal status and returns its
    /// snapshot.
    pub async fn wait_for_flow(&self, flow_id: FlowId) -> Result<Flow, FlowError> {
        let (task_id, snapshot) = {
            let slots = self.slots.lock();
            let slot = slots
                .get(&flow_id)
                .ok_or_else(|| FlowError::not_found(format!("Flow {} not found", flow_id)))?;
            (slot.task_id, slot.flow.clone())
        };

        if snapshot.status().is_terminal() {
            return Ok(snapshot);
        }

        match task_id {
            Some(task_id) => {
                let _ = self.scheduler.wait_for(task_id).await;
            }
            None => {
                return Err(FlowError::state(format!("Flow {} has not been started", flow_id)));
            }
        }

        self.get_flow(flow_id)
            .ok_or_else(|| FlowError::not_found(format!("Flow {} not found", flow_id)))
    }

    /// Removes terminal flows whose `completed_at` is older than `max_age`;
    /// returns how many were removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            if !slot.flow.status().is_terminal() {
                return true;
            }
            match slot.flow.completed_at() {
                Some(at) => at >= cutoff,
                None => true,
            }
        });
        before - slots.len()
    }

    /// Cancels every active flow (shutdown drain). Returns how many were
    /// cancelled.
    pub fn drain(self: &Arc<Self>) -> usize {
        let active: Vec<FlowId> = {
            let slots = self.slots.lock();
            slots
                .values()
                .filter(|s| s.flow.status().is_active())
                .map(|s| s.flow.flow_id())
                .collect()
        };
        active.into_iter().filter(|id| self.cancel_flow(*id)).count()
    }

    /// Drains the manager once `token` (typically the shutdown
    /// coordinator's) is cancelled.
    pub fn drain_on(self: &Arc<Self>, token: CancellationToken) {
        let manager = Arc::clone(self);
        crate::infrastructure::runtime::spawn_supervised("flow-manager-drain", async move {
            token.cancelled().await;
            let cancelled = manager.drain();
            info!(cancelled, "flow manager drained on shutdown");
            Ok(())
        });
    }

    // --- execution wrapper ------------------------------------------------

    async fn execute_flow(self: Arc<Self>, flow_id: FlowId, token: CancellationToken) -> Result<Value, FlowError> {
        let (state, config, topic) = {
            let slots = self.slots.lock();
            let slot = slots
                .get(&flow_id)
                .ok_or_else(|| FlowError::not_found(format!("Flow {} not found", flow_id)))?;
            (
                slot.flow.state().clone(),
                slot.flow.config().clone(),
                slot.flow.topic().to_string(),
            )
        };

        let correlation = CorrelationContext::new(flow_id);
        let engine = build_engine(config.research_mode)?;
        let total_nodes = engine.node_count().max(1);

        let ctx = StageContext {
            config: config.clone(),
            search: Arc::clone(&self.search),
            models: Arc::clone(&self.models),
            cancel: token.clone(),
            correlation: correlation.clone(),
            reporter: Arc::clone(&self.reporter),
        };

        let progress: ProgressCallback = {
            let manager = Arc::clone(&self);
            Arc::new(move |_node, phase, steps| {
                if phase == NodePhase::Exit {
                    let fraction = steps as f64 / total_nodes as f64;
                    manager.record_progress(flow_id, fraction);
                }
            })
        };

        info!(
            flow_id = %flow_id,
            correlation_id = %correlation.correlation_id,
            mode = %config.research_mode,
            "flow execution starting"
        );

        match engine.run(state, &ctx, Some(progress)).await {
            Ok(final_state) => {
                let formatted = parsing::format_sections(final_state.sections());
                let mut metadata = BTreeMap::new();
                metadata.insert("search_api".to_string(), Value::from(config.search_api.as_str()));
                metadata.insert(
                    "research_mode".to_string(),
                    Value::from(config.research_mode.as_str()),
                );
                metadata.insert("search_depth".to_string(), Value::from(config.max_search_depth));
                metadata.insert(
                    "queries_per_iteration".to_string(),
                    Value::from(config.number_of_queries),
                );
                if let Some(used) = final_state.metadata().get("used_fallback") {
                    metadata.insert("used_fallback".to_string(), used.clone());
                }

                let result = FlowResult {
                    topic,
                    sections: final_state.sections().to_vec(),
                    formatted,
                    metadata,
                };

                let event = {
                    let mut slots = self.slots.lock();
                    let slot = slots
                        .get_mut(&flow_id)
                        .ok_or_else(|| FlowError::not_found(format!("Flow {} disappeared", flow_id)))?;
                    // A cancel that landed while the pipeline was finishing
                    // wins; the finished result is discarded.
                    if slot.flow.status() != FlowStatus::Running {
                        None
                    } else {
                        slot.flow.install_state(final_state)?;
                        slot.flow.complete(result.clone())?;
                        Some(Event::flow(EventKind::FlowCompleted, flow_id, slot.flow.topic()))
                    }
                };

                match event {
                    Some(event) => {
                        self.bus().publish(&event);
                        info!(flow_id = %flow_id, "flow completed");
                        Ok(serde_json::to_value(&result)?)
                    }
                    None => Err(FlowError::cancelled("flow cancelled")),
                }
            }
            Err(err) if err.is_cancelled() || token.is_cancelled() => {
                // cancel_flow usually settled the record already; a
                // cooperative exit from inside the pipeline settles it here.
                let event = {
                    let mut slots = self.slots.lock();
                    match slots.get_mut(&flow_id) {
                        Some(slot) if slot.flow.status() == FlowStatus::Running => {
                            let _ = slot.flow.cancel();
                            Some(Event::flow(EventKind::FlowCancelled, flow_id, slot.flow.topic()))
                        }
                        _ => None,
                    }
                };
                if let Some(event) = event {
                    self.bus().publish(&event);
                }
                Err(FlowError::cancelled("flow cancelled"))
            }
            Err(err) => {
                warn!(flow_id = %flow_id, error = %err, "flow failed");
                let mut context = correlation.report_fields();
                context.insert("topic".to_string(), Value::from(topic));
                self.reporter.report(&err, context, true);

                let event = {
                    let mut slots = self.slots.lock();
                    match slots.get_mut(&flow_id) {
                        Some(slot) => {
                            let _ = slot.flow.fail(err.to_string());
                            Some(Event::flow(EventKind::FlowFailed, flow_id, slot.flow.topic()))
                        }
                        None => None,
                    }
                };
                if let Some(event) = event {
                    self.bus().publish(&event);
                }
                Err(err)
            }
        }
    }

    fn record_progress(&self, flow_id: FlowId, fraction: f64) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&flow_id) {
            slot.flow.advance_progress(fraction);
        }
    }
}

fn flow_priority(flow: &Flow) -> TaskPriority {
    match flow
        .metadata()
        .get(PRIORITY_METADATA_KEY)
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("low") => TaskPriority::Low,
        Some("high") => TaskPriority::High,
        Some("critical") => TaskPriority::Critical,
        _ => TaskPriority::Normal,
    }
}
