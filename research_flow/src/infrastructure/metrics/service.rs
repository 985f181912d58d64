// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metrics Service
//!
//! Prometheus counters and gauges for flow, task and error activity. The
//! service subscribes to the event bus, so the core emits events and this
//! module is the only place that knows about Prometheus; rendering/scraping
//! is the host's concern via [`MetricsService::gather_text`].

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::warn;

use research_flow_domain::{EventKind, FlowError};

use crate::infrastructure::runtime::EventBus;

/// Prometheus metrics fed from lifecycle events.
pub struct MetricsService {
    registry: Registry,

    flows_created: IntCounter,
    flows_completed: IntCounter,
    flows_failed: IntCounter,
    flows_cancelled: IntCounter,
    active_flows: IntGauge,

    tasks_registered: IntCounter,
    tasks_completed: IntCounter,
    tasks_failed: IntCounter,
    tasks_cancelled: IntCounter,
    tasks_timed_out: IntCounter,
    running_tasks: IntGauge,

    errors_reported: IntCounterVec,
}

impl MetricsService {
    /// Creates the service with its own registry.
    pub fn new() -> Result<Arc<Self>, FlowError> {
        let registry = Registry::new();

        let flows_created = IntCounter::with_opts(Opts::new("flows_created_total", "Flows admitted"))
            .map_err(metrics_err)?;
        let flows_completed =
            IntCounter::with_opts(Opts::new("flows_completed_total", "Flows completed")).map_err(metrics_err)?;
        let flows_failed =
            IntCounter::with_opts(Opts::new("flows_failed_total", "Flows failed")).map_err(metrics_err)?;
        let flows_cancelled =
            IntCounter::with_opts(Opts::new("flows_cancelled_total", "Flows cancelled")).map_err(metrics_err)?;
        let active_flows =
            IntGauge::with_opts(Opts::new("active_flows", "Flows in PENDING or RUNNING")).map_err(metrics_err)?;

        let tasks_registered =
            IntCounter::with_opts(Opts::new("tasks_registered_total", "Tasks registered")).map_err(metrics_err)?;
        let tasks_completed =
            IntCounter::with_opts(Opts::new("tasks_completed_total", "Tasks completed")).map_err(metrics_err)?;
        let tasks_failed =
            IntCounter::with_opts(Opts::new("tasks_failed_total", "Tasks failed")).map_err(metrics_err)?;
        let tasks_cancelled =
            IntCounter::with_opts(Opts::new("tasks_cancelled_total", "Tasks cancelled")).map_err(metrics_err)?;
        let tasks_timed_out =
            IntCounter::with_opts(Opts::new("tasks_timeout_total", "Tasks timed out")).map_err(metrics_err)?;
        let running_tasks =
            IntGauge::with_opts(Opts::new("running_tasks", "Tasks currently RUNNING")).map_err(metrics_err)?;

        let errors_reported = IntCounterVec::new(
            Opts::new("errors_reported_total", "Errors reported by severity"),
            &["severity"],
        )
        .map_err(metrics_err)?;

        for collector in [
            Box::new(flows_created.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(flows_completed.clone()),
            Box::new(flows_failed.clone()),
            Box::new(flows_cancelled.clone()),
            Box::new(active_flows.clone()),
            Box::new(tasks_registered.clone()),
            Box::new(tasks_completed.clone()),
            Box::new(tasks_failed.clone()),
            Box::new(tasks_cancelled.clone()),
            Box::new(tasks_timed_out.clone()),
            Box::new(running_tasks.clone()),
            Box::new(errors_reported.clone()),
        ] {
            registry.register(collector).map_err(metrics_err)?;
        }

        Ok(Arc::new(Self {
            registry,
            flows_created,
            flows_completed,
            flows_failed,
            flows_cancelled,
            active_flows,
            tasks_registered,
            tasks_completed,
            tasks_failed,
            tasks_cancelled,
            tasks_timed_out,
            running_tasks,
            errors_reported,
        }))
    }

    /// Subscribes the service to every event on `bus`.
    pub fn observe(self: &Arc<Self>, bus: &EventBus) {
        let service = Arc::clone(self);
        bus.subscribe_all(Arc::new(move |event| service.record(event.kind, &event.payload)));
    }

    fn record(&self, kind: EventKind, payload: &serde_json::Value) {
        match kind {
            EventKind::FlowCreated => {
                self.flows_created.inc();
                self.active_flows.inc();
            }
            EventKind::FlowStarted => {}
            EventKind::FlowCompleted => {
                self.flows_completed.inc();
                self.dec_floor(&self.active_flows);
            }
            EventKind::FlowFailed => {
                self.flows_failed.inc();
                self.dec_floor(&self.active_flows);
            }
            EventKind::FlowCancelled => {
                self.flows_cancelled.inc();
                self.dec_floor(&self.active_flows);
            }
            EventKind::TaskRegistered => self.tasks_registered.inc(),
            EventKind::TaskReady => {}
            EventKind::TaskStarted => self.running_tasks.inc(),
            EventKind::TaskCompleted => {
                self.tasks_completed.inc();
                self.dec_floor(&self.running_tasks);
            }
            EventKind::TaskFailed => {
                self.tasks_failed.inc();
                self.dec_floor(&self.running_tasks);
            }
            EventKind::TaskCancelled => {
                self.tasks_cancelled.inc();
                self.dec_floor(&self.running_tasks);
            }
            EventKind::TaskTimeout => {
                self.tasks_timed_out.inc();
                self.dec_floor(&self.running_tasks);
            }
            EventKind::ErrorReported => {
                let severity = payload
                    .get("severity")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                self.errors_reported.with_label_values(&[severity]).inc();
            }
        }
    }

    // A cancel may settle a task that never started; the gauge stays at
    // zero rather than going negative.
    fn dec_floor(&self, gauge: &IntGauge) {
        if gauge.get() > 0 {
            gauge.dec();
        }
    }

    /// The underlying registry, for hosts composing their own exposition.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of the current metric values.
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "cannot encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn metrics_err(e: prometheus::Error) -> FlowError {
    FlowError::internal(format!("metrics registration failed: {}", e))
}
