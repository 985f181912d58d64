// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Error Reporter
//!
//! Central sink for classified failures: a bounded in-memory ring buffer,
//! aggregate counters, operator-defined alert rules, optional JSON
//! persistence, and the query surface behind the `error_stats`,
//! `error_visualize` and `error_trends` control operations.
//!
//! ## Concurrency
//!
//! The ring buffer, counters and alert state share one lock; alert dispatch
//! and file writes happen strictly outside it. An `ERROR_REPORTED` event is
//! published on the bus for each report so metrics stay decoupled.
//!
//! ## Alerting
//!
//! Operators register [`AlertRule`]s. After each report the reporter scans
//! every rule; when the matching count within `[now - window, now]` reaches
//! the rule's threshold, the alert is dispatched to the rule's channels
//! through the pluggable [`AlertSink`], and `last_alert_at` suppresses
//! re-firing within the same window.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use research_flow_domain::{ErrorCategory, ErrorSeverity, Event, EventKind, FlowError};

use crate::infrastructure::runtime::EventBus;

/// Maximum reports retained in memory.
pub const RING_CAPACITY: usize = 1000;

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error_type: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ErrorReport {
    /// Builds a report from a domain error with explicit classification.
    pub fn new(
        err: &FlowError,
        severity: ErrorSeverity,
        category: ErrorCategory,
        context: BTreeMap<String, Value>,
    ) -> Self {
        let details = match err {
            FlowError::RateLimit { retry_after, .. } => json!({
                "retry_after_ms": retry_after.map(|d| d.as_millis() as u64),
            }),
            FlowError::CircuitOpen {
                name,
                recovery_remaining,
            } => json!({
                "circuit": name,
                "recovery_remaining_ms": recovery_remaining.as_millis() as u64,
            }),
            _ => Value::Null,
        };

        Self {
            error_type: err.kind_name().to_string(),
            message: err.to_string(),
            severity,
            category,
            timestamp: Utc::now(),
            context,
            details,
            cause: None,
            traceback: None,
        }
    }
}

/// Operator-defined alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Minimum severity a report must carry to match.
    pub severity_threshold: ErrorSeverity,

    /// Restrict matching to these kinds; `None` matches every kind.
    #[serde(default)]
    pub kinds: Option<Vec<String>>,

    /// Restrict matching to these categories; `None` matches every category.
    #[serde(default)]
    pub categories: Option<Vec<ErrorCategory>>,

    /// Matching reports within the window needed to fire.
    pub count_threshold: usize,

    /// Sliding window size in seconds.
    pub window_secs: u64,

    /// Delivery channels, interpreted by the sink.
    pub channels: Vec<String>,
}

impl AlertRule {
    fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn matches(&self, report: &ErrorReport) -> bool {
        if report.severity < self.severity_threshold {
            return false;
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.iter().any(|k| k == &report.error_type) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.contains(&report.category) {
                return false;
            }
        }
        true
    }
}

/// A fired alert, handed to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub rule_index: usize,
    pub channels: Vec<String>,
    pub matching_count: usize,
    pub window_secs: u64,
    pub triggered_by: ErrorReport,
    pub fired_at: DateTime<Utc>,
}

/// Pluggable alert delivery. Channel semantics belong to the host.
pub trait AlertSink: Send + Sync {
    fn dispatch(&self, alert: &Alert);
}

/// Default sink: structured log lines.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn dispatch(&self, alert: &Alert) {
        error!(
            rule = alert.rule_index,
            channels = ?alert.channels,
            count = alert.matching_count,
            error_type = %alert.triggered_by.error_type,
            "error alert fired"
        );
    }
}

/// Aggregate counters exposed by `error_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, u64>,
}

/// Axis for `error_visualize` grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Kind,
    Category,
    Severity,
}

/// One group in a visualization answer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorGroup {
    pub key: String,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub examples: Vec<ErrorReport>,
}

/// One interval in a trend answer.
#[derive(Debug, Clone, Serialize)]
pub struct TrendInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub by_severity: BTreeMap<String, u64>,
    pub total: u64,
}

struct RuleState {
    rule: AlertRule,
    last_alert_at: Option<DateTime<Utc>>,
}

struct ReporterInner {
    ring: VecDeque<ErrorReport>,
    stats: ErrorStats,
    rules: Vec<RuleState>,
}

/// Central error sink; clone the `Arc` freely across subsystems.
pub struct ErrorReporter {
    inner: Mutex<ReporterInner>,
    sink: Arc<dyn AlertSink>,
    bus: Option<Arc<EventBus>>,
    /// Directory for persisted reports; `None` disables saving.
    error_dir: Option<PathBuf>,
    /// Include a captured backtrace in reports (development environments).
    include_traceback: bool,
}

impl ErrorReporter {
    /// Creates a reporter with the default logging sink and no persistence.
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Starts a builder.
    pub fn builder() -> ErrorReporterBuilder {
        ErrorReporterBuilder::default()
    }

    /// Classifies and records `err` using its default severity and category.
    pub fn report(&self, err: &FlowError, context: BTreeMap<String, Value>, save: bool) -> ErrorReport {
        self.report_with(err, err.severity(), err.category(), context, save)
    }

    /// Records `err` with explicit classification.
    pub fn report_with(
        &self,
        err: &FlowError,
        severity: ErrorSeverity,
        category: ErrorCategory,
        context: BTreeMap<String, Value>,
        save: bool,
    ) -> ErrorReport {
        let mut report = ErrorReport::new(err, severity, category, context);
        if self.include_traceback {
            report.traceback = Some(std::backtrace::Backtrace::force_capture().to_string());
        }

        let alerts = {
            let mut inner = self.inner.lock();

            inner.ring.push_back(report.clone());
            while inner.ring.len() > RING_CAPACITY {
                inner.ring.pop_front();
            }

            inner.stats.total += 1;
            *inner.stats.by_kind.entry(report.error_type.clone()).or_default() += 1;
            *inner
                .stats
                .by_severity
                .entry(report.severity.as_str().to_string())
                .or_default() += 1;
            *inner
                .stats
                .by_category
                .entry(report.category.as_str().to_string())
                .or_default() += 1;

            Self::evaluate_rules_locked(&mut inner, &report)
        };

        // Everything below runs outside the lock.
        info!(
            error_type = %report.error_type,
            severity = %report.severity,
            category = %report.category,
            message = %report.message,
            "error reported"
        );

        if save {
            self.persist(&report);
        }

        if let Some(bus) = &self.bus {
            bus.publish(&Event::new(
                EventKind::ErrorReported,
                json!({
                    "error_type": report.error_type,
                    "severity": report.severity.as_str(),
                    "category": report.category.as_str(),
                }),
            ));
        }

        for alert in alerts {
            self.sink.dispatch(&alert);
        }

        report
    }

    /// Aggregate counters.
    pub fn stats(&self) -> ErrorStats {
        self.inner.lock().stats.clone()
    }

    /// Most recent reports, newest last, capped at `limit`.
    pub fn recent(&self, limit: usize) -> Vec<ErrorReport> {
        let inner = self.inner.lock();
        let skip = inner.ring.len().saturating_sub(limit);
        inner.ring.iter().skip(skip).cloned().collect()
    }

    /// Groups reports from the last `time_range` by the requested axis.
    pub fn visualize(&self, group_by: GroupBy, time_range: Duration, max_examples: usize) -> Vec<ErrorGroup> {
        let cutoff = Utc::now() - chrono::Duration::from_std(time_range).unwrap_or(chrono::Duration::zero());
        let inner = self.inner.lock();

        let mut groups: BTreeMap<String, ErrorGroup> = BTreeMap::new();
        for report in inner.ring.iter().filter(|r| r.timestamp >= cutoff) {
            let key = match group_by {
                GroupBy::Kind => report.error_type.clone(),
                GroupBy::Category => report.category.as_str().to_string(),
                GroupBy::Severity => report.severity.as_str().to_string(),
            };
            let group = groups.entry(key.clone()).or_insert_with(|| ErrorGroup {
                key,
                count: 0,
                first_seen: report.timestamp,
                last_seen: report.timestamp,
                examples: Vec::new(),
            });
            group.count += 1;
            group.first_seen = group.first_seen.min(report.timestamp);
            group.last_seen = group.last_seen.max(report.timestamp);
            if group.examples.len() < max_examples {
                group.examples.push(report.clone());
            }
        }

        let mut result: Vec<ErrorGroup> = groups.into_values().collect();
        result.sort_by(|a, b| b.count.cmp(&a.count));
        result
    }

    /// Partitions the last `time_range` into `intervals` equal slices and
    /// counts reports per severity per slice, oldest first.
    pub fn trends(&self, time_range: Duration, intervals: usize) -> Vec<TrendInterval> {
        let intervals = intervals.max(1);
        let now = Utc::now();
        let span = chrono::Duration::from_std(time_range).unwrap_or(chrono::Duration::zero());
        let start = now - span;
        let slice = span / intervals as i32;

        let inner = self.inner.lock();
        let mut result: Vec<TrendInterval> = (0..intervals)
            .map(|i| {
                let begin = start + slice * i as i32;
                TrendInterval {
                    start: begin,
                    end: begin + slice,
                    by_severity: BTreeMap::new(),
                    total: 0,
                }
            })
            .collect();

        for report in inner.ring.iter().filter(|r| r.timestamp >= start) {
            let offset = report.timestamp - start;
            let idx = if slice.num_milliseconds() > 0 {
                ((offset.num_milliseconds() / slice.num_milliseconds()) as usize).min(intervals - 1)
            } else {
                intervals - 1
            };
            let bucket = &mut result[idx];
            bucket.total += 1;
            *bucket
                .by_severity
                .entry(report.severity.as_str().to_string())
                .or_default() += 1;
        }

        result
    }

    // --- alert rule management -------------------------------------------

    /// Registers a rule, returning its index.
    pub fn add_alert_rule(&self, rule: AlertRule) -> usize {
        let mut inner = self.inner.lock();
        inner.rules.push(RuleState {
            rule,
            last_alert_at: None,
        });
        inner.rules.len() - 1
    }

    /// Removes the rule at `index`. Returns false for an unknown index.
    pub fn remove_alert_rule(&self, index: usize) -> bool {
        let mut inner = self.inner.lock();
        if index < inner.rules.len() {
            inner.rules.remove(index);
            true
        } else {
            false
        }
    }

    /// Registered rules.
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        self.inner.lock().rules.iter().map(|s| s.rule.clone()).collect()
    }

    fn evaluate_rules_locked(inner: &mut ReporterInner, report: &ErrorReport) -> Vec<Alert> {
        let now = Utc::now();
        let mut alerts = Vec::new();

        for (index, state) in inner.rules.iter_mut().enumerate() {
            if !state.rule.matches(report) {
                continue;
            }

            let window = chrono::Duration::from_std(state.rule.window())
                .unwrap_or_else(|_| chrono::Duration::zero());
            let cutoff = now - window;

            // Suppress re-firing within the window.
            if let Some(last) = state.last_alert_at {
                if last >= cutoff {
                    continue;
                }
            }

            let matching = inner
                .ring
                .iter()
                .filter(|r| r.timestamp >= cutoff && state.rule.matches(r))
                .count();

            if matching >= state.rule.count_threshold {
                state.last_alert_at = Some(now);
                alerts.push(Alert {
                    rule_index: index,
                    channels: state.rule.channels.clone(),
                    matching_count: matching,
                    window_secs: state.rule.window_secs,
                    triggered_by: report.clone(),
                    fired_at: now,
                });
            }
        }

        alerts
    }

    fn persist(&self, report: &ErrorReport) {
        let Some(dir) = &self.error_dir else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(error = %e, "cannot create error report directory");
            return;
        }

        let stamp = report.timestamp.format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let path = dir.join(format!("error_{}_{}.json", report.error_type, stamp));
        match serde_json::to_string_pretty(report) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&path, body) {
                    warn!(path = %path.display(), error = %e, "cannot persist error report");
                }
            }
            Err(e) => warn!(error = %e, "cannot serialize error report"),
        }
    }
}

/// Builder for [`ErrorReporter`].
#[derive(Default)]
pub struct ErrorReporterBuilder {
    sink: Option<Arc<dyn AlertSink>>,
    bus: Option<Arc<EventBus>>,
    error_dir: Option<PathBuf>,
    include_traceback: bool,
}

impl ErrorReporterBuilder {
    /// Replaces the default logging alert sink.
    pub fn sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Publishes an `ERROR_REPORTED` event per report on `bus`.
    pub fn bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Enables JSON persistence under `dir`.
    pub fn error_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.error_dir = Some(dir.into());
        self
    }

    /// Captures backtraces into reports (development environments).
    pub fn include_traceback(mut self, include: bool) -> Self {
        self.include_traceback = include;
        self
    }

    /// Builds the reporter.
    pub fn build(self) -> Arc<ErrorReporter> {
        Arc::new(ErrorReporter {
            inner: Mutex::new(ReporterInner {
                ring: VecDeque::new(),
                stats: ErrorStats::default(),
                rules: Vec::new(),
            }),
            sink: self.sink.unwrap_or_else(|| Arc::new(LogAlertSink)),
            bus: self.bus,
            error_dir: self.error_dir,
            include_traceback: self.include_traceback,
        })
    }
}
