// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logging Context
//!
//! Per-flow correlation for structured logs.
//!
//! Cooperative tasks migrate threads, so correlation travels in an explicit
//! context object rather than thread-local state: the flow manager mints a
//! [`CorrelationContext`] per run, every stage receives it, and all log
//! lines and error reports inside the run carry the same correlation id.

use serde_json::Value;
use uuid::Uuid;

use research_flow_domain::FlowId;

/// Explicit correlation context carried through a flow's execution.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    pub correlation_id: Uuid,
    pub flow_id: FlowId,
}

impl CorrelationContext {
    /// Mints a fresh correlation id for `flow_id`.
    pub fn new(flow_id: FlowId) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            flow_id,
        }
    }

    /// A tracing span carrying the correlation fields; enter it around any
    /// work belonging to the flow.
    pub fn span(&self, stage: &str) -> tracing::Span {
        tracing::info_span!(
            "flow_stage",
            correlation_id = %self.correlation_id,
            flow_id = %self.flow_id,
            stage = stage
        )
    }

    /// Context fields for error reports.
    pub fn report_fields(&self) -> std::collections::BTreeMap<String, Value> {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert(
            "correlation_id".to_string(),
            Value::from(self.correlation_id.to_string()),
        );
        fields.insert("flow_id".to_string(), Value::from(self.flow_id.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_fields() {
        let flow_id = FlowId::new();
        let ctx = CorrelationContext::new(flow_id);

        let fields = ctx.report_fields();
        assert_eq!(fields["flow_id"], Value::from(flow_id.to_string()));
        assert!(fields.contains_key("correlation_id"));
    }

    #[test]
    fn test_distinct_correlation_ids() {
        let flow_id = FlowId::new();
        assert_ne!(
            CorrelationContext::new(flow_id).correlation_id,
            CorrelationContext::new(flow_id).correlation_id
        );
    }
}
