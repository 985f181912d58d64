// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Error Envelope
//!
//! The transport-agnostic failure payload returned by control operations.
//! The status code derives from the error kind (Validation→400,
//! Authentication→401, Authorization→403, NotFound→404, Timeout→408,
//! RateLimit→429, Connection/Resource→503, others→500); traceback inclusion
//! is gated on the deployment environment and defaults off in production.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use research_flow_domain::FlowError;

use crate::infrastructure::config::RuntimeEnv;

/// Single authoritative content type for envelope payloads.
pub const ENVELOPE_CONTENT_TYPE: &str = "application/json";

/// Failure payload for synchronous control operations.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorEnvelope {
    pub detail: String,
    pub error_type: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ErrorEnvelope {
    /// Builds an envelope for `err` under the given deployment environment.
    pub fn from_error(err: &FlowError, env: RuntimeEnv) -> Self {
        let details = match err {
            FlowError::RateLimit { retry_after, .. } => serde_json::json!({
                "retry_after_ms": retry_after.map(|d| d.as_millis() as u64),
            }),
            FlowError::CircuitOpen {
                name,
                recovery_remaining,
            } => serde_json::json!({
                "circuit": name,
                "recovery_remaining_ms": recovery_remaining.as_millis() as u64,
            }),
            _ => Value::Null,
        };

        Self {
            detail: err.to_string(),
            error_type: err.kind_name().to_string(),
            status: err.status_code(),
            timestamp: Utc::now(),
            details,
            traceback: if env.include_traceback() {
                Some(std::backtrace::Backtrace::force_capture().to_string())
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        let envelope = ErrorEnvelope::from_error(&FlowError::not_found("flow"), RuntimeEnv::Production);
        assert_eq!(envelope.status, 404);
        assert_eq!(envelope.error_type, "NotFoundError");
        assert!(envelope.traceback.is_none());
    }

    #[test]
    fn test_traceback_gated_by_environment() {
        let err = FlowError::internal("boom");
        assert!(ErrorEnvelope::from_error(&err, RuntimeEnv::Development).traceback.is_some());
        assert!(ErrorEnvelope::from_error(&err, RuntimeEnv::Production).traceback.is_none());
    }

    #[test]
    fn test_structured_details() {
        let err = FlowError::RateLimit {
            message: "slow down".into(),
            retry_after: Some(std::time::Duration::from_secs(3)),
        };
        let envelope = ErrorEnvelope::from_error(&err, RuntimeEnv::Production);
        assert_eq!(envelope.status, 429);
        assert_eq!(envelope.details["retry_after_ms"], 3000);
    }
}
