// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the sealed, hierarchical error system for the research
//! flow domain. Every failure in the system is classified along three axes:
//!
//! - **Kind**: the variant itself (validation, connection, rate limit, ...)
//! - **Severity**: how loudly the failure should be reported
//! - **Category**: which subsystem the failure belongs to
//!
//! ## Overview
//!
//! The error system is designed around Domain-Driven Design principles:
//!
//! - **Domain-Specific**: Errors are tailored to research workflow concepts
//! - **Hierarchical**: Errors are organized into logical categories for
//!   systematic handling
//! - **Actionable**: Each error provides sufficient context for debugging and
//!   recovery
//! - **Type-Safe**: Rust's type system ensures comprehensive error handling
//!
//! ## Transience
//!
//! A subset of kinds is *transient*: the default policy for them is
//! retry-with-backoff inside the resilience layer. These are
//! [`FlowError::Transient`], [`FlowError::Timeout`], [`FlowError::RateLimit`],
//! [`FlowError::ServiceUnavailable`] and [`FlowError::Connection`]. Everything
//! else is terminal for the attempting call and propagates.
//!
//! ## Envelope mapping
//!
//! [`FlowError::status_code`] maps each kind onto the transport-agnostic error
//! envelope status used by the control API: Validation→400,
//! Authentication→401, Authorization→403, NotFound→404, Timeout→408,
//! RateLimit→429, Connection/Resource→503, others→500.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity levels for error reporting.
///
/// Ordered so that alert thresholds can be expressed as `severity >=
/// threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    /// Stable lowercase name used in counters and persisted reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Debug => "debug",
            ErrorSeverity::Info => "info",
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories classifying which subsystem a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    System,
    Application,
    Network,
    Database,
    Authentication,
    Authorization,
    Validation,
    Resource,
    Task,
    Plugin,
    ExternalService,
    Unknown,
}

impl ErrorCategory {
    /// Stable snake_case name used in counters and persisted reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::System => "system",
            ErrorCategory::Application => "application",
            ErrorCategory::Network => "network",
            ErrorCategory::Database => "database",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Task => "task",
            ErrorCategory::Plugin => "plugin",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-specific errors for the research flow system.
///
/// This enum represents all possible errors that can occur within the domain
/// layer. Each variant includes a descriptive message and is designed to
/// provide clear information about what went wrong and potentially how to fix
/// it.
///
/// ## Design Principles
///
/// - **Specific**: Each error type represents a specific failure mode
/// - **Actionable**: Error messages provide enough context for debugging
/// - **Categorized**: Errors are grouped by type for systematic handling
/// - **Recoverable**: Some errors indicate retry-able conditions
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization denied: {0}")]
    Authorization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        /// Provider-supplied wait hint, when the backend returned one.
        retry_after: Option<Duration>,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Transformation error: {0}")]
    Transformation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Circuit '{name}' is open")]
    CircuitOpen {
        name: String,
        /// Time remaining until the breaker admits a recovery probe.
        recovery_remaining: Duration,
    },

    #[error("Concurrency error: {0}")]
    Concurrency(String),

    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Permanent error: {0}")]
    Permanent(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Creates a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a new connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a new rate-limit error without a wait hint
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimit {
            message: msg.into(),
            retry_after: None,
        }
    }

    /// Creates a new configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a new resource exhausted error
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Creates a new task error
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// Creates a new dependency error
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    /// Creates a new state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Creates a new cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable kind name used in counters, persisted reports and file names.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FlowError::Validation(_) => "ValidationError",
            FlowError::NotFound(_) => "NotFoundError",
            FlowError::Authentication(_) => "AuthenticationError",
            FlowError::Authorization(_) => "AuthorizationError",
            FlowError::Connection(_) => "ConnectionError",
            FlowError::Timeout(_) => "TimeoutError",
            FlowError::RateLimit { .. } => "RateLimitError",
            FlowError::ServiceUnavailable(_) => "ServiceUnavailableError",
            FlowError::Api(_) => "APIError",
            FlowError::Configuration(_) => "ConfigurationError",
            FlowError::ResourceExhausted(_) => "ResourceError",
            FlowError::Task(_) => "TaskError",
            FlowError::Plugin(_) => "PluginError",
            FlowError::DataProcessing(_) => "DataProcessingError",
            FlowError::Transformation(_) => "TransformationError",
            FlowError::Extraction(_) => "ExtractionError",
            FlowError::Analysis(_) => "AnalysisError",
            FlowError::CircuitOpen { .. } => "CircuitOpenError",
            FlowError::Concurrency(_) => "ConcurrencyError",
            FlowError::Dependency(_) => "DependencyError",
            FlowError::State(_) => "StateError",
            FlowError::Transient(_) => "TransientError",
            FlowError::Permanent(_) => "PermanentError",
            FlowError::Cancelled(_) => "CancelledError",
            FlowError::Internal(_) => "InternalError",
        }
    }

    /// Checks whether the default policy for this kind is retry-with-backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FlowError::Transient(_)
                | FlowError::Timeout(_)
                | FlowError::RateLimit { .. }
                | FlowError::ServiceUnavailable(_)
                | FlowError::Connection(_)
        )
    }

    /// Checks if the error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FlowError::Cancelled(_))
    }

    /// Default severity for reporting when the caller does not override it.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FlowError::Cancelled(_) => ErrorSeverity::Info,
            FlowError::Validation(_) | FlowError::NotFound(_) => ErrorSeverity::Warning,
            FlowError::Connection(_)
            | FlowError::Timeout(_)
            | FlowError::RateLimit { .. }
            | FlowError::ServiceUnavailable(_)
            | FlowError::Transient(_)
            | FlowError::CircuitOpen { .. } => ErrorSeverity::Warning,
            FlowError::Internal(_) | FlowError::State(_) | FlowError::Concurrency(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Default category for reporting when the caller does not override it.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FlowError::Validation(_) => ErrorCategory::Validation,
            FlowError::Authentication(_) => ErrorCategory::Authentication,
            FlowError::Authorization(_) => ErrorCategory::Authorization,
            FlowError::Connection(_) | FlowError::Timeout(_) => ErrorCategory::Network,
            FlowError::RateLimit { .. }
            | FlowError::ServiceUnavailable(_)
            | FlowError::Api(_)
            | FlowError::CircuitOpen { .. }
            | FlowError::Transient(_) => ErrorCategory::ExternalService,
            FlowError::Configuration(_) | FlowError::Internal(_) | FlowError::State(_) => ErrorCategory::System,
            FlowError::ResourceExhausted(_) => ErrorCategory::Resource,
            FlowError::Task(_) | FlowError::Dependency(_) | FlowError::Concurrency(_) | FlowError::Cancelled(_) => {
                ErrorCategory::Task
            }
            FlowError::Plugin(_) => ErrorCategory::Plugin,
            FlowError::DataProcessing(_)
            | FlowError::Transformation(_)
            | FlowError::Extraction(_)
            | FlowError::Analysis(_)
            | FlowError::NotFound(_)
            | FlowError::Permanent(_) => ErrorCategory::Application,
        }
    }

    /// Transport status for the control-API error envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            FlowError::Validation(_) => 400,
            FlowError::Authentication(_) => 401,
            FlowError::Authorization(_) => 403,
            FlowError::NotFound(_) => 404,
            FlowError::Timeout(_) => 408,
            FlowError::RateLimit { .. } => 429,
            FlowError::Connection(_)
            | FlowError::ResourceExhausted(_)
            | FlowError::ServiceUnavailable(_)
            | FlowError::CircuitOpen { .. } => 503,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        FlowError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Transformation(format!("JSON error: {}", err))
    }
}
