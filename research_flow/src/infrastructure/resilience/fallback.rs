// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Fallback Strategy
//!
//! Substitutes an alternate operation when the primary fails with a handled
//! error kind. The fallback runs synchronously with respect to the caller and
//! may itself fail; that error propagates. Errors outside the handled set
//! bypass the fallback entirely.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use research_flow_domain::FlowError;

/// Predicate selecting which errors a strategy handles.
pub type ErrorPredicate = Arc<dyn Fn(&FlowError) -> bool + Send + Sync>;

/// Async producer of a substitute result.
pub type FallbackFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, FlowError>> + Send + Sync>;

/// Fallback strategy wrapping one primary operation.
#[derive(Clone)]
pub struct FallbackStrategy<T> {
    fallback: FallbackFn<T>,
    handled: ErrorPredicate,
}

impl<T> FallbackStrategy<T> {
    /// Creates a strategy handling every error kind.
    pub fn new(fallback: FallbackFn<T>) -> Self {
        Self {
            fallback,
            handled: Arc::new(|_| true),
        }
    }

    /// Creates a strategy handling only errors matching `handled`.
    pub fn handling(fallback: FallbackFn<T>, handled: ErrorPredicate) -> Self {
        Self { fallback, handled }
    }

    /// Runs `op`, invoking the fallback on a handled failure.
    pub async fn execute<F, Fut>(&self, op: F) -> Result<T, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, FlowError>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(err) if (self.handled)(&err) => {
                warn!(error = %err, "primary failed, invoking fallback");
                (self.fallback)().await
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_fallback(value: &'static str) -> FallbackFn<String> {
        Arc::new(move || Box::pin(async move { Ok(value.to_string()) }))
    }

    /// A handled failure produces the fallback value.
    #[tokio::test]
    async fn test_fallback_on_handled_error() {
        let strategy = FallbackStrategy::handling(
            constant_fallback("substitute"),
            Arc::new(FlowError::is_transient),
        );

        let result = strategy
            .execute(|| async { Err(FlowError::timeout("primary slow")) })
            .await
            .unwrap();
        assert_eq!(result, "substitute");
    }

    /// A non-handled failure bypasses the fallback.
    #[tokio::test]
    async fn test_unhandled_error_bypasses() {
        let strategy = FallbackStrategy::handling(
            constant_fallback("substitute"),
            Arc::new(FlowError::is_transient),
        );

        let err = strategy
            .execute(|| async { Err::<String, _>(FlowError::validation("bad")) })
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    /// A successful primary never touches the fallback.
    #[tokio::test]
    async fn test_primary_success_wins() {
        let strategy = FallbackStrategy::new(constant_fallback("substitute"));
        let result = strategy.execute(|| async { Ok("primary".to_string()) }).await.unwrap();
        assert_eq!(result, "primary");
    }

    /// A failing fallback propagates its own error.
    #[tokio::test]
    async fn test_failing_fallback_propagates() {
        let strategy: FallbackStrategy<String> = FallbackStrategy::new(Arc::new(|| {
            Box::pin(async { Err(FlowError::ServiceUnavailable("fallback down".into())) })
        }));

        let err = strategy
            .execute(|| async { Err::<String, _>(FlowError::timeout("primary slow")) })
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ServiceUnavailable(_)));
    }
}
