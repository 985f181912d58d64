// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Supervision Utilities
//!
//! Supervised spawning for background work that must never fail silently.
//!
//! ## Purpose
//!
//! - Prevents spawn-and-forget: callers receive a handle they must await
//! - Ensures all task errors are captured and logged
//! - Converts panics into typed errors instead of losing them

use tokio::task::JoinHandle;
use tracing::{debug, error};

use research_flow_domain::FlowError;

/// Result type alias for application operations
pub type AppResult<T> = Result<T, FlowError>;

/// Spawns a supervised task with automatic error logging and lifecycle
/// tracking.
///
/// Wraps `tokio::spawn` with supervision that logs task start and outcome;
/// the returned handle must be awaited (see [`join_supervised`]).
pub fn spawn_supervised<F, T>(name: &'static str, fut: F) -> JoinHandle<AppResult<T>>
where
    F: std::future::Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    debug!(task = name, "task starting");

    tokio::spawn(async move {
        let result = fut.await;

        match &result {
            Ok(_) => debug!(task = name, "task completed successfully"),
            Err(e) => error!(task = name, error = ?e, "task failed"),
        }

        result
    })
}

/// Awaits a supervised task handle and propagates errors.
///
/// Handles both task panics (via `JoinError`, converted to
/// [`FlowError::Internal`]) and the task's own typed errors.
pub async fn join_supervised<T>(handle: JoinHandle<AppResult<T>>) -> AppResult<T> {
    match handle.await {
        Ok(result) => result,
        Err(join_err) if join_err.is_cancelled() => Err(FlowError::cancelled("task aborted")),
        Err(join_err) => Err(FlowError::internal(format!("task panicked: {}", join_err))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_supervised_success() {
        let handle = spawn_supervised("ok-task", async { Ok(42) });
        assert_eq!(join_supervised(handle).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_supervised_error_propagates() {
        let handle = spawn_supervised("failing-task", async {
            Err::<(), _>(FlowError::internal("boom"))
        });
        assert!(join_supervised(handle).await.is_err());
    }

    #[tokio::test]
    async fn test_supervised_panic_is_captured() {
        let handle = spawn_supervised::<_, ()>("panicking-task", async { panic!("kaboom") });
        let err = join_supervised(handle).await.unwrap_err();
        assert!(matches!(err, FlowError::Internal(_)));
    }
}
