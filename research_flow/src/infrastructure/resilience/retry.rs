// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Retry Strategy
//!
//! Exponential-backoff retry for calls that may fail with transient errors.
//!
//! ## Overview
//!
//! A [`RetryPolicy`] wraps one async operation and re-invokes it on retryable
//! failure, sleeping `min(max_delay, base_delay * multiplier^(attempt-1)) *
//! jitter` between attempts. Attempts are strictly sequential per invocation;
//! the policy never races duplicate calls.
//!
//! ## Boundary behavior
//!
//! `max_attempts` counts total attempts. A policy with `max_attempts <= 1`
//! (including 0) executes the operation exactly once and never sleeps.
//!
//! ## Retryability
//!
//! [`RetryPolicy::execute`] retries on [`FlowError::is_transient`] kinds:
//! Transient, Timeout, RateLimit, ServiceUnavailable, Connection. Use
//! [`RetryPolicy::execute_if`] to supply a different predicate.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use research_flow_domain::{Configuration, FlowError};

/// Jitter applied to the computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Use the computed delay as-is.
    None,
    /// Scale the delay by a uniform factor in `[0.5, 1.0)`.
    Uniform,
}

/// Exponential-backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Backoff growth factor.
    pub multiplier: f64,

    /// Upper bound on the computed delay, before jitter.
    pub max_delay: Option<Duration>,

    /// Jitter mode.
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: None,
            jitter: Jitter::Uniform,
        }
    }
}

impl RetryPolicy {
    /// Builds the policy a research run configures for its external calls.
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: config.retry_delay_duration(),
            ..Default::default()
        }
    }

    /// A policy that executes exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Computes the sleep before attempt `attempt + 1` (1-based attempts),
    /// jitter included.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = match self.max_delay {
            Some(max) => raw.min(max.as_secs_f64()),
            None => raw,
        };
        let factor = match self.jitter {
            Jitter::None => 1.0,
            Jitter::Uniform => rand::rng().random_range(0.5..1.0),
        };
        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    /// Executes `op`, retrying transient failures.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, FlowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FlowError>>,
    {
        self.execute_if(op, FlowError::is_transient).await
    }

    /// Executes `op`, retrying failures for which `retryable` returns true.
    ///
    /// On a non-retryable failure, or once attempts are exhausted, the last
    /// error propagates unchanged.
    pub async fn execute_if<T, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, FlowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FlowError>>,
        P: Fn(&FlowError) -> bool,
    {
        let total = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < total && retryable(&err) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = total,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt >= total && retryable(&err) {
                        error!(max_attempts = total, error = %err, "all retry attempts failed");
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn flaky(failures: u32, counter: Arc<AtomicU32>) -> impl FnMut() -> futures::future::Ready<Result<u32, FlowError>> {
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                futures::future::ready(Err(FlowError::timeout("still warming up")))
            } else {
                futures::future::ready(Ok(n))
            }
        }
    }

    /// Tests that a success after transient failures returns the value and
    /// makes exactly the expected number of attempts.
    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            jitter: Jitter::None,
            base_delay: Duration::from_millis(10),
            ..Default::default()
        };

        let result = policy.execute(flaky(2, Arc::clone(&counter))).await.unwrap();
        assert_eq!(result, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    /// Tests that non-retryable errors propagate immediately.
    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let counter = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let c = Arc::clone(&counter);
        let err = policy
            .execute(move || {
                c.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(Err::<(), _>(FlowError::validation("bad input")))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::Validation(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    /// Tests exhaustion propagates the last error after max_attempts tries.
    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_propagates_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter: Jitter::None,
            ..Default::default()
        };

        let err = policy.execute(flaky(10, Arc::clone(&counter))).await.unwrap_err();
        assert!(matches!(err, FlowError::Timeout(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    /// Boundary: `max_attempts = 0` executes once with no sleep.
    #[tokio::test]
    async fn test_zero_attempts_executes_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };

        let err = policy.execute(flaky(10, Arc::clone(&counter))).await.unwrap_err();
        assert!(matches!(err, FlowError::Timeout(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    /// Tests the backoff schedule doubles and respects the cap.
    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Some(Duration::from_secs(3)),
            jitter: Jitter::None,
            ..Default::default()
        };

        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        // 4s capped at 3s
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(3));
    }

    /// Tests uniform jitter lands in `[0.5, 1.0) * backoff`.
    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(2),
            jitter: Jitter::Uniform,
            ..Default::default()
        };

        for _ in 0..100 {
            let d = policy.backoff_delay(1).as_secs_f64();
            assert!((1.0..2.0).contains(&d), "jittered delay {} out of bounds", d);
        }
    }
}
