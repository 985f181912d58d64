// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Composite Strategy
//!
//! Folds an ordered list of resilience primitives around one operation:
//! given `[S1, S2, ..., Sn]`, the composed call is `S1(S2(...Sn(op)...))` -
//! the first strategy is outermost.
//!
//! Strategies are a tagged union rather than trait objects; the engine
//! switches on the tag, which keeps the set closed and the dispatch visible.
//!
//! Example: `[Cache, Retry]` retries the inner call until exhaustion, then
//! lets the cache serve a stale result for a handled error. No strategy
//! silently swallows errors: each one either produces a result, substitutes
//! one, or propagates a typed error.

use std::sync::Arc;

use futures::future::BoxFuture;

use research_flow_domain::FlowError;

use super::cache::CacheStrategy;
use super::circuit_breaker::CircuitBreaker;
use super::fallback::FallbackStrategy;
use super::retry::RetryPolicy;

/// Shared async operation a composite wraps.
pub type Operation<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, FlowError>> + Send + Sync>;

/// One resilience primitive in a composite chain.
#[derive(Clone)]
pub enum Strategy<T> {
    /// Exponential-backoff retry.
    Retry(RetryPolicy),
    /// Short-circuit through a (possibly shared) circuit breaker.
    Breaker(Arc<CircuitBreaker>),
    /// Substitute operation on handled failure.
    Fallback(FallbackStrategy<T>),
    /// Stale-result fallback bound to a cache key.
    Cache(CacheStrategy<T>),
}

/// Ordered composition of resilience primitives.
#[derive(Clone)]
pub struct CompositeStrategy<T> {
    strategies: Vec<Strategy<T>>,
}

impl<T> CompositeStrategy<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a composite; the first strategy is outermost.
    pub fn new(strategies: Vec<Strategy<T>>) -> Self {
        Self { strategies }
    }

    /// Executes `op` through the composed chain.
    pub async fn execute(&self, op: Operation<T>) -> Result<T, FlowError> {
        run_composite(&self.strategies, op).await
    }
}

/// Recursively applies `strategies` around `op`, head outermost.
pub fn run_composite<'a, T>(
    strategies: &'a [Strategy<T>],
    op: Operation<T>,
) -> BoxFuture<'a, Result<T, FlowError>>
where
    T: Clone + Send + Sync + 'static,
{
    Box::pin(async move {
        match strategies.split_first() {
            None => op().await,
            Some((Strategy::Retry(policy), rest)) => {
                policy.execute(|| run_composite(rest, Arc::clone(&op))).await
            }
            Some((Strategy::Breaker(breaker), rest)) => {
                breaker.call(|| run_composite(rest, Arc::clone(&op))).await
            }
            Some((Strategy::Fallback(fallback), rest)) => {
                fallback.execute(|| run_composite(rest, Arc::clone(&op))).await
            }
            Some((Strategy::Cache(cache), rest)) => {
                cache.execute(|| run_composite(rest, Arc::clone(&op))).await
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::resilience::cache::StaleCache;
    use crate::infrastructure::resilience::retry::Jitter;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn counting_failures(counter: Arc<AtomicU32>) -> Operation<u32> {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FlowError::timeout("always down"))
            })
        })
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::from_millis(1),
            jitter: Jitter::None,
            ..Default::default()
        }
    }

    /// `[Cache, Retry]`: retry exhausts the inner call, then the cache serves
    /// a stale result for the handled error.
    #[tokio::test(start_paused = true)]
    async fn test_cache_over_retry() {
        let cache = StaleCache::new(Duration::from_secs(60));
        cache.put("k", 99);

        let attempts = Arc::new(AtomicU32::new(0));
        let composite = CompositeStrategy::new(vec![
            Strategy::Cache(CacheStrategy::new(Arc::clone(&cache), "k")),
            Strategy::Retry(fast_retry(3)),
        ]);

        let value = composite.execute(counting_failures(Arc::clone(&attempts))).await.unwrap();
        assert_eq!(value, 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    /// `[Retry, Fallback]`: the fallback substitutes on every inner failure,
    /// so the retry layer sees a success on the first attempt.
    #[tokio::test]
    async fn test_retry_over_fallback() {
        let attempts = Arc::new(AtomicU32::new(0));
        let fallback = FallbackStrategy::new(Arc::new(|| Box::pin(async { Ok(7) })));

        let composite = CompositeStrategy::new(vec![
            Strategy::Retry(fast_retry(3)),
            Strategy::Fallback(fallback),
        ]);

        let value = composite.execute(counting_failures(Arc::clone(&attempts))).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    /// An empty composite is the identity.
    #[tokio::test]
    async fn test_empty_composite_is_identity() {
        let composite: CompositeStrategy<u32> = CompositeStrategy::new(vec![]);
        let value = composite
            .execute(Arc::new(|| Box::pin(async { Ok(5) })))
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    /// Breaker inside retry: the breaker opens during the retry loop and the
    /// final error is CircuitOpen rather than the inner failure.
    #[tokio::test(start_paused = true)]
    async fn test_retry_over_breaker_opens() {
        let breaker = CircuitBreaker::new(
            "composite-retry-breaker",
            crate::infrastructure::resilience::circuit_breaker::BreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        );
        let attempts = Arc::new(AtomicU32::new(0));

        let composite = CompositeStrategy::new(vec![
            Strategy::Retry(RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
                jitter: Jitter::None,
                ..Default::default()
            }),
            Strategy::Breaker(breaker),
        ]);

        let err = composite
            .execute(counting_failures(Arc::clone(&attempts)))
            .await
            .unwrap_err();

        // Two real attempts trip the breaker; later attempts short-circuit.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(matches!(err, FlowError::CircuitOpen { .. }));
    }
}
