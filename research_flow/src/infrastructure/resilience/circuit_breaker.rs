// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Circuit Breaker
//!
//! Prevents cascading failures by short-circuiting calls to an unhealthy
//! service.
//!
//! ## State machine
//!
//! ```text
//! CLOSED ──(failures >= threshold)──> OPEN
//!   ^                                   │
//!   │                     (recovery_timeout elapsed)
//!   │                                   ▼
//!   └──────(probe succeeds)───────  HALF_OPEN ──(probe fails)──> OPEN
//! ```
//!
//! - **CLOSED**: calls pass through; expected failures increment the counter,
//!   a success resets it (the threshold counts *consecutive* failures)
//! - **OPEN**: calls are rejected immediately with
//!   [`FlowError::CircuitOpen`] carrying the remaining recovery time; once
//!   `recovery_timeout` has elapsed since the last failure the next call
//!   enters HALF_OPEN
//! - **HALF_OPEN**: up to `half_open_max_calls` concurrent probes are
//!   admitted; one success closes the circuit and resets the counter, any
//!   failure reopens it
//!
//! ## Registry
//!
//! Breakers are process-wide and keyed by name: every
//! [`CircuitBreaker::instance`] call with the same name returns the *same*
//! underlying state, so a backend guarded from several call sites trips as
//! one unit. State mutations take the breaker's own lock; the registry lock
//! only guards the map.
//!
//! Timekeeping uses `tokio::time::Instant`, so paused-clock tests can drive
//! recovery deterministically.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use research_flow_domain::FlowError;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Stable lowercase name for introspection endpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Tunable parameters for a circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive expected failures before the breaker opens.
    pub failure_threshold: u32,

    /// Time to wait in OPEN before admitting a recovery probe.
    pub recovery_timeout: Duration,

    /// Concurrent probes admitted in HALF_OPEN.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// Thread-safe circuit breaker with a process-wide, name-keyed registry.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a standalone breaker (not registered).
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                last_success_at: None,
                half_open_in_flight: 0,
            }),
        })
    }

    /// Gets or lazily creates the registered breaker for `name` with default
    /// configuration.
    pub fn instance(name: &str) -> Arc<Self> {
        Self::instance_with(name, BreakerConfig::default())
    }

    /// Gets or lazily creates the registered breaker for `name`.
    ///
    /// When the breaker already exists its original configuration wins;
    /// callers sharing a name must agree on parameters.
    pub fn instance_with(name: &str, config: BreakerConfig) -> Arc<Self> {
        let mut registry = registry().lock();
        Arc::clone(
            registry
                .entry(name.to_string())
                .or_insert_with(|| Self::new(name, config)),
        )
    }

    /// Snapshot of every registered breaker's state.
    pub fn all_states() -> BTreeMap<String, BreakerState> {
        let registry = registry().lock();
        registry
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }

    /// Resets every registered breaker to CLOSED.
    pub fn reset_all() {
        let breakers: Vec<Arc<CircuitBreaker>> = registry().lock().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state (resolves a due OPEN → HALF_OPEN transition lazily on
    /// the next call, not here).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Resets to CLOSED, clearing counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.half_open_in_flight = 0;
        info!(circuit = %self.name, "circuit reset to CLOSED");
    }

    /// Executes `op` through the breaker; every error counts as a failure.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, FlowError>>,
    {
        self.call_where(op, |_| true).await
    }

    /// Executes `op` through the breaker; only errors matching `expected`
    /// count as failures, others pass through without touching the state.
    pub async fn call_where<T, F, Fut, P>(&self, op: F, expected: P) -> Result<T, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, FlowError>>,
        P: Fn(&FlowError) -> bool,
    {
        let probe = self.before_call()?;

        match op().await {
            Ok(value) => {
                self.on_success(probe);
                Ok(value)
            }
            Err(err) => {
                if expected(&err) {
                    self.on_failure(probe);
                } else {
                    self.on_unexpected(probe);
                }
                Err(err)
            }
        }
    }

    /// Admission check. Returns whether the admitted call is a HALF_OPEN
    /// probe.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::CircuitOpen`] when the breaker is OPEN within its
    /// recovery window, or HALF_OPEN at probe capacity.
    fn before_call(&self) -> Result<bool, FlowError> {
        let mut inner = self.inner.lock();

        if inner.state == BreakerState::Open {
            let elapsed = inner
                .last_failure_at
                .map(|at| at.elapsed())
                .unwrap_or(Duration::MAX);

            if elapsed >= self.config.recovery_timeout {
                info!(circuit = %self.name, "circuit transitioning OPEN -> HALF_OPEN");
                inner.state = BreakerState::HalfOpen;
                inner.half_open_in_flight = 0;
            } else {
                return Err(FlowError::CircuitOpen {
                    name: self.name.clone(),
                    recovery_remaining: self.config.recovery_timeout - elapsed,
                });
            }
        }

        if inner.state == BreakerState::HalfOpen {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                return Err(FlowError::CircuitOpen {
                    name: self.name.clone(),
                    recovery_remaining: Duration::ZERO,
                });
            }
            inner.half_open_in_flight += 1;
            return Ok(true);
        }

        Ok(false)
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        inner.last_success_at = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => {
                info!(circuit = %self.name, "circuit transitioning HALF_OPEN -> CLOSED");
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.half_open_in_flight = 0;
            }
            BreakerState::Closed => {
                // The threshold counts consecutive failures.
                inner.failure_count = 0;
                if probe {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failure_count = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "circuit transitioning CLOSED -> OPEN"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                warn!(circuit = %self.name, "circuit transitioning HALF_OPEN -> OPEN");
                inner.state = BreakerState::Open;
                inner.half_open_in_flight = 0;
            }
            BreakerState::Open => {
                let _ = probe;
            }
        }
    }

    /// A completed call whose error is not expected by this breaker. Only
    /// probe accounting needs adjusting.
    fn on_unexpected(&self, probe: bool) {
        if probe {
            let mut inner = self.inner.lock();
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<CircuitBreaker>>> {
    static REGISTRY: OnceCell<Mutex<HashMap<String, Arc<CircuitBreaker>>>> = OnceCell::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, recovery_ms: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
            half_open_max_calls: 1,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), FlowError> {
        breaker
            .call(|| async { Err::<(), _>(FlowError::ServiceUnavailable("down".into())) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), FlowError> {
        breaker.call(|| async { Ok(()) }).await
    }

    /// Invariant 5: k consecutive failures in CLOSED open the circuit;
    /// after recovery_timeout a probe succeeds and the circuit closes with a
    /// zeroed counter.
    #[tokio::test(start_paused = true)]
    async fn test_open_then_recover() {
        let breaker = CircuitBreaker::new("test-open-recover", config(5, 1000));

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // Within the window, calls short-circuit with recovery info
        let err = succeed(&breaker).await.unwrap_err();
        match err {
            FlowError::CircuitOpen { recovery_remaining, .. } => {
                assert!(recovery_remaining <= Duration::from_millis(1000));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }

        // After the window, one probe success closes the circuit
        tokio::time::advance(Duration::from_millis(1001)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    /// Boundary: threshold 1 opens on the first failure.
    #[tokio::test]
    async fn test_threshold_one_opens_immediately() {
        let breaker = CircuitBreaker::new("test-threshold-one", config(1, 60_000));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    /// A failed HALF_OPEN probe reopens the circuit.
    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("test-probe-fail", config(2, 100));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_millis(150)).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    /// Successes reset the consecutive-failure counter in CLOSED.
    #[tokio::test]
    async fn test_success_resets_counter() {
        let breaker = CircuitBreaker::new("test-reset-counter", config(3, 60_000));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.failure_count(), 0);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    /// Unexpected errors bypass failure accounting.
    #[tokio::test]
    async fn test_unexpected_errors_bypass() {
        let breaker = CircuitBreaker::new("test-unexpected", config(1, 60_000));
        let err = breaker
            .call_where(
                || async { Err::<(), _>(FlowError::validation("bad")) },
                |e| e.is_transient(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::Validation(_)));
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    /// Same name resolves to the same underlying breaker state.
    #[tokio::test]
    async fn test_registry_shares_state() {
        let name = "test-registry-shared";
        let a = CircuitBreaker::instance_with(name, config(1, 60_000));
        let b = CircuitBreaker::instance(name);

        let _ = fail(&a).await;
        assert_eq!(b.state(), BreakerState::Open);
        assert!(CircuitBreaker::all_states().contains_key(name));

        b.reset();
        assert_eq!(a.state(), BreakerState::Closed);
    }
}
