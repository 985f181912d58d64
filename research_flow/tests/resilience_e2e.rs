// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end resilience: the circuit opens under sustained backend failure,
//! sheds load while open, and recovers through a half-open probe - observed
//! through the search registry rather than the breaker in isolation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::StubBackend;
use research_flow::infrastructure::resilience::{BreakerState, CircuitBreaker};
use research_flow::infrastructure::search::SearchRegistry;
use research_flow_domain::{Configuration, SearchApi, SearchBackend};

fn config() -> Configuration {
    Configuration {
        max_retries: 1, // one attempt per registry call: breaker counts each
        retry_delay: 0.001,
        enable_fallback_apis: false,
        enable_search_cache: false,
        ..Default::default()
    }
}

/// Scenario: circuit opens then recovers. The backend fails its first five
/// calls; with the default threshold of five the breaker opens on the fifth
/// failure, rejects the next call without touching the backend, and after
/// the recovery window a successful probe closes it again.
#[tokio::test(start_paused = true)]
async fn circuit_opens_and_recovers_through_registry() {
    let label = "breaker-recovery";
    let breaker_name = format!("search:{}:tavily", label);

    let backend = StubBackend::failing(SearchApi::Tavily, 5);
    let mut registry = SearchRegistry::with_label(label, Duration::from_secs(3600));
    registry.register(Arc::clone(&backend) as Arc<dyn SearchBackend>);
    let config = config();

    // Five failing calls trip the breaker.
    for _ in 0..5 {
        let outcome = registry.execute("fusion", &config).await;
        assert!(outcome.hits.is_empty());
    }
    assert_eq!(backend.calls(), 5);
    assert_eq!(
        CircuitBreaker::all_states()[&breaker_name],
        BreakerState::Open
    );

    // While open, calls shed load: the backend is not touched.
    let outcome = registry.execute("fusion", &config).await;
    assert!(outcome.hits.is_empty());
    assert_eq!(backend.calls(), 5);

    // After the recovery window, the half-open probe succeeds and the
    // circuit closes.
    tokio::time::advance(Duration::from_secs(61)).await;
    let outcome = registry.execute("fusion", &config).await;
    assert_eq!(outcome.backend, Some(SearchApi::Tavily));
    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(backend.calls(), 6);
    assert_eq!(
        CircuitBreaker::all_states()[&breaker_name],
        BreakerState::Closed
    );
}

/// An open primary circuit diverts traffic to the fallback backend instead
/// of shedding the query entirely.
#[tokio::test(start_paused = true)]
async fn open_circuit_triggers_fallback_backend() {
    let label = "breaker-fallback";
    let primary = StubBackend::failing(SearchApi::Tavily, u32::MAX);
    let fallback = StubBackend::new(SearchApi::Exa);

    let mut registry = SearchRegistry::with_label(label, Duration::from_secs(3600));
    registry.register(Arc::clone(&primary) as Arc<dyn SearchBackend>);
    registry.register(Arc::clone(&fallback) as Arc<dyn SearchBackend>);

    let config = Configuration {
        enable_fallback_apis: true,
        fallback_apis: vec![SearchApi::Exa],
        enable_search_cache: false,
        ..config()
    };

    // Trip the primary breaker.
    for _ in 0..5 {
        let outcome = registry.execute("plasma", &config).await;
        assert_eq!(outcome.backend, Some(SearchApi::Exa));
    }
    let primary_calls = primary.calls();
    assert_eq!(
        CircuitBreaker::all_states()[&format!("search:{}:tavily", label)],
        BreakerState::Open
    );

    // Open primary short-circuits; the fallback still serves.
    let outcome = registry.execute("plasma", &config).await;
    assert_eq!(outcome.backend, Some(SearchApi::Exa));
    assert_eq!(primary.calls(), primary_calls);
}

/// Cache freshness law through the registry: with caching enabled, an
/// identical query within the TTL is served without a backend call, and
/// after expiry the backend is consulted again.
#[tokio::test(start_paused = true)]
async fn cache_ttl_observed_via_backend_counters() {
    let label = "cache-ttl";
    let backend = StubBackend::new(SearchApi::Tavily);
    let mut registry = SearchRegistry::with_label(label, Duration::from_secs(100));
    registry.register(Arc::clone(&backend) as Arc<dyn SearchBackend>);

    let config = Configuration {
        enable_fallback_apis: false,
        cache_ttl: 100,
        ..Default::default()
    };

    registry.execute("tidal energy", &config).await;
    registry.execute("tidal energy", &config).await;
    assert_eq!(backend.calls(), 1);

    tokio::time::advance(Duration::from_secs(101)).await;
    let outcome = registry.execute("tidal energy", &config).await;
    assert!(!outcome.from_cache);
    assert_eq!(backend.calls(), 2);
}
