// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Search Backend Registry
//!
//! Uniform execution surface over every registered search provider.
//!
//! ## Call path
//!
//! [`SearchRegistry::execute`] runs one query with the full protection
//! stack:
//!
//! 1. Cache lookup keyed on `(query, backend, params)` when caching is
//!    enabled; a fresh hit returns without touching any provider
//! 2. The primary backend, behind its token bucket, retry policy (defaults:
//!    3 attempts, 1s base, doubling, uniform jitter) and its circuit breaker
//! 3. On exhaustion, the configured `fallback_apis` in order, each with the
//!    same wrapping; the first success wins and is cached under its own key
//! 4. When every provider fails, an **empty hit list** is returned with a
//!    logged error - search failures never propagate into a stage
//!
//! ## Protection state
//!
//! Each backend gets an independent token bucket sized from its advertised
//! requests-per-minute, and a circuit breaker registered process-wide under
//! `search:<label>:<api>` so every call site sharing the label observes one
//! consistent breaker state.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use research_flow_domain::{
    Configuration, FlowError, SearchApi, SearchBackend, SearchHit, SearchParams,
};

use crate::infrastructure::resilience::{
    BreakerConfig, CircuitBreaker, Jitter, RetryPolicy, StaleCache,
};

use super::rate_limit::TokenBucket;

/// Maps a provider HTTP status onto the domain taxonomy (normalized error
/// mapping used by backend adapters): 429 → RateLimit with the provider's
/// wait hint, 5xx → ServiceUnavailable, everything else → Api.
pub fn map_http_status(
    status: u16,
    message: impl Into<String>,
    retry_after: Option<std::time::Duration>,
) -> FlowError {
    let message = message.into();
    match status {
        429 => FlowError::RateLimit { message, retry_after },
        500..=599 => FlowError::ServiceUnavailable(message),
        _ => FlowError::Api(format!("HTTP {}: {}", status, message)),
    }
}

/// Outcome of one registry execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    /// Provider that served the hits; `None` when every provider failed.
    pub backend: Option<SearchApi>,
    /// True when the hits came from the cache without a provider call.
    pub from_cache: bool,
}

impl SearchOutcome {
    fn empty() -> Self {
        Self {
            hits: Vec::new(),
            backend: None,
            from_cache: false,
        }
    }
}

struct BackendSlot {
    backend: Arc<dyn SearchBackend>,
    limiter: TokenBucket,
    breaker: Arc<CircuitBreaker>,
}

/// Registry of search providers with per-provider protection state.
pub struct SearchRegistry {
    label: String,
    slots: HashMap<SearchApi, BackendSlot>,
    cache: Arc<StaleCache<Vec<SearchHit>>>,
}

impl SearchRegistry {
    /// Creates an empty registry whose breakers are registered under
    /// `search:<label>:<api>`.
    pub fn with_label(label: impl Into<String>, cache_ttl: std::time::Duration) -> Self {
        Self {
            label: label.into(),
            slots: HashMap::new(),
            cache: StaleCache::new(cache_ttl),
        }
    }

    /// Creates a registry with the default label.
    pub fn new(cache_ttl: std::time::Duration) -> Self {
        Self::with_label("default", cache_ttl)
    }

    /// Registers a backend adapter, creating its token bucket and breaker.
    pub fn register(&mut self, backend: Arc<dyn SearchBackend>) {
        let api = backend.api();
        let limiter = TokenBucket::per_minute(backend.requests_per_minute());
        let breaker = CircuitBreaker::instance_with(
            &format!("search:{}:{}", self.label, api),
            BreakerConfig::default(),
        );
        self.slots.insert(
            api,
            BackendSlot {
                backend,
                limiter,
                breaker,
            },
        );
    }

    /// Registered provider tags.
    pub fn backends(&self) -> Vec<SearchApi> {
        let mut apis: Vec<SearchApi> = self.slots.keys().copied().collect();
        apis.sort();
        apis
    }

    /// True when `api` has a registered adapter.
    pub fn supports(&self, api: SearchApi) -> bool {
        self.slots.contains_key(&api)
    }

    /// Executes `query` with caching, retry, circuit breaking and fallback
    /// ordering. Never returns an error: total failure yields an empty
    /// outcome with a logged error.
    pub async fn execute(&self, query: &str, config: &Configuration) -> SearchOutcome {
        let params = &config.search_params;
        let primary = config.search_api;

        if config.enable_search_cache {
            let key = cache_key(query, primary, params);
            if let Some(hits) = self.cache.get_fresh(&key) {
                debug!(query, backend = %primary, "search cache hit");
                return SearchOutcome {
                    hits,
                    backend: Some(primary),
                    from_cache: true,
                };
            }
        }

        match self.try_backend(primary, query, params, config).await {
            Ok(hits) => {
                self.store(query, primary, params, &hits, config);
                return SearchOutcome {
                    hits,
                    backend: Some(primary),
                    from_cache: false,
                };
            }
            Err(err) => {
                warn!(query, backend = %primary, error = %err, "primary search backend failed");
            }
        }

        if config.enable_fallback_apis {
            for api in config.fallback_apis.iter().copied() {
                if api == primary {
                    continue;
                }
                match self.try_backend(api, query, params, config).await {
                    Ok(hits) => {
                        info!(query, backend = %api, "fallback search backend succeeded");
                        self.store(query, api, params, &hits, config);
                        return SearchOutcome {
                            hits,
                            backend: Some(api),
                            from_cache: false,
                        };
                    }
                    Err(err) => {
                        warn!(query, backend = %api, error = %err, "fallback search backend failed");
                    }
                }
            }
        }

        error!(query, "all search backends failed; returning empty results");
        SearchOutcome::empty()
    }

    /// One backend attempt: token bucket, then retry around the circuit
    /// breaker around the adapter call.
    async fn try_backend(
        &self,
        api: SearchApi,
        query: &str,
        params: &SearchParams,
        config: &Configuration,
    ) -> Result<Vec<SearchHit>, FlowError> {
        let slot = self
            .slots
            .get(&api)
            .ok_or_else(|| FlowError::configuration(format!("Search backend {} is not registered", api)))?;

        slot.limiter.acquire().await;

        let policy = RetryPolicy {
            max_attempts: config.max_retries,
            base_delay: config.retry_delay_duration(),
            multiplier: 2.0,
            max_delay: None,
            jitter: Jitter::Uniform,
        };

        policy
            .execute(|| slot.breaker.call(|| slot.backend.search(query, params)))
            .await
    }

    fn store(
        &self,
        query: &str,
        api: SearchApi,
        params: &SearchParams,
        hits: &[SearchHit],
        config: &Configuration,
    ) {
        if config.enable_search_cache && !hits.is_empty() {
            self.cache.put(&cache_key(query, api, params), hits.to_vec());
        }
    }

    /// Drops expired cache entries; returns how many were removed.
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_expired()
    }
}

/// Deterministic cache key over `(query, backend, params)`. `params.extra`
/// is an ordered map, so serialization order is stable.
fn cache_key(query: &str, api: SearchApi, params: &SearchParams) -> String {
    format!(
        "search({},{},{},{},{:?})",
        api, query, params.max_results, params.include_raw_content, params.extra
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend stub that fails a scripted number of calls, then succeeds.
    struct ScriptedBackend {
        api: SearchApi,
        fail_first: u32,
        calls: AtomicU32,
        error: fn(&str) -> FlowError,
    }

    impl ScriptedBackend {
        fn new(api: SearchApi, fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                api,
                fail_first,
                calls: AtomicU32::new(0),
                error: |m| FlowError::ServiceUnavailable(m.to_string()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchBackend for ScriptedBackend {
        fn api(&self) -> SearchApi {
            self.api
        }

        async fn search(&self, query: &str, _params: &SearchParams) -> Result<Vec<SearchHit>, FlowError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err((self.error)("scripted failure"))
            } else {
                Ok(vec![SearchHit::new(
                    format!("{} result", self.api),
                    "https://example.org",
                    format!("content for {query}"),
                )])
            }
        }
    }

    fn config_with(primary: SearchApi, fallbacks: Vec<SearchApi>) -> Configuration {
        Configuration {
            search_api: primary,
            fallback_apis: fallbacks,
            max_retries: 1,
            retry_delay: 0.001,
            ..Default::default()
        }
    }

    /// A healthy primary serves hits and populates the cache; the second
    /// identical call within the TTL never reaches the backend.
    #[tokio::test(start_paused = true)]
    async fn test_cache_freshness_law() {
        let backend = ScriptedBackend::new(SearchApi::Tavily, 0);
        let mut registry = SearchRegistry::with_label("cache-law", std::time::Duration::from_secs(3600));
        registry.register(Arc::clone(&backend) as Arc<dyn SearchBackend>);

        let config = config_with(SearchApi::Tavily, vec![]);
        let first = registry.execute("photosynthesis", &config).await;
        assert_eq!(first.backend, Some(SearchApi::Tavily));
        assert!(!first.from_cache);

        let second = registry.execute("photosynthesis", &config).await;
        assert!(second.from_cache);
        assert_eq!(second.hits, first.hits);
        assert_eq!(backend.calls(), 1);
    }

    /// Primary exhaustion falls through the configured fallback order and
    /// the first healthy fallback wins.
    #[tokio::test(start_paused = true)]
    async fn test_fallback_ordering() {
        let primary = ScriptedBackend::new(SearchApi::Tavily, u32::MAX);
        let dead_fallback = ScriptedBackend::new(SearchApi::Perplexity, u32::MAX);
        let live_fallback = ScriptedBackend::new(SearchApi::Exa, 0);

        let mut registry = SearchRegistry::with_label("fallback-order", std::time::Duration::from_secs(60));
        registry.register(Arc::clone(&primary) as Arc<dyn SearchBackend>);
        registry.register(Arc::clone(&dead_fallback) as Arc<dyn SearchBackend>);
        registry.register(Arc::clone(&live_fallback) as Arc<dyn SearchBackend>);

        let config = config_with(
            SearchApi::Tavily,
            vec![SearchApi::Tavily, SearchApi::Perplexity, SearchApi::Exa],
        );
        let outcome = registry.execute("q", &config).await;

        assert_eq!(outcome.backend, Some(SearchApi::Exa));
        assert_eq!(outcome.hits.len(), 1);
        assert!(primary.calls() >= 1);
        assert!(dead_fallback.calls() >= 1);
    }

    /// Total failure yields an empty outcome instead of an error.
    #[tokio::test(start_paused = true)]
    async fn test_total_failure_returns_empty() {
        let primary = ScriptedBackend::new(SearchApi::Tavily, u32::MAX);
        let mut registry = SearchRegistry::with_label("total-failure", std::time::Duration::from_secs(60));
        registry.register(Arc::clone(&primary) as Arc<dyn SearchBackend>);

        let config = config_with(SearchApi::Tavily, vec![SearchApi::Tavily]);
        let outcome = registry.execute("q", &config).await;

        assert!(outcome.hits.is_empty());
        assert_eq!(outcome.backend, None);
    }

    /// The retry layer inside the registry absorbs transient blips without
    /// engaging fallbacks.
    #[tokio::test(start_paused = true)]
    async fn test_retry_absorbs_transient_failures() {
        let primary = ScriptedBackend::new(SearchApi::Tavily, 2);
        let fallback = ScriptedBackend::new(SearchApi::Exa, 0);

        let mut registry = SearchRegistry::with_label("retry-absorb", std::time::Duration::from_secs(60));
        registry.register(Arc::clone(&primary) as Arc<dyn SearchBackend>);
        registry.register(Arc::clone(&fallback) as Arc<dyn SearchBackend>);

        let mut config = config_with(SearchApi::Tavily, vec![SearchApi::Exa]);
        config.max_retries = 3;

        let outcome = registry.execute("q", &config).await;
        assert_eq!(outcome.backend, Some(SearchApi::Tavily));
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 0);
    }

    /// HTTP status normalization follows the documented mapping.
    #[test]
    fn test_http_status_mapping() {
        assert!(matches!(
            map_http_status(429, "slow down", Some(std::time::Duration::from_secs(2))),
            FlowError::RateLimit {
                retry_after: Some(_),
                ..
            }
        ));
        assert!(matches!(
            map_http_status(503, "unavailable", None),
            FlowError::ServiceUnavailable(_)
        ));
        assert!(matches!(map_http_status(404, "nope", None), FlowError::Api(_)));
    }
}
