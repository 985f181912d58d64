// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Search Backend Port
//!
//! Infrastructure port for external search providers.
//!
//! ## Overview
//!
//! The engine treats every provider (Tavily, Perplexity, Exa, Arxiv, PubMed,
//! LinkUp, DuckDuckGo, Google) uniformly through this trait. Concrete HTTP
//! clients live outside this workspace; adapters implement [`SearchBackend`]
//! and register with the search registry, which layers caching, rate limiting,
//! retry, circuit breaking and fallback ordering on top.
//!
//! Adapters are expected to map provider failures onto the domain taxonomy
//! before returning: HTTP 429 → `RateLimit` (with `retry_after` when the
//! provider sends one), HTTP 5xx → `ServiceUnavailable`, network/TLS/DNS →
//! `Connection`, body decode failures → `Transformation`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SearchApi;
use crate::error::FlowError;

/// Parameters forwarded to a backend for one search call.
///
/// Participates in the search cache key, so the field set is kept small and
/// deterministic (`extra` is an ordered map).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum hits requested from the provider.
    pub max_results: u32,

    /// Whether to request full page content where the provider supports it.
    pub include_raw_content: bool,

    /// Provider-specific pass-through options.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            max_results: 5,
            include_raw_content: false,
            extra: BTreeMap::new(),
        }
    }
}

/// One normalized result from a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,

    /// Provider relevance score, when supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Provider-specific fields that survived normalization.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl SearchHit {
    /// Creates a hit with the three mandatory fields.
    pub fn new(title: impl Into<String>, url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
            score: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Port for an external search provider.
///
/// Implementations must be cheap to clone behind `Arc` and safe to call
/// concurrently; the registry enforces the advertised rate limit, the adapter
/// does not need to.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Which provider this adapter fronts.
    fn api(&self) -> SearchApi;

    /// Advertised provider quota in requests per minute.
    ///
    /// Drives the registry's per-backend token bucket.
    fn requests_per_minute(&self) -> u32 {
        60
    }

    /// Executes one search.
    ///
    /// # Errors
    ///
    /// Failures must be mapped onto the domain taxonomy (see module docs);
    /// the resilience layer keys its retry decision on
    /// [`FlowError::is_transient`].
    async fn search(&self, query: &str, params: &SearchParams) -> Result<Vec<SearchHit>, FlowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_hit_serialization_omits_empty_fields() {
        let hit = SearchHit::new("Title", "https://example.org", "Body");
        let json = serde_json::to_value(&hit).unwrap();
        assert!(json.get("score").is_none());
        assert!(json.get("extra").is_none());
    }

    #[test]
    fn test_search_params_default() {
        let params = SearchParams::default();
        assert_eq!(params.max_results, 5);
        assert!(!params.include_raw_content);
    }
}
