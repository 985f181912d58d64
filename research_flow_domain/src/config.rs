// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Research Configuration
//!
//! Typed configuration record consumed by the pipeline, the flow manager and
//! the search registry.
//!
//! ## Overview
//!
//! [`Configuration`] carries every tunable of a research run: topology
//! selection, search provider and fallback order, retry posture, iteration
//! caps, model identifiers, fan-out limits and cache settings. The record is
//! pure data; layering environment variables and per-call overrides on top of
//! the defaults is an infrastructure concern (see the application crate's
//! config loader).
//!
//! ## Defaults
//!
//! Defaults follow the documented table: linear mode, Tavily primary with
//! `[tavily, perplexity, exa, duckduckgo]` fallback order, 3 retries at 1s
//! base delay, depth 2, 2 queries per iteration, 3 concurrent researchers,
//! parallel fan-out on, search cache on with a 1 hour TTL.

use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::services::search_backend::SearchParams;

/// Built-in report-structure template used when the caller supplies none.
pub const DEFAULT_REPORT_STRUCTURE: &str = "\
Use this structure to create a report on the user-provided topic:

1. Introduction (no research needed)
   - Brief overview of the topic area

2. Main Body Sections:
   - Each section should focus on a sub-topic of the user-provided topic

3. Conclusion
   - Aim for 1 structural element (either a list or table) that distills the main body sections
   - Provide a concise summary of the report";

/// Search provider tags understood by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchApi {
    Tavily,
    Perplexity,
    Exa,
    Arxiv,
    Pubmed,
    Linkup,
    Duckduckgo,
    Googlesearch,
}

impl SearchApi {
    /// Stable lowercase tag used in configuration, cache keys and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchApi::Tavily => "tavily",
            SearchApi::Perplexity => "perplexity",
            SearchApi::Exa => "exa",
            SearchApi::Arxiv => "arxiv",
            SearchApi::Pubmed => "pubmed",
            SearchApi::Linkup => "linkup",
            SearchApi::Duckduckgo => "duckduckgo",
            SearchApi::Googlesearch => "googlesearch",
        }
    }

    /// Parses a configuration tag.
    pub fn parse(s: &str) -> Result<Self, FlowError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tavily" => Ok(SearchApi::Tavily),
            "perplexity" => Ok(SearchApi::Perplexity),
            "exa" => Ok(SearchApi::Exa),
            "arxiv" => Ok(SearchApi::Arxiv),
            "pubmed" => Ok(SearchApi::Pubmed),
            "linkup" => Ok(SearchApi::Linkup),
            "duckduckgo" => Ok(SearchApi::Duckduckgo),
            "googlesearch" | "google" => Ok(SearchApi::Googlesearch),
            other => Err(FlowError::configuration(format!("Unsupported search API: {}", other))),
        }
    }
}

impl std::fmt::Display for SearchApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Research pipeline topology selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMode {
    /// Single pass: plan, search per section, write.
    Linear,
    /// Cyclic graph: search, synthesize, reflect, repeat up to the depth cap.
    #[serde(alias = "graph")]
    Iterative,
    /// Supervisor plans sub-questions; researchers fan out; integrator merges.
    MultiAgent,
}

impl ResearchMode {
    /// Stable snake_case tag used in configuration and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchMode::Linear => "linear",
            ResearchMode::Iterative => "iterative",
            ResearchMode::MultiAgent => "multi_agent",
        }
    }

    /// Parses a configuration tag. Accepts the legacy `graph` alias.
    pub fn parse(s: &str) -> Result<Self, FlowError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(ResearchMode::Linear),
            "iterative" | "graph" | "iterative_graph" => Ok(ResearchMode::Iterative),
            "multi_agent" | "multi-agent" => Ok(ResearchMode::MultiAgent),
            other => Err(FlowError::configuration(format!("Unsupported research mode: {}", other))),
        }
    }
}

impl std::fmt::Display for ResearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default fallback order when the primary search API fails.
pub const DEFAULT_FALLBACK_APIS: [SearchApi; 4] = [
    SearchApi::Tavily,
    SearchApi::Perplexity,
    SearchApi::Exa,
    SearchApi::Duckduckgo,
];

/// The configurable fields for a research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Pipeline topology.
    pub research_mode: ResearchMode,

    /// Primary search provider.
    pub search_api: SearchApi,

    /// Ordered fallback providers tried after the primary is exhausted.
    pub fallback_apis: Vec<SearchApi>,

    /// Gate for the fallback chain.
    pub enable_fallback_apis: bool,

    /// Default retry attempts for external calls.
    pub max_retries: u32,

    /// Base retry delay in seconds.
    pub retry_delay: f64,

    /// Reflect-iteration cap for the iterative topology.
    pub max_search_depth: u32,

    /// Queries generated per iteration.
    pub number_of_queries: u32,

    /// Report-structure template handed to the planner and writer models.
    pub report_structure: String,

    /// Planner model identifier (`provider:model`).
    pub planner_model: String,

    /// Writer model identifier (`provider:model`).
    pub writer_model: String,

    /// Supervisor model identifier for the multi-agent topology.
    pub supervisor_model: String,

    /// Researcher model identifier for the multi-agent topology.
    pub researcher_model: String,

    /// Multi-agent fan-out cap.
    pub max_concurrent_researchers: u32,

    /// Fan researcher tasks out in parallel, or serialize them.
    pub enable_parallel_execution: bool,

    /// Toggle for the search result cache.
    pub enable_search_cache: bool,

    /// Search cache time-to-live in seconds.
    pub cache_ttl: u64,

    /// Parameters forwarded to search backends.
    pub search_params: SearchParams,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            research_mode: ResearchMode::Linear,
            search_api: SearchApi::Tavily,
            fallback_apis: DEFAULT_FALLBACK_APIS.to_vec(),
            enable_fallback_apis: true,
            max_retries: 3,
            retry_delay: 1.0,
            max_search_depth: 2,
            number_of_queries: 2,
            report_structure: DEFAULT_REPORT_STRUCTURE.to_string(),
            planner_model: "anthropic:claude-3-7-sonnet-latest".to_string(),
            writer_model: "anthropic:claude-3-5-sonnet-latest".to_string(),
            supervisor_model: "openai:gpt-4.1".to_string(),
            researcher_model: "openai:gpt-4.1".to_string(),
            max_concurrent_researchers: 3,
            enable_parallel_execution: true,
            enable_search_cache: true,
            cache_ttl: 3600,
            search_params: SearchParams::default(),
        }
    }
}

impl Configuration {
    /// Base retry delay as a [`std::time::Duration`].
    pub fn retry_delay_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.retry_delay.max(0.0))
    }

    /// Cache TTL as a [`std::time::Duration`].
    pub fn cache_ttl_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Configuration`] when a field is out of its
    /// documented range.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.number_of_queries == 0 {
            return Err(FlowError::configuration("number_of_queries must be at least 1"));
        }
        if self.max_concurrent_researchers == 0 {
            return Err(FlowError::configuration(
                "max_concurrent_researchers must be at least 1",
            ));
        }
        if !self.retry_delay.is_finite() || self.retry_delay < 0.0 {
            return Err(FlowError::configuration("retry_delay must be a non-negative number"));
        }
        if self.report_structure.trim().is_empty() {
            return Err(FlowError::configuration("report_structure must not be empty"));
        }
        if self.enable_fallback_apis && self.fallback_apis.is_empty() {
            return Err(FlowError::configuration(
                "fallback_apis must not be empty when enable_fallback_apis is set",
            ));
        }
        Ok(())
    }
}
