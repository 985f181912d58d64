// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared test doubles: scripted search backends, scripted language models
//! and a fully wired engine harness.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use research_flow::application::control::{ControlApi, OpenAuthGate};
use research_flow::application::pipeline::ModelProvider;
use research_flow::application::services::FlowManager;
use research_flow::infrastructure::config::RuntimeEnv;
use research_flow::infrastructure::metrics::MetricsService;
use research_flow::infrastructure::reporting::ErrorReporter;
use research_flow::infrastructure::runtime::{EventBus, TaskScheduler};
use research_flow::infrastructure::search::SearchRegistry;
use research_flow_domain::{
    Credential, FlowError, LanguageModel, SearchApi, SearchBackend, SearchHit, SearchParams,
};

/// Search backend stub: optionally fails the first `fail_first` calls, then
/// serves one deterministic hit per query.
pub struct StubBackend {
    api: SearchApi,
    fail_first: u32,
    calls: AtomicU32,
}

impl StubBackend {
    pub fn new(api: SearchApi) -> Arc<Self> {
        Self::failing(api, 0)
    }

    pub fn failing(api: SearchApi, fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            api,
            fail_first,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for StubBackend {
    fn api(&self) -> SearchApi {
        self.api
    }

    fn requests_per_minute(&self) -> u32 {
        6000
    }

    async fn search(&self, query: &str, _params: &SearchParams) -> Result<Vec<SearchHit>, FlowError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(FlowError::ServiceUnavailable("stub backend down".into()));
        }
        Ok(vec![SearchHit::new(
            format!("Result for {query}"),
            format!("https://example.org/{}", n),
            format!("Reference content about {query}."),
        )])
    }
}

/// Language model stub answering by prompt markers, so every stage receives
/// parseable output. Counts calls and can hang forever for cancellation
/// tests.
pub struct StubModel {
    id: String,
    calls: AtomicU32,
    hang: bool,
}

impl StubModel {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            calls: AtomicU32::new(0),
            hang: false,
        })
    }

    pub fn hanging(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            calls: AtomicU32::new(0),
            hang: true,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, prompt: &str) -> Result<String, FlowError> {
        if self.hang {
            futures::future::pending::<()>().await;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);

        let response = if prompt.contains("Generate search queries") {
            // Planner query-writer pass
            format!("aspect query {n}-one\naspect query {n}-two\n")
        } else if prompt.contains("create a structured outline") {
            "# Introduction\n# Key Findings\n## Details\n# Conclusion\n".to_string()
        } else if prompt.contains("plan a research approach") {
            "Analysis of the topic.\n1. What drives it?\n2. What limits it?\n".to_string()
        } else if prompt.contains("search query generator") {
            format!("1. focused query {n}-one\n2. focused query {n}-two\n")
        } else if prompt.contains("knowledge synthesizer") {
            format!("Synthesis pass {n}: combined insights.")
        } else if prompt.contains("report writer") {
            "# Introduction\nIntro body.\n# Key Findings\nFindings body.\n# Conclusion\nConcluding body.\n"
                .to_string()
        } else if prompt.contains("research reflector") {
            "The report needs more depth on mechanisms.".to_string()
        } else if prompt.contains("supervisor agent") {
            "1. What is the background of the topic?\n\
             2. What are the key mechanisms involved?\n\
             3. What are the future trends?\n"
                .to_string()
        } else if prompt.contains("specialized researcher") {
            format!("Researched findings (call {n}).")
        } else if prompt.contains("integration agent") {
            "# Introduction\nFramed introduction.\n# Conclusion\nFramed conclusion.\n".to_string()
        } else if prompt.contains("section writer") {
            format!("Detailed section content (call {n}).")
        } else {
            format!("Generic completion {n}.")
        };

        Ok(response)
    }
}

/// Model provider resolving every identifier to the same stub.
pub struct SingleModelProvider {
    model: Arc<StubModel>,
}

impl SingleModelProvider {
    pub fn new(model: Arc<StubModel>) -> Arc<Self> {
        Arc::new(Self { model })
    }
}

impl ModelProvider for SingleModelProvider {
    fn model(&self, _id: &str) -> Option<Arc<dyn LanguageModel>> {
        Some(Arc::clone(&self.model) as Arc<dyn LanguageModel>)
    }
}

/// A fully wired engine for end-to-end tests.
pub struct Harness {
    pub manager: Arc<FlowManager>,
    pub api: ControlApi,
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<TaskScheduler>,
    pub reporter: Arc<ErrorReporter>,
    pub metrics: Arc<MetricsService>,
    pub backend: Arc<StubBackend>,
    pub model: Arc<StubModel>,
}

impl Harness {
    /// Builds a harness with a healthy Tavily stub and marker-driven model.
    /// `label` must be unique per test to isolate breaker registry entries.
    pub fn new(label: &str, max_flows: usize, max_workers: usize) -> Self {
        Self::with_model(label, max_flows, max_workers, StubModel::new(format!("stub:{label}")))
    }

    pub fn with_model(label: &str, max_flows: usize, max_workers: usize, model: Arc<StubModel>) -> Self {
        let bus = Arc::new(EventBus::new());
        let scheduler = TaskScheduler::new(max_workers, Arc::clone(&bus));

        let backend = StubBackend::new(SearchApi::Tavily);
        let mut registry = SearchRegistry::with_label(label, Duration::from_secs(3600));
        registry.register(Arc::clone(&backend) as Arc<dyn SearchBackend>);

        let reporter = ErrorReporter::builder().bus(Arc::clone(&bus)).build();
        let metrics = MetricsService::new().expect("metrics service");
        metrics.observe(&bus);

        let manager = FlowManager::new(
            max_flows,
            Arc::clone(&scheduler),
            Arc::new(registry),
            SingleModelProvider::new(Arc::clone(&model)),
            Arc::clone(&reporter),
        );
        let api = ControlApi::new(
            Arc::clone(&manager),
            Arc::clone(&reporter),
            Arc::new(OpenAuthGate),
            RuntimeEnv::Production,
        );

        Self {
            manager,
            api,
            bus,
            scheduler,
            reporter,
            metrics,
            backend,
            model,
        }
    }
}

/// Credential accepted by the open gate.
pub fn credential() -> Credential {
    Credential::ApiKey("test-key".to_string())
}

/// Base test configuration pointing at the stubbed Tavily backend with the
/// fallback chain disabled.
pub fn base_config() -> research_flow_domain::Configuration {
    research_flow_domain::Configuration {
        retry_delay: 0.001,
        enable_fallback_apis: false,
        ..Default::default()
    }
}

/// Empty metadata helper.
pub fn no_metadata() -> BTreeMap<String, serde_json::Value> {
    BTreeMap::new()
}
