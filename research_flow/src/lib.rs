// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

// Production code safety enforced via CI and `make lint-strict`
// (lib checked separately from tests - tests may use unwrap/expect)

//! # Research Flow
//!
//! A parallel research workflow engine: many long-running research runs
//! execute concurrently on one process, each a directed graph of
//! asynchronous stages issuing external searches and model calls while
//! incrementally building a structured report.
//!
//! ## Architecture Overview
//!
//! The workspace follows Clean Architecture and Domain-Driven Design:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Application Layer                          │
//! │  (ControlApi, FlowManager, PipelineEngine, Stages)          │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Domain Layer                             │
//! │  (Flow, Task, ReportState, FlowError, Service Ports)        │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Infrastructure Layer                         │
//! │  (ResilienceKit, TaskScheduler, SearchRegistry, Reporter,   │
//! │   EventBus, Metrics, Config, Logging)                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Concepts
//!
//! ### Flow
//! One end-to-end research run over a single topic. The
//! [`FlowManager`](application::services::FlowManager) admits flows against
//! a concurrency cap, tracks their lifecycle, and settles their terminal
//! status; each started flow runs as one task on the bounded
//! [`TaskScheduler`](infrastructure::runtime::TaskScheduler).
//!
//! ### Pipeline
//! A directed graph of stages over the flow's
//! [`ReportState`](research_flow_domain::ReportState). Three canonical
//! topologies ship: linear, iterative (with a reflect-driven cycle), and
//! multi-agent (supervisor + researcher fan-out).
//!
//! ### Resilience
//! Every external call - search backends and language models - runs behind
//! the [`resilience`](infrastructure::resilience) kit: retry with jittered
//! backoff, name-keyed circuit breakers, fallback ordering and a
//! bounded-staleness cache. Failures classify into the sealed
//! [`FlowError`](research_flow_domain::FlowError) taxonomy and aggregate in
//! the [`ErrorReporter`](infrastructure::reporting::ErrorReporter).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use research_flow::application::control::{ControlApi, OpenAuthGate};
//! use research_flow::application::services::FlowManager;
//! use research_flow::infrastructure::reporting::ErrorReporter;
//! use research_flow::infrastructure::runtime::{EventBus, TaskScheduler};
//! use research_flow::infrastructure::search::SearchRegistry;
//!
//! let bus = Arc::new(EventBus::new());
//! let scheduler = TaskScheduler::with_default_workers(Arc::clone(&bus));
//! let mut registry = SearchRegistry::new(std::time::Duration::from_secs(3600));
//! registry.register(my_tavily_adapter);           // host-provided adapters
//! let reporter = ErrorReporter::builder().bus(Arc::clone(&bus)).build();
//!
//! let manager = FlowManager::new(10, scheduler, Arc::new(registry), my_models, reporter.clone());
//! let env = research_flow::infrastructure::config::RuntimeEnv::detect();
//! let api = ControlApi::new(manager, reporter, Arc::new(OpenAuthGate), env);
//! ```

pub mod application;
pub mod infrastructure;

// Re-export the domain crate under its conventional alias.
pub use research_flow_domain as domain;

pub use application::control::{ControlApi, ErrorEnvelope, OpenAuthGate};
pub use application::pipeline::{ModelProvider, PipelineEngine, StageContext};
pub use application::services::FlowManager;
pub use infrastructure::reporting::ErrorReporter;
pub use infrastructure::runtime::{EventBus, TaskScheduler};
pub use infrastructure::search::SearchRegistry;
