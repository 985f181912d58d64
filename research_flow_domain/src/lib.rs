// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Research Flow Domain
//!
//! Pure domain layer for the research flow engine. This crate contains the
//! business vocabulary of parallel research execution and nothing else: no
//! runtime, no I/O, no logging.
//!
//! ## Architecture Overview
//!
//! The crate follows Domain-Driven Design boundaries:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Entities                              │
//! │  Flow (lifecycle), Task (scheduler unit), ReportState       │
//! └─────────────────────────────────────────────────────────────┘
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Value Objects                           │
//! │  FlowId, TaskId (ULID-backed), Progress                     │
//! └─────────────────────────────────────────────────────────────┘
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Ports                            │
//! │  SearchBackend, LanguageModel, AuthGate, IdentityStore      │
//! └─────────────────────────────────────────────────────────────┘
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Errors, Events, Configuration                    │
//! │  FlowError taxonomy, lifecycle Events, Configuration        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Concepts
//!
//! ### Flow
//! One end-to-end research run over a single topic: admission, execution
//! through a pipeline topology, terminal status with a result or an error.
//!
//! ### ReportState
//! The mutable document a run accumulates into - a tree of sections plus the
//! queries, search batches and metadata that produced it.
//!
//! ### Task
//! The generic scheduler unit underlying flows: priority, dependencies,
//! timeout, and a single async work closure.
//!
//! The application crate (`research-flow`) supplies the scheduler, the
//! resilience layer, the pipeline engine and the control API on top of these
//! types.

pub mod config;
pub mod entities;
pub mod error;
pub mod events;
pub mod services;
pub mod value_objects;

// Re-export commonly used types at the crate root for ergonomic imports.
pub use config::{Configuration, ResearchMode, SearchApi, DEFAULT_REPORT_STRUCTURE};
pub use entities::{
    Feedback, Flow, FlowResult, FlowStatus, Query, ReportState, SearchBatch, Section, Task, TaskFn,
    TaskFuture, TaskPriority, TaskStatus, ITERATIONS_KEY, PLAN_SECTION, REFLECTION_SECTION,
    SYNTHESIS_SECTION,
};
pub use error::{ErrorCategory, ErrorSeverity, FlowError};
pub use events::{Event, EventKind};
pub use services::{
    AuthGate, Credential, IdentityStore, LanguageModel, Principal, SearchBackend, SearchHit,
    SearchParams,
};
pub use value_objects::{FlowId, Progress, TaskId};
