// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Topologies
//!
//! The three canonical research pipelines, wired from the stage vocabulary:
//!
//! - **Linear**: plan → initial searches → per-section fan-out (queries,
//!   searches, write) → finalize
//! - **Iterative**: initialize → generate queries → search → synthesize →
//!   rewrite → reflect, looping on the `continue_research` label until the
//!   depth cap, then finalize
//! - **Multi-agent**: supervisor decomposition → researcher fan-out →
//!   integration
//!
//! Fan-out branches run on cloned states and merge back in producer order:
//! each branch contributes its assigned section, its new queries and its
//! new search batches, so `state.sections` order always matches
//! section-index order, never completion order.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use research_flow_domain::{FlowError, ReportState, ResearchMode};

use super::engine::{Edge, MergeFn, PipelineEngine, StageGraph, StageOutcome};
use super::stages::{self, StageContext};

// Function-pointer wrappers giving the async stage fns the engine's
// object-safe shape.

fn plan_report<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::plan_report(state, ctx))
}

fn initialize_research<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::initialize_research(state, ctx))
}

fn generate_queries<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::generate_queries(state, ctx))
}

fn execute_searches<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::execute_searches(state, ctx))
}

fn synthesize_knowledge<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::synthesize_knowledge(state, ctx))
}

fn update_report<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::update_report(state, ctx))
}

fn reflect_on_research<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::reflect_on_research(state, ctx))
}

fn finalize_report<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::finalize_report(state, ctx))
}

fn dispatch_sections<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::dispatch_sections(state, ctx))
}

fn write_section<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(async move {
        let item = item.ok_or_else(|| FlowError::state("write_section requires a fan-out item"))?;
        stages::write_section(state, ctx, item).await
    })
}

fn supervisor_plan<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::supervisor_plan(state, ctx))
}

fn dispatch_researchers<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::dispatch_researchers(state, ctx))
}

fn researcher_investigate<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(async move {
        let item = item.ok_or_else(|| FlowError::state("researcher_investigate requires a fan-out item"))?;
        stages::researcher_investigate(state, ctx, item).await
    })
}

fn integrate_report<'a>(
    state: &'a mut ReportState,
    ctx: &'a StageContext,
    _item: Option<&'a Value>,
) -> BoxFuture<'a, Result<StageOutcome, FlowError>> {
    Box::pin(stages::integrate_report(state, ctx))
}

/// Merges fan-out branches in producer order: each branch contributes its
/// assigned section, its newly recorded queries and search batches, and any
/// metadata keys the main state does not carry yet.
pub fn merge_section_branches(
    state: &mut ReportState,
    branches: Vec<(Value, ReportState)>,
) -> Result<(), FlowError> {
    let base_queries = state.queries().len();
    let base_batches = state.search_results().len();

    for (item, branch) in branches {
        let title = item
            .get("section")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::validation("fan-out item missing 'section'"))?;

        if let Some(section) = branch.section(title).cloned() {
            state.adopt_section(section);
        }
        for query in branch.queries().iter().skip(base_queries) {
            state.record_queries([query.clone()]);
        }
        for batch in branch.search_results().iter().skip(base_batches) {
            state.adopt_search_batch(batch.clone())?;
        }
        for (key, value) in branch.metadata() {
            if !state.metadata().contains_key(key) {
                state.set_metadata(key.clone(), value.clone());
            }
        }
    }

    Ok(())
}

fn merge_fn() -> MergeFn {
    Arc::new(merge_section_branches)
}

/// Linear topology: plan, seed searches, one writer pass per section,
/// finalize.
pub fn linear_graph() -> Result<StageGraph, FlowError> {
    StageGraph::builder("plan_report")
        .node(
            "plan_report",
            Arc::new(plan_report),
            Edge::To("execute_initial_searches".into()),
        )
        .node(
            "execute_initial_searches",
            Arc::new(execute_searches),
            Edge::To("dispatch_sections".into()),
        )
        .node(
            "dispatch_sections",
            Arc::new(dispatch_sections),
            Edge::FanOut {
                target: "write_section".into(),
                join: "finalize_report".into(),
                merge: merge_fn(),
            },
        )
        .node("write_section", Arc::new(write_section), Edge::End)
        .node("finalize_report", Arc::new(finalize_report), Edge::End)
        .build()
}

/// Iterative topology with the `reflect → generate_queries` cycle.
pub fn iterative_graph() -> Result<StageGraph, FlowError> {
    let mut branches = HashMap::new();
    branches.insert("continue_research".to_string(), "generate_queries".to_string());
    branches.insert("finalize_report".to_string(), "finalize_report".to_string());

    StageGraph::builder("initialize_research")
        .node(
            "initialize_research",
            Arc::new(initialize_research),
            Edge::To("generate_queries".into()),
        )
        .node(
            "generate_queries",
            Arc::new(generate_queries),
            Edge::To("execute_searches".into()),
        )
        .node(
            "execute_searches",
            Arc::new(execute_searches),
            Edge::To("synthesize_knowledge".into()),
        )
        .node(
            "synthesize_knowledge",
            Arc::new(synthesize_knowledge),
            Edge::To("update_report".into()),
        )
        .node(
            "update_report",
            Arc::new(update_report),
            Edge::To("reflect_on_research".into()),
        )
        .node(
            "reflect_on_research",
            Arc::new(reflect_on_research),
            Edge::Conditional(branches),
        )
        .node("finalize_report", Arc::new(finalize_report), Edge::End)
        .build()
}

/// Multi-agent topology: supervisor decomposition, researcher fan-out,
/// integration.
pub fn multi_agent_graph() -> Result<StageGraph, FlowError> {
    StageGraph::builder("supervisor_plan")
        .node(
            "supervisor_plan",
            Arc::new(supervisor_plan),
            Edge::To("dispatch_researchers".into()),
        )
        .node(
            "dispatch_researchers",
            Arc::new(dispatch_researchers),
            Edge::FanOut {
                target: "researcher_investigate".into(),
                join: "integrate_report".into(),
                merge: merge_fn(),
            },
        )
        .node(
            "researcher_investigate",
            Arc::new(researcher_investigate),
            Edge::End,
        )
        .node("integrate_report", Arc::new(integrate_report), Edge::End)
        .build()
}

/// Builds the engine for the configured research mode.
pub fn build_engine(mode: ResearchMode) -> Result<PipelineEngine, FlowError> {
    let graph = match mode {
        ResearchMode::Linear => linear_graph()?,
        ResearchMode::Iterative => iterative_graph()?,
        ResearchMode::MultiAgent => multi_agent_graph()?,
    };
    Ok(PipelineEngine::new(graph))
}
