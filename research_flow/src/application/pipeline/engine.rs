// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Engine
//!
//! Executes a directed graph of stages over a [`ReportState`].
//!
//! ## Graph model
//!
//! A [`StageGraph`] is a set of named nodes. Each node carries a stage
//! function and one outgoing [`Edge`]:
//!
//! - [`Edge::To`] - unconditional successor
//! - [`Edge::Conditional`] - the stage returns a branch label selecting one
//!   of finitely many labelled successors (this is how the iterative
//!   topology's `reflect → generate_queries` cycle is expressed; the cycle
//!   is driven by an explicit iteration counter in state metadata, and the
//!   engine itself is a loop over a next-node stack, never recursion)
//! - [`Edge::FanOut`] - the stage emits sub-invocation items; the engine
//!   runs the target stage once per item on a cloned branch state
//!   (concurrently up to the configured fan-out cap, or strictly
//!   sequentially when parallel execution is disabled), then merges the
//!   branch states back **in producer order** and continues at the join
//!   node. Zero items skip straight to the join
//! - [`Edge::End`] - terminates the pipeline
//!
//! ## Failure and cancellation
//!
//! A stage error fails the pipeline; stages signal non-fatal degradation by
//! marking state metadata and returning normally. The engine never retries
//! stages - retries live in the resilience layer at call granularity. The
//! cancellation token is checked at every node boundary and fan-out join;
//! in-flight branch work is discarded on cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use tracing::debug;

use research_flow_domain::{FlowError, ReportState};

use super::stages::StageContext;

/// What a stage tells the engine to do next.
#[derive(Debug)]
pub enum StageOutcome {
    /// Follow the node's configured edge.
    Next,
    /// Select the labelled successor on a conditional edge.
    Branch(String),
    /// Emit sub-invocations for a fan-out edge.
    FanOut(Vec<Value>),
}

/// A stage callable: the optional value is the fan-out item on branch
/// invocations.
pub type StageFn = Arc<
    dyn for<'a> Fn(
            &'a mut ReportState,
            &'a StageContext,
            Option<&'a Value>,
        ) -> BoxFuture<'a, Result<StageOutcome, FlowError>>
        + Send
        + Sync,
>;

/// Deterministic merge of fan-out branch states back into the main state,
/// invoked with `(item, branch_state)` pairs in producer order.
pub type MergeFn =
    Arc<dyn Fn(&mut ReportState, Vec<(Value, ReportState)>) -> Result<(), FlowError> + Send + Sync>;

/// Outgoing edge of a node.
#[derive(Clone)]
pub enum Edge {
    /// Pipeline END.
    End,
    /// Unconditional successor.
    To(String),
    /// Label → successor map for a branching stage.
    Conditional(HashMap<String, String>),
    /// Send-style fan-out: run `target` per item, merge, continue at
    /// `join`.
    FanOut {
        target: String,
        join: String,
        merge: MergeFn,
    },
}

struct Node {
    stage: StageFn,
    edge: Edge,
}

/// A validated stage graph with a unique START node.
pub struct StageGraph {
    nodes: HashMap<String, Node>,
    start: String,
}

impl StageGraph {
    /// Starts a builder whose START successor is `start`.
    pub fn builder(start: impl Into<String>) -> StageGraphBuilder {
        StageGraphBuilder {
            start: start.into(),
            nodes: HashMap::new(),
        }
    }

    /// Number of nodes, used for progress estimation.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Builder validating the graph shape on completion.
pub struct StageGraphBuilder {
    start: String,
    nodes: HashMap<String, Node>,
}

impl StageGraphBuilder {
    /// Adds a node.
    pub fn node(mut self, name: impl Into<String>, stage: StageFn, edge: Edge) -> Self {
        self.nodes.insert(name.into(), Node { stage, edge });
        self
    }

    /// Validates that the start node exists, every edge references a known
    /// node, and END is reachable.
    pub fn build(self) -> Result<StageGraph, FlowError> {
        if !self.nodes.contains_key(&self.start) {
            return Err(FlowError::configuration(format!(
                "Pipeline start node '{}' is not defined",
                self.start
            )));
        }

        let known = |name: &String| self.nodes.contains_key(name);
        let mut end_reachable = false;
        for (name, node) in &self.nodes {
            match &node.edge {
                Edge::End => end_reachable = true,
                Edge::To(next) => {
                    if !known(next) {
                        return Err(FlowError::configuration(format!(
                            "Node '{}' points at unknown node '{}'",
                            name, next
                        )));
                    }
                }
                Edge::Conditional(map) => {
                    for (label, next) in map {
                        if !known(next) {
                            return Err(FlowError::configuration(format!(
                                "Node '{}' label '{}' points at unknown node '{}'",
                                name, label, next
                            )));
                        }
                    }
                }
                Edge::FanOut { target, join, .. } => {
                    if !known(target) || !known(join) {
                        return Err(FlowError::configuration(format!(
                            "Node '{}' fan-out references unknown nodes",
                            name
                        )));
                    }
                }
            }
        }
        if !end_reachable {
            return Err(FlowError::configuration("Pipeline has no END edge"));
        }

        Ok(StageGraph {
            nodes: self.nodes,
            start: self.start,
        })
    }
}

/// Runaway guard for cyclic graphs; real pipelines are bounded by their
/// iteration counters well below this.
const MAX_STEPS: usize = 1000;

/// Phase reported by progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Enter,
    Exit,
}

/// Progress observer: `(node, phase, completed_steps)`.
pub type ProgressCallback = Arc<dyn Fn(&str, NodePhase, usize) + Send + Sync>;

/// Drives a [`StageGraph`] over a report state.
pub struct PipelineEngine {
    graph: StageGraph,
}

impl PipelineEngine {
    /// Wraps a validated graph.
    pub fn new(graph: StageGraph) -> Self {
        Self { graph }
    }

    /// Number of graph nodes, for progress estimation.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Runs the pipeline to END, returning the final state.
    ///
    /// # Errors
    ///
    /// Propagates stage failures, cancellation, and graph-shape violations.
    pub async fn run(
        &self,
        mut state: ReportState,
        ctx: &StageContext,
        progress: Option<ProgressCallback>,
    ) -> Result<ReportState, FlowError> {
        let mut stack: Vec<String> = vec![self.graph.start.clone()];
        let mut steps = 0usize;

        while let Some(current) = stack.pop() {
            ctx.ensure_active()?;
            steps += 1;
            if steps > MAX_STEPS {
                return Err(FlowError::state(format!(
                    "Pipeline exceeded {} steps; aborting probable livelock",
                    MAX_STEPS
                )));
            }

            let node = self
                .graph
                .nodes
                .get(&current)
                .ok_or_else(|| FlowError::state(format!("Unknown pipeline node '{}'", current)))?;

            if let Some(cb) = &progress {
                cb(&current, NodePhase::Enter, steps - 1);
            }
            debug!(node = %current, step = steps, "entering pipeline node");

            let outcome = (node.stage)(&mut state, ctx, None).await?;

            match (&node.edge, outcome) {
                (Edge::End, StageOutcome::Next) => {}
                (Edge::To(next), StageOutcome::Next) => stack.push(next.clone()),
                (Edge::Conditional(map), StageOutcome::Branch(label)) => {
                    let next = map.get(&label).ok_or_else(|| {
                        FlowError::state(format!(
                            "Node '{}' produced unknown branch label '{}'",
                            current, label
                        ))
                    })?;
                    stack.push(next.clone());
                }
                (
                    Edge::FanOut {
                        target,
                        join,
                        merge,
                    },
                    StageOutcome::FanOut(items),
                ) => {
                    self.run_fan_out(&mut state, ctx, target, merge, items).await?;
                    stack.push(join.clone());
                }
                (_, outcome) => {
                    return Err(FlowError::state(format!(
                        "Node '{}' outcome {:?} does not match its edge",
                        current, outcome
                    )));
                }
            }

            if let Some(cb) = &progress {
                cb(&current, NodePhase::Exit, steps);
            }
        }

        Ok(state)
    }

    /// Runs `target` once per item on cloned branch states and merges the
    /// results in producer order.
    async fn run_fan_out(
        &self,
        state: &mut ReportState,
        ctx: &StageContext,
        target: &str,
        merge: &MergeFn,
        items: Vec<Value>,
    ) -> Result<(), FlowError> {
        if items.is_empty() {
            return Ok(());
        }

        let node = self
            .graph
            .nodes
            .get(target)
            .ok_or_else(|| FlowError::state(format!("Unknown fan-out target '{}'", target)))?;

        let mut branches: Vec<(Value, ReportState)> =
            items.into_iter().map(|item| (item, state.clone())).collect();

        if ctx.config.enable_parallel_execution && branches.len() > 1 {
            let futures: Vec<_> = branches
                .iter_mut()
                .map(|(item, branch)| {
                    let item: &Value = item;
                    (node.stage)(branch, ctx, Some(item))
                })
                .collect();
            let results = join_all(futures).await;
            for result in results {
                expect_branch_next(result?)?;
            }
        } else {
            for (item, branch) in branches.iter_mut() {
                ctx.ensure_active()?;
                let outcome = (node.stage)(branch, ctx, Some(&*item)).await?;
                expect_branch_next(outcome)?;
            }
        }

        // Join point: cancelled flows discard finished branch work.
        ctx.ensure_active()?;
        merge(state, branches)
    }
}

fn expect_branch_next(outcome: StageOutcome) -> Result<(), FlowError> {
    match outcome {
        StageOutcome::Next => Ok(()),
        other => Err(FlowError::state(format!(
            "Fan-out branch produced {:?}; branches must complete with Next",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_flow_bootstrap::CancellationToken;
    use research_flow_domain::{Configuration, FlowId, LanguageModel, ReportState};
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::infrastructure::logging::CorrelationContext;
    use crate::infrastructure::reporting::ErrorReporter;
    use crate::infrastructure::search::SearchRegistry;

    struct NoModels;

    impl crate::application::pipeline::stages::ModelProvider for NoModels {
        fn model(&self, _id: &str) -> Option<Arc<dyn LanguageModel>> {
            None
        }
    }

    fn test_ctx() -> StageContext {
        StageContext {
            config: Configuration::default(),
            search: Arc::new(SearchRegistry::with_label(
                "engine-test",
                std::time::Duration::from_secs(60),
            )),
            models: Arc::new(NoModels),
            cancel: CancellationToken::new(),
            correlation: CorrelationContext::new(FlowId::new()),
            reporter: ErrorReporter::new(),
        }
    }

    fn counting_stage(counter: Arc<AtomicU32>, outcome: fn(u32) -> StageOutcome) -> StageFn {
        Arc::new(move |_state, _ctx, _item| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(outcome(n))
            })
        })
    }

    fn pass_through() -> StageFn {
        Arc::new(|_state, _ctx, _item| Box::pin(async { Ok(StageOutcome::Next) }))
    }

    fn no_merge() -> MergeFn {
        Arc::new(|_state, _branches| Ok(()))
    }

    /// Graph validation rejects dangling edges and END-free graphs.
    #[test]
    fn test_builder_validation() {
        let dangling = StageGraph::builder("a")
            .node("a", pass_through(), Edge::To("ghost".into()))
            .build();
        assert!(dangling.is_err());

        let endless = StageGraph::builder("a")
            .node("a", pass_through(), Edge::To("a".into()))
            .build();
        assert!(endless.is_err());

        let missing_start = StageGraph::builder("nope")
            .node("a", pass_through(), Edge::End)
            .build();
        assert!(missing_start.is_err());
    }

    /// A conditional cycle runs until the stage switches labels, without
    /// recursion.
    #[tokio::test]
    async fn test_conditional_cycle_terminates() {
        let counter = Arc::new(AtomicU32::new(0));
        let looping = counting_stage(Arc::clone(&counter), |n| {
            if n < 3 {
                StageOutcome::Branch("again".into())
            } else {
                StageOutcome::Branch("done".into())
            }
        });

        let mut labels = HashMap::new();
        labels.insert("again".to_string(), "loop".to_string());
        labels.insert("done".to_string(), "end".to_string());

        let graph = StageGraph::builder("loop")
            .node("loop", looping, Edge::Conditional(labels))
            .node("end", pass_through(), Edge::End)
            .build()
            .unwrap();

        let engine = PipelineEngine::new(graph);
        let ctx = test_ctx();
        let state = ReportState::new("topic", Configuration::default());
        engine.run(state, &ctx, None).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    /// Boundary: a fan-out emitting zero items proceeds straight to the
    /// join node with no branch states merged.
    #[tokio::test]
    async fn test_zero_item_fan_out_reaches_join() {
        let join_runs = Arc::new(AtomicU32::new(0));
        let branch_runs = Arc::new(AtomicU32::new(0));

        let dispatch: StageFn =
            Arc::new(|_state, _ctx, _item| Box::pin(async { Ok(StageOutcome::FanOut(Vec::new())) }));

        let graph = StageGraph::builder("dispatch")
            .node(
                "dispatch",
                dispatch,
                Edge::FanOut {
                    target: "branch".into(),
                    join: "join".into(),
                    merge: no_merge(),
                },
            )
            .node("branch", counting_stage(Arc::clone(&branch_runs), |_| StageOutcome::Next), Edge::End)
            .node("join", counting_stage(Arc::clone(&join_runs), |_| StageOutcome::Next), Edge::End)
            .build()
            .unwrap();

        let engine = PipelineEngine::new(graph);
        let ctx = test_ctx();
        let state = ReportState::new("topic", Configuration::default());
        engine.run(state, &ctx, None).await.unwrap();

        assert_eq!(branch_runs.load(Ordering::SeqCst), 0);
        assert_eq!(join_runs.load(Ordering::SeqCst), 1);
    }

    /// An outcome that does not match the node's edge is a pipeline error.
    #[tokio::test]
    async fn test_mismatched_outcome_fails() {
        let branching: StageFn =
            Arc::new(|_state, _ctx, _item| Box::pin(async { Ok(StageOutcome::Branch("x".into())) }));

        let graph = StageGraph::builder("a")
            .node("a", branching, Edge::End)
            .build()
            .unwrap();

        let engine = PipelineEngine::new(graph);
        let ctx = test_ctx();
        let state = ReportState::new("topic", Configuration::default());
        let err = engine.run(state, &ctx, None).await.unwrap_err();
        assert!(matches!(err, FlowError::State(_)));
    }

    /// Cancellation is observed at node boundaries.
    #[tokio::test]
    async fn test_cancellation_stops_engine() {
        let graph = StageGraph::builder("a")
            .node("a", pass_through(), Edge::End)
            .build()
            .unwrap();

        let engine = PipelineEngine::new(graph);
        let ctx = test_ctx();
        ctx.cancel.cancel();

        let state = ReportState::new("topic", Configuration::default());
        let err = engine.run(state, &ctx, None).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
