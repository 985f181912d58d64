// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! The research pipeline: stage vocabulary, graph engine, canonical
//! topologies, prompts and model-output parsing.

pub mod engine;
pub mod parsing;
pub mod prompts;
pub mod stages;
pub mod topologies;

pub use engine::{Edge, MergeFn, NodePhase, PipelineEngine, ProgressCallback, StageFn, StageGraph, StageOutcome};
pub use stages::{Completion, ModelProvider, StageContext};
pub use topologies::{build_engine, iterative_graph, linear_graph, multi_agent_graph};
