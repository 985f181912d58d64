// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Stages
//!
//! The stage vocabulary: each stage is an async function over `(&mut
//! ReportState, &StageContext)` returning a [`StageOutcome`] for the engine.
//!
//! ## Failure posture
//!
//! Stages never fail the flow because an external service failed. Search
//! calls go through the registry, which degrades to empty hit lists; model
//! calls go through [`StageContext::complete_soft`], which on failure
//! reports the error, marks `metadata["<stage>.error"]` and lets the stage
//! fall back to a deterministic default (template queries, default outline,
//! placeholder content). Only cancellation and genuine wiring errors
//! (unresolvable model id, invariant violations) propagate.
//!
//! ## Cancellation
//!
//! Every stage checks the flow's cancellation token before each external
//! call via [`StageContext::ensure_active`]; the engine additionally checks
//! at node boundaries and fan-out joins.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::warn;

use research_flow_bootstrap::CancellationToken;
use research_flow_domain::{
    Configuration, FlowError, LanguageModel, Query, ReportState, Section, PLAN_SECTION,
    REFLECTION_SECTION, SYNTHESIS_SECTION,
};

use crate::infrastructure::logging::CorrelationContext;
use crate::infrastructure::models::GuardedModel;
use crate::infrastructure::reporting::ErrorReporter;
use crate::infrastructure::search::SearchRegistry;

use super::engine::StageOutcome;
use super::parsing;
use super::prompts;

/// Host-supplied resolver from model identifiers to handles.
pub trait ModelProvider: Send + Sync {
    /// Resolves `provider:model` to a handle; `None` when unknown.
    fn model(&self, id: &str) -> Option<Arc<dyn LanguageModel>>;
}

/// Soft completion result: text, or the failure message the stage should
/// degrade around.
pub enum Completion {
    Text(String),
    Failed(String),
}

/// Everything a stage needs besides the report state.
#[derive(Clone)]
pub struct StageContext {
    pub config: Configuration,
    pub search: Arc<SearchRegistry>,
    pub models: Arc<dyn ModelProvider>,
    pub cancel: CancellationToken,
    pub correlation: CorrelationContext,
    pub reporter: Arc<ErrorReporter>,
}

impl StageContext {
    /// Errors with [`FlowError::Cancelled`] once the flow token is
    /// cancelled. Stages call this before every external call.
    pub fn ensure_active(&self) -> Result<(), FlowError> {
        if self.cancel.is_cancelled() {
            return Err(FlowError::cancelled("flow cancelled"));
        }
        Ok(())
    }

    fn guarded(&self, id: &str) -> Result<GuardedModel, FlowError> {
        let model = self
            .models
            .model(id)
            .ok_or_else(|| FlowError::configuration(format!("No language model registered for '{}'", id)))?;
        Ok(GuardedModel::new(model, &self.config))
    }

    /// Runs a guarded model call with the stage failure posture: the result
    /// is either text or a recorded, non-fatal failure.
    ///
    /// # Errors
    ///
    /// Propagates cancellation and model-wiring errors only.
    pub async fn complete_soft(
        &self,
        state: &mut ReportState,
        stage: &str,
        model_id: &str,
        prompt: &str,
    ) -> Result<Completion, FlowError> {
        self.ensure_active()?;

        match self.guarded(model_id)?.complete(prompt).await {
            Ok(text) => Ok(Completion::Text(text)),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                warn!(
                    stage,
                    model = model_id,
                    correlation_id = %self.correlation.correlation_id,
                    flow_id = %self.correlation.flow_id,
                    error = %err,
                    "model call failed; stage degrades"
                );
                self.reporter.report(&err, self.correlation.report_fields(), false);
                state.set_metadata(format!("{stage}.error"), err.to_string());
                Ok(Completion::Failed(err.to_string()))
            }
        }
    }

    /// Runs one search through the registry and records the batch,
    /// stamping fallback provenance.
    pub async fn search_into(&self, state: &mut ReportState, query: &str) -> Result<(), FlowError> {
        self.ensure_active()?;
        let outcome = self.search.execute(query, &self.config).await;

        if let Some(served) = outcome.backend {
            if served != self.config.search_api {
                state.set_metadata("used_fallback", true);
            }
        }
        state.record_search_batch(query, outcome.hits, outcome.backend)
    }
}

fn stamp_timing(state: &mut ReportState, stage: &str, started: Instant) {
    state.set_metadata(
        format!("{stage}_time_ms"),
        Value::from(started.elapsed().as_millis() as u64),
    );
}

fn tagged_query(text: impl Into<String>, key: &str, value: impl Into<Value>) -> Query {
    let mut query = Query::new(text);
    query.metadata.insert(key.to_string(), value.into());
    query
}

// ---------------------------------------------------------------------------
// Shared stages
// ---------------------------------------------------------------------------

/// Plans the report: seed queries, seed searches, and an outline (linear
/// topology entry stage). Falls back to the default four-section skeleton
/// when the outline cannot be parsed.
pub async fn plan_report(state: &mut ReportState, ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let cfg = &ctx.config;
    let topic = state.topic().to_string();

    let query_prompt = prompts::planner_query_writer(&cfg.report_structure, &topic, cfg.number_of_queries);
    let response = ctx
        .complete_soft(state, "plan_report", &cfg.planner_model, &query_prompt)
        .await?;

    let mut queries = match &response {
        Completion::Text(text) => parsing::parse_query_lines(text, cfg.number_of_queries as usize),
        Completion::Failed(_) => Vec::new(),
    };
    for template in parsing::template_queries(&topic) {
        if queries.len() >= cfg.number_of_queries as usize {
            break;
        }
        if !queries.contains(&template) {
            queries.push(template);
        }
    }
    queries.truncate(cfg.number_of_queries as usize);

    state.record_queries(queries.iter().map(|q| tagged_query(q, "phase", "seed")));
    for query in &queries {
        ctx.search_into(state, query).await?;
    }

    let search_context = parsing::format_search_context(state.search_results(), 300);
    let outline_prompt = prompts::planner_outline(&cfg.report_structure, &topic, &search_context);
    let outline = match ctx
        .complete_soft(state, "plan_report_outline", &cfg.planner_model, &outline_prompt)
        .await?
    {
        Completion::Text(text) => parsing::parse_outline(&text),
        Completion::Failed(_) => Vec::new(),
    };

    let sections = if outline.is_empty() {
        parsing::default_skeleton(&topic)
    } else {
        outline
    };
    state.replace_sections(sections)?;

    state.set_metadata("search_api", cfg.search_api.as_str());
    stamp_timing(state, "plan_report", started);
    Ok(StageOutcome::Next)
}

/// Initializes the iterative topology: research plan plus the standing
/// section frame. Continuation flows keep their seeded sections.
pub async fn initialize_research(state: &mut ReportState, ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let topic = state.topic().to_string();

    let planner_model = ctx.config.planner_model.clone();
    let plan = match ctx
        .complete_soft(
            state,
            "initialize_research",
            &planner_model,
            &prompts::research_plan(&topic),
        )
        .await?
    {
        Completion::Text(text) => text,
        Completion::Failed(_) => String::new(),
    };

    if state.sections().is_empty() {
        state.replace_sections(vec![
            Section::with_content(PLAN_SECTION, plan),
            Section::new("Introduction"),
            Section::new("Main Findings"),
            Section::new("Conclusion"),
        ])?;
    } else {
        // Continuation run: keep the carried sections, refresh the plan.
        state.upsert_section(PLAN_SECTION, plan);
    }

    state.set_metadata("search_api", ctx.config.search_api.as_str());
    stamp_timing(state, "initialize_research", started);
    Ok(StageOutcome::Next)
}

/// Generates the next round of queries from current knowledge, padding with
/// template queries when the model under-delivers.
pub async fn generate_queries(state: &mut ReportState, ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let cfg = &ctx.config;
    let topic = state.topic().to_string();
    let wanted = cfg.number_of_queries as usize;

    let knowledge = parsing::knowledge_markdown(state);
    let prompt = prompts::query_generator(&topic, &knowledge, cfg.number_of_queries);
    let mut queries = match ctx
        .complete_soft(state, "generate_queries", &cfg.planner_model, &prompt)
        .await?
    {
        Completion::Text(text) => parsing::parse_query_lines(&text, wanted),
        Completion::Failed(_) => Vec::new(),
    };

    for template in parsing::template_queries(&topic) {
        if queries.len() >= wanted {
            break;
        }
        if !queries.contains(&template) {
            queries.push(template);
        }
    }
    queries.truncate(wanted);

    let iteration = state.iterations() + 1;
    state.record_queries(queries.into_iter().map(|q| tagged_query(q, "iteration", iteration)));

    stamp_timing(state, "generate_queries", started);
    Ok(StageOutcome::Next)
}

/// Fans the pending queries out through the search registry.
pub async fn execute_searches(state: &mut ReportState, ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();

    let pending: Vec<String> = state.pending_queries().iter().map(|q| q.text.clone()).collect();
    for query in pending {
        ctx.search_into(state, &query).await?;
    }

    state.set_metadata("search_api", ctx.config.search_api.as_str());
    stamp_timing(state, "execute_searches", started);
    Ok(StageOutcome::Next)
}

/// Synthesizes the latest search batches into the working synthesis
/// section (create or overwrite).
pub async fn synthesize_knowledge(state: &mut ReportState, ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let cfg = &ctx.config;
    let topic = state.topic().to_string();

    let seen = state
        .metadata()
        .get("synthesized_batches")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    let new_batches = &state.search_results()[seen.min(state.search_results().len())..];
    let new_information = parsing::format_search_context(new_batches, 500);
    let knowledge = parsing::knowledge_markdown(state);

    let prompt = prompts::knowledge_synthesizer(&topic, &knowledge, &new_information);
    if let Completion::Text(text) = ctx
        .complete_soft(state, "synthesize_knowledge", &cfg.writer_model, &prompt)
        .await?
    {
        state.upsert_section(SYNTHESIS_SECTION, text);
    }

    state.set_metadata("synthesized_batches", state.search_results().len());
    stamp_timing(state, "synthesize_knowledge", started);
    Ok(StageOutcome::Next)
}

/// Rewrites the report from synthesized knowledge, preserving the research
/// plan section verbatim.
pub async fn update_report(state: &mut ReportState, ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let cfg = &ctx.config;
    let topic = state.topic().to_string();

    let synthesized = state
        .section(SYNTHESIS_SECTION)
        .map(|s| s.content.clone())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| parsing::knowledge_markdown(state));

    let prompt = prompts::report_writer(&topic, &synthesized, &cfg.report_structure);
    if let Completion::Text(text) = ctx
        .complete_soft(state, "update_report", &cfg.writer_model, &prompt)
        .await?
    {
        let mut sections = parsing::parse_report_sections(&text);
        if sections.is_empty() {
            sections = vec![
                Section::new("Introduction"),
                Section::with_content(format!("Overview of {topic}"), text),
                Section::new("Conclusion"),
            ];
        }

        // The research plan survives every rewrite untouched.
        if let Some(plan) = state.section(PLAN_SECTION).cloned() {
            sections.retain(|s| s.title != PLAN_SECTION);
            sections.insert(0, plan);
        }
        state.replace_sections(sections)?;
    }

    stamp_timing(state, "update_report", started);
    Ok(StageOutcome::Next)
}

/// Critiques the report and decides whether to loop or finalize, driving
/// the explicit iteration counter.
pub async fn reflect_on_research(state: &mut ReportState, ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let cfg = &ctx.config;
    let topic = state.topic().to_string();

    let report_body: String = state
        .sections()
        .iter()
        .filter(|s| s.title != PLAN_SECTION && s.title != SYNTHESIS_SECTION)
        .map(|s| format!("## {}\n{}\n\n", s.title, s.content))
        .collect();

    let prompt = prompts::reflection(&topic, &report_body);
    if let Completion::Text(text) = ctx
        .complete_soft(state, "reflect_on_research", &cfg.planner_model, &prompt)
        .await?
    {
        state.upsert_section(REFLECTION_SECTION, text);
    }

    let iteration = state.increment_iterations();
    stamp_timing(state, "reflect_on_research", started);

    if iteration < cfg.max_search_depth {
        Ok(StageOutcome::Branch("continue_research".to_string()))
    } else {
        Ok(StageOutcome::Branch("finalize_report".to_string()))
    }
}

/// Removes the working sections and guarantees an introduction and a
/// conclusion frame the report.
pub async fn finalize_report(state: &mut ReportState, _ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let topic = state.topic().to_string();

    state.remove_sections(&[PLAN_SECTION, SYNTHESIS_SECTION, REFLECTION_SECTION]);

    let mut sections = state.sections().to_vec();
    if sections.is_empty() {
        sections = vec![
            Section::new("Introduction"),
            Section::new(format!("Overview of {topic}")),
            Section::new("Conclusion"),
        ];
    } else {
        let has_intro = sections.iter().any(|s| {
            let t = s.title.to_lowercase();
            t.contains("introduction") || t.contains("overview") || t.contains("background")
        });
        if !has_intro {
            sections.insert(0, Section::new("Introduction"));
        }

        let has_conclusion = sections.iter().any(|s| {
            let t = s.title.to_lowercase();
            t.contains("conclusion") || t.contains("summary") || t.contains("final thoughts")
        });
        if !has_conclusion {
            sections.push(Section::new("Conclusion"));
        }
    }
    state.replace_sections(sections)?;

    stamp_timing(state, "finalize_report", started);
    Ok(StageOutcome::Next)
}

// ---------------------------------------------------------------------------
// Linear topology
// ---------------------------------------------------------------------------

/// Emits one fan-out item per top-level section for the per-section writer.
pub async fn dispatch_sections(state: &mut ReportState, _ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let items = state
        .sections()
        .iter()
        .map(|s| json!({ "section": s.title }))
        .collect();
    Ok(StageOutcome::FanOut(items))
}

/// Writes one section: per-section queries, searches, then the section
/// body. Runs on a fan-out branch state.
pub async fn write_section(
    state: &mut ReportState,
    ctx: &StageContext,
    item: &Value,
) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let cfg = &ctx.config;
    let topic = state.topic().to_string();
    let title = item
        .get("section")
        .and_then(Value::as_str)
        .ok_or_else(|| FlowError::validation("write_section item missing 'section'"))?
        .to_string();

    let focus = format!("Target section: {title}");
    let prompt = prompts::query_generator(&topic, &focus, cfg.number_of_queries);
    let mut queries = match ctx
        .complete_soft(state, "write_section_queries", &cfg.planner_model, &prompt)
        .await?
    {
        Completion::Text(text) => parsing::parse_query_lines(&text, cfg.number_of_queries as usize),
        Completion::Failed(_) => Vec::new(),
    };
    if queries.is_empty() {
        queries.push(format!("{topic} {title}"));
    }
    queries.truncate(cfg.number_of_queries as usize);

    let batch_base = state.search_results().len();
    state.record_queries(queries.iter().map(|q| tagged_query(q, "section", title.clone())));
    for query in &queries {
        ctx.search_into(state, query).await?;
    }

    let context = parsing::format_search_context(&state.search_results()[batch_base..], 500);
    let content = match ctx
        .complete_soft(
            state,
            "write_section",
            &cfg.writer_model,
            &prompts::section_writer(&title, &topic, &context),
        )
        .await?
    {
        Completion::Text(text) => text,
        Completion::Failed(message) => format!("Content for this section is unavailable: {message}"),
    };

    state.upsert_section(&title, content);
    stamp_timing(state, &format!("write_section.{title}"), started);
    Ok(StageOutcome::Next)
}

// ---------------------------------------------------------------------------
// Multi-agent topology
// ---------------------------------------------------------------------------

/// Supervisor decomposition: sub-questions become content sections and
/// queries; planning failure degrades to the default skeleton.
pub async fn supervisor_plan(state: &mut ReportState, ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let cfg = &ctx.config;
    let topic = state.topic().to_string();
    let wanted = cfg.max_concurrent_researchers as usize;

    let prompt = prompts::supervisor(&topic, cfg.max_concurrent_researchers, &cfg.report_structure);
    let mut questions = match ctx
        .complete_soft(state, "supervisor_plan", &cfg.supervisor_model, &prompt)
        .await?
    {
        Completion::Text(text) => parsing::parse_research_questions(&text, wanted),
        Completion::Failed(_) => Vec::new(),
    };

    if questions.is_empty() {
        questions = vec![
            format!("What is the background and context of {topic}?"),
            format!("What are the key aspects and components of {topic}?"),
            format!("What are the latest developments and future trends in {topic}?"),
        ];
    }
    questions.truncate(wanted);

    let mut sections = vec![Section::new("Introduction")];
    for (index, question) in questions.iter().enumerate() {
        let mut title = parsing::question_to_title(question);
        if title.is_empty() || sections.iter().any(|s| s.title == title) {
            title = format!("Research Area {}", index + 1);
        }
        sections.push(Section::new(title).with_metadata("research_question", question.clone()));
    }
    sections.push(Section::new("Conclusion"));
    state.replace_sections(sections)?;

    state.record_queries(questions.into_iter().map(|q| tagged_query(q, "role", "research_question")));
    state.set_metadata("search_api", cfg.search_api.as_str());
    stamp_timing(state, "supervisor_plan", started);
    Ok(StageOutcome::Next)
}

/// Pairs each content section with its research question and emits the
/// fan-out set, padding questions for uncovered sections.
pub async fn dispatch_researchers(state: &mut ReportState, _ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let topic = state.topic().to_string();
    let section_count = state.sections().len();
    if section_count <= 2 {
        // Nothing between introduction and conclusion: empty fan-out.
        return Ok(StageOutcome::FanOut(Vec::new()));
    }

    let titles: Vec<String> = state.sections()[1..section_count - 1]
        .iter()
        .map(|s| s.title.clone())
        .collect();
    let mut questions: Vec<String> = state.queries().iter().map(|q| q.text.clone()).collect();

    let mut padded = Vec::new();
    for (index, title) in titles.iter().enumerate() {
        if index >= questions.len() {
            let question = format!("What are the important aspects of {title} in relation to {topic}?");
            padded.push(tagged_query(question.clone(), "role", "padded_question"));
            questions.push(question);
        }
    }
    state.record_queries(padded);

    let items = titles
        .iter()
        .zip(questions.iter())
        .map(|(title, question)| json!({ "section": title, "question": question }))
        .collect();
    Ok(StageOutcome::FanOut(items))
}

/// One researcher's investigation: searches for its question and writes its
/// section. Runs on a fan-out branch state; failures degrade into the
/// section body, never the flow.
pub async fn researcher_investigate(
    state: &mut ReportState,
    ctx: &StageContext,
    item: &Value,
) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let cfg = &ctx.config;
    let topic = state.topic().to_string();
    let title = item
        .get("section")
        .and_then(Value::as_str)
        .ok_or_else(|| FlowError::validation("researcher item missing 'section'"))?
        .to_string();
    let question = item
        .get("question")
        .and_then(Value::as_str)
        .ok_or_else(|| FlowError::validation("researcher item missing 'question'"))?
        .to_string();

    let queries = vec![question.clone(), format!("{topic} {title}")];
    let batch_base = state.search_results().len();
    let recorded: Vec<String> = state.queries().iter().map(|q| q.text.clone()).collect();
    state.record_queries(
        queries
            .iter()
            .filter(|q| !recorded.contains(*q))
            .map(|q| tagged_query(q, "section", title.clone())),
    );
    for query in &queries {
        ctx.search_into(state, query).await?;
    }

    let context = parsing::format_search_context(&state.search_results()[batch_base..], 500);
    let hits: usize = state.search_results()[batch_base..].iter().map(|b| b.hits.len()).sum();

    let section = match ctx
        .complete_soft(
            state,
            "researcher_investigate",
            &cfg.researcher_model,
            &prompts::researcher(&question, &topic, &context),
        )
        .await?
    {
        Completion::Text(content) => Section::with_content(&title, content)
            .with_metadata("research_question", question.clone())
            .with_metadata("search_results_count", hits)
            .with_metadata("execution_time_ms", started.elapsed().as_millis() as u64),
        Completion::Failed(message) => Section::with_content(&title, format!("Error researching this topic: {message}"))
            .with_metadata("research_question", question.clone())
            .with_metadata("error", message),
    };
    state.adopt_section(section);

    Ok(StageOutcome::Next)
}

/// Integrates researched sections: frames the report with a written
/// introduction and conclusion.
pub async fn integrate_report(state: &mut ReportState, ctx: &StageContext) -> Result<StageOutcome, FlowError> {
    let started = Instant::now();
    let cfg = &ctx.config;
    let topic = state.topic().to_string();

    let body = parsing::format_sections(state.sections());
    let prompt = prompts::integration(&topic, &body);
    if let Completion::Text(text) = ctx
        .complete_soft(state, "integrate_report", &cfg.writer_model, &prompt)
        .await?
    {
        for parsed in parsing::parse_report_sections(&text) {
            let lowered = parsed.title.to_lowercase();
            if lowered.contains("introduction") {
                state.upsert_section("Introduction", parsed.content);
            } else if lowered.contains("conclusion") {
                state.upsert_section("Conclusion", parsed.content);
            }
        }
    }

    stamp_timing(state, "integrate_report", started);
    Ok(StageOutcome::Next)
}
