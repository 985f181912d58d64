// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Report State
//!
//! The mutable document a research run accumulates into.
//!
//! ## Overview
//!
//! A [`ReportState`] is created by the flow manager at admission, mutated only
//! by the worker executing the flow, and frozen once the flow reaches a
//! terminal status. It carries the growing section tree, the queries issued so
//! far, the search batches those queries produced, optional reviewer feedback
//! and free-form run metadata.
//!
//! ## Invariants
//!
//! - `last_updated >= start_time`: every mutator refreshes `last_updated`
//! - Section titles are unique within their parent
//! - Every search batch references an existing query by text
//!
//! ## Serialization
//!
//! The state round-trips through JSON unchanged (snapshot format). Timestamps
//! serialize as RFC3339 via chrono's serde support.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Configuration, SearchApi};
use crate::error::FlowError;
use crate::services::search_backend::SearchHit;

/// Title of the working section holding the research plan.
pub const PLAN_SECTION: &str = "Research Plan";

/// Title of the working section holding synthesized knowledge.
pub const SYNTHESIS_SECTION: &str = "Knowledge Synthesis";

/// Title of the working section holding the latest reflection.
pub const REFLECTION_SECTION: &str = "Research Reflection";

/// Metadata key tracking reflect-loop iterations.
pub const ITERATIONS_KEY: &str = "iterations";

/// A section of the report: a titled tree node with content, ordered
/// subsections and free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub subsections: Vec<Section>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Section {
    /// Creates an empty section.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: String::new(),
            subsections: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a section with content.
    pub fn with_content(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::new(title)
        }
    }

    /// Appends a subsection, enforcing title uniqueness among siblings.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] when a sibling already carries the
    /// title.
    pub fn add_subsection(&mut self, subsection: Section) -> Result<(), FlowError> {
        if self.subsections.iter().any(|s| s.title == subsection.title) {
            return Err(FlowError::validation(format!(
                "Duplicate subsection title '{}' under '{}'",
                subsection.title, self.title
            )));
        }
        self.subsections.push(subsection);
        Ok(())
    }

    /// Sets a metadata entry, returning self for chaining.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A search query issued (or about to be issued) by the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    pub created_at: DateTime<Utc>,
}

impl Query {
    /// Creates a query stamped with the current time.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// Results one query produced against one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchBatch {
    /// Text of the query this batch answers.
    pub query: String,

    pub hits: Vec<SearchHit>,

    /// Backend that served the batch; `None` when every provider failed and
    /// the batch is an empty placeholder.
    pub backend: Option<SearchApi>,

    pub created_at: DateTime<Utc>,
}

/// Reviewer feedback on one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub section_title: String,
    pub text: String,
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// The mutable document accumulating during a research run.
///
/// See the module documentation for ownership and invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportState {
    topic: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_topic: Option<String>,

    #[serde(default)]
    sections: Vec<Section>,

    #[serde(default)]
    queries: Vec<Query>,

    #[serde(default)]
    search_results: Vec<SearchBatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    feedback: Option<Feedback>,

    #[serde(default)]
    metadata: BTreeMap<String, Value>,

    config: Configuration,

    start_time: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl ReportState {
    /// Creates a fresh state for `topic`.
    pub fn new(topic: impl Into<String>, config: Configuration) -> Self {
        let now = Utc::now();
        Self {
            topic: topic.into(),
            previous_topic: None,
            sections: Vec::new(),
            queries: Vec::new(),
            search_results: Vec::new(),
            feedback: None,
            metadata: BTreeMap::new(),
            config,
            start_time: now,
            last_updated: now,
        }
    }

    /// Creates a continuation state seeded with a prior run's sections.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] when the seeded sections violate the
    /// unique-title invariant.
    pub fn continuation(
        topic: impl Into<String>,
        previous_topic: impl Into<String>,
        seed_sections: Vec<Section>,
        config: Configuration,
    ) -> Result<Self, FlowError> {
        let mut state = Self::new(topic, config);
        state.previous_topic = Some(previous_topic.into());
        state.replace_sections(seed_sections)?;
        Ok(state)
    }

    // --- accessors -------------------------------------------------------

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn previous_topic(&self) -> Option<&str> {
        self.previous_topic.as_deref()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn search_results(&self) -> &[SearchBatch] {
        &self.search_results
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    // --- section operations ---------------------------------------------

    /// True when a top-level section with `title` exists.
    pub fn has_section(&self, title: &str) -> bool {
        self.sections.iter().any(|s| s.title == title)
    }

    /// Finds a top-level section by title.
    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title == title)
    }

    /// Creates a top-level section, or overwrites the content of an existing
    /// one with the same title (create-or-overwrite semantics used by the
    /// synthesis and reflection stages).
    pub fn upsert_section(&mut self, title: &str, content: impl Into<String>) {
        let content = content.into();
        match self.sections.iter_mut().find(|s| s.title == title) {
            Some(existing) => existing.content = content,
            None => self.sections.push(Section::with_content(title, content)),
        }
        self.touch();
    }

    /// Appends a top-level section.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] on a duplicate title.
    pub fn push_section(&mut self, section: Section) -> Result<(), FlowError> {
        if self.has_section(&section.title) {
            return Err(FlowError::validation(format!(
                "Duplicate section title '{}'",
                section.title
            )));
        }
        self.sections.push(section);
        self.touch();
        Ok(())
    }

    /// Replaces an existing section wholesale (content, subsections and
    /// metadata), keeping its position; appends when the title is new. Used
    /// when merging fan-out branches back in producer order.
    pub fn adopt_section(&mut self, section: Section) {
        match self.sections.iter_mut().find(|s| s.title == section.title) {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
        self.touch();
    }

    /// Replaces the whole section tree.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] when the replacement violates the
    /// unique-title invariant at any level.
    pub fn replace_sections(&mut self, sections: Vec<Section>) -> Result<(), FlowError> {
        validate_unique_titles(&sections, "<root>")?;
        self.sections = sections;
        self.touch();
        Ok(())
    }

    /// Removes every top-level section whose title is in `titles`.
    pub fn remove_sections(&mut self, titles: &[&str]) {
        self.sections.retain(|s| !titles.contains(&s.title.as_str()));
        self.touch();
    }

    // --- query / search operations --------------------------------------

    /// Appends queries to the run.
    pub fn record_queries<I>(&mut self, queries: I)
    where
        I: IntoIterator<Item = Query>,
    {
        self.queries.extend(queries);
        self.touch();
    }

    /// Queries that do not have a search batch yet, in issue order.
    pub fn pending_queries(&self) -> Vec<&Query> {
        self.queries
            .iter()
            .filter(|q| !self.search_results.iter().any(|b| b.query == q.text))
            .collect()
    }

    /// Records the results one query produced.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] when `query` was never recorded,
    /// preserving the batch-references-query invariant.
    pub fn record_search_batch(
        &mut self,
        query: &str,
        hits: Vec<SearchHit>,
        backend: Option<SearchApi>,
    ) -> Result<(), FlowError> {
        if !self.queries.iter().any(|q| q.text == query) {
            return Err(FlowError::validation(format!(
                "Search batch references unknown query '{}'",
                query
            )));
        }
        self.search_results.push(SearchBatch {
            query: query.to_string(),
            hits,
            backend,
            created_at: Utc::now(),
        });
        self.touch();
        Ok(())
    }

    /// Adopts a batch produced on a fan-out branch, preserving its original
    /// timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] when the batch references an
    /// unrecorded query.
    pub fn adopt_search_batch(&mut self, batch: SearchBatch) -> Result<(), FlowError> {
        if !self.queries.iter().any(|q| q.text == batch.query) {
            return Err(FlowError::validation(format!(
                "Search batch references unknown query '{}'",
                batch.query
            )));
        }
        self.search_results.push(batch);
        self.touch();
        Ok(())
    }

    /// Records reviewer feedback, replacing any prior feedback.
    pub fn record_feedback(&mut self, feedback: Feedback) {
        self.feedback = Some(feedback);
        self.touch();
    }

    // --- metadata --------------------------------------------------------

    /// Sets a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
        self.touch();
    }

    /// Current reflect-loop iteration count (0 before the first reflection).
    pub fn iterations(&self) -> u32 {
        self.metadata
            .get(ITERATIONS_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    /// Increments the reflect-loop iteration counter, returning the new
    /// value.
    pub fn increment_iterations(&mut self) -> u32 {
        let next = self.iterations() + 1;
        self.metadata.insert(ITERATIONS_KEY.to_string(), Value::from(next));
        self.touch();
        next
    }

    // --- snapshots -------------------------------------------------------

    /// Serializes the state to its JSON snapshot form.
    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Restores a state from its JSON snapshot form.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Transformation`] for malformed JSON and
    /// [`FlowError::Validation`] when the snapshot violates invariants.
    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let state: ReportState = serde_json::from_str(json)?;
        validate_unique_titles(&state.sections, "<root>")?;
        if state.last_updated < state.start_time {
            return Err(FlowError::validation(
                "Snapshot last_updated precedes start_time",
            ));
        }
        Ok(state)
    }

    fn touch(&mut self) {
        let now = Utc::now();
        // Clock steps backwards must not break the ordering invariant.
        self.last_updated = now.max(self.last_updated);
    }
}

fn validate_unique_titles(sections: &[Section], parent: &str) -> Result<(), FlowError> {
    let mut seen = std::collections::BTreeSet::new();
    for section in sections {
        if !seen.insert(section.title.as_str()) {
            return Err(FlowError::validation(format!(
                "Duplicate section title '{}' under '{}'",
                section.title, parent
            )));
        }
        validate_unique_titles(&section.subsections, &section.title)?;
    }
    Ok(())
}
