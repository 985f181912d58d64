// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Prompt templates for the pipeline stages. Kept as plain formatting
//! functions so stages stay free of string plumbing; the wording matters to
//! the line-oriented parsers in [`super::parsing`], which expect numbered or
//! dashed lists and markdown headings back from the models.

/// Planner prompt asking for seed queries and an outline in one pass.
pub fn planner_query_writer(report_structure: &str, topic: &str, num_queries: u32) -> String {
    format!(
        "You are a research report planner. Your task is to:\n\
         1. Generate search queries that will help gather information for a report on the given topic\n\
         2. Create a structured outline for the report based on the topic and search results\n\n\
         The report should follow this structure:\n{report_structure}\n\n\
         First, generate {num_queries} search queries that will help gather comprehensive information \
         on different aspects of the topic, each on a new line.\n\n\
         Then create a detailed outline using markdown headings ('# ' for sections, '## ' for \
         subsections) with a brief description of what each section should cover.\n\n\
         Topic: {topic}\n"
    )
}

/// Planner prompt producing an outline from gathered search context.
pub fn planner_outline(report_structure: &str, topic: &str, search_context: &str) -> String {
    let mut prompt = format!(
        "You are a research report planner. Your task is to create a structured outline for a \
         report on the given topic.\n\n\
         The report should follow this structure:\n{report_structure}\n\n\
         Based on the topic and any search results provided, create a detailed outline using \
         markdown headings ('# ' for sections, '## ' for subsections).\n\n\
         Topic: {topic}\n"
    );
    if !search_context.is_empty() {
        prompt.push_str("\nSearch Results:\n");
        prompt.push_str(search_context);
    }
    prompt
}

/// Planner prompt creating the initial research plan (iterative topology).
pub fn research_plan(topic: &str) -> String {
    format!(
        "You are a research planner. Your task is to plan a research approach for the given topic.\n\n\
         Topic: {topic}\n\n\
         Please provide:\n\
         1. A brief analysis of the topic (2-3 sentences)\n\
         2. 3-5 key research questions\n\
         3. A suggested approach for conducting the research\n"
    )
}

/// Planner prompt generating iteration queries from current knowledge.
pub fn query_generator(topic: &str, current_knowledge: &str, num_queries: u32) -> String {
    format!(
        "You are a search query generator. Your task is to generate effective search queries \
         based on the research topic and current state of knowledge.\n\n\
         Topic: {topic}\n\
         Current Knowledge:\n{current_knowledge}\n\n\
         Generate {num_queries} search queries that will help gather additional information on \
         aspects of the topic that are not yet well covered. For each query, focus on a specific \
         aspect of the topic and be precise.\n\n\
         Please provide {num_queries} search queries, each on a new line.\n"
    )
}

/// Writer prompt integrating new search results with existing knowledge.
pub fn knowledge_synthesizer(topic: &str, current_knowledge: &str, new_information: &str) -> String {
    format!(
        "You are a knowledge synthesizer. Your task is to integrate new information with \
         existing knowledge.\n\n\
         Topic: {topic}\n\
         Current Knowledge:\n{current_knowledge}\n\n\
         New Information:\n{new_information}\n\n\
         Please provide:\n\
         1. A synthesis of the combined knowledge (300-500 words)\n\
         2. 2-3 key insights from the new information\n\
         3. Any remaining questions or gaps in knowledge\n"
    )
}

/// Writer prompt rewriting the full report.
pub fn report_writer(topic: &str, synthesized_knowledge: &str, report_structure: &str) -> String {
    format!(
        "You are a report writer. Your task is to create a comprehensive report based on the \
         synthesized knowledge.\n\n\
         Topic: {topic}\n\
         Synthesized Knowledge:\n{synthesized_knowledge}\n\n\
         The report should follow this structure:\n{report_structure}\n\n\
         Write clear, concise sections covering all aspects of the topic, including an \
         introduction and conclusion. Use markdown headings ('# ' or '## ') for every section.\n"
    )
}

/// Planner prompt critiquing the current report.
pub fn reflection(topic: &str, current_report: &str) -> String {
    format!(
        "You are a research reflector. Your task is to analyze the current state of research \
         and identify areas for further investigation.\n\n\
         Topic: {topic}\n\
         Current Report:\n{current_report}\n\n\
         Please provide:\n\
         1. An assessment of the current report (2-3 sentences)\n\
         2. 3-5 specific aspects that need further research\n\
         3. Suggested focus for the next research iteration\n"
    )
}

/// Writer prompt producing one section from search results.
pub fn section_writer(section_title: &str, topic: &str, search_results: &str) -> String {
    format!(
        "You are a research report section writer. Write a comprehensive section for a report \
         on '{topic}' based on the provided search results.\n\n\
         Section Title: {section_title}\n\n\
         Search Results:\n{search_results}\n\n\
         Guidelines:\n\
         - Be factual and objective, citing sources where appropriate\n\
         - Organize information logically in a clear, professional style\n\
         - Aim for approximately 300-500 words\n"
    )
}

/// Supervisor prompt decomposing the topic into research questions.
pub fn supervisor(topic: &str, num_researchers: u32, report_structure: &str) -> String {
    format!(
        "You are the supervisor agent in a multi-agent research system.\n\n\
         Research Topic: {topic}\n\n\
         Break down this topic into {num_researchers} distinct subtopics and formulate one \
         specific research question for each, phrased as a question ending with '?'. List the \
         research questions one per line.\n\n\
         The final report should follow this structure:\n{report_structure}\n"
    )
}

/// Researcher prompt answering one assigned question.
pub fn researcher(research_question: &str, topic: &str, search_results: &str) -> String {
    format!(
        "You are a specialized researcher agent in a multi-agent research system.\n\n\
         Your assigned research question: {research_question}\n\
         Related to the broader topic: {topic}\n\n\
         Search Results:\n{search_results}\n\n\
         Synthesize this information into a comprehensive section of approximately 500-800 \
         words with key findings, supporting evidence, citations where appropriate, and a \
         logical paragraph structure.\n"
    )
}

/// Integration prompt framing the researched sections.
pub fn integration(topic: &str, research_sections: &str) -> String {
    format!(
        "You are the integration agent in a multi-agent research system.\n\n\
         Research Topic: {topic}\n\n\
         Research Sections:\n{research_sections}\n\n\
         Write an introduction that provides context and outlines the scope of the report, and \
         a conclusion that summarizes key findings and their implications. Present them as \
         markdown sections titled '# Introduction' and '# Conclusion'.\n"
    )
}
