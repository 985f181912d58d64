// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Model Output Parsing
//!
//! Line-oriented parsers turning model text into structured state, plus the
//! markdown renderer for finished reports. Models are unreliable formatters,
//! so every parser here tolerates numbering variants, stray blank lines and
//! missing structure, and every caller has a deterministic fallback for the
//! empty-parse case.

use research_flow_domain::{ReportState, SearchBatch, Section};

/// Strips list numbering (`1. `, `2) `) and bullets (`- `, `* `) from a
/// line.
fn strip_list_markers(line: &str) -> &str {
    let line = line.trim();
    let bytes = line.as_bytes();
    if bytes.first().is_some_and(|b| b.is_ascii_digit()) {
        // Swallow a run of digits followed by '.' or ')' and a space
        let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return stripped.trim();
        }
    }
    if let Some(stripped) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return stripped.trim();
    }
    line
}

/// Extracts up to `max` query lines from model output, skipping headings and
/// blank lines and stripping list markers.
pub fn parse_query_lines(text: &str, max: usize) -> Vec<String> {
    let mut queries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cleaned = strip_list_markers(line);
        if cleaned.is_empty() {
            continue;
        }
        queries.push(cleaned.to_string());
        if queries.len() == max {
            break;
        }
    }
    queries
}

/// Extracts up to `max` research questions: lines ending in `?` after
/// marker stripping, falling back to plain query lines when the model did
/// not phrase questions.
pub fn parse_research_questions(text: &str, max: usize) -> Vec<String> {
    let questions: Vec<String> = text
        .lines()
        .map(|l| strip_list_markers(l.trim()).to_string())
        .filter(|l| l.ends_with('?'))
        .take(max)
        .collect();
    if questions.is_empty() {
        parse_query_lines(text, max)
    } else {
        questions
    }
}

/// Converts a research question into a section title: drops the trailing
/// question mark and the leading "What is/are" scaffolding, then
/// capitalizes.
pub fn question_to_title(question: &str) -> String {
    let mut title = question.trim().trim_end_matches('?').trim().to_string();
    for prefix in ["What is ", "What are ", "What "] {
        if let Some(rest) = title.strip_prefix(prefix) {
            title = rest.to_string();
            break;
        }
    }
    let mut chars = title.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => title,
    }
}

/// Parses a planner outline into a section tree: `# ` or numbered lines are
/// sections, `## ` or indented dashes are subsections. Duplicate titles are
/// skipped to preserve the unique-title invariant.
pub fn parse_outline(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();

    for raw in text.lines() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let is_subsection = raw.starts_with("## ")
            || (raw.starts_with(' ') && (trimmed.starts_with("- ") || trimmed.starts_with("* ")));

        if is_subsection {
            let title = strip_heading(trimmed);
            if title.is_empty() {
                continue;
            }
            if let Some(parent) = sections.last_mut() {
                // Duplicate subsection titles are dropped
                let _ = parent.add_subsection(Section::new(title));
            }
            continue;
        }

        let is_section = raw.starts_with("# ")
            || trimmed
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
                && strip_list_markers(trimmed) != trimmed;

        if is_section {
            let title = strip_heading(trimmed);
            if !title.is_empty() && !sections.iter().any(|s| s.title == title) {
                sections.push(Section::new(title));
            }
        }
    }

    sections
}

/// Parses a written report into flat sections: every `# ` or `## ` heading
/// starts a section, following lines accumulate as content. Content under a
/// repeated title is appended to the first occurrence.
pub fn parse_report_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;

    let mut flush = |current: &mut Option<(String, Vec<String>)>, sections: &mut Vec<Section>| {
        if let Some((title, lines)) = current.take() {
            let content = lines.join("\n").trim().to_string();
            match sections.iter_mut().find(|s| s.title == title) {
                Some(existing) => {
                    if !content.is_empty() {
                        if !existing.content.is_empty() {
                            existing.content.push_str("\n\n");
                        }
                        existing.content.push_str(&content);
                    }
                }
                None => sections.push(Section::with_content(title, content)),
            }
        }
    };

    for line in text.lines() {
        if line.starts_with("# ") || line.starts_with("## ") {
            flush(&mut current, &mut sections);
            current = Some((strip_heading(line.trim()).to_string(), Vec::new()));
        } else if let Some((_, lines)) = &mut current {
            lines.push(line.to_string());
        }
    }
    flush(&mut current, &mut sections);

    sections
}

fn strip_heading(line: &str) -> String {
    let line = line.trim_start_matches('#').trim();
    strip_list_markers(line).to_string()
}

/// The default four-part skeleton installed when an outline cannot be
/// parsed.
pub fn default_skeleton(topic: &str) -> Vec<Section> {
    vec![
        Section::new("Introduction"),
        Section::new(format!("Overview of {topic}")),
        Section::new("Key Aspects"),
        Section::new("Conclusion"),
    ]
}

/// Template queries padding out a short model answer.
pub fn template_queries(topic: &str) -> Vec<String> {
    vec![
        format!("latest research on {topic}"),
        format!("key aspects of {topic}"),
        format!("comprehensive information about {topic}"),
    ]
}

/// Renders the section tree to markdown (`# ` sections, `## ` subsections).
pub fn format_sections(sections: &[Section]) -> String {
    let mut out = String::new();
    for section in sections {
        out.push_str("# ");
        out.push_str(&section.title);
        out.push('\n');
        if !section.content.is_empty() {
            out.push('\n');
            out.push_str(&section.content);
            out.push('\n');
        }
        for sub in &section.subsections {
            out.push_str("\n## ");
            out.push_str(&sub.title);
            out.push('\n');
            if !sub.content.is_empty() {
                out.push('\n');
                out.push_str(&sub.content);
                out.push('\n');
            }
        }
        out.push('\n');
    }
    out
}

/// Renders the non-empty sections as prompt context.
pub fn knowledge_markdown(state: &ReportState) -> String {
    let mut out = String::new();
    for section in state.sections() {
        if !section.content.is_empty() {
            out.push_str(&format!("## {}\n{}\n\n", section.title, section.content));
        }
    }
    out
}

/// Renders search batches as prompt context, capping each hit's content.
pub fn format_search_context(batches: &[SearchBatch], content_cap: usize) -> String {
    let mut out = String::new();
    for batch in batches {
        out.push_str(&format!("Search Query: {}\n\n", batch.query));
        for hit in &batch.hits {
            let content: String = hit.content.chars().take(content_cap).collect();
            out.push_str(&format!(
                "Title: {}\nURL: {}\nContent: {}\n\n",
                hit.title, hit.url, content
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Query parsing strips numbering and bullets and skips headings.
    #[test]
    fn test_parse_query_lines() {
        let text = "\
# Search Queries
1. first query
2) second query
- third query
* fourth query

plain fifth query";
        let queries = parse_query_lines(text, 10);
        assert_eq!(
            queries,
            vec![
                "first query",
                "second query",
                "third query",
                "fourth query",
                "plain fifth query"
            ]
        );

        assert_eq!(parse_query_lines(text, 2).len(), 2);
    }

    /// Question extraction keeps only question-shaped lines, with fallback.
    #[test]
    fn test_parse_research_questions() {
        let text = "\
1. What is photosynthesis?
Some commentary line
2. How do plants store energy?";
        let questions = parse_research_questions(text, 5);
        assert_eq!(
            questions,
            vec!["What is photosynthesis?", "How do plants store energy?"]
        );

        // No question marks at all: fall back to line parsing
        let fallback = parse_research_questions("- topic one\n- topic two", 5);
        assert_eq!(fallback, vec!["topic one", "topic two"]);
    }

    #[test]
    fn test_question_to_title() {
        assert_eq!(question_to_title("What is photosynthesis?"), "Photosynthesis");
        assert_eq!(
            question_to_title("What are the key aspects of solar power?"),
            "The key aspects of solar power"
        );
        assert_eq!(question_to_title("How do plants store energy?"), "How do plants store energy");
    }

    /// Outline parsing builds a section tree with subsections.
    #[test]
    fn test_parse_outline() {
        let text = "\
# Introduction
Some description
## Scope
1. Main Findings
   - Detail A
   - Detail B
# Conclusion";
        let outline = parse_outline(text);
        let titles: Vec<&str> = outline.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "Main Findings", "Conclusion"]);
        assert_eq!(outline[0].subsections[0].title, "Scope");
        assert_eq!(outline[1].subsections.len(), 2);
    }

    /// Duplicate section titles are skipped to keep the invariant.
    #[test]
    fn test_parse_outline_dedupes() {
        let outline = parse_outline("# Overview\n# Overview\n# Details");
        assert_eq!(outline.len(), 2);
    }

    /// Report parsing splits on headings and merges repeated titles.
    #[test]
    fn test_parse_report_sections() {
        let text = "\
# Introduction
Intro text.
## Findings
Finding text
spanning lines.
# Introduction
More intro.";
        let sections = parse_report_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "Introduction");
        assert!(sections[0].content.contains("Intro text."));
        assert!(sections[0].content.contains("More intro."));
        assert!(sections[1].content.contains("spanning lines."));
    }

    /// Markdown rendering round-trips titles and content.
    #[test]
    fn test_format_sections() {
        let mut section = Section::with_content("Introduction", "Hello.");
        section.add_subsection(Section::with_content("Scope", "Narrow.")).unwrap();

        let text = format_sections(&[section, Section::new("Conclusion")]);
        assert!(text.contains("# Introduction"));
        assert!(text.contains("Hello."));
        assert!(text.contains("## Scope"));
        assert!(text.contains("# Conclusion"));
    }

    /// Search context rendering caps per-hit content length.
    #[test]
    fn test_format_search_context_caps_content() {
        use research_flow_domain::{SearchApi, SearchHit};
        let batch = SearchBatch {
            query: "q".into(),
            hits: vec![SearchHit::new("T", "u", "x".repeat(1000))],
            backend: Some(SearchApi::Tavily),
            created_at: chrono::Utc::now(),
        };
        let text = format_search_context(&[batch], 100);
        assert!(text.len() < 300);
        assert!(text.contains("Search Query: q"));
    }
}
