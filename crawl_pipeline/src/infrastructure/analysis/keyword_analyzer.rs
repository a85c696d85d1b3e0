// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Rule-Based Analyzer
//!
//! The bundled implementation of the `EnrichmentAnalyzer` port: frequency
//! keywords over a stopword list, capitalized-run entity extraction, and a
//! keyword-table taxonomy for content tags. Model-driven analyzers can
//! replace it behind the same trait.
//!
//! Analysis is CPU-bound, so the runner calls it through
//! [`analyze_off_loop`], which executes on the blocking worker pool and
//! never stalls async I/O.

use std::collections::HashMap;
use std::sync::Arc;

use crawl_pipeline_domain::{AnalyzerOutput, EnrichmentAnalyzer, PipelineError};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
    "we", "our", "you", "your", "their", "they", "more", "all", "can", "about",
];

/// University-site taxonomy: label plus trigger keywords.
const TAXONOMY: &[(&str, &[&str])] = &[
    ("academics", &["course", "degree", "curriculum", "major", "academic", "program", "syllabus"]),
    ("admissions", &["admission", "apply", "application", "enroll", "tuition", "financial aid"]),
    ("research", &["research", "laboratory", "publication", "grant", "study", "journal"]),
    ("faculty", &["professor", "faculty", "lecturer", "instructor", "staff"]),
    ("campus-life", &["housing", "dining", "club", "student life", "residence", "athletics"]),
    ("news-events", &["news", "event", "announcement", "calendar", "lecture series"]),
];

/// Rule-based analyzer with bounded output sizes.
pub struct KeywordAnalyzer {
    max_keywords: usize,
    max_entities: usize,
}

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self {
            max_keywords: 15,
            max_entities: 20,
        }
    }

    fn keywords(&self, text: &str) -> Vec<String> {
        let mut frequency: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            let word = token.to_lowercase();
            if word.len() < 4 || STOPWORDS.contains(&word.as_str()) || word.chars().all(|c| c.is_numeric()) {
                continue;
            }
            let count = frequency.entry(word.clone()).or_insert(0);
            if *count == 0 {
                order.push(word);
            }
            *count += 1;
        }
        // Sort by frequency, breaking ties by first occurrence.
        let mut ranked: Vec<(usize, String)> = order
            .into_iter()
            .enumerate()
            .map(|(first_seen, word)| {
                let count = frequency[&word];
                (first_seen, word, count)
            })
            .map(|(first_seen, word, count)| (count * 1_000_000 - first_seen, word))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked.into_iter().take(self.max_keywords).map(|(_, w)| w).collect()
    }

    /// Runs of capitalized words (2+ tokens) are treated as named entities.
    fn entities(&self, text: &str) -> Vec<String> {
        let mut entities = Vec::new();
        let mut run: Vec<&str> = Vec::new();
        for token in text.split_whitespace() {
            let word = token.trim_matches(|c: char| !c.is_alphanumeric());
            let is_capitalized = word.len() > 1
                && word.chars().next().is_some_and(char::is_uppercase)
                && word.chars().skip(1).any(char::is_lowercase);
            if is_capitalized {
                run.push(word);
            } else {
                if run.len() >= 2 {
                    entities.push(run.join(" "));
                }
                run.clear();
            }
            if entities.len() >= self.max_entities {
                break;
            }
        }
        if run.len() >= 2 && entities.len() < self.max_entities {
            entities.push(run.join(" "));
        }
        entities
    }

    fn content_tags(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        TAXONOMY
            .iter()
            .filter(|(_, triggers)| triggers.iter().any(|t| lowered.contains(t)))
            .map(|(label, _)| label.to_string())
            .collect()
    }
}

impl Default for KeywordAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl EnrichmentAnalyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str) -> Result<AnalyzerOutput, PipelineError> {
        Ok(AnalyzerOutput {
            entities: self.entities(text),
            keywords: self.keywords(text),
            content_tags: self.content_tags(text),
        })
    }
}

/// Runs an analyzer on the blocking pool and applies the deduplication
/// policy to its output.
pub async fn analyze_off_loop(
    analyzer: Arc<dyn EnrichmentAnalyzer>,
    text: String,
) -> Result<AnalyzerOutput, PipelineError> {
    tokio::task::spawn_blocking(move || analyzer.analyze(&text))
        .await
        .map_err(|e| PipelineError::AnalyzerError(format!("analyzer task panicked: {}", e)))?
        .map(AnalyzerOutput::deduplicated)
}
