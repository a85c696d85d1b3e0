// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Enrichment Analyzer Port
//!
//! Infrastructure port for the pluggable text analysis capability used by
//! stage 3. Implementations may be rule-based, dictionary-backed, or
//! model-driven; the runner treats them as opaque and off-loads calls to a
//! blocking worker pool since analysis is CPU-bound.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Result of analyzing one page's extracted text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerOutput {
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    /// Taxonomy category labels.
    pub content_tags: Vec<String>,
}

impl AnalyzerOutput {
    /// Applies the pipeline-wide deduplication policy to all three
    /// sequences: case-insensitive exact match, first occurrence wins,
    /// order otherwise preserved.
    pub fn deduplicated(mut self) -> Self {
        self.entities = dedup_case_insensitive(self.entities);
        self.keywords = dedup_case_insensitive(self.keywords);
        self.content_tags = dedup_case_insensitive(self.content_tags);
        self
    }
}

/// Single-method analysis capability.
///
/// Failures are non-fatal for the stage: the runner marks the item failed
/// and emits a record with empty sequences.
pub trait EnrichmentAnalyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Result<AnalyzerOutput, PipelineError>;
}

fn dedup_case_insensitive(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_is_case_insensitive_and_order_preserving() {
        let output = AnalyzerOutput {
            entities: vec![
                "Physics Department".to_string(),
                "physics department".to_string(),
                "Provost".to_string(),
            ],
            keywords: vec!["research".to_string(), "Research".to_string()],
            content_tags: vec!["academics".to_string()],
        }
        .deduplicated();

        assert_eq!(output.entities, vec!["Physics Department", "Provost"]);
        assert_eq!(output.keywords, vec!["research"]);
        assert_eq!(output.content_tags, vec!["academics"]);
    }
}
