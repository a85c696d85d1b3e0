// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Enrichment Record
//!
//! Output of stage 3: extracted content plus analyzer results for every
//! valid stage-2 URL. Exactly one record is emitted per input, including
//! fetch failures (which carry an `error` and empty content rather than
//! being skipped).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::schema::{SchemaViolation, StageRecord, SCHEMA_VERSION};
use crate::value_objects::{CanonicalUrl, StageId, UrlHash};

/// One enriched page, as appended to the stage-3 record log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichmentRecord {
    pub url: CanonicalUrl,
    pub url_hash: UrlHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Main-content text, navigation/chrome stripped, capped by config.
    pub text_content: String,
    /// Whitespace token count of `text_content`.
    pub word_count: u64,
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    /// Taxonomy category labels from the analyzer.
    pub content_tags: Vec<String>,
    pub has_pdf_links: bool,
    pub has_audio_links: bool,
    pub enriched_at: DateTime<Utc>,
    /// Set when the fetch or parse failed; content fields are then empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub schema_version: u32,
}

impl EnrichmentRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: CanonicalUrl,
        title: Option<String>,
        text_content: String,
        entities: Vec<String>,
        keywords: Vec<String>,
        content_tags: Vec<String>,
        has_pdf_links: bool,
        has_audio_links: bool,
        enriched_at: DateTime<Utc>,
    ) -> Self {
        let url_hash = url.url_hash();
        let word_count = count_words(&text_content);
        Self {
            url,
            url_hash,
            title,
            text_content,
            word_count,
            entities,
            keywords,
            content_tags,
            has_pdf_links,
            has_audio_links,
            enriched_at,
            error: None,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Failure record: emitted instead of skipping the item.
    pub fn failed(url: CanonicalUrl, error: String, enriched_at: DateTime<Utc>) -> Self {
        let url_hash = url.url_hash();
        Self {
            url,
            url_hash,
            title: None,
            text_content: String::new(),
            word_count: 0,
            entities: Vec::new(),
            keywords: Vec::new(),
            content_tags: Vec::new(),
            has_pdf_links: false,
            has_audio_links: false,
            enriched_at,
            error: Some(error),
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Whitespace tokenization used for the word-count invariant.
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

impl StageRecord for EnrichmentRecord {
    const STAGE: StageId = StageId::Enrichment;

    fn url_hash(&self) -> &UrlHash {
        &self.url_hash
    }

    fn validate(&self) -> Result<(), SchemaViolation> {
        if self.url_hash != self.url.url_hash() {
            return Err(SchemaViolation::invariant(
                "url_hash",
                "url_hash != sha256(canonical(url))",
            ));
        }
        // word_count must track the token count of text_content within 10%.
        let actual = count_words(&self.text_content);
        let tolerance = (actual as f64 * 0.1).ceil() as u64;
        if self.word_count.abs_diff(actual) > tolerance {
            return Err(SchemaViolation::invariant(
                "word_count",
                format!("{} deviates more than 10% from token count {}", self.word_count, actual),
            ));
        }
        if self.error.as_deref().is_some_and(str::is_empty) {
            return Err(SchemaViolation::value("error", "present but empty"));
        }
        Ok(())
    }
}
