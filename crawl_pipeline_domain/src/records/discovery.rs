// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Discovery Record
//!
//! Output of stage 1. One record per newly discovered URL, never mutated
//! after emission. The binding invariant is
//! `url_hash == sha256(canonical(discovered_url))`; stage 2 trusts it when
//! joining against the discovery log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::schema::{SchemaViolation, StageRecord, SCHEMA_VERSION};
use crate::value_objects::{CanonicalUrl, StageId, UrlHash};

/// Maximum breadth-first depth representable in a record.
pub const MAX_DISCOVERY_DEPTH: u8 = 10;

/// How a URL was found on its source page.
///
/// The tag doubles as a reliability signal: seeds are certain, parsed
/// anchors are reliable, speculative sources (inline JSON, generated
/// pagination) less so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoverySource {
    Seed,
    Link,
    Sitemap,
    InlineJson,
    DataAttribute,
    Form,
    Pagination,
}

impl DiscoverySource {
    /// Source reliability table, also used as the discovery-source priority
    /// component of the importance score.
    pub fn reliability(&self) -> f64 {
        match self {
            DiscoverySource::Seed => 1.0,
            DiscoverySource::Sitemap => 0.9,
            DiscoverySource::Link => 0.7,
            DiscoverySource::InlineJson => 0.5,
            DiscoverySource::DataAttribute => 0.4,
            DiscoverySource::Pagination => 0.4,
            DiscoverySource::Form => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Seed => "seed",
            DiscoverySource::Link => "link",
            DiscoverySource::Sitemap => "sitemap",
            DiscoverySource::InlineJson => "inline-json",
            DiscoverySource::DataAttribute => "data-attribute",
            DiscoverySource::Form => "form",
            DiscoverySource::Pagination => "pagination",
        }
    }
}

/// One discovered URL, as appended to the stage-1 record log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryRecord {
    /// Page the URL was found on (canonical form).
    pub source_url: CanonicalUrl,
    /// The discovered URL (canonical form).
    pub discovered_url: CanonicalUrl,
    /// SHA-256 of `discovered_url`; pipeline-wide primary key.
    pub url_hash: UrlHash,
    /// First time this URL was seen, UTC.
    pub first_seen: DateTime<Utc>,
    /// Breadth-first depth at which the URL was found (seeds are 0).
    pub discovery_depth: u8,
    pub discovery_source: DiscoverySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_text: Option<String>,
    pub is_same_domain: bool,
    /// Source reliability in [0,1].
    pub confidence: f64,
    /// Convex combination of the five discovery signals, in [0,1].
    pub importance_score: f64,
    pub schema_version: u32,
}

impl DiscoveryRecord {
    /// Builds a record, computing the hash from the discovered URL so the
    /// binding invariant holds by construction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_url: CanonicalUrl,
        discovered_url: CanonicalUrl,
        first_seen: DateTime<Utc>,
        discovery_depth: u8,
        discovery_source: DiscoverySource,
        anchor_text: Option<String>,
        is_same_domain: bool,
        importance_score: f64,
    ) -> Self {
        let url_hash = discovered_url.url_hash();
        Self {
            source_url,
            discovered_url,
            url_hash,
            first_seen,
            discovery_depth,
            discovery_source,
            anchor_text,
            is_same_domain,
            confidence: discovery_source.reliability(),
            importance_score,
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl StageRecord for DiscoveryRecord {
    const STAGE: StageId = StageId::Discovery;

    fn url_hash(&self) -> &UrlHash {
        &self.url_hash
    }

    fn validate(&self) -> Result<(), SchemaViolation> {
        if self.discovery_depth > MAX_DISCOVERY_DEPTH {
            return Err(SchemaViolation::value(
                "discovery_depth",
                format!("{} exceeds maximum {}", self.discovery_depth, MAX_DISCOVERY_DEPTH),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SchemaViolation::value(
                "confidence",
                format!("{} outside [0,1]", self.confidence),
            ));
        }
        if !(0.0..=1.0).contains(&self.importance_score) {
            return Err(SchemaViolation::value(
                "importance_score",
                format!("{} outside [0,1]", self.importance_score),
            ));
        }
        if self.url_hash != self.discovered_url.url_hash() {
            return Err(SchemaViolation::invariant(
                "url_hash",
                "url_hash != sha256(canonical(discovered_url))",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DiscoveryRecord {
        DiscoveryRecord::new(
            CanonicalUrl::parse("https://u.example/").unwrap(),
            CanonicalUrl::parse("https://u.example/admissions").unwrap(),
            Utc::now(),
            1,
            DiscoverySource::Link,
            Some("Admissions".to_string()),
            true,
            0.72,
        )
    }

    #[test]
    fn test_hash_binding_holds_by_construction() {
        let rec = record();
        assert!(rec.validate().is_ok());
        assert_eq!(rec.confidence, 0.7);
    }

    #[test]
    fn test_tampered_hash_fails_invariant() {
        let mut rec = record();
        rec.url_hash = CanonicalUrl::parse("https://u.example/other").unwrap().url_hash();
        let violation = rec.validate().unwrap_err();
        assert_eq!(violation.kind, crate::records::schema::SchemaErrorKind::InvariantViolation);
    }

    #[test]
    fn test_depth_and_score_ranges() {
        let mut rec = record();
        rec.discovery_depth = 11;
        assert!(rec.validate().is_err());

        let mut rec = record();
        rec.importance_score = 1.2;
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_source_tags_are_kebab_case() {
        let json = serde_json::to_string(&DiscoverySource::InlineJson).unwrap();
        assert_eq!(json, "\"inline-json\"");
        let json = serde_json::to_string(&DiscoverySource::DataAttribute).unwrap();
        assert_eq!(json, "\"data-attribute\"");
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        let mut value = serde_json::to_value(record()).unwrap();
        value["surprise"] = serde_json::json!(1);
        let raw = serde_json::to_string(&value).unwrap();
        assert!(serde_json::from_str::<DiscoveryRecord>(&raw).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let rec = record();
        let line = serde_json::to_string(&rec).unwrap();
        let back: DiscoveryRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.url_hash, rec.url_hash);
        assert_eq!(back.discovery_source, rec.discovery_source);
    }
}
