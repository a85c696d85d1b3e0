// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Freshness Record
//!
//! Per-URL freshness row kept in the embedded store and updated by stage 2
//! on every validation pass. Tracks the HTTP validators (Last-Modified,
//! ETag) so content changes can be detected without refetching bodies, and
//! accumulates the counts behind the per-domain churn-rate gauge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::schema::SchemaViolation;
use crate::value_objects::{CanonicalUrl, UrlHash};

/// Freshness state for a single URL, keyed by `url_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FreshnessRecord {
    pub url_hash: UrlHash,
    pub url: CanonicalUrl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub last_validated: DateTime<Utc>,
    /// Number of validation passes that have touched this URL.
    pub validation_count: u64,
    /// Number of passes on which a validator (ETag/Last-Modified) changed.
    pub content_changed_count: u64,
    pub staleness_score: f64,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl FreshnessRecord {
    /// Fresh row for a URL seen by stage 2 for the first time.
    pub fn first_observation(
        url: CanonicalUrl,
        last_modified: Option<String>,
        etag: Option<String>,
        content_type: Option<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let url_hash = url.url_hash();
        let domain = url.host();
        Self {
            url_hash,
            url,
            last_modified,
            etag,
            last_validated: observed_at,
            validation_count: 1,
            content_changed_count: 0,
            staleness_score: 0.0,
            domain,
            content_type,
        }
    }

    /// Folds a new observation into the row, detecting validator changes.
    ///
    /// A change is counted when a previously known ETag or Last-Modified
    /// differs from the newly observed one. A validator appearing for the
    /// first time is not a change.
    pub fn observe(
        &mut self,
        last_modified: Option<String>,
        etag: Option<String>,
        content_type: Option<String>,
        observed_at: DateTime<Utc>,
    ) {
        let etag_changed = matches!((&self.etag, &etag), (Some(old), Some(new)) if old != new);
        let modified_changed =
            matches!((&self.last_modified, &last_modified), (Some(old), Some(new)) if old != new);
        if etag_changed || modified_changed {
            self.content_changed_count += 1;
        }
        if etag.is_some() {
            self.etag = etag;
        }
        if last_modified.is_some() {
            self.last_modified = last_modified;
        }
        if content_type.is_some() {
            self.content_type = content_type;
        }
        self.last_validated = observed_at;
        self.validation_count += 1;
    }

    /// Fraction of validations that observed changed content.
    pub fn churn_rate(&self) -> f64 {
        self.content_changed_count as f64 / self.validation_count.max(1) as f64
    }

    pub fn validate(&self) -> Result<(), SchemaViolation> {
        if self.content_changed_count > self.validation_count {
            return Err(SchemaViolation::invariant(
                "content_changed_count",
                "cannot exceed validation_count",
            ));
        }
        if !(0.0..=1.0).contains(&self.staleness_score) {
            return Err(SchemaViolation::value(
                "staleness_score",
                format!("{} outside [0,1]", self.staleness_score),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> FreshnessRecord {
        FreshnessRecord::first_observation(
            CanonicalUrl::parse("https://u.example/news").unwrap(),
            Some("Mon, 06 Jul 2026 08:00:00 GMT".to_string()),
            Some("\"v1\"".to_string()),
            Some("text/html".to_string()),
            Utc::now(),
        )
    }

    #[test]
    fn test_first_observation_counts_once() {
        let rec = base();
        assert_eq!(rec.validation_count, 1);
        assert_eq!(rec.content_changed_count, 0);
        assert_eq!(rec.domain, "u.example");
    }

    #[test]
    fn test_etag_change_increments_churn() {
        let mut rec = base();
        rec.observe(None, Some("\"v2\"".to_string()), None, Utc::now());
        assert_eq!(rec.validation_count, 2);
        assert_eq!(rec.content_changed_count, 1);
        assert_eq!(rec.etag.as_deref(), Some("\"v2\""));
    }

    #[test]
    fn test_unchanged_validators_do_not_count() {
        let mut rec = base();
        rec.observe(
            Some("Mon, 06 Jul 2026 08:00:00 GMT".to_string()),
            Some("\"v1\"".to_string()),
            None,
            Utc::now(),
        );
        assert_eq!(rec.content_changed_count, 0);
        assert!((rec.churn_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validator_appearing_is_not_a_change() {
        let mut rec = FreshnessRecord::first_observation(
            CanonicalUrl::parse("https://u.example/a").unwrap(),
            None,
            None,
            None,
            Utc::now(),
        );
        rec.observe(Some("Tue, 07 Jul 2026 08:00:00 GMT".to_string()), None, None, Utc::now());
        assert_eq!(rec.content_changed_count, 0);
    }

    #[test]
    fn test_churn_rate() {
        let mut rec = base();
        rec.observe(None, Some("\"v2\"".to_string()), None, Utc::now());
        rec.observe(None, Some("\"v3\"".to_string()), None, Utc::now());
        rec.observe(None, Some("\"v3\"".to_string()), None, Utc::now());
        assert_eq!(rec.validation_count, 4);
        assert_eq!(rec.content_changed_count, 2);
        assert!((rec.churn_rate() - 0.5).abs() < f64::EPSILON);
    }
}
