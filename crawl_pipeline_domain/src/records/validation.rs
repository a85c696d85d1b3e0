// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Validation Record
//!
//! Output of stage 2: one record per discovery-log input describing the
//! URL's HTTP liveness. `status_code == 0` means the request never produced
//! an HTTP response (transport failure after retry exhaustion). The
//! cross-field rule `is_valid == false ⇒ error_message non-empty` is the
//! contract that downstream consumers and the schema guard both rely on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::schema::{SchemaViolation, StageRecord, SCHEMA_VERSION};
use crate::value_objects::{CanonicalUrl, StageId, UrlHash};

/// One validated URL, as appended to the stage-2 record log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationRecord {
    pub url: CanonicalUrl,
    pub url_hash: UrlHash,
    /// Final HTTP status after redirects; 0 for transport errors.
    pub status_code: u16,
    /// True iff `200 <= status < 400` and the content type is acceptable.
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Header value when well-formed and sane, otherwise observed byte
    /// count; never fabricated, so absent when neither is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    /// Wall time of the whole HEAD+GET sequence, monotonic clock.
    pub response_time_ms: u64,
    /// Intermediate redirect targets, in order, bounded by the client.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    /// Freshness estimate in [0,1]; see the staleness service.
    pub staleness_score: f64,
    /// Required (non-empty) whenever `is_valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub validated_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl ValidationRecord {
    /// Record for a URL that produced an HTTP response.
    #[allow(clippy::too_many_arguments)]
    pub fn from_response(
        url: CanonicalUrl,
        status_code: u16,
        content_type: Option<String>,
        content_length: Option<u64>,
        response_time_ms: u64,
        redirect_chain: Vec<String>,
        validated_at: DateTime<Utc>,
    ) -> Self {
        let url_hash = url.url_hash();
        Self {
            url,
            url_hash,
            status_code,
            is_valid: false, // finalized by mark_validity
            content_type,
            content_length,
            response_time_ms,
            redirect_chain,
            last_modified: None,
            etag: None,
            cache_control: None,
            staleness_score: 0.0,
            error_message: None,
            validated_at,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Record for a URL whose request failed at the transport layer.
    pub fn from_transport_failure(
        url: CanonicalUrl,
        error_message: String,
        response_time_ms: u64,
        validated_at: DateTime<Utc>,
    ) -> Self {
        let url_hash = url.url_hash();
        Self {
            url,
            url_hash,
            status_code: 0,
            is_valid: false,
            content_type: None,
            content_length: None,
            response_time_ms,
            redirect_chain: Vec::new(),
            last_modified: None,
            etag: None,
            cache_control: None,
            staleness_score: 0.0,
            error_message: Some(error_message),
            validated_at,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Applies the validity rule given the acceptable content-type set and
    /// fills `error_message` for the invalid cases.
    pub fn mark_validity(&mut self, content_type_acceptable: bool) {
        let status_ok = (200..400).contains(&self.status_code);
        self.is_valid = status_ok && content_type_acceptable;
        if !self.is_valid && self.error_message.is_none() {
            let reason = if !status_ok {
                format!("HTTP status {}", self.status_code)
            } else {
                format!(
                    "unacceptable content type '{}'",
                    self.content_type.as_deref().unwrap_or("<none>")
                )
            };
            self.error_message = Some(reason);
        }
    }
}

impl StageRecord for ValidationRecord {
    const STAGE: StageId = StageId::Validation;

    fn url_hash(&self) -> &UrlHash {
        &self.url_hash
    }

    fn validate(&self) -> Result<(), SchemaViolation> {
        if self.status_code > 999 {
            return Err(SchemaViolation::value(
                "status_code",
                format!("{} outside 0..=999", self.status_code),
            ));
        }
        if self.is_valid && !(200..400).contains(&self.status_code) {
            return Err(SchemaViolation::invariant(
                "is_valid",
                format!("is_valid with status {}", self.status_code),
            ));
        }
        if !self.is_valid && self.error_message.as_deref().map_or(true, str::is_empty) {
            return Err(SchemaViolation::invariant(
                "error_message",
                "required and non-empty when is_valid == false",
            ));
        }
        if !(0.0..=1.0).contains(&self.staleness_score) {
            return Err(SchemaViolation::value(
                "staleness_score",
                format!("{} outside [0,1]", self.staleness_score),
            ));
        }
        if self.url_hash != self.url.url_hash() {
            return Err(SchemaViolation::invariant(
                "url_hash",
                "url_hash != sha256(canonical(url))",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_record() -> ValidationRecord {
        let mut rec = ValidationRecord::from_response(
            CanonicalUrl::parse("https://u.example/research").unwrap(),
            200,
            Some("text/html".to_string()),
            Some(4096),
            38,
            vec![],
            Utc::now(),
        );
        rec.mark_validity(true);
        rec
    }

    #[test]
    fn test_valid_record_passes() {
        let rec = ok_record();
        assert!(rec.is_valid);
        assert!(rec.error_message.is_none());
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_unacceptable_content_type_sets_error() {
        let mut rec = ValidationRecord::from_response(
            CanonicalUrl::parse("https://u.example/logo.png").unwrap(),
            200,
            Some("image/png".to_string()),
            None,
            12,
            vec![],
            Utc::now(),
        );
        rec.mark_validity(false);
        assert!(!rec.is_valid);
        assert!(rec.error_message.as_deref().unwrap().contains("image/png"));
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_transport_failure_record() {
        let rec = ValidationRecord::from_transport_failure(
            CanonicalUrl::parse("https://u.example/dead").unwrap(),
            "connection refused".to_string(),
            30250,
            Utc::now(),
        );
        assert_eq!(rec.status_code, 0);
        assert!(!rec.is_valid);
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_invalid_without_message_is_violation() {
        let mut rec = ok_record();
        rec.is_valid = false;
        rec.error_message = None;
        assert!(rec.validate().is_err());
        rec.error_message = Some(String::new());
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_valid_with_redirect_status_is_allowed() {
        let mut rec = ok_record();
        rec.status_code = 301;
        rec.redirect_chain = vec!["https://u.example/new-home".to_string()];
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_valid_with_error_status_is_violation() {
        let mut rec = ok_record();
        rec.status_code = 404;
        assert!(rec.validate().is_err());
    }
}
