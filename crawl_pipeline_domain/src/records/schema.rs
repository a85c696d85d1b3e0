// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Schema Guard
//!
//! Shared vocabulary for record validation. Structural errors (missing
//! fields, unknown fields, wrong types) surface from serde during
//! deserialization — every record type is declared with
//! `deny_unknown_fields` — and are classified here; value-range and
//! cross-field invariants are checked by each record's `validate()`.
//!
//! The [`SchemaReport`] aggregates a full-file validation pass: totals,
//! per-category counts, and a bounded list of sample violations with line
//! numbers.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::value_objects::{StageId, UrlHash};

/// Current on-disk schema version stamped into every record.
pub const SCHEMA_VERSION: u32 = 1;

/// Maximum sample violations retained in a [`SchemaReport`].
pub const MAX_SAMPLE_ERRORS: usize = 20;

/// Validation error categories, matching the stage-summary breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaErrorKind {
    MissingField,
    UnknownField,
    TypeError,
    ValueError,
    InvariantViolation,
}

impl SchemaErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaErrorKind::MissingField => "missing-field",
            SchemaErrorKind::UnknownField => "unknown-field",
            SchemaErrorKind::TypeError => "type-error",
            SchemaErrorKind::ValueError => "value-error",
            SchemaErrorKind::InvariantViolation => "invariant-violation",
        }
    }

    /// Best-effort classification of a serde_json deserialization error.
    ///
    /// serde_json does not expose a structured error kind for data errors,
    /// so this keys off the stable message prefixes it emits.
    pub fn classify_serde(err: &serde_json::Error) -> Self {
        let msg = err.to_string();
        if msg.starts_with("missing field") {
            SchemaErrorKind::MissingField
        } else if msg.starts_with("unknown field") {
            SchemaErrorKind::UnknownField
        } else if msg.starts_with("invalid type") || msg.starts_with("invalid value") && msg.contains("expected") {
            SchemaErrorKind::TypeError
        } else {
            SchemaErrorKind::ValueError
        }
    }
}

impl fmt::Display for SchemaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single schema violation, optionally anchored to a log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub kind: SchemaErrorKind,
    pub field: Option<String>,
    pub message: String,
    pub line: Option<u64>,
}

impl SchemaViolation {
    pub fn invariant(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: SchemaErrorKind::InvariantViolation,
            field: Some(field.into()),
            message: message.into(),
            line: None,
        }
    }

    pub fn value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: SchemaErrorKind::ValueError,
            field: Some(field.into()),
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.field, self.line) {
            (Some(field), Some(line)) => {
                write!(f, "[{}] line {}: field '{}': {}", self.kind, line, field, self.message)
            }
            (Some(field), None) => write!(f, "[{}] field '{}': {}", self.kind, field, self.message),
            (None, Some(line)) => write!(f, "[{}] line {}: {}", self.kind, line, self.message),
            (None, None) => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Result of validating an entire record-log file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaReport {
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    /// Counts keyed by error category string.
    pub by_category: BTreeMap<String, u64>,
    /// Up to [`MAX_SAMPLE_ERRORS`] sample violations with line numbers.
    pub samples: Vec<SchemaViolation>,
}

impl SchemaReport {
    pub fn record_valid(&mut self) {
        self.total += 1;
        self.valid += 1;
    }

    pub fn record_invalid(&mut self, violation: SchemaViolation) {
        self.total += 1;
        self.invalid += 1;
        *self.by_category.entry(violation.kind.as_str().to_string()).or_insert(0) += 1;
        if self.samples.len() < MAX_SAMPLE_ERRORS {
            self.samples.push(violation);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.invalid == 0
    }
}

/// Contract implemented by all three stage record types.
///
/// `validate()` covers value ranges and cross-field invariants; structural
/// checks are serde's job. The record log is generic over this trait.
pub trait StageRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The stage that emits this record type.
    const STAGE: StageId;

    /// The pipeline-wide primary key binding this record to its URL.
    fn url_hash(&self) -> &UrlHash;

    /// Value-range and cross-field invariant checks.
    fn validate(&self) -> Result<(), SchemaViolation>;
}
