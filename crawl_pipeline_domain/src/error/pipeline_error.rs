// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! Hierarchical error system for the crawl pipeline domain. Failures are
//! categorized so that stage runners can make retry decisions and the
//! orchestrator can propagate the most severe class to the process exit code.
//!
//! ## Error Categories
//!
//! #### Input Errors
//! - **InputError**: unreadable seed file, malformed input record
//! - **SchemaViolation**: a record failed schema or invariant validation
//! - **InvalidConfiguration**: malformed or out-of-range configuration
//!
//! #### Network Errors
//! - **TransportError**: DNS, connect, timeout, TLS failures (retryable)
//! - **ProtocolError**: HTTP status-level failures (retryable only for
//!   5xx/408/429)
//!
//! #### Processing Errors
//! - **ParseError**: malformed HTML/JSON encountered mid-stage
//! - **AnalyzerError**: the enrichment analyzer failed for an item
//!
//! #### Persistence Errors
//! - **PersistenceError**: record log or store write failure
//! - **CheckpointError**: checkpoint save/load/recovery failure
//! - **DatabaseError**: embedded store (SQLite) operation failure
//!
//! #### Integrity Errors
//! - **IntegrityError**: input-file hash mismatch on resume, orphaned
//!   url_hash in cross-stage validation
//!
//! ## Recovery
//!
//! `is_recoverable()` marks the transient classes (transport, timeout,
//! resource). Retry policy and backoff live in infrastructure; the domain
//! only classifies.

use thiserror::Error;

/// Domain-specific errors for the crawl pipeline system.
///
/// Each variant carries a descriptive message. Variants map one-to-one onto
/// the error taxonomy used for stage summaries and exit-code mapping.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Input error: {0}")]
    InputError(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Protocol error (HTTP {status}): {message}")]
    ProtocolError { status: u16, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Analyzer error: {0}")]
    AnalyzerError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Integrity check failed: {0}")]
    IntegrityError(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),
}

impl PipelineError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new input error
    pub fn input_error(msg: impl Into<String>) -> Self {
        Self::InputError(msg.into())
    }

    /// Creates a new transport error
    pub fn transport_error(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Creates a new protocol error for an HTTP status
    pub fn protocol_error(status: u16, msg: impl Into<String>) -> Self {
        Self::ProtocolError {
            status,
            message: msg.into(),
        }
    }

    /// Creates a new persistence error
    pub fn persistence_error(msg: impl Into<String>) -> Self {
        Self::PersistenceError(msg.into())
    }

    /// Creates a new checkpoint error
    pub fn checkpoint_error(msg: impl Into<String>) -> Self {
        Self::CheckpointError(msg.into())
    }

    /// Creates a new database error
    pub fn database_error(msg: impl Into<String>) -> Self {
        Self::DatabaseError(msg.into())
    }

    /// Creates a new integrity error
    pub fn integrity_error(msg: impl Into<String>) -> Self {
        Self::IntegrityError(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Creates a new metrics error
    pub fn metrics_error(msg: impl Into<String>) -> Self {
        Self::MetricsError(msg.into())
    }

    /// Creates a new IO error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::IoError(msg.into())
    }

    /// Checks if the error is a transient condition worth retrying.
    ///
    /// Protocol errors are retryable only for 5xx, 408, and 429; all other
    /// 4xx statuses are permanent.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PipelineError::TransportError(_)
            | PipelineError::TimeoutError(_)
            | PipelineError::ResourceExhausted(_) => true,
            PipelineError::ProtocolError { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Checks if the error must abort the stage (vs. counting the item failed)
    pub fn is_fatal_for_stage(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConfiguration(_)
                | PipelineError::CheckpointError(_)
                | PipelineError::PersistenceError(_)
                | PipelineError::IntegrityError(_)
        )
    }

    /// Gets the error category
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::InvalidConfiguration(_) => "configuration",
            PipelineError::InputError(_) => "input",
            PipelineError::SchemaViolation(_) => "schema",
            PipelineError::TransportError(_) => "transport",
            PipelineError::ProtocolError { .. } => "protocol",
            PipelineError::ParseError(_) => "parse",
            PipelineError::AnalyzerError(_) => "analyzer",
            PipelineError::PersistenceError(_) => "persistence",
            PipelineError::CheckpointError(_) => "checkpoint",
            PipelineError::DatabaseError(_) => "database",
            PipelineError::SerializationError(_) => "serialization",
            PipelineError::IntegrityError(_) => "integrity",
            PipelineError::ResourceExhausted(_) => "resource",
            PipelineError::IoError(_) => "io",
            PipelineError::TimeoutError(_) => "timeout",
            PipelineError::Cancelled(_) => "cancellation",
            PipelineError::StageNotFound(_) => "stage",
            PipelineError::InternalError(_) => "internal",
            PipelineError::MetricsError(_) => "metrics",
        }
    }

    /// Severity rank used when propagating the worst class to the exit code.
    /// Higher is more severe.
    pub fn severity(&self) -> u8 {
        match self {
            PipelineError::Cancelled(_) => 1,
            PipelineError::ParseError(_) | PipelineError::AnalyzerError(_) => 2,
            PipelineError::TransportError(_)
            | PipelineError::ProtocolError { .. }
            | PipelineError::TimeoutError(_) => 3,
            PipelineError::InputError(_) | PipelineError::SchemaViolation(_) => 4,
            PipelineError::PersistenceError(_)
            | PipelineError::CheckpointError(_)
            | PipelineError::DatabaseError(_)
            | PipelineError::IoError(_) => 5,
            PipelineError::IntegrityError(_) => 6,
            _ => 4,
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::SerializationError(err.to_string())
    }
}
