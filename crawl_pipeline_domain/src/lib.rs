// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Crawl Pipeline Domain
//!
//! Pure domain layer for the staged crawl pipeline. This crate holds the
//! business objects shared by all three pipeline stages and contains no I/O:
//!
//! - **Value objects**: canonical URLs, SHA-256 URL hashes, stage identifiers
//! - **Records**: the append-only record types emitted by discovery,
//!   validation, and enrichment, each carrying its own schema guard
//! - **Entities**: the checkpoint state machine and the in-memory link graph
//!   with PageRank/HITS scoring
//! - **Services**: pure scoring functions (importance, staleness, validation
//!   priority) and the `EnrichmentAnalyzer` port
//!
//! ## Architecture Position
//!
//! The domain sits below the application and infrastructure layers of the
//! `crawl-pipeline` crate. Infrastructure implements the ports declared here
//! (analyzer, repositories); the domain never depends on tokio, sqlx, or the
//! HTTP stack.
//!
//! ## Invariants enforced here
//!
//! - `url_hash == sha256(canonical(url))` for every record
//! - checkpoint `processed == successful + failed + skipped` and
//!   `last_processed_index <= total_items`
//! - checkpoint status transitions follow a fixed state machine
//! - PageRank scores sum to 1.0 before [0,1] normalization

pub mod entities;
pub mod error;
pub mod records;
pub mod services;
pub mod value_objects;

// Re-export commonly used types
pub use entities::checkpoint_state::{CheckpointState, StageStatus};
pub use entities::link_graph::{LinkGraph, LinkGraphEdge, LinkGraphNode};
pub use error::PipelineError;
pub use records::discovery::{DiscoveryRecord, DiscoverySource};
pub use records::enrichment::EnrichmentRecord;
pub use records::freshness::FreshnessRecord;
pub use records::schema::{SchemaErrorKind, SchemaReport, SchemaViolation, StageRecord};
pub use records::validation::ValidationRecord;
pub use services::analyzer::{AnalyzerOutput, EnrichmentAnalyzer};
pub use value_objects::canonical_url::CanonicalUrl;
pub use value_objects::stage_id::StageId;
pub use value_objects::url_hash::UrlHash;
