// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

// Production code safety enforced via CI and `make lint-strict`
// (lib/bins checked separately from tests - tests may use unwrap/expect)

//! # Crawl Pipeline
//!
//! A staged async crawl pipeline for a single university web domain, built
//! as three stages wired by append-only JSONL record logs:
//!
//! 1. **Discovery** — breadth-first crawl of the domain, emitting one
//!    `DiscoveryRecord` per new URL and accumulating the link graph that is
//!    PageRank/HITS-scored at stage end.
//! 2. **Validation** — adaptively concurrent HEAD/GET probing of every
//!    discovered URL, priority-ordered by the link-graph scores, with
//!    freshness tracking (ETag/Last-Modified churn) in an embedded store.
//! 3. **Enrichment** — fetch, main-content extraction, and analyzer-driven
//!    entity/keyword/tag tagging for every valid URL.
//!
//! All stages share one checkpoint protocol (atomic tmp/backup/rename
//! writes, PID-based crash detection, input-hash-validated resume) and one
//! Prometheus metrics collector.
//!
//! ## Architecture Overview
//!
//! The crate follows the workspace's layered layout:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  bootstrap (crawl-pipeline-bootstrap)                       │
//! │  CLI, signals, shutdown coordination, exit codes            │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │  application                                                │
//! │  PipelineOrchestrator: stage sequencing, context wiring     │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │  domain (crawl-pipeline-domain)                             │
//! │  records, checkpoint state machine, link graph, scoring     │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │  infrastructure                                             │
//! │  record logs, checkpoint store, HTTP client pool, adaptive  │
//! │  concurrency, SQLite stores, metrics, sinks, HTML extract   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! Single-process cooperative async (tokio) for all I/O; the CPU-bound
//! enrichment analyzer runs on the blocking pool so it never stalls the
//! reactor. Admission control is a semaphore resized by an AIMD controller
//! sampling 5-second completion windows.

pub mod application;
pub mod infrastructure;

// Tests are organized as:
// - Unit tests: #[cfg(test)] modules within each source file
// - Integration tests: separate files in tests/ directory

// Re-export domain types for convenient access
pub use crawl_pipeline_domain::{
    CanonicalUrl, CheckpointState, DiscoveryRecord, EnrichmentRecord, FreshnessRecord, LinkGraph,
    PipelineError, SchemaReport, StageId, StageStatus, UrlHash, ValidationRecord,
};
