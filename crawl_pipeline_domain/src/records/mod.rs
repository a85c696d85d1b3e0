// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Record types for the append-only stage logs.
//!
//! One record type per stage plus the freshness row kept in the embedded
//! store. Each type owns its schema guard (`validate()`); the record log in
//! the infrastructure layer applies it on both append and stream.

pub mod discovery;
pub mod enrichment;
pub mod freshness;
pub mod schema;
pub mod validation;

pub use discovery::{DiscoveryRecord, DiscoverySource};
pub use enrichment::EnrichmentRecord;
pub use freshness::FreshnessRecord;
pub use schema::{SchemaErrorKind, SchemaReport, SchemaViolation, StageRecord, SCHEMA_VERSION};
pub use validation::ValidationRecord;
