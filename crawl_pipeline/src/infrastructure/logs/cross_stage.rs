// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Cross-Stage Integrity Validation
//!
//! Lineage check between consecutive stage logs: every `url_hash` emitted
//! downstream must exist upstream (zero orphans), and coverage is reported
//! as |downstream hashes| / |eligible upstream hashes|.
//!
//! - validation → discovery: every S2 hash must appear in S1
//! - enrichment → validation: every S3 hash must appear among S2 records
//!   with `is_valid == true`
//!
//! Orphans are integrity errors: fatal in strict mode, downgraded to
//! warnings in permissive mode by the caller.

use std::collections::HashSet;
use std::path::Path;

use crawl_pipeline_domain::{
    DiscoveryRecord, EnrichmentRecord, PipelineError, StageId, UrlHash, ValidationRecord,
};

use super::record_log::RecordStream;

const MAX_ORPHAN_SAMPLES: usize = 10;

/// Result of one lineage check between two stage logs.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub upstream_stage: StageId,
    pub downstream_stage: StageId,
    /// Distinct eligible hashes upstream.
    pub upstream_hashes: u64,
    /// Distinct hashes downstream.
    pub downstream_hashes: u64,
    pub orphaned_hashes: u64,
    /// |downstream| / |upstream|, 0.0 when upstream is empty.
    pub coverage: f64,
    pub orphan_samples: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_hashes == 0
    }

    /// Escalates orphans to a fatal integrity error (strict mode).
    pub fn into_result(self) -> Result<Self, PipelineError> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(PipelineError::integrity_error(format!(
                "{} orphaned url_hash(es) in {} not present in {} (samples: {:?})",
                self.orphaned_hashes,
                self.downstream_stage,
                self.upstream_stage,
                self.orphan_samples
            )))
        }
    }
}

fn build_report(
    upstream_stage: StageId,
    downstream_stage: StageId,
    upstream: &HashSet<UrlHash>,
    downstream: &HashSet<UrlHash>,
) -> IntegrityReport {
    let mut orphan_samples = Vec::new();
    let mut orphaned = 0u64;
    for hash in downstream {
        if !upstream.contains(hash) {
            orphaned += 1;
            if orphan_samples.len() < MAX_ORPHAN_SAMPLES {
                orphan_samples.push(hash.to_string());
            }
        }
    }
    IntegrityReport {
        upstream_stage,
        downstream_stage,
        upstream_hashes: upstream.len() as u64,
        downstream_hashes: downstream.len() as u64,
        orphaned_hashes: orphaned,
        coverage: if upstream.is_empty() {
            0.0
        } else {
            downstream.len() as f64 / upstream.len() as f64
        },
        orphan_samples,
    }
}

/// Validates S1 → S2 lineage.
pub async fn check_discovery_to_validation(
    discovery_log: &Path,
    validation_log: &Path,
) -> Result<IntegrityReport, PipelineError> {
    let mut upstream = HashSet::new();
    let mut stream = RecordStream::<DiscoveryRecord>::open(discovery_log).await?;
    while let Some(item) = stream.next().await {
        if let Ok(record) = item {
            upstream.insert(record.url_hash);
        }
    }

    let mut downstream = HashSet::new();
    let mut stream = RecordStream::<ValidationRecord>::open(validation_log).await?;
    while let Some(item) = stream.next().await {
        if let Ok(record) = item {
            downstream.insert(record.url_hash);
        }
    }

    Ok(build_report(StageId::Discovery, StageId::Validation, &upstream, &downstream))
}

/// Validates S2(valid) → S3 lineage.
pub async fn check_validation_to_enrichment(
    validation_log: &Path,
    enrichment_log: &Path,
) -> Result<IntegrityReport, PipelineError> {
    let mut upstream = HashSet::new();
    let mut stream = RecordStream::<ValidationRecord>::open(validation_log).await?;
    while let Some(item) = stream.next().await {
        if let Ok(record) = item {
            if record.is_valid {
                upstream.insert(record.url_hash);
            }
        }
    }

    let mut downstream = HashSet::new();
    let mut stream = RecordStream::<EnrichmentRecord>::open(enrichment_log).await?;
    while let Some(item) = stream.next().await {
        if let Ok(record) = item {
            downstream.insert(record.url_hash);
        }
    }

    Ok(build_report(StageId::Validation, StageId::Enrichment, &upstream, &downstream))
}

/// Runs every applicable lineage check for the logs that exist on disk.
pub async fn check_integrity(
    discovery_log: &Path,
    validation_log: &Path,
    enrichment_log: &Path,
) -> Result<Vec<IntegrityReport>, PipelineError> {
    let mut reports = Vec::new();
    if discovery_log.exists() && validation_log.exists() {
        reports.push(check_discovery_to_validation(discovery_log, validation_log).await?);
    }
    if validation_log.exists() && enrichment_log.exists() {
        reports.push(check_validation_to_enrichment(validation_log, enrichment_log).await?);
    }
    Ok(reports)
}
