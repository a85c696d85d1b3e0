// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Validation Runner (stage 2)
//!
//! Consumes the discovery log in batches, probing each URL with the
//! HEAD-then-GET protocol and emitting one `ValidationRecord` per input.
//! When link-graph scores exist a batch is admission-ordered by the
//! composite priority (0.4·pagerank + 0.4·authority + 0.2·normalized
//! in-links); an A/B knob keeps a deterministic fraction of batches FIFO
//! for measurement. Output is always written back in input order within
//! the batch.
//!
//! Admission is governed by the AIMD controller; every completion feeds
//! its sample window. Each probe also updates the URL's freshness row
//! (validator churn, staleness score) in the embedded store.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};

use crawl_pipeline_bootstrap::shutdown::CancellationToken;
use crawl_pipeline_domain::entities::checkpoint_state::ItemOutcome;
use crawl_pipeline_domain::services::priority::{validation_priority, PrioritySignals};
use crawl_pipeline_domain::services::staleness::{staleness_score, StalenessInputs};
use crawl_pipeline_domain::{
    DiscoveryRecord, FreshnessRecord, PipelineError, StageId, ValidationRecord,
};

use crate::infrastructure::checkpoint::store::CheckpointHandle;
use crate::infrastructure::concurrency::adaptive::AdaptiveConcurrencyController;
use crate::infrastructure::config::settings::ValidationConfig;
use crate::infrastructure::http::client::{HttpFetcher, ProbeOutcome};
use crate::infrastructure::logs::record_log::{RecordLogWriter, RecordStream};
use crate::infrastructure::metrics::collector::MetricsCollector;
use crate::infrastructure::repositories::freshness_repository::SqliteFreshnessRepository;
use crate::infrastructure::repositories::link_graph_repository::{NodeScores, SqliteLinkGraphRepository};
use crate::infrastructure::stages::runner::{finish_run, StageOutcome, BATCH_SIZE};

pub struct ValidationRunner {
    config: ValidationConfig,
    fetcher: Arc<HttpFetcher>,
    controller: Arc<AdaptiveConcurrencyController>,
    input_path: PathBuf,
    output_path: PathBuf,
    graph_repo: SqliteLinkGraphRepository,
    freshness_repo: SqliteFreshnessRepository,
    metrics: MetricsCollector,
    cancel: CancellationToken,
}

impl ValidationRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ValidationConfig,
        fetcher: Arc<HttpFetcher>,
        controller: Arc<AdaptiveConcurrencyController>,
        input_path: PathBuf,
        output_path: PathBuf,
        graph_repo: SqliteLinkGraphRepository,
        freshness_repo: SqliteFreshnessRepository,
        metrics: MetricsCollector,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            fetcher,
            controller,
            input_path,
            output_path,
            graph_repo,
            freshness_repo,
            metrics,
            cancel,
        }
    }

    pub async fn run(&mut self, mut checkpoint: CheckpointHandle) -> Result<StageOutcome, PipelineError> {
        let started = std::time::Instant::now();
        let result = self.run_inner(&mut checkpoint).await;
        self.metrics.observe_stage_duration(started.elapsed().as_secs_f64());

        match result {
            Ok((emitted, cancelled)) => {
                finish_run(&mut checkpoint, cancelled, None)?;
                Ok(StageOutcome {
                    state: checkpoint.state().clone(),
                    records_emitted: emitted,
                    was_cancelled: cancelled,
                })
            }
            Err(error) => {
                finish_run(&mut checkpoint, false, Some(&error))?;
                Err(error)
            }
        }
    }

    async fn run_inner(&mut self, checkpoint: &mut CheckpointHandle) -> Result<(u64, bool), PipelineError> {
        // Graph scores are optional: without them ordering stays FIFO.
        let scores = self.graph_repo.load_scores().await?;
        let max_inlinks = self.graph_repo.max_in_degree().await?;
        if !scores.is_empty() {
            tracing::info!(component = "validation", nodes = scores.len(), "priority ordering enabled");
        }

        let mut writer = RecordLogWriter::<ValidationRecord>::open(&self.output_path).await?;
        let mut stream = RecordStream::<DiscoveryRecord>::open(&self.input_path).await?;

        let resume_from = checkpoint.state().last_processed_index;
        let mut input_index = 0u64;
        let mut emitted = 0u64;
        let mut cancelled = false;
        let mut batch_number = 0u64;
        let mut batch: Vec<BatchItem> = Vec::with_capacity(BATCH_SIZE);

        loop {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            // Fill the next batch, skipping resumed items. Malformed lines
            // become skip placeholders so the checkpoint index still
            // advances in input order.
            batch.clear();
            let mut exhausted = false;
            while batch.len() < BATCH_SIZE {
                match stream.next().await {
                    Some(Ok(record)) => {
                        let index = input_index;
                        input_index += 1;
                        if index < resume_from {
                            continue;
                        }
                        batch.push(BatchItem {
                            index,
                            input: Some(record),
                        });
                    }
                    Some(Err(violation)) => {
                        tracing::warn!(component = "validation", error = %violation, "skipping malformed input line");
                        let index = input_index;
                        input_index += 1;
                        if index < resume_from {
                            continue;
                        }
                        checkpoint.push_error(violation.to_string());
                        batch.push(BatchItem { index, input: None });
                    }
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if batch.is_empty() {
                if exhausted {
                    break;
                }
                continue;
            }

            batch_number += 1;
            self.process_batch(&batch, batch_number, &scores, max_inlinks, &mut writer, checkpoint, &mut emitted)
                .await?;
            self.controller.maybe_adjust();
            self.metrics.set_current_concurrency(self.controller.current_concurrency());

            if exhausted {
                break;
            }
        }

        writer.flush().await?;
        self.metrics.set_validation_success_rate(checkpoint.state().success_rate());

        // Refresh the per-domain churn gauges once at stage end.
        for (domain, rate) in self.freshness_repo.domain_churn_rates().await? {
            self.metrics.set_domain_churn_rate(&domain, rate);
        }

        // Revalidation planning for the next run; freshness feedback never
        // reorders the current one.
        let due = self
            .freshness_repo
            .stale_candidates(self.config.min_fresh_hours, Utc::now())
            .await?;
        tracing::info!(
            component = "validation",
            emitted,
            cancelled,
            revalidation_due = due.len(),
            "validation finished"
        );
        Ok((emitted, cancelled))
    }

    /// Probes one batch: admission in priority order, output in input order.
    #[allow(clippy::too_many_arguments)]
    async fn process_batch(
        &self,
        batch: &[BatchItem],
        batch_number: u64,
        scores: &std::collections::HashMap<crawl_pipeline_domain::UrlHash, NodeScores>,
        max_inlinks: u64,
        writer: &mut RecordLogWriter<ValidationRecord>,
        checkpoint: &mut CheckpointHandle,
        emitted: &mut u64,
    ) -> Result<(), PipelineError> {
        // A/B knob: a deterministic fraction of batches stays FIFO so the
        // priority ordering can be measured against a control group.
        let fifo_batch = scores.is_empty()
            || (batch_number % 100) < (self.config.fifo_sample_fraction * 100.0) as u64;

        let mut admission_order: Vec<usize> =
            (0..batch.len()).filter(|&p| batch[p].input.is_some()).collect();
        if !fifo_batch {
            admission_order.sort_by(|&a, &b| {
                let priority = |position: usize| {
                    let record = batch[position].input.as_ref();
                    let node = record
                        .and_then(|r| scores.get(&r.url_hash))
                        .copied()
                        .unwrap_or_default();
                    validation_priority(&PrioritySignals {
                        pagerank: node.pagerank,
                        authority: node.authority,
                        inlink_count: node.in_degree,
                        max_inlink_count: max_inlinks,
                    })
                };
                priority(b).partial_cmp(&priority(a)).unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let mut probes = FuturesUnordered::new();
        for position in admission_order {
            let Some(record) = &batch[position].input else {
                continue;
            };
            let url = record.discovered_url.clone();
            let fetcher = self.fetcher.clone();
            let controller = self.controller.clone();
            let acceptable = self.config.acceptable_content_types.clone();
            probes.push(async move {
                let permit = controller.acquire().await;
                let started = std::time::Instant::now();
                let result = match permit {
                    Ok(_permit) => {
                        fetcher
                            .probe(&url, |status, content_type| {
                                (200..300).contains(&status)
                                    && content_type_acceptable(content_type, &acceptable)
                            })
                            .await
                    }
                    Err(e) => Err(e),
                };
                let latency = started.elapsed();
                controller.record_completion(
                    matches!(&result, Ok(outcome) if (200..400).contains(&outcome.status)),
                    latency,
                );
                (position, result)
            });
        }

        let mut results: Vec<Option<Result<ProbeOutcome, PipelineError>>> = (0..batch.len()).map(|_| None).collect();
        while let Some((position, result)) = probes.next().await {
            results[position] = Some(result);
        }

        // Emit in input order within the batch; skip placeholders advance
        // the index without output.
        for (position, result) in results.into_iter().enumerate() {
            let item = &batch[position];
            let Some(record) = &item.input else {
                self.metrics.record_skipped(StageId::Validation);
                checkpoint.record_item(item.index, "<malformed>", ItemOutcome::Skipped)?;
                continue;
            };
            let result = result.unwrap_or_else(|| Err(PipelineError::internal_error("probe result missing")));
            let validation = self.build_record(record, result, checkpoint).await?;
            let outcome = if validation.is_valid {
                ItemOutcome::Success
            } else {
                self.metrics.record_failed(StageId::Validation);
                ItemOutcome::Failure
            };
            self.metrics
                .observe_request_latency(StageId::Validation, validation.response_time_ms as f64 / 1000.0);
            writer.append(&validation).await?;
            *emitted += 1;
            self.metrics.record_emitted(StageId::Validation);

            // Durability before the index advances.
            writer.flush().await?;
            checkpoint.record_item(item.index, validation.url_hash.to_string(), outcome)?;
        }
        Ok(())
    }

    /// Builds the validation record and folds the freshness observation.
    async fn build_record(
        &self,
        input: &DiscoveryRecord,
        result: Result<ProbeOutcome, PipelineError>,
        checkpoint: &mut CheckpointHandle,
    ) -> Result<ValidationRecord, PipelineError> {
        let now = Utc::now();
        let url = input.discovered_url.clone();

        let mut record = match result {
            Ok(outcome) => {
                if outcome.attempts > 1 {
                    for _ in 1..outcome.attempts {
                        self.metrics.record_retry(StageId::Validation);
                    }
                }
                let mut record = ValidationRecord::from_response(
                    url.clone(),
                    outcome.status,
                    outcome.content_type.clone(),
                    outcome.content_length,
                    outcome.response_time_ms,
                    outcome.redirect_chain.clone(),
                    now,
                );
                record.last_modified = outcome.last_modified;
                record.etag = outcome.etag;
                record.cache_control = outcome.cache_control;
                let acceptable =
                    content_type_acceptable(record.content_type.as_deref(), &self.config.acceptable_content_types);
                record.mark_validity(acceptable);
                record
            }
            Err(error) => {
                checkpoint.push_error(format!("{}: {}", url, error));
                match &error {
                    // Retry-exhausted protocol errors keep their status.
                    PipelineError::ProtocolError { status, .. } => {
                        let mut record = ValidationRecord::from_response(
                            url.clone(),
                            *status,
                            None,
                            None,
                            self.config.timeout_ms,
                            Vec::new(),
                            now,
                        );
                        record.error_message = Some(error.to_string());
                        record.mark_validity(false);
                        record
                    }
                    // Transport failures never produced a status.
                    _ => ValidationRecord::from_transport_failure(
                        url.clone(),
                        error.to_string(),
                        self.config.timeout_ms,
                        now,
                    ),
                }
            }
        };

        record.staleness_score = self.update_freshness(&record, now).await?;
        Ok(record)
    }

    /// Folds this observation into the freshness store; returns the
    /// recomputed staleness score.
    async fn update_freshness(
        &self,
        record: &ValidationRecord,
        now: chrono::DateTime<Utc>,
    ) -> Result<f64, PipelineError> {
        let mut row = match self.freshness_repo.get(&record.url_hash).await? {
            Some(mut existing) => {
                existing.observe(
                    record.last_modified.clone(),
                    record.etag.clone(),
                    record.content_type.clone(),
                    now,
                );
                existing
            }
            None => FreshnessRecord::first_observation(
                record.url.clone(),
                record.last_modified.clone(),
                record.etag.clone(),
                record.content_type.clone(),
                now,
            ),
        };

        let hours_since_modified = row.last_modified.as_deref().and_then(|value| {
            chrono::DateTime::parse_from_rfc2822(value)
                .ok()
                .map(|modified| (now - modified.with_timezone(&Utc)).num_minutes() as f64 / 60.0)
        });
        let path = url::Url::parse(record.url.as_str())
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string());
        row.staleness_score = staleness_score(&StalenessInputs {
            hours_since_last_modified: hours_since_modified,
            content_changed_count: row.content_changed_count,
            validation_count: row.validation_count,
            path: &path,
        });

        self.freshness_repo.upsert(&row).await?;
        Ok(row.staleness_score)
    }
}

/// One slot of a processing batch; `input == None` marks a malformed
/// input line that only advances the checkpoint index.
struct BatchItem {
    index: u64,
    input: Option<DiscoveryRecord>,
}

fn content_type_acceptable(content_type: Option<&str>, acceptable: &[String]) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    // Media-type parameters (charset etc.) are not part of the comparison.
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    acceptable.iter().any(|a| a.eq_ignore_ascii_case(&essence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_acceptance() {
        let acceptable = vec!["text/html".to_string(), "text/plain".to_string()];
        assert!(content_type_acceptable(Some("text/html"), &acceptable));
        assert!(content_type_acceptable(Some("TEXT/HTML; charset=UTF-8"), &acceptable));
        assert!(!content_type_acceptable(Some("application/pdf"), &acceptable));
        assert!(!content_type_acceptable(None, &acceptable));
    }
}
