// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Enrichment Runner (stage 3)
//!
//! Consumes validation records filtered to `is_valid == true` and emits
//! exactly one `EnrichmentRecord` per input, through the configured output
//! sink. Per URL: fetch the body (same retry/backoff/timeout model as
//! stage 2), extract title and main-content text, run the analyzer on the
//! blocking pool, and scan for auxiliary PDF/audio links.
//!
//! Fetch failures emit a failure record rather than skipping the item;
//! analyzer failures keep the extracted content but mark the item failed
//! with empty entities/keywords/tags.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use url::Url;

use crawl_pipeline_bootstrap::shutdown::CancellationToken;
use crawl_pipeline_domain::entities::checkpoint_state::ItemOutcome;
use crawl_pipeline_domain::{EnrichmentAnalyzer, EnrichmentRecord, PipelineError, StageId, ValidationRecord};

use crate::infrastructure::analysis::keyword_analyzer::analyze_off_loop;
use crate::infrastructure::checkpoint::store::CheckpointHandle;
use crate::infrastructure::concurrency::adaptive::AdaptiveConcurrencyController;
use crate::infrastructure::config::settings::EnrichmentConfig;
use crate::infrastructure::html::extract::{detect_auxiliary_links, extract_main_content};
use crate::infrastructure::http::client::HttpFetcher;
use crate::infrastructure::logs::record_log::RecordStream;
use crate::infrastructure::metrics::collector::MetricsCollector;
use crate::infrastructure::sinks::record_sink::OutputSink;
use crate::infrastructure::stages::runner::{finish_run, StageOutcome, BATCH_SIZE};

pub struct EnrichmentRunner {
    config: EnrichmentConfig,
    fetcher: Arc<HttpFetcher>,
    controller: Arc<AdaptiveConcurrencyController>,
    analyzer: Arc<dyn EnrichmentAnalyzer>,
    input_path: PathBuf,
    sink: Box<dyn OutputSink>,
    metrics: MetricsCollector,
    cancel: CancellationToken,
}

impl EnrichmentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EnrichmentConfig,
        fetcher: Arc<HttpFetcher>,
        analyzer: Arc<dyn EnrichmentAnalyzer>,
        input_path: PathBuf,
        sink: Box<dyn OutputSink>,
        metrics: MetricsCollector,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let controller = AdaptiveConcurrencyController::fixed(config.max_workers)?;
        Ok(Self {
            config,
            fetcher,
            controller,
            analyzer,
            input_path,
            sink,
            metrics,
            cancel,
        })
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
        let mut stream = RecordStream::<ValidationRecord>::open(&self.input_path).await?;

        let resume_from = checkpoint.state().last_processed_index;
        // Index space: valid records only, in input order.
        let mut valid_index = 0u64;
        let mut emitted = 0u64;
        let mut cancelled = false;
        let mut batch: Vec<(u64, ValidationRecord)> = Vec::with_capacity(BATCH_SIZE);

        loop {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            batch.clear();
            let mut exhausted = false;
            while batch.len() < BATCH_SIZE {
                match stream.next().await {
                    Some(Ok(record)) => {
                        if !record.is_valid {
                            continue;
                        }
                        let index = valid_index;
                        valid_index += 1;
                        if index < resume_from {
                            continue;
                        }
                        batch.push((index, record));
                    }
                    Some(Err(violation)) => {
                        tracing::warn!(component = "enrichment", error = %violation, "skipping malformed input line");
                        checkpoint.push_error(violation.to_string());
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

            self.process_batch(&batch, checkpoint, &mut emitted).await?;

            if exhausted {
                break;
            }
        }

        self.sink.flush().await?;
        tracing::info!(component = "enrichment", emitted, cancelled, "enrichment finished");
        Ok((emitted, cancelled))
    }

    async fn process_batch(
        &mut self,
        batch: &[(u64, ValidationRecord)],
        checkpoint: &mut CheckpointHandle,
        emitted: &mut u64,
    ) -> Result<(), PipelineError> {
        let mut tasks = FuturesUnordered::new();
        for (position, (_, input)) in batch.iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let controller = self.controller.clone();
            let analyzer = self.analyzer.clone();
            let url = input.url.clone();
            let max_text_length = self.config.max_text_length;
            tasks.push(async move {
                let _permit = match controller.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return (position, Err(e)),
                };
                (position, enrich_one(fetcher, analyzer, url, max_text_length).await)
            });
        }

        let mut results: Vec<Option<EnrichedItem>> = (0..batch.len()).map(|_| None).collect();
        while let Some((position, result)) = tasks.next().await {
            results[position] = Some(match result {
                Ok(item) => item,
                Err(error) => EnrichedItem {
                    record: EnrichmentRecord::failed(batch[position].1.url.clone(), error.to_string(), Utc::now()),
                    outcome: ItemOutcome::Failure,
                    response_time_ms: 0,
                },
            });
        }

        // Emit in input order within the batch.
        for (position, item) in results.into_iter().enumerate() {
            let (index, input) = &batch[position];
            let item = match item {
                Some(item) => item,
                None => EnrichedItem {
                    record: EnrichmentRecord::failed(
                        input.url.clone(),
                        "enrichment task vanished".to_string(),
                        Utc::now(),
                    ),
                    outcome: ItemOutcome::Failure,
                    response_time_ms: 0,
                },
            };

            if item.outcome == ItemOutcome::Failure {
                self.metrics.record_failed(StageId::Enrichment);
                if let Some(error) = &item.record.error {
                    checkpoint.push_error(format!("{}: {}", item.record.url, error));
                }
            }
            if item.response_time_ms > 0 {
                self.metrics
                    .observe_request_latency(StageId::Enrichment, item.response_time_ms as f64 / 1000.0);
            }

            self.sink.append(&item.record).await?;
            *emitted += 1;
            self.metrics.record_emitted(StageId::Enrichment);

            // Durability before the index advances.
            self.sink.flush().await?;
            checkpoint.record_item(*index, item.record.url_hash.to_string(), item.outcome)?;
            self.sink.rotate_if_needed().await?;
        }
        Ok(())
    }
}

struct EnrichedItem {
    record: EnrichmentRecord,
    outcome: ItemOutcome,
    response_time_ms: u64,
}

/// Fetch, extract, analyze, and assemble one record.
async fn enrich_one(
    fetcher: Arc<HttpFetcher>,
    analyzer: Arc<dyn EnrichmentAnalyzer>,
    url: crawl_pipeline_domain::CanonicalUrl,
    max_text_length: usize,
) -> Result<EnrichedItem, PipelineError> {
    let now = Utc::now();
    let body = match fetcher.fetch_text(&url).await {
        Ok(body) => body,
        Err(error) => {
            // One record per input, even for fetch failures.
            return Ok(EnrichedItem {
                record: EnrichmentRecord::failed(url, error.to_string(), now),
                outcome: ItemOutcome::Failure,
                response_time_ms: 0,
            });
        }
    };

    let content = extract_main_content(&body.body, max_text_length);
    let page_url = Url::parse(url.as_str())
        .map_err(|e| PipelineError::internal_error(format!("canonical URL reparse: {}", e)))?;
    let (has_pdf_links, has_audio_links) = detect_auxiliary_links(&body.body, &page_url);

    match analyze_off_loop(analyzer, content.text.clone()).await {
        Ok(analysis) => Ok(EnrichedItem {
            record: EnrichmentRecord::new(
                url,
                content.title,
                content.text,
                analysis.entities,
                analysis.keywords,
                analysis.content_tags,
                has_pdf_links,
                has_audio_links,
                now,
            ),
            outcome: ItemOutcome::Success,
            response_time_ms: body.response_time_ms,
        }),
        Err(error) => {
            // Analyzer failure: keep the content, empty sequences, failed
            // but non-fatal.
            let mut record = EnrichmentRecord::new(
                url,
                content.title,
                content.text,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                has_pdf_links,
                has_audio_links,
                now,
            );
            record.error = Some(error.to_string());
            Ok(EnrichedItem {
                record,
                outcome: ItemOutcome::Failure,
                response_time_ms: body.response_time_ms,
            })
        }
    }
}
