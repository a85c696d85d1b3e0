// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Orchestrator
//!
//! Owns stage sequencing and context wiring. Stages run strictly in order
//! (discovery finalizes the link graph before validation starts; there is
//! no within-run feedback cycle), each against its own checkpoint, all
//! sharing one metrics collector and one cancellation token. Everything a
//! runner needs is passed in explicitly; the orchestrator also owns
//! teardown (final metrics export).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crawl_pipeline_bootstrap::cli::RunTarget;
use crawl_pipeline_bootstrap::shutdown::CancellationToken;
use crawl_pipeline_domain::{EnrichmentAnalyzer, PipelineError, StageId, StageStatus, ValidationRecord};

use crate::infrastructure::analysis::keyword_analyzer::KeywordAnalyzer;
use crate::infrastructure::checkpoint::manager::{CheckpointManager, StartDisposition};
use crate::infrastructure::checkpoint::store::CheckpointHandle;
use crate::infrastructure::concurrency::adaptive::{AdaptiveConcurrencyController, ControllerConfig};
use crate::infrastructure::config::settings::AppConfig;
use crate::infrastructure::http::client::{HttpFetcher, HttpFetcherConfig};
use crate::infrastructure::logs::cross_stage::{check_integrity, IntegrityReport};
use crate::infrastructure::logs::record_log::{count_records, RecordStream};
use crate::infrastructure::metrics::collector::MetricsCollector;
use crate::infrastructure::repositories::freshness_repository::SqliteFreshnessRepository;
use crate::infrastructure::repositories::link_graph_repository::SqliteLinkGraphRepository;
use crate::infrastructure::repositories::schema;
use crate::infrastructure::sinks::record_sink::build_sink;
use crate::infrastructure::stages::discovery::{read_seed_file, DiscoveryRunner};
use crate::infrastructure::stages::enrichment::EnrichmentRunner;
use crate::infrastructure::stages::validation::ValidationRunner;

/// Everything the stage runners share for one pipeline run.
pub struct PipelineContext {
    pub config: AppConfig,
    pub metrics: MetricsCollector,
    pub checkpoints: CheckpointManager,
    pub cancel: CancellationToken,
}

/// Summary of one `run` invocation.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub stages_run: Vec<StageId>,
    pub stages_skipped: Vec<StageId>,
    pub was_cancelled: bool,
}

pub struct PipelineOrchestrator {
    context: PipelineContext,
    analyzer: Arc<dyn EnrichmentAnalyzer>,
}

impl PipelineOrchestrator {
    pub fn new(config: AppConfig, cancel: CancellationToken) -> Result<Self, PipelineError> {
        let metrics = MetricsCollector::new()?;
        let checkpoints = CheckpointManager::new(&config.paths.checkpoint_dir)?;
        Ok(Self {
            context: PipelineContext {
                config,
                metrics,
                checkpoints,
                cancel,
            },
            analyzer: Arc::new(KeywordAnalyzer::new()),
        })
    }

    /// Replaces the bundled analyzer (the custom-capability extension
    /// point).
    pub fn with_analyzer(mut self, analyzer: Arc<dyn EnrichmentAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.context.metrics
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.context.checkpoints
    }

    /// Runs the selected stages in pipeline order.
    pub async fn run(&self, target: RunTarget) -> Result<RunOutcome, PipelineError> {
        let mut outcome = RunOutcome::default();
        for number in target.stage_numbers() {
            if self.context.cancel.is_cancelled() {
                outcome.was_cancelled = true;
                break;
            }
            let stage: StageId = number.to_string().parse()?;
            match self.run_stage(stage).await? {
                StageRunResult::Ran { cancelled } => {
                    outcome.stages_run.push(stage);
                    if cancelled {
                        outcome.was_cancelled = true;
                        break;
                    }
                }
                StageRunResult::Skipped => outcome.stages_skipped.push(stage),
            }
        }

        // Teardown: final metrics export when configured.
        if let Some(path) = &self.context.config.metrics.export_path {
            self.context.metrics.export_to_path(path).await?;
        }
        Ok(outcome)
    }

    async fn run_stage(&self, stage: StageId) -> Result<StageRunResult, PipelineError> {
        let config = &self.context.config;
        let batch_id = ulid::Ulid::new().to_string();

        let input_path = match stage {
            StageId::Discovery => config.stages.discovery.seed_file.clone(),
            StageId::Validation => config.record_log_path(StageId::Discovery),
            StageId::Enrichment => config.record_log_path(StageId::Validation),
        };
        let total_items = self.count_stage_input(stage, &input_path).await?;

        let disposition = self
            .context
            .checkpoints
            .prepare_run(stage, &input_path, total_items, batch_id)
            .await?;
        let state = match disposition {
            StartDisposition::AlreadyCompleted(_) => {
                tracing::info!(stage = %stage, "already completed against this input; skipping");
                return Ok(StageRunResult::Skipped);
            }
            StartDisposition::Fresh(state) | StartDisposition::Resume(state) => state,
        };
        let checkpoint = CheckpointHandle::new(self.context.checkpoints.store().clone(), state);

        tracing::info!(stage = %stage, total_items, "running stage");
        let outcome = match stage {
            StageId::Discovery => self.run_discovery(checkpoint).await?,
            StageId::Validation => self.run_validation(checkpoint).await?,
            StageId::Enrichment => self.run_enrichment(checkpoint).await?,
        };

        let state = &outcome.state;
        tracing::info!(
            stage = %stage,
            status = state.status.as_str(),
            processed = state.processed_items,
            successful = state.successful_items,
            failed = state.failed_items,
            skipped = state.skipped_items,
            errors = state.error_count,
            emitted = outcome.records_emitted,
            "stage summary"
        );
        if state.status == StageStatus::Failed {
            return Err(PipelineError::internal_error(format!("stage {} failed", stage)));
        }
        Ok(StageRunResult::Ran {
            cancelled: outcome.was_cancelled,
        })
    }

    /// Bounded-input size for the checkpoint: seeds for discovery, log
    /// records for validation, valid log records for enrichment.
    async fn count_stage_input(&self, stage: StageId, input_path: &PathBuf) -> Result<u64, PipelineError> {
        match stage {
            StageId::Discovery => Ok(read_seed_file(input_path).await?.len() as u64),
            StageId::Validation => count_records(input_path).await,
            StageId::Enrichment => {
                let mut stream = RecordStream::<ValidationRecord>::open(input_path).await?;
                let mut valid = 0u64;
                while let Some(item) = stream.next().await {
                    if matches!(item, Ok(record) if record.is_valid) {
                        valid += 1;
                    }
                }
                Ok(valid)
            }
        }
    }

    async fn run_discovery(
        &self,
        checkpoint: CheckpointHandle,
    ) -> Result<crate::infrastructure::stages::runner::StageOutcome, PipelineError> {
        let config = &self.context.config;
        let fetcher = Arc::new(HttpFetcher::new(HttpFetcherConfig {
            timeout: std::time::Duration::from_millis(config.stages.discovery.timeout_ms),
            max_retries: config.stages.discovery.max_retries,
            pool_size: config.crawler.concurrent_requests * 2,
            ..Default::default()
        })?);
        let pool = schema::connect(&config.link_graph_db_url()).await?;
        let graph_repo = SqliteLinkGraphRepository::new(pool).await?;

        let mut runner = DiscoveryRunner::new(
            config.crawler.clone(),
            config.stages.discovery.clone(),
            config.queue.clone(),
            fetcher,
            config.record_log_path(StageId::Discovery),
            graph_repo,
            self.context.metrics.clone(),
            self.context.cancel.clone(),
        );
        runner.run(checkpoint).await
    }

    async fn run_validation(
        &self,
        checkpoint: CheckpointHandle,
    ) -> Result<crate::infrastructure::stages::runner::StageOutcome, PipelineError> {
        let config = &self.context.config;
        let validation = &config.stages.validation;
        let fetcher = Arc::new(HttpFetcher::new(HttpFetcherConfig {
            timeout: std::time::Duration::from_millis(validation.timeout_ms),
            max_retries: validation.max_retries,
            per_host_connections: validation.per_host_connections,
            pool_size: validation.max_workers * 2,
            body_cap: validation.content_length_cap,
            max_redirects: validation.max_redirects,
            ..Default::default()
        })?);
        let controller = AdaptiveConcurrencyController::new(ControllerConfig::new(
            validation.min_workers,
            validation.max_workers,
        ))?;

        let graph_repo =
            SqliteLinkGraphRepository::new(schema::connect(&config.link_graph_db_url()).await?).await?;
        let freshness_repo =
            SqliteFreshnessRepository::new(schema::connect(&config.freshness_db_url()).await?).await?;

        let mut runner = ValidationRunner::new(
            validation.clone(),
            fetcher,
            controller,
            config.record_log_path(StageId::Discovery),
            config.record_log_path(StageId::Validation),
            graph_repo,
            freshness_repo,
            self.context.metrics.clone(),
            self.context.cancel.clone(),
        );
        runner.run(checkpoint).await
    }

    async fn run_enrichment(
        &self,
        checkpoint: CheckpointHandle,
    ) -> Result<crate::infrastructure::stages::runner::StageOutcome, PipelineError> {
        let config = &self.context.config;
        let enrichment = &config.stages.enrichment;
        let fetcher = Arc::new(HttpFetcher::new(HttpFetcherConfig {
            timeout: std::time::Duration::from_millis(enrichment.timeout_ms),
            max_retries: enrichment.max_retries,
            pool_size: enrichment.max_workers * 2,
            ..Default::default()
        })?);
        let sink = build_sink(
            &enrichment.storage,
            &config.record_log_path(StageId::Enrichment),
        )
        .await?;

        let mut runner = EnrichmentRunner::new(
            enrichment.clone(),
            fetcher,
            self.analyzer.clone(),
            config.record_log_path(StageId::Validation),
            sink,
            self.context.metrics.clone(),
            self.context.cancel.clone(),
        )?;
        runner.run(checkpoint).await
    }

    /// `--validate-only`: cross-stage integrity over the logs on disk.
    /// Strict mode: any orphan is an integrity error.
    pub async fn validate_integrity(&self) -> Result<Vec<IntegrityReport>, PipelineError> {
        let config = &self.context.config;
        let reports = check_integrity(
            &config.record_log_path(StageId::Discovery),
            &config.record_log_path(StageId::Validation),
            &config.record_log_path(StageId::Enrichment),
        )
        .await?;
        for report in &reports {
            tracing::info!(
                upstream = %report.upstream_stage,
                downstream = %report.downstream_stage,
                coverage = report.coverage,
                orphans = report.orphaned_hashes,
                "cross-stage integrity"
            );
        }
        let mut failed = None;
        for report in &reports {
            if !report.is_clean() {
                failed = Some(PipelineError::integrity_error(format!(
                    "{} orphaned hash(es) in {}",
                    report.orphaned_hashes, report.downstream_stage
                )));
            }
        }
        match failed {
            Some(error) => Err(error),
            None => Ok(reports),
        }
    }

    /// Aggregated progress report for the checkpoint CLI.
    pub fn progress_report(&self) -> Result<String, PipelineError> {
        let progress = self.context.checkpoints.pipeline_progress(Utc::now())?;
        let mut out = String::new();
        for stage in &progress.stages {
            out.push_str(&format!(
                "{:<11} {:<11} {:>8}/{:<8} success {:>5.1}% throughput {:>7.2}/s eta {}\n",
                stage.stage_id.as_str(),
                stage.status.as_str(),
                stage.processed_items,
                stage.total_items,
                stage.success_rate * 100.0,
                stage.throughput,
                stage
                    .eta_seconds
                    .map(|e| format!("{:.0}s", e))
                    .unwrap_or_else(|| "n/a".to_string()),
            ));
        }
        out.push_str(&format!(
            "overall {:.1}% complete, eta {}\n",
            progress.overall_ratio * 100.0,
            progress
                .eta_seconds
                .map(|e| format!("{:.0}s", e))
                .unwrap_or_else(|| "n/a".to_string())
        ));
        Ok(out)
    }
}

enum StageRunResult {
    Ran { cancelled: bool },
    Skipped,
}
