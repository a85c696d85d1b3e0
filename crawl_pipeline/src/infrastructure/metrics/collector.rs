// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metrics Collector
//!
//! Prometheus-based metrics for all three stages: monotonic counters,
//! instantaneous gauges, and latency histograms, plus per-domain labeled
//! freshness churn and link-graph structural gauges. One collector is
//! created per pipeline run and passed by reference into the stage
//! runners; there are no other process-wide mutable singletons.
//!
//! Exposure is an in-process snapshot call (`gather_text`) and an optional
//! text-format export to a configured path.

use std::path::Path;
use std::sync::Arc;

use prometheus::{
    Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry,
};
use tracing::debug;

use crawl_pipeline_domain::entities::link_graph::LinkGraphStats;
use crawl_pipeline_domain::{PipelineError, StageId};

const NAMESPACE: &str = "crawl";

/// Prometheus metrics for pipeline observability.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,

    // Stage execution counters
    urls_discovered_total: IntCounter,
    records_emitted_total: IntCounterVec,
    items_failed_total: IntCounterVec,
    items_skipped_total: IntCounterVec,
    retries_total: IntCounterVec,

    // Performance
    request_latency_seconds: HistogramVec,
    stage_duration_seconds: Histogram,

    // Instantaneous state
    validation_success_rate: Gauge,
    current_concurrency: IntGauge,
    queue_depth: IntGauge,

    // Freshness
    freshness_domain_churn_rate: GaugeVec,

    // Link graph structure
    link_graph_total_nodes: IntGauge,
    link_graph_total_edges: IntGauge,
    link_graph_avg_degree: Gauge,
    link_graph_max_degree: IntGauge,
    link_graph_top_pagerank: Gauge,
    link_graph_top_authority: Gauge,
}

impl MetricsCollector {
    /// Creates a collector with a fresh Prometheus registry.
    pub fn new() -> Result<Self, PipelineError> {
        let registry = Registry::new();

        let urls_discovered_total = IntCounter::with_opts(
            Opts::new("pipeline_urls_discovered_total", "Total URLs discovered by stage 1")
                .namespace(NAMESPACE),
        )
        .map_err(metric_err)?;

        let records_emitted_total = IntCounterVec::new(
            Opts::new("pipeline_records_emitted_total", "Records emitted per stage").namespace(NAMESPACE),
            &["stage"],
        )
        .map_err(metric_err)?;

        let items_failed_total = IntCounterVec::new(
            Opts::new("pipeline_items_failed_total", "Items failed per stage").namespace(NAMESPACE),
            &["stage"],
        )
        .map_err(metric_err)?;

        let items_skipped_total = IntCounterVec::new(
            Opts::new("pipeline_items_skipped_total", "Items skipped per stage").namespace(NAMESPACE),
            &["stage"],
        )
        .map_err(metric_err)?;

        let retries_total = IntCounterVec::new(
            Opts::new("pipeline_retries_total", "HTTP retries per stage").namespace(NAMESPACE),
            &["stage"],
        )
        .map_err(metric_err)?;

        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new("pipeline_request_latency_seconds", "Per-request latency")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["stage"],
        )
        .map_err(metric_err)?;

        let stage_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("pipeline_stage_duration_seconds", "Wall time per stage run")
                .namespace(NAMESPACE)
                .buckets(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        )
        .map_err(metric_err)?;

        let validation_success_rate = Gauge::with_opts(
            Opts::new("pipeline_validation_success_rate", "Success rate of the last validation window")
                .namespace(NAMESPACE),
        )
        .map_err(metric_err)?;

        let current_concurrency = IntGauge::with_opts(
            Opts::new("pipeline_current_concurrency", "Current adaptive admission bound")
                .namespace(NAMESPACE),
        )
        .map_err(metric_err)?;

        let queue_depth = IntGauge::with_opts(
            Opts::new("pipeline_queue_depth", "Cross-stage queue occupancy").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;

        let freshness_domain_churn_rate = GaugeVec::new(
            Opts::new("pipeline_freshness_domain_churn_rate", "Per-domain content churn rate")
                .namespace(NAMESPACE),
            &["domain"],
        )
        .map_err(metric_err)?;

        let link_graph_total_nodes = IntGauge::with_opts(
            Opts::new("pipeline_link_graph_total_nodes", "Nodes in the link graph").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;
        let link_graph_total_edges = IntGauge::with_opts(
            Opts::new("pipeline_link_graph_total_edges", "Edges in the link graph").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;
        let link_graph_avg_degree = Gauge::with_opts(
            Opts::new("pipeline_link_graph_avg_degree", "Average node degree").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;
        let link_graph_max_degree = IntGauge::with_opts(
            Opts::new("pipeline_link_graph_max_degree", "Maximum node degree").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;
        let link_graph_top_pagerank = Gauge::with_opts(
            Opts::new("pipeline_link_graph_top_pagerank", "Highest PageRank score").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;
        let link_graph_top_authority = Gauge::with_opts(
            Opts::new("pipeline_link_graph_top_authority", "Highest authority score").namespace(NAMESPACE),
        )
        .map_err(metric_err)?;

        for collector in [
            Box::new(urls_discovered_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(records_emitted_total.clone()),
            Box::new(items_failed_total.clone()),
            Box::new(items_skipped_total.clone()),
            Box::new(retries_total.clone()),
            Box::new(request_latency_seconds.clone()),
            Box::new(stage_duration_seconds.clone()),
            Box::new(validation_success_rate.clone()),
            Box::new(current_concurrency.clone()),
            Box::new(queue_depth.clone()),
            Box::new(freshness_domain_churn_rate.clone()),
            Box::new(link_graph_total_nodes.clone()),
            Box::new(link_graph_total_edges.clone()),
            Box::new(link_graph_avg_degree.clone()),
            Box::new(link_graph_max_degree.clone()),
            Box::new(link_graph_top_pagerank.clone()),
            Box::new(link_graph_top_authority.clone()),
        ] {
            registry.register(collector).map_err(metric_err)?;
        }

        debug!("MetricsCollector initialized with Prometheus registry");

        Ok(Self {
            registry: Arc::new(registry),
            urls_discovered_total,
            records_emitted_total,
            items_failed_total,
            items_skipped_total,
            retries_total,
            request_latency_seconds,
            stage_duration_seconds,
            validation_success_rate,
            current_concurrency,
            queue_depth,
            freshness_domain_churn_rate,
            link_graph_total_nodes,
            link_graph_total_edges,
            link_graph_avg_degree,
            link_graph_max_degree,
            link_graph_top_pagerank,
            link_graph_top_authority,
        })
    }

    pub fn record_url_discovered(&self) {
        self.urls_discovered_total.inc();
    }

    pub fn record_emitted(&self, stage: StageId) {
        self.records_emitted_total.with_label_values(&[stage.as_str()]).inc();
    }

    pub fn record_failed(&self, stage: StageId) {
        self.items_failed_total.with_label_values(&[stage.as_str()]).inc();
    }

    pub fn record_skipped(&self, stage: StageId) {
        self.items_skipped_total.with_label_values(&[stage.as_str()]).inc();
    }

    pub fn record_retry(&self, stage: StageId) {
        self.retries_total.with_label_values(&[stage.as_str()]).inc();
    }

    pub fn observe_request_latency(&self, stage: StageId, seconds: f64) {
        self.request_latency_seconds
            .with_label_values(&[stage.as_str()])
            .observe(seconds);
    }

    pub fn observe_stage_duration(&self, seconds: f64) {
        self.stage_duration_seconds.observe(seconds);
    }

    pub fn set_validation_success_rate(&self, rate: f64) {
        self.validation_success_rate.set(rate);
    }

    pub fn set_current_concurrency(&self, concurrency: usize) {
        self.current_concurrency.set(concurrency as i64);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn set_domain_churn_rate(&self, domain: &str, rate: f64) {
        self.freshness_domain_churn_rate.with_label_values(&[domain]).set(rate);
    }

    pub fn update_link_graph(&self, stats: &LinkGraphStats) {
        self.link_graph_total_nodes.set(stats.node_count as i64);
        self.link_graph_total_edges.set(stats.edge_count as i64);
        self.link_graph_avg_degree.set(stats.avg_degree);
        self.link_graph_max_degree.set(stats.max_degree as i64);
        self.link_graph_top_pagerank.set(stats.top_pagerank);
        self.link_graph_top_authority.set(stats.top_authority);
    }

    /// In-process snapshot in the Prometheus text format.
    pub fn gather_text(&self) -> Result<String, PipelineError> {
        let encoder = prometheus::TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .map_err(|e| PipelineError::metrics_error(format!("encode metrics: {}", e)))
    }

    /// Writes the snapshot to a path (the optional export surface).
    pub async fn export_to_path(&self, path: &Path) -> Result<(), PipelineError> {
        let text = self.gather_text()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::metrics_error(format!("mkdir {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(path, text)
            .await
            .map_err(|e| PipelineError::metrics_error(format!("write {}: {}", path.display(), e)))?;
        Ok(())
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

fn metric_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::metrics_error(e.to_string())
}
