// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Discovery Runner (stage 1)
//!
//! Breadth-first traversal of the allowed domain bounded by `max_depth`.
//! Seeds come from the seed file (one URL per line, `#` comments); the
//! frontier grows from candidates extracted out of each fetched page plus
//! sitemap.xml and robots.txt listings fetched once at start.
//!
//! Deduplication is an in-memory `url_hash` set whose durable form is the
//! stage's own output log: on resume the set is rebuilt by re-reading
//! `discovery.jsonl`, so a URL is emitted at most once across restarts.
//!
//! Every emitted discovery contributes an edge to the link graph; at stage
//! end the graph is scored (PageRank + HITS) and persisted for stage 2's
//! priority ordering.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use url::Url;

use crawl_pipeline_bootstrap::shutdown::CancellationToken;
use crawl_pipeline_domain::entities::checkpoint_state::ItemOutcome;
use crawl_pipeline_domain::records::discovery::DiscoverySource;
use crawl_pipeline_domain::services::importance::{importance_score, ImportanceSignals};
use crawl_pipeline_domain::{CanonicalUrl, DiscoveryRecord, LinkGraph, PipelineError, StageId, UrlHash};

use crate::infrastructure::checkpoint::store::CheckpointHandle;
use crate::infrastructure::config::settings::{CrawlerConfig, DiscoveryConfig, QueueConfig};
use crate::infrastructure::html::extract::{extract_candidates, CandidateLink};
use crate::infrastructure::html::sitemap::{parse_robots, parse_sitemap};
use crate::infrastructure::http::client::HttpFetcher;
use crate::infrastructure::logs::record_log::{RecordLogWriter, RecordStream};
use crate::infrastructure::metrics::collector::MetricsCollector;
use crate::infrastructure::repositories::link_graph_repository::SqliteLinkGraphRepository;
use crate::infrastructure::stages::runner::{finish_run, StageOutcome};

/// A frontier entry: a page to fetch at a known depth.
#[derive(Debug, Clone)]
struct FrontierItem {
    url: CanonicalUrl,
    depth: u8,
}

pub struct DiscoveryRunner {
    crawler: CrawlerConfig,
    config: DiscoveryConfig,
    queue: QueueConfig,
    fetcher: Arc<HttpFetcher>,
    output_path: PathBuf,
    graph_repo: SqliteLinkGraphRepository,
    metrics: MetricsCollector,
    cancel: CancellationToken,
}

impl DiscoveryRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crawler: CrawlerConfig,
        config: DiscoveryConfig,
        queue: QueueConfig,
        fetcher: Arc<HttpFetcher>,
        output_path: PathBuf,
        graph_repo: SqliteLinkGraphRepository,
        metrics: MetricsCollector,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            crawler,
            config,
            queue,
            fetcher,
            output_path,
            graph_repo,
            metrics,
            cancel,
        }
    }

    /// Runs the stage to completion, cancellation, or fatal error.
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
        let seeds = read_seed_file(&self.config.seed_file).await?;
        tracing::info!(component = "discovery", seeds = seeds.len(), "starting discovery");

        let mut writer = RecordLogWriter::<DiscoveryRecord>::open(&self.output_path).await?;
        let mut graph = LinkGraph::new();
        // The output log doubles as the durable form of the dedup set and
        // the fetch frontier: both are rebuilt from it on resume.
        let (mut seen, mut frontier) = self.rebuild_from_log(&mut graph).await?;
        let mut emitted = 0u64;

        // Seeds are their own discovery source at depth 0.
        for seed in &seeds {
            if seen.insert(seed.url_hash()) {
                let record = self.build_record(seed, seed, 0, DiscoverySource::Seed, None);
                graph.add_node(record.url_hash.clone(), seed.as_str());
                writer.append(&record).await?;
                emitted += 1;
                self.metrics.record_url_discovered();
                self.metrics.record_emitted(StageId::Discovery);
                if self.config.max_depth > 0 {
                    frontier.push_back(FrontierItem {
                        url: seed.clone(),
                        depth: 0,
                    });
                }
            }
        }
        writer.flush().await?;

        // Seed expansion from sitemap.xml and robots.txt listings.
        if self.config.max_depth > 0 {
            let listed = self.fetch_site_listings(&seeds).await;
            for url in listed {
                self.admit_candidate(
                    &url.clone(),
                    &url,
                    1,
                    DiscoverySource::Sitemap,
                    None,
                    &mut seen,
                    &mut graph,
                    &mut writer,
                    &mut frontier,
                    &mut emitted,
                )
                .await?;
            }
            writer.flush().await?;
        }

        // Fetch progress is tracked against everything enqueued so far;
        // the total grows with the frontier. On resume, the first
        // `last_processed_index` frontier entries were already fetched.
        let mut fetched_pages = checkpoint.state().last_processed_index;
        let mut to_skip = fetched_pages.min(frontier.len() as u64);
        while to_skip > 0 {
            frontier.pop_front();
            to_skip -= 1;
        }
        let mut enqueued_total = checkpoint
            .state()
            .total_items
            .max(fetched_pages + frontier.len() as u64);
        checkpoint.state_mut().total_items = enqueued_total;

        let mut cancelled = false;
        while !frontier.is_empty() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            // One concurrency window of page fetches.
            let window: Vec<FrontierItem> = (0..self.crawler.concurrent_requests)
                .map_while(|_| frontier.pop_front())
                .collect();

            let mut fetches = FuturesUnordered::new();
            for (offset, item) in window.iter().cloned().enumerate() {
                let fetcher = self.fetcher.clone();
                fetches.push(async move {
                    let result = fetcher.fetch_text(&item.url).await;
                    (offset, item, result)
                });
            }

            let mut results: Vec<(usize, FrontierItem, Result<_, PipelineError>)> =
                Vec::with_capacity(window.len());
            while let Some(entry) = fetches.next().await {
                results.push(entry);
            }
            // Emission happens in input order within the window.
            results.sort_by_key(|(offset, _, _)| *offset);

            for (_, item, result) in results {
                let outcome = match result {
                    Ok(body) => {
                        self.metrics
                            .observe_request_latency(StageId::Discovery, body.response_time_ms as f64 / 1000.0);
                        let page_url = Url::parse(item.url.as_str()).map_err(|e| {
                            PipelineError::internal_error(format!("canonical URL reparse: {}", e))
                        })?;
                        let candidates =
                            extract_candidates(&body.body, &page_url, self.config.pagination_probe_limit);
                        for candidate in candidates {
                            self.admit_extracted(
                                &item,
                                candidate,
                                &mut seen,
                                &mut graph,
                                &mut writer,
                                &mut frontier,
                                &mut emitted,
                            )
                            .await?;
                        }
                        ItemOutcome::Success
                    }
                    Err(error) if error.is_fatal_for_stage() => return Err(error),
                    Err(error) => {
                        tracing::warn!(
                            component = "discovery",
                            url_hash = %item.url.url_hash().short(),
                            error = %error,
                            "page fetch failed"
                        );
                        checkpoint.push_error(format!("{}: {}", item.url, error));
                        self.metrics.record_failed(StageId::Discovery);
                        ItemOutcome::Failure
                    }
                };

                writer.flush().await?;
                enqueued_total = enqueued_total.max(fetched_pages + frontier.len() as u64 + 1);
                checkpoint.state_mut().total_items = enqueued_total;
                checkpoint.record_item(fetched_pages, item.url.url_hash().to_string(), outcome)?;
                fetched_pages += 1;
            }
        }

        writer.flush().await?;

        // Finalize the graph once, before stage 2 can consume it.
        graph.compute_scores();
        self.graph_repo.save_graph(&graph).await?;
        self.metrics.update_link_graph(&graph.stats());

        tracing::info!(
            component = "discovery",
            emitted,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            cancelled,
            "discovery finished"
        );
        Ok((emitted, cancelled))
    }

    /// Rebuilds the dedup set, graph edges, and fetch frontier from a
    /// prior partial log. The frontier replays in log order so the
    /// checkpoint index keeps meaning across restarts.
    async fn rebuild_from_log(
        &self,
        graph: &mut LinkGraph,
    ) -> Result<(HashSet<UrlHash>, VecDeque<FrontierItem>), PipelineError> {
        let mut seen = HashSet::new();
        let mut frontier = VecDeque::new();
        if !self.output_path.exists() {
            return Ok((seen, frontier));
        }
        let mut stream = RecordStream::<DiscoveryRecord>::open(&self.output_path).await?;
        while let Some(item) = stream.next().await {
            if let Ok(record) = item {
                graph.add_edge(
                    record.source_url.url_hash(),
                    record.source_url.as_str(),
                    record.url_hash.clone(),
                    record.discovered_url.as_str(),
                    record.discovery_depth,
                );
                if seen.insert(record.url_hash) && record.discovery_depth < self.config.max_depth {
                    frontier.push_back(FrontierItem {
                        url: record.discovered_url,
                        depth: record.discovery_depth,
                    });
                }
            }
        }
        if !seen.is_empty() {
            tracing::info!(
                component = "discovery",
                known = seen.len(),
                replayable = frontier.len(),
                "rebuilt dedup set and frontier from output log"
            );
        }
        Ok((seen, frontier))
    }

    /// Fetches sitemap.xml and robots.txt once, returning listed URLs.
    /// The site root keeps the first seed's scheme, host, and port.
    async fn fetch_site_listings(&self, seeds: &[CanonicalUrl]) -> Vec<CanonicalUrl> {
        let Some(first_seed) = seeds.first() else {
            return Vec::new();
        };
        let Ok(root_url) = Url::parse(first_seed.as_str()).and_then(|u| u.join("/")) else {
            return Vec::new();
        };

        let mut listed = Vec::new();
        let mut sitemap_urls: Vec<String> = vec![format!("{}sitemap.xml", root_url)];

        if let Ok(robots_url) = CanonicalUrl::parse(&format!("{}robots.txt", root_url)) {
            match self.fetcher.fetch_text(&robots_url).await {
                Ok(body) => {
                    let info = parse_robots(&body.body, &root_url);
                    sitemap_urls.extend(info.sitemaps);
                    for url in info.listed_urls {
                        if let Ok(canonical) = CanonicalUrl::from_url(url) {
                            listed.push(canonical);
                        }
                    }
                }
                Err(error) => {
                    tracing::debug!(component = "discovery", error = %error, "no robots.txt");
                }
            }
        }

        for sitemap in sitemap_urls {
            let Ok(sitemap_url) = CanonicalUrl::parse(&sitemap) else {
                continue;
            };
            match self.fetcher.fetch_text(&sitemap_url).await {
                Ok(body) => {
                    for loc in parse_sitemap(&body.body) {
                        if let Ok(canonical) = CanonicalUrl::parse(&loc) {
                            listed.push(canonical);
                        }
                    }
                }
                Err(error) => {
                    tracing::debug!(component = "discovery", error = %error, sitemap, "sitemap fetch failed");
                }
            }
        }
        listed
    }

    /// Filters and admits one extracted candidate.
    #[allow(clippy::too_many_arguments)]
    async fn admit_extracted(
        &self,
        from: &FrontierItem,
        candidate: CandidateLink,
        seen: &mut HashSet<UrlHash>,
        graph: &mut LinkGraph,
        writer: &mut RecordLogWriter<DiscoveryRecord>,
        frontier: &mut VecDeque<FrontierItem>,
        emitted: &mut u64,
    ) -> Result<(), PipelineError> {
        // Non-HTTP schemes fail canonicalization and drop out here.
        let Ok(url) = CanonicalUrl::from_url(candidate.url) else {
            return Ok(());
        };
        self.admit_candidate(
            &from.url,
            &url,
            from.depth + 1,
            candidate.source,
            candidate.anchor_text,
            seen,
            graph,
            writer,
            frontier,
            emitted,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn admit_candidate(
        &self,
        source_url: &CanonicalUrl,
        url: &CanonicalUrl,
        depth: u8,
        source: DiscoverySource,
        anchor_text: Option<String>,
        seen: &mut HashSet<UrlHash>,
        graph: &mut LinkGraph,
        writer: &mut RecordLogWriter<DiscoveryRecord>,
        frontier: &mut VecDeque<FrontierItem>,
        emitted: &mut u64,
    ) -> Result<(), PipelineError> {
        if depth > self.config.max_depth {
            return Ok(());
        }
        if !url.is_same_domain(&self.config.allowed_domain, self.config.strict_host_match) {
            return Ok(());
        }
        if let Some(ext) = url.extension() {
            if self.config.excluded_extensions.iter().any(|e| e == &ext) {
                return Ok(());
            }
        }

        // Link structure is recorded even for re-sighted URLs.
        graph.add_edge(
            source_url.url_hash(),
            source_url.as_str(),
            url.url_hash(),
            url.as_str(),
            depth,
        );

        if !seen.insert(url.url_hash()) {
            return Ok(());
        }

        let record = self.build_record(source_url, url, depth, source, anchor_text);
        writer.append(&record).await?;
        *emitted += 1;
        self.metrics.record_url_discovered();
        self.metrics.record_emitted(StageId::Discovery);

        // The frontier is the bounded queue between extraction and
        // fetching. At capacity, the URL stays emitted but is not
        // expanded; a later run picks it up from the log.
        if depth < self.config.max_depth {
            if frontier.len() >= self.queue.max_queue_size {
                tracing::warn!(
                    component = "discovery",
                    url_hash = %record.url_hash.short(),
                    "frontier at capacity; deferring expansion to a later run"
                );
            } else {
                if frontier.len() == self.queue.backpressure_threshold {
                    tracing::warn!(component = "discovery", depth = frontier.len(), "frontier backpressure threshold reached");
                } else if frontier.len() == self.queue.critical_threshold {
                    tracing::warn!(component = "discovery", depth = frontier.len(), "frontier critical threshold reached");
                }
                frontier.push_back(FrontierItem {
                    url: url.clone(),
                    depth,
                });
            }
            self.metrics.set_queue_depth(frontier.len());
        }
        Ok(())
    }

    fn build_record(
        &self,
        source_url: &CanonicalUrl,
        url: &CanonicalUrl,
        depth: u8,
        source: DiscoverySource,
        anchor_text: Option<String>,
    ) -> DiscoveryRecord {
        let is_same_domain = url.is_same_domain(&self.config.allowed_domain, self.config.strict_host_match);
        let signals = ImportanceSignals {
            source,
            anchor_text: anchor_text.as_deref(),
            is_same_domain,
            path_segments: url.path_segment_count(),
        };
        let score = importance_score(&signals, &self.config.high_value_keywords);
        DiscoveryRecord::new(
            source_url.clone(),
            url.clone(),
            Utc::now(),
            depth,
            source,
            anchor_text,
            is_same_domain,
            score,
        )
    }
}

/// Reads the seed list: one URL per line, blank lines and `#` comments
/// ignored. Unparseable seeds are input errors.
pub async fn read_seed_file(path: &Path) -> Result<Vec<CanonicalUrl>, PipelineError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::input_error(format!("seed file {}: {}", path.display(), e)))?;
    let mut seeds = Vec::new();
    for (number, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let url = CanonicalUrl::parse(line).map_err(|e| {
            PipelineError::input_error(format!("seed file {} line {}: {}", path.display(), number + 1, e))
        })?;
        seeds.push(url);
    }
    Ok(seeds)
}
