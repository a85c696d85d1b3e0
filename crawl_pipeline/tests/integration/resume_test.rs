// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Checkpoint resume behavior of the validation runner: an interrupted
//! run continues from `last_processed_index` with no duplicate output,
//! and a changed input file fails fast.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crawl_pipeline::infrastructure::checkpoint::manager::{CheckpointManager, StartDisposition};
use crawl_pipeline::infrastructure::checkpoint::store::CheckpointHandle;
use crawl_pipeline::infrastructure::concurrency::adaptive::AdaptiveConcurrencyController;
use crawl_pipeline::infrastructure::config::settings::ValidationConfig;
use crawl_pipeline::infrastructure::http::client::{HttpFetcher, HttpFetcherConfig};
use crawl_pipeline::infrastructure::logs::record_log::{RecordLogWriter, RecordStream};
use crawl_pipeline::infrastructure::metrics::collector::MetricsCollector;
use crawl_pipeline::infrastructure::repositories::freshness_repository::SqliteFreshnessRepository;
use crawl_pipeline::infrastructure::repositories::link_graph_repository::SqliteLinkGraphRepository;
use crawl_pipeline::infrastructure::repositories::schema;
use crawl_pipeline::infrastructure::stages::validation::ValidationRunner;
use crawl_pipeline_bootstrap::shutdown::ShutdownCoordinator;
use crawl_pipeline_domain::entities::checkpoint_state::ItemOutcome;
use crawl_pipeline_domain::records::discovery::DiscoverySource;
use crawl_pipeline_domain::{CanonicalUrl, DiscoveryRecord, StageId, StageStatus, ValidationRecord};

use super::common::{Route, TestServer};

async fn write_discovery_log(path: &std::path::Path, urls: &[String]) {
    let mut writer = RecordLogWriter::<DiscoveryRecord>::open(path).await.unwrap();
    let source = CanonicalUrl::parse(&urls[0]).unwrap();
    for url in urls {
        let record = DiscoveryRecord::new(
            source.clone(),
            CanonicalUrl::parse(url).unwrap(),
            Utc::now(),
            1,
            DiscoverySource::Link,
            None,
            true,
            0.5,
        );
        writer.append(&record).await.unwrap();
    }
    writer.flush().await.unwrap();
}

async fn build_runner(
    dir: &std::path::Path,
    input: std::path::PathBuf,
    output: std::path::PathBuf,
) -> ValidationRunner {
    let config = ValidationConfig {
        max_workers: 4,
        min_workers: 1,
        timeout_ms: 5_000,
        max_retries: 0,
        ..Default::default()
    };
    let fetcher = Arc::new(
        HttpFetcher::new(HttpFetcherConfig {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            ..Default::default()
        })
        .unwrap(),
    );
    let controller = AdaptiveConcurrencyController::fixed(4).unwrap();
    let graph_repo = SqliteLinkGraphRepository::new(
        schema::connect(&format!("sqlite://{}", dir.join("graph.db").display()))
            .await
            .unwrap(),
    )
    .await
    .unwrap();
    let freshness_repo = SqliteFreshnessRepository::new(
        schema::connect(&format!("sqlite://{}", dir.join("fresh.db").display()))
            .await
            .unwrap(),
    )
    .await
    .unwrap();
    let coordinator = ShutdownCoordinator::default();

    ValidationRunner::new(
        config,
        fetcher,
        controller,
        input,
        output,
        graph_repo,
        freshness_repo,
        MetricsCollector::new().unwrap(),
        coordinator.token(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_skips_processed_prefix() {
    let mut routes = HashMap::new();
    for i in 0..6 {
        routes.insert(format!("/p{}", i), Route::html(&format!("<html><body>page {}</body></html>", i)));
    }
    let server = TestServer::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    let urls: Vec<String> = (0..6).map(|i| server.url(&format!("/p{}", i))).collect();
    let input = dir.path().join("discovery.jsonl");
    let output = dir.path().join("validation.jsonl");
    write_discovery_log(&input, &urls).await;

    // Simulate an interrupted earlier run: 3 of 6 processed, then paused.
    let manager = CheckpointManager::new(&dir.path().join("checkpoints")).unwrap();
    let disposition = manager
        .prepare_run(StageId::Validation, &input, 6, "b1".to_string())
        .await
        .unwrap();
    let mut state = match disposition {
        StartDisposition::Fresh(state) => state,
        other => panic!("expected fresh, got {:?}", other),
    };
    for i in 0..3u64 {
        state.record_item(i, format!("h{}", i), ItemOutcome::Success, Utc::now()).unwrap();
    }
    state.transition(StageStatus::Paused, Utc::now()).unwrap();
    manager.store().save(&state).unwrap();

    // Resume continues at index 3.
    let disposition = manager
        .prepare_run(StageId::Validation, &input, 6, "b2".to_string())
        .await
        .unwrap();
    let state = match disposition {
        StartDisposition::Resume(state) => state,
        other => panic!("expected resume, got {:?}", other),
    };
    assert_eq!(state.last_processed_index, 3);

    let checkpoint = CheckpointHandle::new(manager.store().clone(), state);
    let mut runner = build_runner(dir.path(), input, output.clone()).await;
    let outcome = runner.run(checkpoint).await.unwrap();

    // Only the unprocessed suffix was emitted; indices stayed monotonic.
    assert_eq!(outcome.records_emitted, 3);
    assert_eq!(outcome.state.status, StageStatus::Completed);
    assert_eq!(outcome.state.processed_items, 6);
    assert_eq!(outcome.state.last_processed_index, 6);

    let stream = RecordStream::<ValidationRecord>::open(&output).await.unwrap();
    let (records, _) = stream.collect_valid().await;
    assert_eq!(records.len(), 3);
    let expected: Vec<_> = urls[3..]
        .iter()
        .map(|u| CanonicalUrl::parse(u).unwrap().url_hash())
        .collect();
    let actual: Vec<_> = records.iter().map(|r| r.url_hash.clone()).collect();
    assert_eq!(actual, expected);
    // The already-processed prefix was not refetched.
    assert_eq!(server.hits("/p0"), 0);
    assert!(server.hits("/p3") > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fresh_run_processes_everything() {
    let mut routes = HashMap::new();
    for i in 0..4 {
        routes.insert(format!("/p{}", i), Route::html("<html><body>ok</body></html>"));
    }
    let server = TestServer::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    let urls: Vec<String> = (0..4).map(|i| server.url(&format!("/p{}", i))).collect();
    let input = dir.path().join("discovery.jsonl");
    let output = dir.path().join("validation.jsonl");
    write_discovery_log(&input, &urls).await;

    let manager = CheckpointManager::new(&dir.path().join("checkpoints")).unwrap();
    let disposition = manager
        .prepare_run(StageId::Validation, &input, 4, "b1".to_string())
        .await
        .unwrap();
    let state = match disposition {
        StartDisposition::Fresh(state) => state,
        other => panic!("expected fresh, got {:?}", other),
    };
    let checkpoint = CheckpointHandle::new(manager.store().clone(), state);

    let mut runner = build_runner(dir.path(), input, output.clone()).await;
    let outcome = runner.run(checkpoint).await.unwrap();

    assert_eq!(outcome.records_emitted, 4);
    assert_eq!(outcome.state.successful_items, 4);

    let stream = RecordStream::<ValidationRecord>::open(&output).await.unwrap();
    let (records, _) = stream.collect_valid().await;
    // Output in input order, one record per input, all hash-linked.
    let expected: Vec<_> = urls
        .iter()
        .map(|u| CanonicalUrl::parse(u).unwrap().url_hash())
        .collect();
    let actual: Vec<_> = records.iter().map(|r| r.url_hash.clone()).collect();
    assert_eq!(actual, expected);
}
