// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end pipeline flow against a local HTTP site: discovery emits
//! hash-bound records, validation marks them live, enrichment extracts
//! content, and a completed rerun is a no-op.

use std::collections::HashMap;

use crawl_pipeline::application::orchestrator::PipelineOrchestrator;
use crawl_pipeline::infrastructure::config::settings::AppConfig;
use crawl_pipeline::infrastructure::logs::record_log::RecordStream;
use crawl_pipeline_bootstrap::cli::RunTarget;
use crawl_pipeline_bootstrap::shutdown::ShutdownCoordinator;
use crawl_pipeline_domain::{
    CanonicalUrl, DiscoveryRecord, EnrichmentRecord, StageId, StageStatus, ValidationRecord,
};

use super::common::{Route, TestServer};

async fn campus_site() -> TestServer {
    let mut routes = HashMap::new();
    routes.insert(
        "/".to_string(),
        Route::html(
            r#"<html><head><title>University of Example</title></head><body>
               <main>Welcome to the university. Research and admissions information inside.
               <a href="/a">Department A</a>
               <a href="/b">Admissions Office</a></main></body></html>"#,
        ),
    );
    routes.insert(
        "/a".to_string(),
        Route::html(
            r#"<html><head><title>Department A</title></head><body>
               <main>Department A offers degree programs in applied sciences with dedicated
               research laboratories and faculty mentoring for every student.</main></body></html>"#,
        ),
    );
    routes.insert(
        "/b".to_string(),
        Route::html(
            r#"<html><head><title>Admissions</title></head><body>
               <main>Apply to the university. Admission requirements, tuition, and financial
               aid guidance for prospective students.</main></body></html>"#,
        ),
    );
    TestServer::start(routes).await
}

async fn test_config(dir: &std::path::Path, server: &TestServer) -> AppConfig {
    let seed_file = dir.join("seeds.txt");
    tokio::fs::write(&seed_file, format!("# seeds\n{}\n", server.url("/")))
        .await
        .unwrap();

    let mut config = AppConfig::default();
    config.paths.data_dir = dir.join("data");
    config.paths.checkpoint_dir = dir.join("data/checkpoints");
    config.stages.discovery.seed_file = seed_file;
    config.stages.discovery.allowed_domain = "127.0.0.1".to_string();
    config.stages.discovery.max_depth = 2;
    config.stages.discovery.pagination_probe_limit = 0;
    config.stages.discovery.timeout_ms = 5_000;
    config.stages.discovery.max_retries = 0;
    config.stages.validation.timeout_ms = 5_000;
    config.stages.validation.max_retries = 0;
    config.stages.validation.max_workers = 4;
    config.stages.validation.min_workers = 1;
    config.stages.validation.per_host_connections = 4;
    config.stages.enrichment.timeout_ms = 5_000;
    config.stages.enrichment.max_retries = 0;
    config.validate().unwrap();
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn test_three_stage_flow() {
    let server = campus_site().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &server).await;

    let coordinator = ShutdownCoordinator::default();
    let orchestrator = PipelineOrchestrator::new(config.clone(), coordinator.token()).unwrap();
    let outcome = orchestrator.run(RunTarget::All).await.unwrap();
    assert_eq!(outcome.stages_run.len(), 3);
    assert!(!outcome.was_cancelled);

    // Stage 1: seed plus the two linked pages, hash-bound.
    let stream = RecordStream::<DiscoveryRecord>::open(&config.record_log_path(StageId::Discovery))
        .await
        .unwrap();
    let (discoveries, violations) = stream.collect_valid().await;
    assert!(violations.is_empty());
    assert_eq!(discoveries.len(), 3);
    for record in &discoveries {
        assert_eq!(record.url_hash, record.discovered_url.url_hash());
        assert!(matches!(
            record.discovery_source,
            crawl_pipeline_domain::DiscoverySource::Seed | crawl_pipeline_domain::DiscoverySource::Link
        ));
    }
    let expected_a = CanonicalUrl::parse(&server.url("/a")).unwrap().url_hash();
    assert!(discoveries.iter().any(|r| r.url_hash == expected_a));

    // Stage 2: all three live with acceptable content types.
    let stream = RecordStream::<ValidationRecord>::open(&config.record_log_path(StageId::Validation))
        .await
        .unwrap();
    let (validations, violations) = stream.collect_valid().await;
    assert!(violations.is_empty());
    assert_eq!(validations.len(), 3);
    for record in &validations {
        assert!(record.is_valid, "{:?}", record);
        assert_eq!(record.status_code, 200);
        assert!(record.error_message.is_none());
    }

    // Stage 3: one enrichment per valid input, with real content.
    let stream = RecordStream::<EnrichmentRecord>::open(&config.record_log_path(StageId::Enrichment))
        .await
        .unwrap();
    let (enrichments, violations) = stream.collect_valid().await;
    assert!(violations.is_empty());
    assert_eq!(enrichments.len(), 3);
    for record in &enrichments {
        assert!(record.word_count > 0, "{:?}", record.url);
        assert!(record.error.is_none());
        assert!(record.title.is_some());
    }

    // Lineage is clean in strict mode.
    orchestrator.validate_integrity().await.unwrap();

    // Checkpoints all completed.
    for state in orchestrator.checkpoints().list().unwrap() {
        assert_eq!(state.status, StageStatus::Completed);
        assert_eq!(
            state.processed_items,
            state.successful_items + state.failed_items + state.skipped_items
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_completed_rerun_is_noop() {
    let server = campus_site().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &server).await;

    let coordinator = ShutdownCoordinator::default();
    let orchestrator = PipelineOrchestrator::new(config.clone(), coordinator.token()).unwrap();
    orchestrator.run(RunTarget::Stage(1)).await.unwrap();

    let first_count = {
        let stream = RecordStream::<DiscoveryRecord>::open(&config.record_log_path(StageId::Discovery))
            .await
            .unwrap();
        stream.collect_valid().await.0.len()
    };

    // Same input: the stage reports itself already complete and appends
    // nothing.
    let outcome = orchestrator.run(RunTarget::Stage(1)).await.unwrap();
    assert_eq!(outcome.stages_skipped, vec![StageId::Discovery]);

    let stream = RecordStream::<DiscoveryRecord>::open(&config.record_log_path(StageId::Discovery))
        .await
        .unwrap();
    assert_eq!(stream.collect_valid().await.0.len(), first_count);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_self_linking_page_emits_once() {
    let mut routes = HashMap::new();
    routes.insert(
        "/loop".to_string(),
        Route::html(r#"<html><body><main>Loop page <a href="/loop">self</a></main></body></html>"#),
    );
    let server = TestServer::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &server).await;
    tokio::fs::write(&config.stages.discovery.seed_file, format!("{}\n", server.url("/loop")))
        .await
        .unwrap();
    config.stages.discovery.max_depth = 3;

    let coordinator = ShutdownCoordinator::default();
    let orchestrator = PipelineOrchestrator::new(config.clone(), coordinator.token()).unwrap();
    orchestrator.run(RunTarget::Stage(1)).await.unwrap();

    let stream = RecordStream::<DiscoveryRecord>::open(&config.record_log_path(StageId::Discovery))
        .await
        .unwrap();
    let (records, _) = stream.collect_valid().await;
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].url_hash,
        CanonicalUrl::parse(&server.url("/loop")).unwrap().url_hash()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_max_depth_zero_emits_seeds_only() {
    let server = campus_site().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &server).await;
    config.stages.discovery.max_depth = 0;

    let coordinator = ShutdownCoordinator::default();
    let orchestrator = PipelineOrchestrator::new(config.clone(), coordinator.token()).unwrap();
    orchestrator.run(RunTarget::Stage(1)).await.unwrap();

    let stream = RecordStream::<DiscoveryRecord>::open(&config.record_log_path(StageId::Discovery))
        .await
        .unwrap();
    let (records, _) = stream.collect_valid().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].discovery_depth, 0);
    // No page fetches happened at all.
    assert_eq!(server.hits("/"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_seed_file_completes_with_zero_output() {
    let server = campus_site().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &server).await;
    tokio::fs::write(&config.stages.discovery.seed_file, "# nothing here\n")
        .await
        .unwrap();

    let coordinator = ShutdownCoordinator::default();
    let orchestrator = PipelineOrchestrator::new(config.clone(), coordinator.token()).unwrap();
    orchestrator.run(RunTarget::Stage(1)).await.unwrap();

    let states = orchestrator.checkpoints().list().unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].status, StageStatus::Completed);
    assert_eq!(states[0].processed_items, 0);
}
