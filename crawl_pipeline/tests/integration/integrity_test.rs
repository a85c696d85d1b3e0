// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Cross-stage integrity in strict mode: an injected validation record
//! whose hash was never discovered makes `--validate-only` fail.

use chrono::Utc;

use crawl_pipeline::application::orchestrator::PipelineOrchestrator;
use crawl_pipeline::infrastructure::config::settings::AppConfig;
use crawl_pipeline::infrastructure::logs::record_log::RecordLogWriter;
use crawl_pipeline_bootstrap::shutdown::ShutdownCoordinator;
use crawl_pipeline_domain::records::discovery::DiscoverySource;
use crawl_pipeline_domain::{CanonicalUrl, DiscoveryRecord, StageId, ValidationRecord};

fn discovery(path: &str) -> DiscoveryRecord {
    DiscoveryRecord::new(
        CanonicalUrl::parse("https://u.example/").unwrap(),
        CanonicalUrl::parse(&format!("https://u.example{}", path)).unwrap(),
        Utc::now(),
        1,
        DiscoverySource::Link,
        None,
        true,
        0.5,
    )
}

fn validation(path: &str) -> ValidationRecord {
    let mut record = ValidationRecord::from_response(
        CanonicalUrl::parse(&format!("https://u.example{}", path)).unwrap(),
        200,
        Some("text/html".to_string()),
        Some(128),
        10,
        vec![],
        Utc::now(),
    );
    record.mark_validity(true);
    record
}

fn config_for(dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.paths.data_dir = dir.join("data");
    config.paths.checkpoint_dir = dir.join("data/checkpoints");
    config
}

#[tokio::test]
async fn test_orphaned_validation_record_fails_strict_validation() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());

    let mut writer = RecordLogWriter::open(&config.record_log_path(StageId::Discovery)).await.unwrap();
    writer.append(&discovery("/a")).await.unwrap();
    writer.append(&discovery("/b")).await.unwrap();
    writer.flush().await.unwrap();

    let mut writer = RecordLogWriter::open(&config.record_log_path(StageId::Validation)).await.unwrap();
    writer.append(&validation("/a")).await.unwrap();
    // Injected: never discovered.
    writer.append(&validation("/phantom")).await.unwrap();
    writer.flush().await.unwrap();

    let coordinator = ShutdownCoordinator::default();
    let orchestrator = PipelineOrchestrator::new(config, coordinator.token()).unwrap();
    let error = orchestrator.validate_integrity().await.unwrap_err();
    assert_eq!(error.category(), "integrity");
    assert!(error.to_string().contains("1 orphaned"));
}

#[tokio::test]
async fn test_clean_lineage_passes_and_reports_coverage() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());

    let mut writer = RecordLogWriter::open(&config.record_log_path(StageId::Discovery)).await.unwrap();
    for path in ["/a", "/b", "/c", "/d"] {
        writer.append(&discovery(path)).await.unwrap();
    }
    writer.flush().await.unwrap();

    let mut writer = RecordLogWriter::open(&config.record_log_path(StageId::Validation)).await.unwrap();
    for path in ["/a", "/b", "/c"] {
        writer.append(&validation(path)).await.unwrap();
    }
    writer.flush().await.unwrap();

    let coordinator = ShutdownCoordinator::default();
    let orchestrator = PipelineOrchestrator::new(config, coordinator.token()).unwrap();
    let reports = orchestrator.validate_integrity().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!((reports[0].coverage - 0.75).abs() < 1e-9);
    assert_eq!(reports[0].orphaned_hashes, 0);
}
