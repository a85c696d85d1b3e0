// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Settings
//!
//! Typed configuration for all three stages, deserialized from an
//! environment YAML profile. Every struct is declared with
//! `deny_unknown_fields`, so a typo in a profile fails startup instead of
//! silently applying defaults.
//!
//! Precedence: YAML profile < `CRAWL_*` environment variables < CLI flags.
//! The fixed override set:
//!
//! | variable                        | key                             |
//! |---------------------------------|---------------------------------|
//! | `CRAWL_CONCURRENT_REQUESTS`     | `crawler.concurrent_requests`   |
//! | `CRAWL_MAX_DEPTH`               | `stages.discovery.max_depth`    |
//! | `CRAWL_VALIDATION_MAX_WORKERS`  | `stages.validation.max_workers` |
//! | `CRAWL_VALIDATION_TIMEOUT_MS`   | `stages.validation.timeout_ms`  |
//! | `CRAWL_LOG_LEVEL`               | `logging.level`                 |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crawl_pipeline_domain::PipelineError;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    /// Legacy profiles may still use the `scrapy` group name.
    #[serde(alias = "scrapy")]
    pub crawler: CrawlerConfig,
    pub stages: StagesConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CrawlerConfig {
    /// Global concurrent request cap for discovery (1..=1000).
    pub concurrent_requests: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self { concurrent_requests: 16 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct StagesConfig {
    pub discovery: DiscoveryConfig,
    pub validation: ValidationConfig,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DiscoveryConfig {
    /// Breadth-first depth bound (0..=10); 0 emits seeds only.
    pub max_depth: u8,
    /// The single registered domain this pipeline crawls.
    pub allowed_domain: String,
    /// Exact host match instead of registered-domain suffix match.
    pub strict_host_match: bool,
    /// Seed list: one URL per line, `#` comments ignored.
    pub seed_file: PathBuf,
    /// Extensions dropped during candidate filtering (lowercase, no dot).
    pub excluded_extensions: Vec<String>,
    /// Anchor-text keywords that raise the importance score.
    pub high_value_keywords: Vec<String>,
    /// Upper bound for generated `?page=N` pagination probes.
    pub pagination_probe_limit: u32,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retry attempts for transient fetch failures.
    pub max_retries: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            allowed_domain: "u.example".to_string(),
            strict_host_match: false,
            seed_file: PathBuf::from("seeds.txt"),
            excluded_extensions: ["css", "js", "ico", "woff", "woff2", "ttf", "zip", "tar", "gz"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            high_value_keywords: ["admissions", "research", "faculty", "academics", "catalog"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pagination_probe_limit: 10,
            timeout_ms: 30_000,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ValidationConfig {
    /// Upper bound for adaptive concurrency (1..=500).
    pub max_workers: usize,
    /// Floor for adaptive concurrency.
    pub min_workers: usize,
    /// Per-request timeout wrapping the whole HEAD+GET sequence
    /// (1000..=300000 ms).
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Content types that make a 2xx/3xx response valid. Compared after
    /// stripping media-type parameters.
    pub acceptable_content_types: Vec<String>,
    /// Sanity cap for the Content-Length header; larger values fall back
    /// to the observed byte count.
    pub content_length_cap: u64,
    /// Redirect chain bound.
    pub max_redirects: usize,
    /// Per-host connection cap for the shared pool.
    pub per_host_connections: usize,
    /// Fraction of batches kept FIFO for A/B measurement (0.0..=1.0).
    pub fifo_sample_fraction: f64,
    /// Hours a freshness row stays fresh before revalidation is due.
    pub min_fresh_hours: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_workers: 32,
            min_workers: 2,
            timeout_ms: 30_000,
            max_retries: 2,
            acceptable_content_types: ["text/html", "application/xhtml+xml", "text/plain"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            content_length_cap: 50 * 1024 * 1024,
            max_redirects: 5,
            per_host_connections: 8,
            fifo_sample_fraction: 0.0,
            min_fresh_hours: 24.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EnrichmentConfig {
    pub max_workers: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Cap on extracted main-content text, in bytes.
    pub max_text_length: usize,
    pub storage: StorageConfig,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            timeout_ms: 30_000,
            max_retries: 2,
            max_text_length: 200_000,
            storage: StorageConfig::default(),
        }
    }
}

/// Output sink selection for enrichment records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    pub backend: SinkBackend,
    /// Backend-specific options (connection strings, object prefixes).
    pub options: BTreeMap<String, String>,
    pub rotation: RotationConfig,
    pub compression: CompressionConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackend::AppendLog,
            options: BTreeMap::new(),
            rotation: RotationConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

/// Known sink backends; `Custom` is the extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SinkBackend {
    #[default]
    AppendLog,
    RotatingLog,
    Relational,
    Columnar,
    RemoteObject,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RotationConfig {
    /// Items per chunk before the rotating sink rolls over.
    pub max_items: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { max_items: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CompressionConfig {
    /// Codec label handed to the sink (`none`, `gzip`, `zstd`).
    pub codec: String,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { codec: "none".to_string() }
    }
}

/// Cross-stage queue sizing; thresholds must satisfy warn < critical <= max.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub backpressure_threshold: usize,
    pub critical_threshold: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            backpressure_threshold: 700,
            critical_threshold: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Log file path; stderr when absent.
    pub path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Filesystem layout for record logs, checkpoints, and embedded stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            checkpoint_dir: PathBuf::from("data/checkpoints"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct MetricsConfig {
    /// Text-format export path; disabled when absent.
    pub export_path: Option<PathBuf>,
}

impl AppConfig {
    /// Loads, applies environment overrides, and validates a profile.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::invalid_config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let mut config: AppConfig = serde_yaml::from_str(&raw)
            .map_err(|e| PipelineError::invalid_config(format!("{}: {}", path.display(), e)))?;
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves `config/<env>.yaml` relative to the working directory.
    pub fn load_profile(env: &str) -> Result<Self, PipelineError> {
        Self::load(&PathBuf::from("config").join(format!("{}.yaml", env)))
    }

    /// Applies the fixed environment-variable override set. Takes the
    /// variables as an iterator so tests can inject them.
    pub fn apply_env_overrides(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), PipelineError> {
        for (key, value) in vars {
            match key.as_str() {
                "CRAWL_CONCURRENT_REQUESTS" => {
                    self.crawler.concurrent_requests = parse_env(&key, &value)?;
                }
                "CRAWL_MAX_DEPTH" => {
                    self.stages.discovery.max_depth = parse_env(&key, &value)?;
                }
                "CRAWL_VALIDATION_MAX_WORKERS" => {
                    self.stages.validation.max_workers = parse_env(&key, &value)?;
                }
                "CRAWL_VALIDATION_TIMEOUT_MS" => {
                    self.stages.validation.timeout_ms = parse_env(&key, &value)?;
                }
                "CRAWL_LOG_LEVEL" => {
                    self.logging.level = value;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Range and cross-field validation. Runs before any side effect.
    pub fn validate(&self) -> Result<(), PipelineError> {
        fn range<T: PartialOrd + std::fmt::Display + Copy>(
            name: &str,
            value: T,
            min: T,
            max: T,
        ) -> Result<(), PipelineError> {
            if value < min || value > max {
                return Err(PipelineError::invalid_config(format!(
                    "{} = {} outside {}..={}",
                    name, value, min, max
                )));
            }
            Ok(())
        }

        range("crawler.concurrent_requests", self.crawler.concurrent_requests, 1, 1000)?;
        range("stages.discovery.max_depth", self.stages.discovery.max_depth, 0, 10)?;
        range("stages.validation.max_workers", self.stages.validation.max_workers, 1, 500)?;
        range("stages.validation.timeout_ms", self.stages.validation.timeout_ms, 1_000, 300_000)?;
        range(
            "stages.validation.fifo_sample_fraction",
            self.stages.validation.fifo_sample_fraction,
            0.0,
            1.0,
        )?;

        if self.stages.discovery.allowed_domain.trim().is_empty() {
            return Err(PipelineError::invalid_config(
                "stages.discovery.allowed_domain must not be empty",
            ));
        }
        if self.stages.validation.min_workers > self.stages.validation.max_workers {
            return Err(PipelineError::invalid_config(format!(
                "stages.validation.min_workers {} > max_workers {}",
                self.stages.validation.min_workers, self.stages.validation.max_workers
            )));
        }
        // Per-domain concurrency can never exceed the total worker bound.
        if self.stages.validation.per_host_connections > self.stages.validation.max_workers {
            return Err(PipelineError::invalid_config(format!(
                "stages.validation.per_host_connections {} > max_workers {}",
                self.stages.validation.per_host_connections, self.stages.validation.max_workers
            )));
        }
        if self.stages.validation.acceptable_content_types.is_empty() {
            return Err(PipelineError::invalid_config(
                "stages.validation.acceptable_content_types must not be empty",
            ));
        }

        let queue = &self.queue;
        if !(queue.backpressure_threshold < queue.critical_threshold
            && queue.critical_threshold <= queue.max_queue_size)
        {
            return Err(PipelineError::invalid_config(format!(
                "queue thresholds must satisfy warn < critical <= max (got {} / {} / {})",
                queue.backpressure_threshold, queue.critical_threshold, queue.max_queue_size
            )));
        }

        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.as_str()) {
            return Err(PipelineError::invalid_config(format!(
                "logging.level '{}' not one of {:?}",
                self.logging.level, LEVELS
            )));
        }

        if self.stages.enrichment.storage.rotation.max_items == 0 {
            return Err(PipelineError::invalid_config(
                "stages.enrichment.storage.rotation.max_items must be > 0",
            ));
        }

        Ok(())
    }

    // ---- derived paths ----

    pub fn record_log_path(&self, stage: crawl_pipeline_domain::StageId) -> PathBuf {
        self.paths.data_dir.join(format!("{}.jsonl", stage.as_str()))
    }

    pub fn link_graph_db_url(&self) -> String {
        format!("sqlite://{}", self.paths.data_dir.join("link_graph.db").display())
    }

    pub fn freshness_db_url(&self) -> String {
        format!("sqlite://{}", self.paths.data_dir.join("freshness.db").display())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PipelineError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| PipelineError::invalid_config(format!("env {}='{}': {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let yaml = "crawler:\n  concurrent_requests: 8\n  surprise: true\n";
        assert!(serde_yaml::from_str::<AppConfig>(yaml).is_err());

        let yaml = "warehouse:\n  enabled: true\n";
        assert!(serde_yaml::from_str::<AppConfig>(yaml).is_err());
    }

    #[test]
    fn test_legacy_group_alias() {
        let yaml = "scrapy:\n  concurrent_requests: 64\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.crawler.concurrent_requests, 64);
    }

    #[test]
    fn test_range_violations() {
        let mut config = AppConfig::default();
        config.crawler.concurrent_requests = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stages.discovery.max_depth = 11;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stages.validation.timeout_ms = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_threshold_ordering() {
        let mut config = AppConfig::default();
        config.queue.backpressure_threshold = 950;
        config.queue.critical_threshold = 900;
        assert!(config.validate().is_err());

        config.queue.backpressure_threshold = 700;
        config.queue.critical_threshold = 1001;
        assert!(config.validate().is_err());

        config.queue.critical_threshold = 1000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_per_host_bounded_by_workers() {
        let mut config = AppConfig::default();
        config.stages.validation.max_workers = 4;
        config.stages.validation.per_host_connections = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_beat_yaml() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(vec![
                ("CRAWL_MAX_DEPTH".to_string(), "7".to_string()),
                ("CRAWL_VALIDATION_MAX_WORKERS".to_string(), "12".to_string()),
                ("HOME".to_string(), "/home/crawler".to_string()),
            ])
            .unwrap();
        assert_eq!(config.stages.discovery.max_depth, 7);
        assert_eq!(config.stages.validation.max_workers, 12);
    }

    #[test]
    fn test_malformed_env_override_fails() {
        let mut config = AppConfig::default();
        let result =
            config.apply_env_overrides(vec![("CRAWL_MAX_DEPTH".to_string(), "deep".to_string())]);
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "stages:\n  validation:\n    max_workers: 50\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.stages.validation.max_workers, 50);
        assert_eq!(config.stages.validation.timeout_ms, 30_000);
        assert_eq!(config.queue.max_queue_size, 1000);
    }

    #[test]
    fn test_sink_backend_kebab_case() {
        let yaml = "stages:\n  enrichment:\n    storage:\n      backend: rotating-log\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.stages.enrichment.storage.backend, SinkBackend::RotatingLog);
    }

    #[test]
    fn test_record_log_paths() {
        let config = AppConfig::default();
        assert!(config
            .record_log_path(crawl_pipeline_domain::StageId::Discovery)
            .ends_with("discovery.jsonl"));
    }
}
