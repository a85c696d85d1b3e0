// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Enrichment Output Sinks
//!
//! The enrichment runner writes through the `OutputSink` capability set —
//! `append`, `flush`, `rotate_if_needed` — so the storage backend is a
//! configuration choice. Implemented variants: the default append-only
//! JSONL log and a rotating-chunk writer with optional gzip compression of
//! closed chunks. The relational, columnar, and remote-object backends are
//! external collaborators; selecting them here reports a configuration
//! error naming the missing integration rather than silently degrading.
//! Custom sinks plug in by passing an implementation to the orchestrator.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;

use crawl_pipeline_domain::{EnrichmentRecord, PipelineError};

use crate::infrastructure::config::settings::{SinkBackend, StorageConfig};
use crate::infrastructure::logs::record_log::RecordLogWriter;

/// Capability set implemented by every enrichment output backend.
#[async_trait]
pub trait OutputSink: Send {
    async fn append(&mut self, record: &EnrichmentRecord) -> Result<(), PipelineError>;

    /// Durability point; called at batch boundaries before the checkpoint
    /// index advances.
    async fn flush(&mut self) -> Result<(), PipelineError>;

    /// Rolls over chunked backends when the rotation threshold is reached.
    async fn rotate_if_needed(&mut self) -> Result<(), PipelineError>;
}

/// Default backend: one append-only JSONL log.
pub struct AppendLogSink {
    writer: RecordLogWriter<EnrichmentRecord>,
}

impl AppendLogSink {
    pub async fn open(path: &Path) -> Result<Self, PipelineError> {
        Ok(Self {
            writer: RecordLogWriter::open(path).await?,
        })
    }
}

#[async_trait]
impl OutputSink for AppendLogSink {
    async fn append(&mut self, record: &EnrichmentRecord) -> Result<(), PipelineError> {
        self.writer.append(record).await
    }

    async fn flush(&mut self) -> Result<(), PipelineError> {
        self.writer.flush().await
    }

    async fn rotate_if_needed(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Rotating backend: numbered chunks of at most `max_items` records, with
/// closed chunks optionally gzip-compressed off the I/O loop.
pub struct RotatingLogSink {
    base_path: PathBuf,
    max_items: u64,
    gzip: bool,
    chunk_index: u32,
    items_in_chunk: u64,
    writer: RecordLogWriter<EnrichmentRecord>,
}

impl RotatingLogSink {
    pub async fn open(base_path: &Path, max_items: u64, codec: &str) -> Result<Self, PipelineError> {
        let gzip = match codec {
            "none" => false,
            "gzip" => true,
            other => {
                return Err(PipelineError::invalid_config(format!(
                    "unsupported rotation codec '{}' (expected none|gzip)",
                    other
                )));
            }
        };
        if max_items == 0 {
            return Err(PipelineError::invalid_config("rotation.max_items must be > 0"));
        }
        let chunk_index = next_free_chunk_index(base_path);
        let writer = RecordLogWriter::open(&chunk_path(base_path, chunk_index)).await?;
        Ok(Self {
            base_path: base_path.to_path_buf(),
            max_items,
            gzip,
            chunk_index,
            items_in_chunk: 0,
            writer,
        })
    }

    async fn close_current_chunk(&mut self) -> Result<(), PipelineError> {
        self.writer.flush().await?;
        if self.gzip {
            let path = chunk_path(&self.base_path, self.chunk_index);
            compress_chunk(path).await?;
        }
        Ok(())
    }
}

fn chunk_path(base: &Path, index: u32) -> PathBuf {
    base.with_extension(format!("{:05}.jsonl", index))
}

fn next_free_chunk_index(base: &Path) -> u32 {
    let mut index = 0;
    while chunk_path(base, index).exists() || chunk_path(base, index).with_extension("jsonl.gz").exists() {
        index += 1;
    }
    index
}

/// Gzip a closed chunk on the blocking pool, then remove the plain file.
async fn compress_chunk(path: PathBuf) -> Result<(), PipelineError> {
    tokio::task::spawn_blocking(move || -> Result<(), PipelineError> {
        let gz_path = path.with_extension("jsonl.gz");
        let input = std::fs::File::open(&path)
            .map_err(|e| PipelineError::persistence_error(format!("open {}: {}", path.display(), e)))?;
        let output = std::fs::File::create(&gz_path)
            .map_err(|e| PipelineError::persistence_error(format!("create {}: {}", gz_path.display(), e)))?;
        let mut encoder = GzEncoder::new(output, Compression::default());
        let mut reader = std::io::BufReader::new(input);
        std::io::copy(&mut reader, &mut encoder)
            .map_err(|e| PipelineError::persistence_error(format!("compress {}: {}", path.display(), e)))?;
        encoder
            .finish()
            .map_err(|e| PipelineError::persistence_error(format!("finish {}: {}", gz_path.display(), e)))?;
        std::fs::remove_file(&path)
            .map_err(|e| PipelineError::persistence_error(format!("remove {}: {}", path.display(), e)))?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::internal_error(format!("compression task panicked: {}", e)))?
}

#[async_trait]
impl OutputSink for RotatingLogSink {
    async fn append(&mut self, record: &EnrichmentRecord) -> Result<(), PipelineError> {
        self.writer.append(record).await?;
        self.items_in_chunk += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), PipelineError> {
        self.writer.flush().await
    }

    async fn rotate_if_needed(&mut self) -> Result<(), PipelineError> {
        if self.items_in_chunk < self.max_items {
            return Ok(());
        }
        self.close_current_chunk().await?;
        self.chunk_index += 1;
        self.items_in_chunk = 0;
        self.writer = RecordLogWriter::open(&chunk_path(&self.base_path, self.chunk_index)).await?;
        tracing::debug!(chunk = self.chunk_index, "rotated enrichment sink");
        Ok(())
    }
}

/// Builds the configured sink for the enrichment stage.
pub async fn build_sink(config: &StorageConfig, output_path: &Path) -> Result<Box<dyn OutputSink>, PipelineError> {
    match config.backend {
        SinkBackend::AppendLog => Ok(Box::new(AppendLogSink::open(output_path).await?)),
        SinkBackend::RotatingLog => Ok(Box::new(
            RotatingLogSink::open(output_path, config.rotation.max_items, &config.compression.codec).await?,
        )),
        SinkBackend::Relational | SinkBackend::Columnar | SinkBackend::RemoteObject => {
            Err(PipelineError::invalid_config(format!(
                "storage backend {:?} requires an external integration that is not wired into this binary",
                config.backend
            )))
        }
        SinkBackend::Custom => Err(PipelineError::invalid_config(
            "custom storage backend selected but no custom sink was provided",
        )),
    }
}
