// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Record Log
//!
//! Append-only, line-delimited UTF-8 JSON log, one record per line. Each
//! stage writes its own log through a single [`RecordLogWriter`] (concurrent
//! writers are not supported) and the next stage reads it back through a
//! lazy, restartable [`RecordStream`].
//!
//! Both directions are schema-guarded: appends validate before writing
//! (a violation never reaches disk), and streamed lines are re-validated so
//! a corrupted log surfaces as counted violations rather than a crash.
//! Durability contract: a record counts as emitted only after `flush()`;
//! stage runners flush at batch boundaries before advancing the checkpoint
//! index.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use crawl_pipeline_domain::records::schema::{SchemaErrorKind, SchemaViolation};
use crawl_pipeline_domain::{PipelineError, SchemaReport, StageRecord};

/// Single-writer append handle for one stage's log.
pub struct RecordLogWriter<T> {
    path: PathBuf,
    writer: BufWriter<File>,
    records_written: u64,
    _marker: PhantomData<T>,
}

impl<T: StageRecord> RecordLogWriter<T> {
    /// Opens the log for appending, creating it (and parent directories)
    /// if missing.
    pub async fn open(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::persistence_error(format!("mkdir {}: {}", parent.display(), e)))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| PipelineError::persistence_error(format!("open {}: {}", path.display(), e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records_written: 0,
            _marker: PhantomData,
        })
    }

    /// Truncates and reopens the log (reset + rerun path).
    pub async fn truncate(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::persistence_error(format!("mkdir {}: {}", parent.display(), e)))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| PipelineError::persistence_error(format!("truncate {}: {}", path.display(), e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records_written: 0,
            _marker: PhantomData,
        })
    }

    /// Validates and appends one record as a single `\n`-terminated line.
    pub async fn append(&mut self, record: &T) -> Result<(), PipelineError> {
        record
            .validate()
            .map_err(|v| PipelineError::SchemaViolation(format!("refusing to append: {}", v)))?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(|e| PipelineError::persistence_error(format!("append {}: {}", self.path.display(), e)))?;
        self.records_written += 1;
        Ok(())
    }

    /// Flushes buffered lines to the OS; the batch-boundary durability
    /// point.
    pub async fn flush(&mut self) -> Result<(), PipelineError> {
        self.writer
            .flush()
            .await
            .map_err(|e| PipelineError::persistence_error(format!("flush {}: {}", self.path.display(), e)))?;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lazy streaming reader. Restart by constructing a new stream.
pub struct RecordStream<T> {
    lines: tokio::io::Lines<BufReader<File>>,
    line_number: u64,
    malformed: u64,
    _marker: PhantomData<T>,
}

impl<T: StageRecord> RecordStream<T> {
    pub async fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)
            .await
            .map_err(|e| PipelineError::input_error(format!("open {}: {}", path.display(), e)))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_number: 0,
            malformed: 0,
            _marker: PhantomData,
        })
    }

    /// Next record, or a violation for a malformed/invalid line. Iteration
    /// continues past violations; `None` means end of log.
    pub async fn next(&mut self) -> Option<Result<T, SchemaViolation>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    self.malformed += 1;
                    return Some(Err(SchemaViolation {
                        kind: SchemaErrorKind::ValueError,
                        field: None,
                        message: format!("read error: {}", e),
                        line: Some(self.line_number + 1),
                    }));
                }
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(match parse_and_validate::<T>(&line) {
                Ok(record) => Ok(record),
                Err(violation) => {
                    self.malformed += 1;
                    Err(violation.at_line(self.line_number))
                }
            });
        }
    }

    /// Collects all valid records, returning violations alongside.
    pub async fn collect_valid(mut self) -> (Vec<T>, Vec<SchemaViolation>) {
        let mut records = Vec::new();
        let mut violations = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(record) => records.push(record),
                Err(violation) => violations.push(violation),
            }
        }
        (records, violations)
    }

    /// Malformed lines seen so far.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

fn parse_and_validate<T: StageRecord>(line: &str) -> Result<T, SchemaViolation> {
    let record: T = serde_json::from_str(line).map_err(|e| SchemaViolation {
        kind: SchemaErrorKind::classify_serde(&e),
        field: None,
        message: e.to_string(),
        line: None,
    })?;
    record.validate()?;
    Ok(record)
}

/// Counts non-empty lines; the cheap `total_items` seek for checkpoints.
pub async fn count_records(path: &Path) -> Result<u64, PipelineError> {
    let file = File::open(path)
        .await
        .map_err(|e| PipelineError::input_error(format!("open {}: {}", path.display(), e)))?;
    let mut lines = BufReader::new(file).lines();
    let mut count = 0u64;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| PipelineError::input_error(format!("read {}: {}", path.display(), e)))?
    {
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Full-file schema validation pass.
///
/// `sample_rate` in (0,1] thins the pass deterministically: with rate 0.25
/// every 4th record is checked. Line parse failures always count.
pub async fn validate_file<T: StageRecord>(path: &Path, sample_rate: f64) -> Result<SchemaReport, PipelineError> {
    let stride = if sample_rate >= 1.0 {
        1
    } else if sample_rate <= 0.0 {
        return Err(PipelineError::invalid_config(format!(
            "sample_rate must be in (0,1], got {}",
            sample_rate
        )));
    } else {
        (1.0 / sample_rate).round().max(1.0) as u64
    };

    let file = File::open(path)
        .await
        .map_err(|e| PipelineError::input_error(format!("open {}: {}", path.display(), e)))?;
    let mut lines = BufReader::new(file).lines();
    let mut report = SchemaReport::default();
    let mut line_number = 0u64;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| PipelineError::input_error(format!("read {}: {}", path.display(), e)))?
    {
        if line.trim().is_empty() {
            continue;
        }
        line_number += 1;
        if (line_number - 1) % stride != 0 {
            continue;
        }
        match parse_and_validate::<T>(&line) {
            Ok(_) => report.record_valid(),
            Err(violation) => report.record_invalid(violation.at_line(line_number)),
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crawl_pipeline_domain::records::discovery::DiscoverySource;
    use crawl_pipeline_domain::{CanonicalUrl, DiscoveryRecord};

    fn record(path: &str) -> DiscoveryRecord {
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

    #[tokio::test]
    async fn test_append_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.jsonl");

        let mut writer = RecordLogWriter::open(&path).await.unwrap();
        for p in ["/a", "/b", "/c"] {
            writer.append(&record(p)).await.unwrap();
        }
        writer.flush().await.unwrap();
        assert_eq!(writer.records_written(), 3);

        let stream = RecordStream::<DiscoveryRecord>::open(&path).await.unwrap();
        let (records, violations) = stream.collect_valid().await;
        assert_eq!(records.len(), 3);
        assert!(violations.is_empty());
        assert_eq!(records[1].discovered_url.as_str(), "https://u.example/b");
    }

    #[tokio::test]
    async fn test_append_rejects_invalid_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.jsonl");
        let mut writer = RecordLogWriter::open(&path).await.unwrap();

        let mut bad = record("/a");
        bad.importance_score = 7.0;
        assert!(writer.append(&bad).await.is_err());
        writer.flush().await.unwrap();
        assert_eq!(count_records(&path).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stream_survives_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.jsonl");

        let good = serde_json::to_string(&record("/a")).unwrap();
        let contents = format!("{}\nnot-json at all\n{}\n", good, good);
        tokio::fs::write(&path, contents).await.unwrap();

        let mut stream = RecordStream::<DiscoveryRecord>::open(&path).await.unwrap();
        let mut ok = 0;
        let mut bad = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(_) => ok += 1,
                Err(violation) => {
                    assert_eq!(violation.line, Some(2));
                    bad += 1;
                }
            }
        }
        assert_eq!((ok, bad), (2, 1));
        assert_eq!(stream.malformed_count(), 1);
    }

    #[tokio::test]
    async fn test_append_resumes_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.jsonl");

        let mut writer = RecordLogWriter::open(&path).await.unwrap();
        writer.append(&record("/a")).await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let mut writer = RecordLogWriter::open(&path).await.unwrap();
        writer.append(&record("/b")).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(count_records(&path).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_validate_file_categorizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.jsonl");

        let good = serde_json::to_string(&record("/a")).unwrap();
        let mut tampered = serde_json::to_value(record("/b")).unwrap();
        tampered["extra_field"] = serde_json::json!(true);
        let contents = format!("{}\n{}\n{{\"broken\": }}\n", good, serde_json::to_string(&tampered).unwrap());
        tokio::fs::write(&path, contents).await.unwrap();

        let report = validate_file::<DiscoveryRecord>(&path, 1.0).await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 2);
        assert_eq!(report.by_category.get("unknown-field"), Some(&1));
    }

    #[tokio::test]
    async fn test_validate_file_sampling_stride() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.jsonl");
        let mut writer = RecordLogWriter::open(&path).await.unwrap();
        for i in 0..20 {
            writer.append(&record(&format!("/p{}", i))).await.unwrap();
        }
        writer.flush().await.unwrap();

        let report = validate_file::<DiscoveryRecord>(&path, 0.25).await.unwrap();
        assert_eq!(report.total, 5);
        assert!(validate_file::<DiscoveryRecord>(&path, 0.0).await.is_err());
    }
}
