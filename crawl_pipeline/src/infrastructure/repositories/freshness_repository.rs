// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Freshness Repository
//!
//! SQLite persistence for per-URL freshness rows, keyed by `url_hash`.
//! Stage 2 is the single writer; each upsert is one statement, so readers
//! in other stages see per-key atomic updates.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crawl_pipeline_domain::{CanonicalUrl, FreshnessRecord, PipelineError, UrlHash};

pub struct SqliteFreshnessRepository {
    pool: SqlitePool,
}

impl SqliteFreshnessRepository {
    /// Wraps a pool and bootstraps the table.
    pub async fn new(pool: SqlitePool) -> Result<Self, PipelineError> {
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS freshness (
                url_hash TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                last_modified TEXT,
                etag TEXT,
                last_validated TEXT NOT NULL,
                validation_count INTEGER NOT NULL DEFAULT 0,
                content_changed_count INTEGER NOT NULL DEFAULT 0,
                staleness_score REAL NOT NULL DEFAULT 0,
                domain TEXT NOT NULL,
                content_type TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_freshness_domain ON freshness(domain)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn get(&self, url_hash: &UrlHash) -> Result<Option<FreshnessRecord>, PipelineError> {
        let row = sqlx::query(
            "SELECT url_hash, url, last_modified, etag, last_validated, validation_count,
                    content_changed_count, staleness_score, domain, content_type
             FROM freshness WHERE url_hash = ?",
        )
        .bind(url_hash.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(row_to_record).transpose()
    }

    /// Inserts or replaces one row; a single statement per key.
    pub async fn upsert(&self, record: &FreshnessRecord) -> Result<(), PipelineError> {
        record
            .validate()
            .map_err(|v| PipelineError::SchemaViolation(v.to_string()))?;
        sqlx::query(
            "INSERT INTO freshness
                (url_hash, url, last_modified, etag, last_validated, validation_count,
                 content_changed_count, staleness_score, domain, content_type)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(url_hash) DO UPDATE SET
                url = excluded.url,
                last_modified = excluded.last_modified,
                etag = excluded.etag,
                last_validated = excluded.last_validated,
                validation_count = excluded.validation_count,
                content_changed_count = excluded.content_changed_count,
                staleness_score = excluded.staleness_score,
                domain = excluded.domain,
                content_type = excluded.content_type",
        )
        .bind(record.url_hash.as_str())
        .bind(record.url.as_str())
        .bind(&record.last_modified)
        .bind(&record.etag)
        .bind(record.last_validated.to_rfc3339())
        .bind(record.validation_count as i64)
        .bind(record.content_changed_count as i64)
        .bind(record.staleness_score)
        .bind(&record.domain)
        .bind(&record.content_type)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, PipelineError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM freshness")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    /// Per-domain churn rate: Σ content_changed / Σ validation_count.
    pub async fn domain_churn_rates(&self) -> Result<Vec<(String, f64)>, PipelineError> {
        let rows = sqlx::query(
            "SELECT domain,
                    CAST(SUM(content_changed_count) AS REAL) /
                    MAX(CAST(SUM(validation_count) AS REAL), 1.0) AS churn
             FROM freshness GROUP BY domain ORDER BY domain",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("domain"), row.get::<f64, _>("churn")))
            .collect())
    }

    /// Rows due for revalidation per the staleness policy.
    pub async fn stale_candidates(
        &self,
        min_fresh_hours: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<FreshnessRecord>, PipelineError> {
        // Coarse SQL cut on staleness; the precise hour test runs in Rust
        // because last_validated is stored as RFC 3339 text.
        let rows = sqlx::query(
            "SELECT url_hash, url, last_modified, etag, last_validated, validation_count,
                    content_changed_count, staleness_score, domain, content_type
             FROM freshness",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut due = Vec::new();
        for row in rows {
            let record = row_to_record(row)?;
            let hours = (now - record.last_validated).num_minutes() as f64 / 60.0;
            if crawl_pipeline_domain::services::staleness::should_revalidate(
                hours,
                record.staleness_score,
                min_fresh_hours,
            ) {
                due.push(record);
            }
        }
        Ok(due)
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<FreshnessRecord, PipelineError> {
    let hash: String = row.get("url_hash");
    let url: String = row.get("url");
    let last_validated: String = row.get("last_validated");
    Ok(FreshnessRecord {
        url_hash: UrlHash::parse(&hash)?,
        url: CanonicalUrl::parse(&url)?,
        last_modified: row.get("last_modified"),
        etag: row.get("etag"),
        last_validated: DateTime::parse_from_rfc3339(&last_validated)
            .map_err(|e| PipelineError::database_error(format!("bad last_validated '{}': {}", last_validated, e)))?
            .with_timezone(&Utc),
        validation_count: row.get::<i64, _>("validation_count") as u64,
        content_changed_count: row.get::<i64, _>("content_changed_count") as u64,
        staleness_score: row.get("staleness_score"),
        domain: row.get("domain"),
        content_type: row.get("content_type"),
    })
}

fn db_err(e: sqlx::Error) -> PipelineError {
    PipelineError::database_error(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::infrastructure::repositories::schema::test_pool;

    fn record(path: &str, changed: u64, validations: u64) -> FreshnessRecord {
        let url = CanonicalUrl::parse(&format!("https://u.example{}", path)).unwrap();
        let mut rec = FreshnessRecord::first_observation(
            url,
            Some("Mon, 06 Jul 2026 08:00:00 GMT".to_string()),
            Some("\"v1\"".to_string()),
            Some("text/html".to_string()),
            Utc::now(),
        );
        rec.validation_count = validations;
        rec.content_changed_count = changed;
        rec
    }

    #[tokio::test]
    async fn test_upsert_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteFreshnessRepository::new(test_pool(dir.path(), "fresh.db").await)
            .await
            .unwrap();
        let rec = record("/news", 1, 3);
        repo.upsert(&rec).await.unwrap();

        let loaded = repo.get(&rec.url_hash).await.unwrap().unwrap();
        assert_eq!(loaded.validation_count, 3);
        assert_eq!(loaded.content_changed_count, 1);
        assert_eq!(loaded.etag.as_deref(), Some("\"v1\""));
        assert_eq!(loaded.domain, "u.example");
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteFreshnessRepository::new(test_pool(dir.path(), "fresh.db").await)
            .await
            .unwrap();
        let mut rec = record("/a", 0, 1);
        repo.upsert(&rec).await.unwrap();
        rec.observe(None, Some("\"v2\"".to_string()), None, Utc::now());
        repo.upsert(&rec).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let loaded = repo.get(&rec.url_hash).await.unwrap().unwrap();
        assert_eq!(loaded.validation_count, 2);
        assert_eq!(loaded.content_changed_count, 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteFreshnessRepository::new(test_pool(dir.path(), "fresh.db").await)
            .await
            .unwrap();
        let hash = CanonicalUrl::parse("https://u.example/ghost").unwrap().url_hash();
        assert!(repo.get(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_domain_churn_rates() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteFreshnessRepository::new(test_pool(dir.path(), "fresh.db").await)
            .await
            .unwrap();
        repo.upsert(&record("/a", 1, 4)).await.unwrap();
        repo.upsert(&record("/b", 3, 4)).await.unwrap();

        let rates = repo.domain_churn_rates().await.unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].0, "u.example");
        assert!((rates[0].1 - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stale_candidates_policy() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteFreshnessRepository::new(test_pool(dir.path(), "fresh.db").await)
            .await
            .unwrap();

        // Fresh and stable: not due.
        let fresh = record("/stable", 0, 5);
        repo.upsert(&fresh).await.unwrap();
        // High staleness estimate: due regardless of age.
        let mut churny = record("/volatile", 4, 5);
        churny.staleness_score = 0.9;
        repo.upsert(&churny).await.unwrap();

        let due = repo.stale_candidates(24.0, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].url_hash, churny.url_hash);

        // Everything is due once enough hours pass.
        let later = Utc::now() + chrono::Duration::hours(25);
        let due = repo.stale_candidates(24.0, later).await.unwrap();
        assert_eq!(due.len(), 2);
    }
}
