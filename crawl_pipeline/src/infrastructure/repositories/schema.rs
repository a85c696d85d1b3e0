// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! SQLite connection helpers shared by the repository implementations.
//!
//! Each repository bootstraps its own tables with idempotent DDL on open,
//! so integration tests and services always see a consistent database.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crawl_pipeline_domain::PipelineError;

/// Connects to a SQLite database URL, creating the file if missing.
pub async fn connect(database_url: &str) -> Result<SqlitePool, PipelineError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| PipelineError::database_error(format!("bad database url '{}': {}", database_url, e)))?
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| PipelineError::database_error(format!("connect {}: {}", database_url, e)))
}

#[cfg(test)]
pub(crate) async fn test_pool(dir: &std::path::Path, name: &str) -> SqlitePool {
    let url = format!("sqlite://{}", dir.join(name).display());
    connect(&url).await.unwrap()
}
