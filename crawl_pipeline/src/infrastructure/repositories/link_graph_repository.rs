// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Link-Graph Repository
//!
//! SQLite persistence for the finalized stage-1 link graph. Written once
//! when discovery completes (full replace inside a transaction), read-only
//! afterwards: stage 2 loads the scores for priority ordering.

use std::collections::HashMap;

use sqlx::{Row, SqlitePool};

use crawl_pipeline_domain::{LinkGraph, LinkGraphNode, PipelineError, UrlHash};

/// Priority-relevant scores for one node, as read back by stage 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeScores {
    pub pagerank: f64,
    pub authority: f64,
    pub in_degree: u64,
}

pub struct SqliteLinkGraphRepository {
    pool: SqlitePool,
}

impl SqliteLinkGraphRepository {
    /// Wraps a pool and bootstraps the tables.
    pub async fn new(pool: SqlitePool) -> Result<Self, PipelineError> {
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nodes (
                url_hash TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                pagerank REAL NOT NULL DEFAULT 0,
                authority REAL NOT NULL DEFAULT 0,
                hub REAL NOT NULL DEFAULT 0,
                in_deg INTEGER NOT NULL DEFAULT 0,
                out_deg INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS edges (
                source_hash TEXT NOT NULL,
                target_hash TEXT NOT NULL,
                depth INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (source_hash, target_hash)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Replaces the persisted graph with the finalized in-memory one.
    pub async fn save_graph(&self, graph: &LinkGraph) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM nodes").execute(&mut *tx).await.map_err(db_err)?;
        sqlx::query("DELETE FROM edges").execute(&mut *tx).await.map_err(db_err)?;

        for node in graph.nodes() {
            sqlx::query(
                "INSERT INTO nodes (url_hash, url, pagerank, authority, hub, in_deg, out_deg)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(node.url_hash.as_str())
            .bind(&node.url)
            .bind(node.pagerank_score)
            .bind(node.authority_score)
            .bind(node.hub_score)
            .bind(node.in_degree as i64)
            .bind(node.out_degree as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        for edge in graph.edges() {
            sqlx::query(
                "INSERT OR REPLACE INTO edges (source_hash, target_hash, depth) VALUES (?, ?, ?)",
            )
            .bind(edge.source_hash.as_str())
            .bind(edge.target_hash.as_str())
            .bind(i64::from(edge.discovery_depth))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "link graph persisted"
        );
        Ok(())
    }

    /// Loads the priority-relevant scores for every node.
    pub async fn load_scores(&self) -> Result<HashMap<UrlHash, NodeScores>, PipelineError> {
        let rows = sqlx::query("SELECT url_hash, pagerank, authority, in_deg FROM nodes")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut scores = HashMap::with_capacity(rows.len());
        for row in rows {
            let hash: String = row.get("url_hash");
            scores.insert(
                UrlHash::parse(&hash)?,
                NodeScores {
                    pagerank: row.get("pagerank"),
                    authority: row.get("authority"),
                    in_degree: row.get::<i64, _>("in_deg") as u64,
                },
            );
        }
        Ok(scores)
    }

    /// Full node rows, for reporting.
    pub async fn load_nodes(&self) -> Result<Vec<LinkGraphNode>, PipelineError> {
        let rows = sqlx::query(
            "SELECT url_hash, url, pagerank, authority, hub, in_deg, out_deg FROM nodes",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let hash: String = row.get("url_hash");
            nodes.push(LinkGraphNode {
                url_hash: UrlHash::parse(&hash)?,
                url: row.get("url"),
                pagerank_score: row.get("pagerank"),
                authority_score: row.get("authority"),
                hub_score: row.get("hub"),
                in_degree: row.get::<i64, _>("in_deg") as u64,
                out_degree: row.get::<i64, _>("out_deg") as u64,
            });
        }
        Ok(nodes)
    }

    pub async fn max_in_degree(&self) -> Result<u64, PipelineError> {
        let row = sqlx::query("SELECT COALESCE(MAX(in_deg), 0) AS max_in FROM nodes")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("max_in") as u64)
    }

    pub async fn node_count(&self) -> Result<u64, PipelineError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM nodes")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    pub async fn edge_count(&self) -> Result<u64, PipelineError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM edges")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

fn db_err(e: sqlx::Error) -> PipelineError {
    PipelineError::database_error(e.to_string())
}
