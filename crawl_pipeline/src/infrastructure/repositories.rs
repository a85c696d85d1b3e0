// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Embedded persistence: SQLite-backed link-graph and freshness stores.

pub mod freshness_repository;
pub mod link_graph_repository;
pub mod schema;

pub use freshness_repository::SqliteFreshnessRepository;
pub use link_graph_repository::SqliteLinkGraphRepository;
