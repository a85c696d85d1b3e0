// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Configuration management for the pipeline.
//!
//! One hierarchical YAML document per environment profile, strictly
//! validated at startup (unknown keys rejected, ranges checked, cross-field
//! consistency enforced). Validation failure exits before any side effect.

pub mod settings;

pub use settings::{AppConfig, LogFormat, SinkBackend};
