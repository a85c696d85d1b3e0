// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain services: stateless scoring functions and the analyzer port.

pub mod analyzer;
pub mod importance;
pub mod priority;
pub mod staleness;

pub use analyzer::{AnalyzerOutput, EnrichmentAnalyzer};
pub use importance::{importance_score, ImportanceSignals};
pub use priority::{validation_priority, PrioritySignals};
pub use staleness::{path_change_heuristic, should_revalidate, staleness_score, StalenessInputs};
