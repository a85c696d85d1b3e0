// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Enrichment analysis: the bundled rule-based analyzer and the off-loop
//! execution bridge.

pub mod keyword_analyzer;

pub use keyword_analyzer::{analyze_off_loop, KeywordAnalyzer};
