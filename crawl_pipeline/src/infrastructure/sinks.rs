// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Polymorphic output sinks for enrichment records.

pub mod record_sink;

pub use record_sink::{build_sink, AppendLogSink, OutputSink, RotatingLogSink};
