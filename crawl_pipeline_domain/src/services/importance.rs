// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Importance Scoring
//!
//! Discovery-time importance of a URL: a fixed convex combination of five
//! signals, weights summing to 1.0. The score feeds the stage-2 priority
//! queue, so two discoveries of the same page from different sources can
//! legitimately carry different scores; the first one emitted wins
//! (deduplication happens upstream by url_hash).

use crate::records::discovery::DiscoverySource;

const WEIGHT_CONFIDENCE: f64 = 0.30;
const WEIGHT_ANCHOR: f64 = 0.20;
const WEIGHT_SAME_DOMAIN: f64 = 0.15;
const WEIGHT_DEPTH_PENALTY: f64 = 0.15;
const WEIGHT_SOURCE_PRIORITY: f64 = 0.20;

/// Anchor-text quality when no high-value keyword matches.
const ANCHOR_BASELINE: f64 = 0.3;

/// The five signals observed for one discovered edge.
#[derive(Debug, Clone)]
pub struct ImportanceSignals<'a> {
    pub source: DiscoverySource,
    pub anchor_text: Option<&'a str>,
    pub is_same_domain: bool,
    /// Non-empty path segments of the discovered URL.
    pub path_segments: usize,
}

/// Computes the importance score in [0,1].
///
/// `high_value_keywords` is the configurable anchor-quality set; matching is
/// case-insensitive substring.
pub fn importance_score(signals: &ImportanceSignals<'_>, high_value_keywords: &[String]) -> f64 {
    let confidence = signals.source.reliability();

    let anchor_quality = match signals.anchor_text {
        Some(text) if contains_high_value_keyword(text, high_value_keywords) => 1.0,
        _ => ANCHOR_BASELINE,
    };

    let same_domain = if signals.is_same_domain { 1.0 } else { 0.0 };
    let depth_penalty = 1.0 / (1.0 + signals.path_segments as f64);
    let source_priority = signals.source.reliability();

    WEIGHT_CONFIDENCE * confidence
        + WEIGHT_ANCHOR * anchor_quality
        + WEIGHT_SAME_DOMAIN * same_domain
        + WEIGHT_DEPTH_PENALTY * depth_penalty
        + WEIGHT_SOURCE_PRIORITY * source_priority
}

fn contains_high_value_keyword(anchor: &str, keywords: &[String]) -> bool {
    let lowered = anchor.to_lowercase();
    keywords.iter().any(|kw| lowered.contains(&kw.to_lowercase()))
}
