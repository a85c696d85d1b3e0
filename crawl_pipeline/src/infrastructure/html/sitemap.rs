// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Sitemap and robots.txt Parsing
//!
//! Seed-expansion inputs for discovery: `<loc>` entries from sitemap.xml
//! and the listed (even if disallowed) paths plus sitemap pointers from
//! robots.txt. Listing in robots.txt is treated as evidence a URL exists,
//! which is exactly what a discovery stage wants; politeness filtering is
//! a separate concern.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static LOC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<loc>\s*([^<]+?)\s*</loc>").expect("static regex"));

/// Extracts `<loc>` URLs from a sitemap or sitemap-index document.
pub fn parse_sitemap(xml: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(xml)
        .map(|capture| capture[1].trim().to_string())
        .collect()
}

/// Paths and sitemap pointers surfaced by robots.txt.
#[derive(Debug, Clone, Default)]
pub struct RobotsInfo {
    pub sitemaps: Vec<String>,
    /// Allow/Disallow path entries, resolved against the site root.
    pub listed_urls: Vec<Url>,
}

/// Parses robots.txt for sitemap pointers and listed paths.
pub fn parse_robots(body: &str, site_root: &Url) -> RobotsInfo {
    let mut info = RobotsInfo::default();
    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((directive, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match directive.trim().to_ascii_lowercase().as_str() {
            "sitemap" => {
                if !value.is_empty() {
                    info.sitemaps.push(value.to_string());
                }
            }
            "allow" | "disallow" => {
                // Bare "/" or empty values carry no discovery signal, and
                // wildcard patterns are rules rather than concrete paths.
                if value.len() > 1 && value.starts_with('/') && !value.contains('*') && !value.contains('$') {
                    if let Ok(url) = site_root.join(value) {
                        info.listed_urls.push(url);
                    }
                }
            }
            _ => {}
        }
    }
    info
}
