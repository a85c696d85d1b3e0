// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! HTML parsing: candidate-link extraction and main-content text.

pub mod extract;
pub mod sitemap;

pub use extract::{detect_auxiliary_links, extract_candidates, extract_main_content, CandidateLink, PageContent};
pub use sitemap::{parse_robots, parse_sitemap, RobotsInfo};
