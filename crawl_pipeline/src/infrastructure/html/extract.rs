// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Page Extraction
//!
//! Two consumers share this module: discovery pulls candidate URLs out of
//! every fetched page (anchors, forms, `data-*` attributes, inline JSON in
//! script text, generated pagination), and enrichment pulls the title and
//! main-content text with navigation chrome stripped.
//!
//! Relative URLs are resolved against the page URL here; canonicalization
//! and domain filtering stay with the discovery runner.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crawl_pipeline_domain::records::discovery::DiscoverySource;

/// Bounded number of inline-JSON URL matches taken per page.
const MAX_INLINE_JSON_URLS: usize = 50;

static ABSOLUTE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>\\]+"#).expect("static regex"));
static QUOTED_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(/[A-Za-z0-9_\-./]+(?:\?[A-Za-z0-9_\-=&%.]*)?)""#).expect("static regex"));

/// One candidate URL found on a page, before canonicalization/filtering.
#[derive(Debug, Clone)]
pub struct CandidateLink {
    pub url: Url,
    pub source: DiscoverySource,
    pub anchor_text: Option<String>,
}

/// Extracted title and main-content text for enrichment.
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub title: Option<String>,
    pub text: String,
}

fn selector(css: &str) -> Selector {
    // Selectors in this module are static strings; parse cannot fail.
    #[allow(clippy::expect_used)]
    Selector::parse(css).expect("static CSS selector")
}

/// Pulls every candidate URL out of a page.
pub fn extract_candidates(html: &str, page_url: &Url, pagination_probe_limit: u32) -> Vec<CandidateLink> {
    let document = Html::parse_document(html);
    let mut candidates = Vec::new();

    // <a href> links with anchor text
    for element in document.select(&selector("a[href]")) {
        if let Some(href) = element.value().attr("href") {
            if let Some(url) = resolve(page_url, href) {
                let text = element.text().collect::<Vec<_>>().join(" ");
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                candidates.push(CandidateLink {
                    url,
                    source: DiscoverySource::Link,
                    anchor_text: (!text.is_empty()).then_some(text),
                });
            }
        }
    }

    // <form action>
    for element in document.select(&selector("form[action]")) {
        if let Some(action) = element.value().attr("action") {
            if let Some(url) = resolve(page_url, action) {
                candidates.push(CandidateLink {
                    url,
                    source: DiscoverySource::Form,
                    anchor_text: None,
                });
            }
        }
    }

    // data-* attributes whose values look like URLs or root-relative paths
    for element in document.select(&selector("*")) {
        for (name, value) in element.value().attrs() {
            if !name.starts_with("data-") {
                continue;
            }
            let looks_like_url = value.starts_with("http://") || value.starts_with("https://");
            let looks_like_path = value.starts_with('/') && value.len() > 1 && !value.starts_with("//");
            if looks_like_url || looks_like_path {
                if let Some(url) = resolve(page_url, value) {
                    candidates.push(CandidateLink {
                        url,
                        source: DiscoverySource::DataAttribute,
                        anchor_text: None,
                    });
                }
            }
        }
    }

    // Inline JSON: URL-shaped strings inside script text
    let mut inline_count = 0;
    for element in document.select(&selector("script")) {
        let text: String = element.text().collect();
        if text.trim().is_empty() {
            continue;
        }
        for m in ABSOLUTE_URL_RE.find_iter(&text) {
            if inline_count >= MAX_INLINE_JSON_URLS {
                break;
            }
            if let Some(url) = resolve(page_url, m.as_str().trim_end_matches(['"', '\'', ',', ')'])) {
                candidates.push(CandidateLink {
                    url,
                    source: DiscoverySource::InlineJson,
                    anchor_text: None,
                });
                inline_count += 1;
            }
        }
        for capture in QUOTED_PATH_RE.captures_iter(&text) {
            if inline_count >= MAX_INLINE_JSON_URLS {
                break;
            }
            if let Some(url) = resolve(page_url, &capture[1]) {
                candidates.push(CandidateLink {
                    url,
                    source: DiscoverySource::InlineJson,
                    anchor_text: None,
                });
                inline_count += 1;
            }
        }
    }

    // Generated pagination for list-shaped endpoints
    candidates.extend(pagination_probes(page_url, pagination_probe_limit));

    candidates
}

/// `?page=N` probes for URLs matching the list-endpoint heuristic.
fn pagination_probes(page_url: &Url, limit: u32) -> Vec<CandidateLink> {
    if limit == 0 || !is_list_endpoint(page_url) {
        return Vec::new();
    }
    let mut probes = Vec::new();
    for page in 2..=limit {
        let mut url = page_url.clone();
        let others: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &others {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("page", &page.to_string());
        }
        probes.push(CandidateLink {
            url,
            source: DiscoverySource::Pagination,
            anchor_text: None,
        });
    }
    probes
}

fn is_list_endpoint(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    const LIST_MARKERS: [&str; 6] = ["/news", "/events", "/blog", "/archive", "/directory", "/list"];
    LIST_MARKERS.iter().any(|m| path.contains(m)) || url.query_pairs().any(|(k, _)| k == "page")
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    base.join(href).ok()
}

/// Extracts title and main-content text for enrichment.
///
/// Navigation, footer, header, sidebar, and elements with
/// role=navigation/menu/banner are excluded; `max_text_length` caps the
/// result on a char boundary.
pub fn extract_main_content(html: &str, max_text_length: usize) -> PageContent {
    let document = Html::parse_document(html);

    let title = document.select(&selector("title")).next().map(|el| {
        el.text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    });

    // Prefer an explicit content region, fall back to body.
    let mut text = String::new();
    for css in ["main", "article", "#content", ".content", "body"] {
        if let Some(element) = document.select(&selector(css)).next() {
            text = visible_text(&element);
            if !text.trim().is_empty() {
                break;
            }
        }
    }

    let mut text = clean_text(&text);
    if text.len() > max_text_length {
        let mut cut = max_text_length;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }

    PageContent { title, text }
}

/// Walks an element collecting text, skipping chrome and non-content tags.
fn visible_text(element: &ElementRef<'_>) -> String {
    use ego_tree::iter::Edge;

    let mut chunks: Vec<&str> = Vec::new();
    let mut skip_depth = 0usize;

    for edge in element.traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                scraper::Node::Element(el) => {
                    if is_excluded_element(el) {
                        skip_depth += 1;
                    }
                }
                scraper::Node::Text(text) => {
                    if skip_depth == 0 {
                        chunks.push(text);
                    }
                }
                _ => {}
            },
            Edge::Close(node) => {
                if let scraper::Node::Element(el) = node.value() {
                    if is_excluded_element(el) && skip_depth > 0 {
                        skip_depth -= 1;
                    }
                }
            }
        }
    }

    chunks.join(" ")
}

fn is_excluded_element(el: &scraper::node::Element) -> bool {
    if matches!(
        el.name(),
        "script" | "style" | "noscript" | "nav" | "footer" | "header" | "aside"
    ) {
        return true;
    }
    matches!(el.attr("role"), Some("navigation") | Some("menu") | Some("banner"))
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extension scan for auxiliary PDF and audio links.
pub fn detect_auxiliary_links(html: &str, page_url: &Url) -> (bool, bool) {
    const AUDIO_EXTENSIONS: [&str; 5] = [".mp3", ".wav", ".ogg", ".m4a", ".aac"];

    let document = Html::parse_document(html);
    let mut has_pdf = false;
    let mut has_audio = false;

    for element in document.select(&selector("a[href], audio[src], source[src]")) {
        let attr = element.value().attr("href").or_else(|| element.value().attr("src"));
        let Some(target) = attr.and_then(|href| resolve(page_url, href)) else {
            continue;
        };
        let path = target.path().to_ascii_lowercase();
        if path.ends_with(".pdf") {
            has_pdf = true;
        }
        if AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            has_audio = true;
        }
        if has_pdf && has_audio {
            break;
        }
    }

    (has_pdf, has_audio)
}
