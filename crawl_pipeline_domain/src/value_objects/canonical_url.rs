// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Canonical URL Value Object
//!
//! Deterministic URL normalization. The canonical form is the input to the
//! SHA-256 `url_hash` that binds records together across all three stages,
//! so the rules here are part of the data contract:
//!
//! - scheme and host lowercased
//! - default ports (80/443) stripped
//! - fragment removed
//! - query keys sorted (stable; duplicate keys keep their relative order)
//! - trailing slash removed from non-root paths
//!
//! Canonicalization is idempotent: `canonical(canonical(u)) == canonical(u)`.
//! Only `http` and `https` URLs are representable; everything else is
//! rejected at parse time, which is how non-HTTP schemes get dropped during
//! discovery filtering.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PipelineError;
use crate::value_objects::url_hash::UrlHash;

/// A URL in canonical form.
///
/// Construction goes through [`CanonicalUrl::parse`], which applies the
/// normalization rules; the wrapped string is always the canonical
/// serialization. Equality and hashing therefore compare canonical forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    /// Parses and canonicalizes a raw URL string.
    ///
    /// Relative URLs are not accepted here; resolve them against a base
    /// first (the discovery extractor does this with `Url::join`).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InputError`] when the string is not an
    /// absolute `http`/`https` URL.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| PipelineError::input_error(format!("invalid URL '{}': {}", raw, e)))?;
        Self::from_url(url)
    }

    /// Canonicalizes an already-parsed URL.
    pub fn from_url(mut url: Url) -> Result<Self, PipelineError> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(PipelineError::input_error(format!(
                    "unsupported scheme '{}' (only http/https)",
                    other
                )));
            }
        }
        if url.host_str().is_none() {
            return Err(PipelineError::input_error(format!("URL has no host: {}", url)));
        }

        // The url crate already lowercases scheme and host and drops default
        // ports during parsing; the remaining rules are ours.
        url.set_fragment(None);

        let sorted_query = Self::sorted_query(&url);
        url.set_query(sorted_query.as_deref());

        let path = url.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/').to_string();
            url.set_path(&trimmed);
        }

        Ok(Self(url.to_string()))
    }

    /// Re-serializes the query with keys sorted. Returns `None` for an empty
    /// or absent query so `?` never survives canonicalization alone.
    fn sorted_query(url: &Url) -> Option<String> {
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        // Stable sort: duplicate keys keep their original value order.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        Some(serializer.finish())
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 hash of the canonical form; the pipeline-wide primary key.
    pub fn url_hash(&self) -> UrlHash {
        UrlHash::of(self)
    }

    /// Lowercased host component.
    pub fn host(&self) -> String {
        // Parsing the canonical form back cannot fail.
        Url::parse(&self.0)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Number of non-empty path segments, used by the URL-depth penalty of
    /// the importance score.
    pub fn path_segment_count(&self) -> usize {
        Url::parse(&self.0)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .map(|segments| segments.filter(|s| !s.is_empty()).count())
            })
            .unwrap_or(0)
    }

    /// Lowercased file extension of the final path segment, if any.
    pub fn extension(&self) -> Option<String> {
        let url = Url::parse(&self.0).ok()?;
        let last = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
        let (_, ext) = last.rsplit_once('.')?;
        if ext.is_empty() || ext.len() > 8 {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Domain membership test.
    ///
    /// With `strict_host` the host must match `allowed_domain` exactly;
    /// otherwise sub-domains of the registered domain also count
    /// (`www.u.example` belongs to `u.example`).
    pub fn is_same_domain(&self, allowed_domain: &str, strict_host: bool) -> bool {
        let host = self.host();
        let allowed = allowed_domain.to_ascii_lowercase();
        if strict_host {
            host == allowed
        } else {
            host == allowed || host.ends_with(&format!(".{}", allowed))
        }
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
