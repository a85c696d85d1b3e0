// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # URL Hash Value Object
//!
//! SHA-256 hex digest of a canonical URL. The 64-character lowercase hex
//! string is the primary key that binds a URL's records together across
//! discovery, validation, and enrichment, and keys the link-graph and
//! freshness stores.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;
use crate::value_objects::canonical_url::CanonicalUrl;

/// 64-character lowercase hex SHA-256 digest of a canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UrlHash(String);

impl UrlHash {
    /// Computes the hash of a canonical URL.
    pub fn of(url: &CanonicalUrl) -> Self {
        let digest = Sha256::digest(url.as_str().as_bytes());
        Self(hex::encode(digest))
    }

    /// Validates and wraps an existing digest string.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SchemaViolation`] unless the input is exactly
    /// 64 lowercase hex characters.
    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        if s.len() != 64 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(PipelineError::SchemaViolation(format!(
                "url_hash must be 64 lowercase hex chars, got '{}'",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for UrlHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UrlHash {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UrlHash> for String {
    fn from(hash: UrlHash) -> Self {
        hash.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let url = CanonicalUrl::parse("https://u.example/").unwrap();
        let hash = UrlHash::of(&url);
        assert_eq!(hash.as_str().len(), 64);
        // Deterministic: same canonical form, same digest
        assert_eq!(hash, UrlHash::of(&url));
    }

    #[test]
    fn test_equivalent_urls_share_hash() {
        let a = CanonicalUrl::parse("HTTPS://U.Example:443/a?b=1&a=2#frag").unwrap();
        let b = CanonicalUrl::parse("https://u.example/a?a=2&b=1").unwrap();
        assert_eq!(UrlHash::of(&a), UrlHash::of(&b));
    }

    #[test]
    fn test_parse_rejects_bad_digests() {
        assert!(UrlHash::parse("deadbeef").is_err());
        assert!(UrlHash::parse(&"A".repeat(64)).is_err());
        assert!(UrlHash::parse(&"g".repeat(64)).is_err());
        assert!(UrlHash::parse(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_serde_round_trip() {
        let url = CanonicalUrl::parse("https://u.example/x").unwrap();
        let hash = UrlHash::of(&url);
        let json = serde_json::to_string(&hash).unwrap();
        let back: UrlHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
        // Invalid digests are rejected during deserialization
        assert!(serde_json::from_str::<UrlHash>("\"not-a-hash\"").is_err());
    }
}
