// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # HTTP Fetcher
//!
//! Thin capability over `reqwest` shared by the discovery, validation, and
//! enrichment stages. The seam exists so transport failures surface as
//! normalized [`PipelineError`] classes the retry policy can reason about,
//! rather than leaking client-library error types into the stages.
//!
//! Behavior:
//!
//! - redirects are followed manually so the chain can be recorded, bounded
//!   by `max_redirects`
//! - one per-request timeout wraps the whole HEAD+GET sequence; response
//!   time is measured with the monotonic clock
//! - transient failures (transport, 5xx, 408, 429) retry up to
//!   `max_retries` with exponential backoff: base 1s, factor 2, jitter
//!   ±20%, capped at 30s
//! - per-host admission is capped by a semaphore map on top of the shared
//!   connection pool
//! - Content-Length is taken from the header only when well-formed and at
//!   most the sanity cap; otherwise the streamed byte count is observed.
//!   A value is never fabricated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use reqwest::header;
use tokio::sync::Semaphore;
use url::Url;

use crawl_pipeline_domain::{CanonicalUrl, PipelineError};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: u32 = 2;
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const BACKOFF_JITTER: f64 = 0.2;

/// Fetcher tuning shared by a stage.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Wraps the entire HEAD+GET sequence for one URL.
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_redirects: usize,
    /// Per-host in-flight request cap.
    pub per_host_connections: usize,
    /// Idle connections kept pooled per host (2 × stage concurrency).
    pub pool_size: usize,
    /// Streamed-body sanity cap in bytes.
    pub body_cap: u64,
    pub user_agent: String,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            max_redirects: 5,
            per_host_connections: 8,
            pool_size: 64,
            body_cap: 50 * 1024 * 1024,
            user_agent: concat!("crawl-pipeline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Result of the HEAD/GET validation probe for one URL.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Final status after redirects.
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub redirect_chain: Vec<String>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub cache_control: Option<String>,
    /// Cumulative wall time including retries, monotonic clock.
    pub response_time_ms: u64,
    pub attempts: u32,
}

/// A fetched response body (enrichment and discovery page fetches).
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub final_url: CanonicalUrl,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub response_time_ms: u64,
}

/// Shared HTTP capability with per-host admission caps.
pub struct HttpFetcher {
    client: reqwest::Client,
    config: HttpFetcherConfig,
    host_slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(config.pool_size)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::internal_error(format!("http client build: {}", e)))?;
        Ok(Self {
            client,
            config,
            host_slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &HttpFetcherConfig {
        &self.config
    }

    fn host_slot(&self, host: &str) -> Arc<Semaphore> {
        self.host_slots
            .lock()
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_host_connections)))
            .clone()
    }

    /// Validation probe: HEAD, falling back to GET when HEAD is not enough.
    ///
    /// `head_sufficient` decides whether a HEAD response settles the URL
    /// (200-series with an acceptable content type); anything else repeats
    /// as GET so the status is authoritative and the byte count observable.
    pub async fn probe(
        &self,
        url: &CanonicalUrl,
        head_sufficient: impl Fn(u16, Option<&str>) -> bool,
    ) -> Result<ProbeOutcome, PipelineError> {
        let started = Instant::now();
        let host = url.host();
        let slot = self.host_slot(&host);
        let _permit = slot
            .acquire()
            .await
            .map_err(|_| PipelineError::internal_error("per-host semaphore closed"))?;

        let mut attempts = 0u32;
        let result = tokio::time::timeout(self.config.timeout, async {
            loop {
                attempts += 1;
                match self.probe_once(url, &head_sufficient).await {
                    Ok(outcome) => return Ok(outcome),
                    Err(e) if e.is_recoverable() && attempts <= self.config.max_retries => {
                        let delay = backoff_delay(attempts - 1);
                        tracing::debug!(url = %url, attempt = attempts, ?delay, error = %e, "retrying probe");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(mut outcome)) => {
                outcome.response_time_ms = elapsed;
                outcome.attempts = attempts;
                Ok(outcome)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PipelineError::TimeoutError(format!(
                "probe of {} exceeded {:?}",
                url, self.config.timeout
            ))),
        }
    }

    async fn probe_once(
        &self,
        url: &CanonicalUrl,
        head_sufficient: &impl Fn(u16, Option<&str>) -> bool,
    ) -> Result<ProbeOutcome, PipelineError> {
        // 1. HEAD through the redirect chain.
        let head = self.follow_redirects(reqwest::Method::HEAD, url).await?;
        let status = head.response.status().as_u16();
        let content_type = header_str(&head.response, header::CONTENT_TYPE);

        if (200..300).contains(&status) && head_sufficient(status, content_type.as_deref()) {
            let outcome = self.outcome_from_response(head, None)?;
            return check_retryable_status(outcome);
        }

        // 2. GET for an authoritative answer (and an observable body).
        let get = self.follow_redirects(reqwest::Method::GET, url).await?;
        let header_length = content_length_from_header(&get.response, self.config.body_cap);
        let outcome = if header_length.is_some() {
            self.outcome_from_response(get, header_length)?
        } else {
            // Fall back to counting streamed bytes, bounded by the cap.
            let chain = get.chain.clone();
            let response = get.response;
            let status = response.status().as_u16();
            let content_type = header_str(&response, header::CONTENT_TYPE);
            let last_modified = header_str(&response, header::LAST_MODIFIED);
            let etag = header_str(&response, header::ETAG);
            let cache_control = header_str(&response, header::CACHE_CONTROL);
            let observed = self.count_body_bytes(response).await?;
            ProbeOutcome {
                status,
                content_type,
                content_length: observed,
                redirect_chain: chain,
                last_modified,
                etag,
                cache_control,
                response_time_ms: 0,
                attempts: 0,
            }
        };
        check_retryable_status(outcome)
    }

    fn outcome_from_response(
        &self,
        followed: FollowedResponse,
        content_length: Option<u64>,
    ) -> Result<ProbeOutcome, PipelineError> {
        let response = followed.response;
        let content_length =
            content_length.or_else(|| content_length_from_header(&response, self.config.body_cap));
        Ok(ProbeOutcome {
            status: response.status().as_u16(),
            content_type: header_str(&response, header::CONTENT_TYPE),
            content_length,
            redirect_chain: followed.chain,
            last_modified: header_str(&response, header::LAST_MODIFIED),
            etag: header_str(&response, header::ETAG),
            cache_control: header_str(&response, header::CACHE_CONTROL),
            response_time_ms: 0,
            attempts: 0,
        })
    }

    async fn count_body_bytes(&self, mut response: reqwest::Response) -> Result<Option<u64>, PipelineError> {
        let mut total = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(normalize_error)? {
            total += chunk.len() as u64;
            if total >= self.config.body_cap {
                break;
            }
        }
        Ok(Some(total))
    }

    /// GET a page body as text, with the same retry/backoff/timeout model.
    pub async fn fetch_text(&self, url: &CanonicalUrl) -> Result<FetchedBody, PipelineError> {
        let started = Instant::now();
        let host = url.host();
        let slot = self.host_slot(&host);
        let _permit = slot
            .acquire()
            .await
            .map_err(|_| PipelineError::internal_error("per-host semaphore closed"))?;

        let mut attempts = 0u32;
        let result = tokio::time::timeout(self.config.timeout, async {
            loop {
                attempts += 1;
                match self.fetch_text_once(url).await {
                    Ok(body) => return Ok(body),
                    Err(e) if e.is_recoverable() && attempts <= self.config.max_retries => {
                        let delay = backoff_delay(attempts - 1);
                        tracing::debug!(url = %url, attempt = attempts, ?delay, error = %e, "retrying fetch");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(mut body)) => {
                body.response_time_ms = elapsed;
                Ok(body)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PipelineError::TimeoutError(format!(
                "fetch of {} exceeded {:?}",
                url, self.config.timeout
            ))),
        }
    }

    async fn fetch_text_once(&self, url: &CanonicalUrl) -> Result<FetchedBody, PipelineError> {
        let followed = self.follow_redirects(reqwest::Method::GET, url).await?;
        let response = followed.response;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(PipelineError::protocol_error(status, format!("GET {}", url)));
        }
        let final_url = CanonicalUrl::parse(response.url().as_str())?;
        let content_type = header_str(&response, header::CONTENT_TYPE);

        // Stream up to the cap rather than buffering unbounded bodies.
        let mut bytes: Vec<u8> = Vec::new();
        let mut response = response;
        while let Some(chunk) = response.chunk().await.map_err(normalize_error)? {
            let remaining = self.config.body_cap as usize - bytes.len();
            if chunk.len() >= remaining {
                bytes.extend_from_slice(&chunk[..remaining]);
                break;
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        Ok(FetchedBody {
            final_url,
            status,
            content_type,
            body,
            response_time_ms: 0,
        })
    }

    async fn follow_redirects(
        &self,
        method: reqwest::Method,
        url: &CanonicalUrl,
    ) -> Result<FollowedResponse, PipelineError> {
        let mut current = Url::parse(url.as_str())
            .map_err(|e| PipelineError::internal_error(format!("canonical URL reparse: {}", e)))?;
        let mut chain = Vec::new();

        loop {
            let response = self
                .client
                .request(method.clone(), current.clone())
                .send()
                .await
                .map_err(normalize_error)?;

            let status = response.status();
            if !status.is_redirection() {
                return Ok(FollowedResponse { response, chain });
            }
            if chain.len() >= self.config.max_redirects {
                // Bounded chain: report the last redirect status as final.
                return Ok(FollowedResponse { response, chain });
            }
            let Some(location) = header_str(&response, header::LOCATION) else {
                return Ok(FollowedResponse { response, chain });
            };
            let next = current
                .join(&location)
                .map_err(|e| PipelineError::ParseError(format!("bad Location '{}': {}", location, e)))?;
            chain.push(next.to_string());
            current = next;
        }
    }
}

struct FollowedResponse {
    response: reqwest::Response,
    chain: Vec<String>,
}

/// Retryable statuses become recoverable protocol errors so the retry loop
/// sees them; everything else passes through as a final outcome.
fn check_retryable_status(outcome: ProbeOutcome) -> Result<ProbeOutcome, PipelineError> {
    if outcome.status >= 500 || outcome.status == 408 || outcome.status == 429 {
        return Err(PipelineError::protocol_error(
            outcome.status,
            "transient upstream status",
        ));
    }
    Ok(outcome)
}

fn header_str(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Header governance: well-formed and within the sanity cap, or nothing.
fn content_length_from_header(response: &reqwest::Response, cap: u64) -> Option<u64> {
    let raw = response.headers().get(header::CONTENT_LENGTH)?.to_str().ok()?;
    let value: u64 = raw.trim().parse().ok()?;
    (value <= cap).then_some(value)
}

/// Normalizes reqwest errors into the domain taxonomy at the seam.
fn normalize_error(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::TimeoutError(err.to_string())
    } else if err.is_connect() || err.is_request() {
        PipelineError::transport_error(err.to_string())
    } else if err.is_body() || err.is_decode() {
        PipelineError::ParseError(err.to_string())
    } else {
        PipelineError::transport_error(err.to_string())
    }
}

/// Exponential backoff: base 1s, factor 2, jitter ±20%, capped at 30s.
pub fn backoff_delay(retry: u32) -> Duration {
    let exponential = BACKOFF_BASE.as_millis() as u64 * u64::from(BACKOFF_FACTOR).pow(retry.min(16));
    let capped = exponential.min(BACKOFF_CAP.as_millis() as u64);
    let jitter = rand::rng().random_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    let with_jitter = (capped as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(with_jitter.min(BACKOFF_CAP.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        for _ in 0..50 {
            let d0 = backoff_delay(0);
            let d1 = backoff_delay(1);
            let d5 = backoff_delay(5);
            let d10 = backoff_delay(10);
            // base 1s ±20%
            assert!((800..=1200).contains(&(d0.as_millis() as u64)), "{:?}", d0);
            // 2s ±20%
            assert!((1600..=2400).contains(&(d1.as_millis() as u64)), "{:?}", d1);
            // 32s caps to 30s, jitter may only lower it
            assert!(d5.as_millis() as u64 <= 30_000);
            assert!(d10.as_millis() as u64 <= 30_000);
        }
    }

    #[test]
    fn test_retryable_status_classification() {
        let outcome = |status| ProbeOutcome {
            status,
            content_type: None,
            content_length: None,
            redirect_chain: vec![],
            last_modified: None,
            etag: None,
            cache_control: None,
            response_time_ms: 0,
            attempts: 1,
        };
        assert!(check_retryable_status(outcome(200)).is_ok());
        assert!(check_retryable_status(outcome(404)).is_ok());
        assert!(check_retryable_status(outcome(503)).unwrap_err().is_recoverable());
        assert!(check_retryable_status(outcome(429)).unwrap_err().is_recoverable());
        assert!(check_retryable_status(outcome(408)).unwrap_err().is_recoverable());
    }

    #[tokio::test]
    async fn test_per_host_slots_are_capped() {
        let fetcher = HttpFetcher::new(HttpFetcherConfig {
            per_host_connections: 2,
            ..Default::default()
        })
        .unwrap();
        let slot = fetcher.host_slot("u.example");
        let p1 = slot.clone().acquire_owned().await.unwrap();
        let _p2 = slot.clone().acquire_owned().await.unwrap();
        assert!(slot.try_acquire().is_err());
        drop(p1);
        assert!(slot.try_acquire().is_ok());
        // Distinct hosts get distinct slots.
        let other = fetcher.host_slot("cdn.u.example");
        assert!(other.try_acquire().is_ok());
    }
}
