// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Retry policy behavior at the HTTP seam: transient 5xx answers are
//! retried with backoff until they succeed, non-retryable 4xx are not,
//! and transport failures surface as status-0 records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crawl_pipeline::infrastructure::http::client::{HttpFetcher, HttpFetcherConfig};
use crawl_pipeline_domain::CanonicalUrl;

use super::common::{Route, TestServer};

fn fetcher(max_retries: u32) -> Arc<HttpFetcher> {
    Arc::new(
        HttpFetcher::new(HttpFetcherConfig {
            timeout: Duration::from_secs(30),
            max_retries,
            ..Default::default()
        })
        .unwrap(),
    )
}

fn accepts_html(status: u16, content_type: Option<&str>) -> bool {
    (200..300).contains(&status) && content_type.is_some_and(|ct| ct.starts_with("text/html"))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transient_503_retried_to_success() {
    let mut routes = HashMap::new();
    // 503 three times, then 200 (each probe attempt issues HEAD, and GET
    // when HEAD was not sufficient).
    routes.insert(
        "/flaky".to_string(),
        Route::html("<html><body>finally up</body></html>").failing_first(3),
    );
    let server = TestServer::start(routes).await;

    let url = CanonicalUrl::parse(&server.url("/flaky")).unwrap();
    let started = std::time::Instant::now();
    let outcome = fetcher(2).probe(&url, accepts_html).await.unwrap();

    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(server.hits("/flaky"), 4);
    // Cumulative wall time includes the backoff sleep (base 1s, ±20%).
    assert!(started.elapsed() >= Duration::from_millis(700), "{:?}", started.elapsed());
    assert!(outcome.response_time_ms >= 700);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_exhaustion_reports_final_status() {
    let mut routes = HashMap::new();
    routes.insert(
        "/down".to_string(),
        Route::html("<html></html>").failing_first(10),
    );
    let server = TestServer::start(routes).await;

    let url = CanonicalUrl::parse(&server.url("/down")).unwrap();
    let error = fetcher(1).probe(&url, accepts_html).await.unwrap_err();

    match error {
        crawl_pipeline_domain::PipelineError::ProtocolError { status, .. } => assert_eq!(status, 503),
        other => panic!("expected protocol error, got {}", other),
    }
    // Two probe attempts (initial + 1 retry), each HEAD then GET.
    assert_eq!(server.hits("/down"), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_404_is_not_retried() {
    let routes = HashMap::new();
    let server = TestServer::start(routes).await;

    let url = CanonicalUrl::parse(&server.url("/missing")).unwrap();
    let outcome = fetcher(3).probe(&url, accepts_html).await.unwrap();

    assert_eq!(outcome.status, 404);
    // HEAD answers 404, then one GET for the authoritative pass: no
    // further retries.
    assert_eq!(server.hits("/missing"), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connection_refused_is_transport_error() {
    // Nothing listens on port 9 of localhost.
    let url = CanonicalUrl::parse("http://127.0.0.1:9/dead").unwrap();
    let error = fetcher(0).probe(&url, accepts_html).await.unwrap_err();
    assert!(matches!(
        error,
        crawl_pipeline_domain::PipelineError::TransportError(_)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_redirect_chain_recorded() {
    let mut routes = HashMap::new();
    routes.insert(
        "/old".to_string(),
        Route::html("")
            .with_status(301)
            .with_header("Location", "/new"),
    );
    routes.insert(
        "/new".to_string(),
        Route::html("<html><body>moved here</body></html>")
            .with_header("ETag", "\"v7\"")
            .with_header("Last-Modified", "Mon, 06 Jul 2026 08:00:00 GMT"),
    );
    let server = TestServer::start(routes).await;

    let url = CanonicalUrl::parse(&server.url("/old")).unwrap();
    let outcome = fetcher(0).probe(&url, accepts_html).await.unwrap();

    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.redirect_chain.len(), 1);
    assert!(outcome.redirect_chain[0].ends_with("/new"));
    assert_eq!(outcome.etag.as_deref(), Some("\"v7\""));
    assert_eq!(outcome.last_modified.as_deref(), Some("Mon, 06 Jul 2026 08:00:00 GMT"));
}
