// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Minimal HTTP test server for integration tests: fixed routes, per-path
//! hit counting, and optional transient-failure injection (the first N
//! hits of a route answer 503).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub content_type: String,
    pub body: String,
    pub extra_headers: Vec<(String, String)>,
    /// The first N hits answer 503 before the real response.
    pub fail_first: u32,
}

#[allow(dead_code)]
impl Route {
    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8".to_string(),
            body: body.to_string(),
            extra_headers: Vec::new(),
            fail_first: 0,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn failing_first(mut self, times: u32) -> Self {
        self.fail_first = times;
        self
    }
}

pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, u32>>>,
}

#[allow(dead_code)]
impl TestServer {
    /// Binds an ephemeral port and serves `routes` (keyed by path with
    /// query, e.g. `/news?page=2`). Unknown paths answer 404.
    pub async fn start(routes: HashMap<String, Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let routes = Arc::new(routes);
        let hits: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(HashMap::new()));

        let accept_hits = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let hits = accept_hits.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, routes, hits).await;
                });
            }
        });

        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self, path: &str) -> u32 {
        self.hits.lock().get(path).copied().unwrap_or(0)
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    routes: Arc<HashMap<String, Route>>,
    hits: Arc<Mutex<HashMap<String, u32>>>,
) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buffer.len() > 64 * 1024 {
            return Ok(());
        }
    }

    let request = String::from_utf8_lossy(&buffer);
    let mut parts = request.split_whitespace();
    let method = parts.next().unwrap_or("GET").to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let hit_count = {
        let mut hits = hits.lock();
        let count = hits.entry(target.clone()).or_insert(0);
        *count += 1;
        *count
    };

    let response = match routes.get(&target) {
        Some(route) if hit_count <= route.fail_first => {
            render(503, "text/plain", "try later", &[], &method)
        }
        Some(route) => render(
            route.status,
            &route.content_type,
            &route.body,
            &route.extra_headers,
            &method,
        ),
        None => render(404, "text/plain", "not found", &[], &method),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn render(status: u16, content_type: &str, body: &str, extra: &[(String, String)], method: &str) -> String {
    let reason = match status {
        200 => "OK",
        301 => "Moved Permanently",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        reason,
        content_type,
        body.len()
    );
    for (name, value) in extra {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("\r\n");
    if method != "HEAD" {
        response.push_str(body);
    }
    response
}
