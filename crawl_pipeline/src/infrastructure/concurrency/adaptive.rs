// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Adaptive Concurrency Controller
//!
//! AIMD-style admission control for in-flight request count. Every request
//! holds a semaphore permit; the controller resizes the permit pool from a
//! 5-second window of completion samples:
//!
//! - window success rate ≥ target (0.95) AND p50 latency ≤ target:
//!   **additive increase** by +2, capped at `max_concurrency`
//! - otherwise: **multiplicative decrease** ×0.5, floored at
//!   `min_concurrency`
//!
//! Growing the pool is `add_permits`; shrinking records a deficit that the
//! acquire path pays down by swallowing permits as they free up, so the
//! invariant `min ≤ current ≤ max` holds immediately while in-flight work
//! drains naturally.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crawl_pipeline_domain::PipelineError;

/// Controller tuning; defaults follow the stage configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub initial_concurrency: usize,
    /// Window success rate required to grow.
    pub target_success_rate: f64,
    /// Window p50 latency required to grow.
    pub target_p50_latency: Duration,
    /// Sample window and re-evaluation cadence.
    pub window: Duration,
}

impl ControllerConfig {
    pub fn new(min_concurrency: usize, max_concurrency: usize) -> Self {
        Self {
            min_concurrency,
            max_concurrency,
            initial_concurrency: min_concurrency.max(max_concurrency / 4).min(max_concurrency),
            target_success_rate: 0.95,
            target_p50_latency: Duration::from_millis(2_000),
            window: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CompletionSample {
    at: Instant,
    success: bool,
    latency: Duration,
}

/// Semaphore-backed AIMD controller shared by a stage's request tasks.
pub struct AdaptiveConcurrencyController {
    config: ControllerConfig,
    semaphore: Arc<Semaphore>,
    current: AtomicUsize,
    /// Permits owed back to the pool after a decrease.
    deficit: AtomicUsize,
    samples: Mutex<VecDeque<CompletionSample>>,
    last_adjustment: Mutex<Instant>,
}

impl AdaptiveConcurrencyController {
    pub fn new(config: ControllerConfig) -> Result<Arc<Self>, PipelineError> {
        if config.min_concurrency == 0 || config.min_concurrency > config.max_concurrency {
            return Err(PipelineError::invalid_config(format!(
                "concurrency bounds must satisfy 1 <= min ({}) <= max ({})",
                config.min_concurrency, config.max_concurrency
            )));
        }
        let initial = config
            .initial_concurrency
            .clamp(config.min_concurrency, config.max_concurrency);
        Ok(Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(initial)),
            current: AtomicUsize::new(initial),
            deficit: AtomicUsize::new(0),
            samples: Mutex::new(VecDeque::new()),
            last_adjustment: Mutex::new(Instant::now()),
            config,
        }))
    }

    /// Fixed-size controller (serial when `n == 1`).
    pub fn fixed(n: usize) -> Result<Arc<Self>, PipelineError> {
        let mut config = ControllerConfig::new(n.max(1), n.max(1));
        config.initial_concurrency = n.max(1);
        Self::new(config)
    }

    /// Current admission bound.
    pub fn current_concurrency(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Acquires an admission slot, paying down any shrink deficit first.
    pub async fn acquire(self: &Arc<Self>) -> Result<OwnedSemaphorePermit, PipelineError> {
        loop {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::internal_error("admission semaphore closed"))?;
            // A positive deficit means this permit was already revoked by a
            // multiplicative decrease: swallow it and wait again.
            let outstanding = self.deficit.load(Ordering::SeqCst);
            if outstanding > 0
                && self
                    .deficit
                    .compare_exchange(outstanding, outstanding - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                permit.forget();
                continue;
            }
            return Ok(permit);
        }
    }

    /// Records one request completion for the sample window.
    pub fn record_completion(&self, success: bool, latency: Duration) {
        self.record_completion_at(success, latency, Instant::now());
    }

    fn record_completion_at(&self, success: bool, latency: Duration, at: Instant) {
        let mut samples = self.samples.lock();
        samples.push_back(CompletionSample { at, success, latency });
        // The ring only needs to cover the window; trim opportunistically.
        let horizon = at.checked_sub(self.config.window).unwrap_or(at);
        while samples.front().is_some_and(|s| s.at < horizon) {
            samples.pop_front();
        }
    }

    /// Re-evaluates at most once per window; call from completion paths.
    pub fn maybe_adjust(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_adjustment.lock();
            if now.duration_since(*last) < self.config.window {
                return;
            }
            *last = now;
        }
        self.adjust_now(now);
    }

    fn adjust_now(&self, now: Instant) {
        let (success_rate, p50) = {
            let samples = self.samples.lock();
            let horizon = now.checked_sub(self.config.window).unwrap_or(now);
            let window: Vec<&CompletionSample> = samples.iter().filter(|s| s.at >= horizon).collect();
            if window.is_empty() {
                return;
            }
            let successes = window.iter().filter(|s| s.success).count();
            let mut latencies: Vec<Duration> = window.iter().map(|s| s.latency).collect();
            latencies.sort_unstable();
            (
                successes as f64 / window.len() as f64,
                latencies[latencies.len() / 2],
            )
        };

        let current = self.current.load(Ordering::SeqCst);
        let healthy = success_rate >= self.config.target_success_rate && p50 <= self.config.target_p50_latency;
        let next = if healthy {
            (current + 2).min(self.config.max_concurrency)
        } else {
            (current / 2).max(self.config.min_concurrency)
        };
        if next != current {
            tracing::debug!(
                success_rate,
                p50_ms = p50.as_millis() as u64,
                current,
                next,
                "adaptive concurrency adjustment"
            );
            self.resize(current, next);
        }
    }

    fn resize(&self, current: usize, next: usize) {
        self.current.store(next, Ordering::SeqCst);
        if next > current {
            let grow = next - current;
            // Growth first cancels any outstanding deficit.
            let mut remaining = grow;
            loop {
                let owed = self.deficit.load(Ordering::SeqCst);
                if owed == 0 || remaining == 0 {
                    break;
                }
                let cancel = owed.min(remaining);
                if self
                    .deficit
                    .compare_exchange(owed, owed - cancel, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    remaining -= cancel;
                }
            }
            if remaining > 0 {
                self.semaphore.add_permits(remaining);
            }
        } else {
            let shrink = current - next;
            // Reclaim idle permits immediately; the rest become deficit paid
            // down as in-flight requests complete.
            let reclaimed = match self.semaphore.try_acquire_many(shrink as u32) {
                Ok(permits) => {
                    permits.forget();
                    shrink
                }
                Err(_) => {
                    let mut taken = 0;
                    while taken < shrink {
                        match self.semaphore.try_acquire() {
                            Ok(permit) => {
                                permit.forget();
                                taken += 1;
                            }
                            Err(_) => break,
                        }
                    }
                    taken
                }
            };
            if shrink > reclaimed {
                self.deficit.fetch_add(shrink - reclaimed, Ordering::SeqCst);
            }
        }
    }

    /// Test/diagnostic hook: force one evaluation regardless of cadence.
    pub fn force_adjust(&self) {
        self.adjust_now(Instant::now());
    }
}
