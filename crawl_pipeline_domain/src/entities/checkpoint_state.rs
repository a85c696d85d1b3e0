// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Checkpoint State
//!
//! Durable progress record for one stage run. The entity owns the status
//! state machine and the counter invariants; persistence (atomic writes,
//! backup fallback, crash detection against the recorded PID) lives in the
//! infrastructure checkpoint store.
//!
//! ## State machine
//!
//! ```text
//! initialized ──start──▶ running ──complete──▶ completed
//!                 │ │
//!                 │ └─pause──▶ paused ──resume──▶ running
//!                 │
//!                 ├─(crash, detected on next load)─▶ recovering ──resume──▶ running
//!                 └─fatal-error──▶ failed
//! ```
//!
//! `completed` and `failed` are terminal; leaving them requires a reset,
//! which creates a new state rather than transitioning the old one.
//!
//! ## Invariants
//!
//! - `processed_items == successful_items + failed_items + skipped_items`
//! - `last_processed_index <= total_items` and monotonically non-decreasing
//! - `input_file_hash` is set once when the run starts and never changes

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::records::schema::SCHEMA_VERSION;
use crate::value_objects::StageId;

/// Maximum error messages retained in the bounded ring.
pub const MAX_ERROR_MESSAGES: usize = 20;

/// Minimum processed items before throughput-derived ETA is defined.
pub const MIN_ITEMS_FOR_ETA: u64 = 10;

/// Lifecycle status of a stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Initialized,
    Running,
    Paused,
    Completed,
    Failed,
    Recovering,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Initialized => "initialized",
            StageStatus::Running => "running",
            StageStatus::Paused => "paused",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Recovering => "recovering",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    fn can_transition_to(&self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Initialized, Running)
                | (Running, Completed)
                | (Running, Paused)
                | (Running, Failed)
                | (Running, Recovering)
                | (Paused, Running)
                | (Paused, Failed)
                | (Recovering, Running)
                | (Recovering, Failed)
        )
    }
}

/// Progress state persisted per stage at `<stage_id>.checkpoint.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointState {
    pub stage_id: StageId,
    pub status: StageStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub successful_items: u64,
    pub failed_items: u64,
    pub skipped_items: u64,
    /// Index of the last durably written item; resume authority.
    pub last_processed_index: u64,
    /// Opaque identifier of the last item (typically its url_hash).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_item: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file_path: Option<String>,
    /// SHA-256 of the input file captured at run start; validated on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file_hash: Option<String>,
    pub error_count: u64,
    /// Bounded ring of recent error messages.
    pub error_messages: VecDeque<String>,
    pub batch_id: String,
    /// PID of the owning process while `running`; used for crash detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub schema_version: u32,
}

impl CheckpointState {
    /// Fresh state in `initialized`, before the stage knows its input.
    pub fn new(stage_id: StageId, batch_id: String, now: DateTime<Utc>) -> Self {
        Self {
            stage_id,
            status: StageStatus::Initialized,
            total_items: 0,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            skipped_items: 0,
            last_processed_index: 0,
            last_processed_item: None,
            start_time: now,
            last_update_time: now,
            input_file_path: None,
            input_file_hash: None,
            error_count: 0,
            error_messages: VecDeque::new(),
            batch_id,
            pid: None,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Transitions `initialized → running`, binding the input identity.
    ///
    /// # Errors
    ///
    /// Fails if called from any status other than `initialized`, or if an
    /// input hash was already bound (it never changes once running).
    pub fn start(
        &mut self,
        total_items: u64,
        input_file_path: Option<String>,
        input_file_hash: Option<String>,
        pid: u32,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.transition(StageStatus::Running, now)?;
        self.total_items = total_items;
        self.input_file_path = input_file_path;
        self.input_file_hash = input_file_hash;
        self.pid = Some(pid);
        self.start_time = now;
        Ok(())
    }

    /// Transitions `paused`/`recovering → running` for a resumed run.
    pub fn resume(&mut self, pid: u32, now: DateTime<Utc>) -> Result<(), PipelineError> {
        self.transition(StageStatus::Running, now)?;
        self.pid = Some(pid);
        Ok(())
    }

    /// Applies a status transition, enforcing the state machine.
    pub fn transition(&mut self, next: StageStatus, now: DateTime<Utc>) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::checkpoint_error(format!(
                "illegal status transition {} -> {} for stage {}",
                self.status.as_str(),
                next.as_str(),
                self.stage_id
            )));
        }
        self.status = next;
        self.last_update_time = now;
        if next.is_terminal() || next == StageStatus::Paused {
            self.pid = None;
        }
        Ok(())
    }

    /// Records one processed item and advances the resume index.
    ///
    /// `index` is the zero-based input position; `last_processed_index`
    /// becomes `index + 1` (the count of durably written items) and may
    /// never move backwards.
    pub fn record_item(
        &mut self,
        index: u64,
        item: impl Into<String>,
        outcome: ItemOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let next_index = index + 1;
        if next_index < self.last_processed_index {
            return Err(PipelineError::checkpoint_error(format!(
                "last_processed_index must be monotonic: {} after {}",
                next_index, self.last_processed_index
            )));
        }
        if next_index > self.total_items {
            return Err(PipelineError::checkpoint_error(format!(
                "index {} beyond total_items {}",
                next_index, self.total_items
            )));
        }
        self.processed_items += 1;
        match outcome {
            ItemOutcome::Success => self.successful_items += 1,
            ItemOutcome::Failure => self.failed_items += 1,
            ItemOutcome::Skipped => self.skipped_items += 1,
        }
        self.last_processed_index = next_index;
        self.last_processed_item = Some(item.into());
        self.last_update_time = now;
        Ok(())
    }

    /// Appends to the bounded error ring and bumps the total error count.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        if self.error_messages.len() == MAX_ERROR_MESSAGES {
            self.error_messages.pop_front();
        }
        self.error_messages.push_back(message.into());
    }

    /// Verifies the counter invariants; used after load and in tests.
    pub fn check_invariants(&self) -> Result<(), PipelineError> {
        if self.processed_items != self.successful_items + self.failed_items + self.skipped_items {
            return Err(PipelineError::checkpoint_error(format!(
                "processed {} != successful {} + failed {} + skipped {}",
                self.processed_items, self.successful_items, self.failed_items, self.skipped_items
            )));
        }
        if self.last_processed_index > self.total_items {
            return Err(PipelineError::checkpoint_error(format!(
                "last_processed_index {} > total_items {}",
                self.last_processed_index, self.total_items
            )));
        }
        Ok(())
    }

    // ---- derived metrics (read-only) ----

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.start_time).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Items per second since the run started.
    pub fn throughput(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = self.elapsed_seconds(now);
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.processed_items as f64 / elapsed
    }

    pub fn success_rate(&self) -> f64 {
        if self.processed_items == 0 {
            return 0.0;
        }
        self.successful_items as f64 / self.processed_items as f64
    }

    /// Estimated seconds to completion; undefined until at least
    /// [`MIN_ITEMS_FOR_ETA`] items have been processed.
    pub fn eta_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        if self.processed_items < MIN_ITEMS_FOR_ETA {
            return None;
        }
        let throughput = self.throughput(now);
        if throughput <= 0.0 {
            return None;
        }
        Some((self.total_items - self.processed_items) as f64 / throughput)
    }

    pub fn completion_ratio(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.processed_items as f64 / self.total_items as f64
    }
}

/// Per-item outcome reported to the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    Failure,
    Skipped,
}
