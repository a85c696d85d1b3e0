// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Runner Contract
//!
//! All three runners follow the same shape: bounded input, output sink,
//! checkpoint handle, error accounting, cancellation token. The shared
//! guarantees:
//!
//! - **at-most-once emission**: an item's record is appended exactly once;
//!   on resume, items with index < `last_processed_index` are skipped
//! - **monotonic index**: `last_processed_index` advances only after the
//!   corresponding records are durably flushed (batch boundary)
//! - **batch ordering**: within a batch, output is written in input order;
//!   across batches only up to the concurrency window
//! - **cancellation**: observed at batch boundaries; pending output is
//!   flushed and a final `paused` checkpoint written
//!
//! This module holds the pieces the runners share; the loops themselves
//! differ enough (BFS frontier vs. indexed streams) that each stage owns
//! its own.

use crawl_pipeline_domain::{CheckpointState, PipelineError, StageStatus};

use crate::infrastructure::checkpoint::store::CheckpointHandle;

/// Items per processing batch; also the flush/ordering boundary.
pub const BATCH_SIZE: usize = 32;

/// Result of one stage run.
#[derive(Debug)]
pub struct StageOutcome {
    pub state: CheckpointState,
    pub records_emitted: u64,
    pub was_cancelled: bool,
}

/// Closes out a run: `paused` on cancellation, `completed` otherwise,
/// `failed` when a fatal error is being propagated.
pub fn finish_run(
    checkpoint: &mut CheckpointHandle,
    cancelled: bool,
    fatal: Option<&PipelineError>,
) -> Result<(), PipelineError> {
    let target = if fatal.is_some() {
        StageStatus::Failed
    } else if cancelled {
        StageStatus::Paused
    } else {
        StageStatus::Completed
    };
    if let Some(error) = fatal {
        checkpoint.push_error(error.to_string());
    }
    checkpoint.transition(target)
}
