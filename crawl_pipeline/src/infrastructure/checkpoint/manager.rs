// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Checkpoint Manager
//!
//! Unified management over the per-stage checkpoint files: listing, reset,
//! age-based cleanup, an aggregated pipeline-progress report, and the
//! start/resume decision for a stage run.
//!
//! Resume safety: a run may only continue from `last_processed_index` if
//! the input file's SHA-256 still matches the hash captured at run start;
//! a mismatch fails fast with an integrity error instead of silently
//! restarting.

use std::path::Path;

use chrono::{DateTime, Utc};

use crawl_pipeline_domain::{CheckpointState, PipelineError, StageId, StageStatus};

use super::store::{hash_file, CheckpointStore};

/// How a stage run should begin, given the persisted state.
#[derive(Debug)]
pub enum StartDisposition {
    /// No usable prior state: start from index 0 with a fresh state.
    Fresh(CheckpointState),
    /// Prior interrupted run: skip items below `last_processed_index`.
    Resume(CheckpointState),
    /// The stage already completed against this input; rerun is a no-op.
    AlreadyCompleted(CheckpointState),
}

/// Per-stage slice of the aggregated progress report.
#[derive(Debug, Clone)]
pub struct StageProgress {
    pub stage_id: StageId,
    pub status: StageStatus,
    pub processed_items: u64,
    pub total_items: u64,
    pub success_rate: f64,
    pub throughput: f64,
    pub eta_seconds: Option<f64>,
}

/// Aggregated pipeline progress: equal stage weights, ETA summed from the
/// per-stage throughput estimates.
#[derive(Debug, Clone, Default)]
pub struct PipelineProgress {
    pub stages: Vec<StageProgress>,
    pub overall_ratio: f64,
    pub eta_seconds: Option<f64>,
}

/// Indexes per-stage checkpoint files by stage id.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    store: CheckpointStore,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: &Path) -> Result<Self, PipelineError> {
        Ok(Self {
            store: CheckpointStore::new(checkpoint_dir)?,
        })
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// All persisted stage states, in pipeline order.
    pub fn list(&self) -> Result<Vec<CheckpointState>, PipelineError> {
        let mut states = Vec::new();
        for stage in StageId::ALL {
            if let Some(state) = self.store.load(stage)? {
                states.push(state);
            }
        }
        Ok(states)
    }

    /// Removes one stage's checkpoint files.
    pub fn reset(&self, stage: StageId) -> Result<(), PipelineError> {
        tracing::info!(stage = %stage, "resetting checkpoint");
        self.store.delete(stage)
    }

    /// Removes every stage's checkpoint files.
    pub fn reset_all(&self) -> Result<(), PipelineError> {
        for stage in StageId::ALL {
            self.store.delete(stage)?;
        }
        Ok(())
    }

    /// Deletes completed checkpoints not updated for `older_than_hours`.
    /// Returns how many stages were cleaned.
    pub fn cleanup(&self, older_than_hours: u64, now: DateTime<Utc>) -> Result<usize, PipelineError> {
        let mut cleaned = 0;
        for stage in StageId::ALL {
            if let Some(state) = self.store.load(stage)? {
                let age_hours = (now - state.last_update_time).num_minutes() as f64 / 60.0;
                if state.status == StageStatus::Completed && age_hours >= older_than_hours as f64 {
                    self.store.delete(stage)?;
                    cleaned += 1;
                }
            }
        }
        Ok(cleaned)
    }

    /// Aggregated progress report across all stages with checkpoints.
    pub fn pipeline_progress(&self, now: DateTime<Utc>) -> Result<PipelineProgress, PipelineError> {
        let states = self.list()?;
        if states.is_empty() {
            return Ok(PipelineProgress::default());
        }
        let mut stages = Vec::new();
        let mut ratio_sum = 0.0;
        let mut eta_sum = 0.0;
        let mut eta_defined = false;
        for state in &states {
            let eta = match state.status {
                StageStatus::Completed => Some(0.0),
                _ => state.eta_seconds(now),
            };
            if let Some(e) = eta {
                eta_sum += e;
                eta_defined = true;
            }
            ratio_sum += if state.status == StageStatus::Completed {
                1.0
            } else {
                state.completion_ratio()
            };
            stages.push(StageProgress {
                stage_id: state.stage_id,
                status: state.status,
                processed_items: state.processed_items,
                total_items: state.total_items,
                success_rate: state.success_rate(),
                throughput: state.throughput(now),
                eta_seconds: eta,
            });
        }
        Ok(PipelineProgress {
            overall_ratio: ratio_sum / stages.len() as f64,
            eta_seconds: if eta_defined { Some(eta_sum) } else { None },
            stages,
        })
    }

    /// Decides how a stage run starts, enforcing the resume protocol.
    ///
    /// `input_path` is the stage's input file (`None` only for stage 1 seed
    /// runs that read no upstream log — the seed file is still hashed).
    pub async fn prepare_run(
        &self,
        stage: StageId,
        input_path: &Path,
        total_items: u64,
        batch_id: String,
    ) -> Result<StartDisposition, PipelineError> {
        let input_hash = hash_file(input_path).await?;
        let now = Utc::now();

        let Some(mut state) = self.store.load(stage)? else {
            let mut state = CheckpointState::new(stage, batch_id, now);
            state.start(
                total_items,
                Some(input_path.display().to_string()),
                Some(input_hash),
                std::process::id(),
                now,
            )?;
            self.store.save(&state)?;
            return Ok(StartDisposition::Fresh(state));
        };

        match state.status {
            StageStatus::Completed => {
                // Rerunning a completed stage with the same input is a no-op.
                if state.input_file_hash.as_deref() == Some(input_hash.as_str()) {
                    return Ok(StartDisposition::AlreadyCompleted(state));
                }
                // New input: start over with a fresh state.
                let mut fresh = CheckpointState::new(stage, batch_id, now);
                fresh.start(
                    total_items,
                    Some(input_path.display().to_string()),
                    Some(input_hash),
                    std::process::id(),
                    now,
                )?;
                self.store.save(&fresh)?;
                Ok(StartDisposition::Fresh(fresh))
            }
            StageStatus::Running => Err(PipelineError::checkpoint_error(format!(
                "stage {} appears to be running in another process (pid {:?})",
                stage, state.pid
            ))),
            StageStatus::Paused | StageStatus::Recovering => {
                match state.input_file_hash.as_deref() {
                    Some(recorded) if recorded == input_hash => {
                        state.resume(std::process::id(), now)?;
                        self.store.save(&state)?;
                        Ok(StartDisposition::Resume(state))
                    }
                    Some(recorded) => Err(PipelineError::integrity_error(format!(
                        "input file hash mismatch on resume for stage {}: checkpoint has {}, file is {}",
                        stage, recorded, input_hash
                    ))),
                    None => Err(PipelineError::integrity_error(format!(
                        "stage {} checkpoint carries no input hash; cannot resume safely",
                        stage
                    ))),
                }
            }
            StageStatus::Initialized | StageStatus::Failed => {
                let mut fresh = CheckpointState::new(stage, batch_id, now);
                fresh.start(
                    total_items,
                    Some(input_path.display().to_string()),
                    Some(input_hash),
                    std::process::id(),
                    now,
                )?;
                self.store.save(&fresh)?;
                Ok(StartDisposition::Fresh(fresh))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_pipeline_domain::entities::checkpoint_state::ItemOutcome;

    async fn seeded_manager(dir: &Path) -> (CheckpointManager, std::path::PathBuf) {
        let manager = CheckpointManager::new(&dir.join("checkpoints")).unwrap();
        let input = dir.join("input.jsonl");
        tokio::fs::write(&input, "line1\nline2\n").await.unwrap();
        (manager, input)
    }

    #[tokio::test]
    async fn test_fresh_run() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, input) = seeded_manager(dir.path()).await;

        let disposition = manager
            .prepare_run(StageId::Discovery, &input, 2, "b1".to_string())
            .await
            .unwrap();
        match disposition {
            StartDisposition::Fresh(state) => {
                assert_eq!(state.status, StageStatus::Running);
                assert_eq!(state.total_items, 2);
                assert!(state.input_file_hash.is_some());
            }
            other => panic!("expected fresh, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_after_pause_with_same_input() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, input) = seeded_manager(dir.path()).await;

        let disposition = manager
            .prepare_run(StageId::Validation, &input, 2, "b1".to_string())
            .await
            .unwrap();
        let mut state = match disposition {
            StartDisposition::Fresh(state) => state,
            other => panic!("expected fresh, got {:?}", other),
        };
        state.record_item(0, "h0", ItemOutcome::Success, Utc::now()).unwrap();
        state.transition(StageStatus::Paused, Utc::now()).unwrap();
        manager.store().save(&state).unwrap();

        let disposition = manager
            .prepare_run(StageId::Validation, &input, 2, "b2".to_string())
            .await
            .unwrap();
        match disposition {
            StartDisposition::Resume(state) => {
                assert_eq!(state.last_processed_index, 1);
                assert_eq!(state.status, StageStatus::Running);
            }
            other => panic!("expected resume, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_input_hash_mismatch_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, input) = seeded_manager(dir.path()).await;

        let disposition = manager
            .prepare_run(StageId::Validation, &input, 2, "b1".to_string())
            .await
            .unwrap();
        let mut state = match disposition {
            StartDisposition::Fresh(state) => state,
            other => panic!("expected fresh, got {:?}", other),
        };
        state.transition(StageStatus::Paused, Utc::now()).unwrap();
        manager.store().save(&state).unwrap();

        tokio::fs::write(&input, "line1\nCHANGED\n").await.unwrap();

        let err = manager
            .prepare_run(StageId::Validation, &input, 2, "b2".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "integrity");
    }

    #[tokio::test]
    async fn test_completed_rerun_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, input) = seeded_manager(dir.path()).await;

        let disposition = manager
            .prepare_run(StageId::Enrichment, &input, 2, "b1".to_string())
            .await
            .unwrap();
        let mut state = match disposition {
            StartDisposition::Fresh(state) => state,
            other => panic!("expected fresh, got {:?}", other),
        };
        state.transition(StageStatus::Completed, Utc::now()).unwrap();
        manager.store().save(&state).unwrap();

        let disposition = manager
            .prepare_run(StageId::Enrichment, &input, 2, "b2".to_string())
            .await
            .unwrap();
        assert!(matches!(disposition, StartDisposition::AlreadyCompleted(_)));
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_completed_only() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, input) = seeded_manager(dir.path()).await;

        let disposition = manager
            .prepare_run(StageId::Discovery, &input, 2, "b1".to_string())
            .await
            .unwrap();
        let mut state = match disposition {
            StartDisposition::Fresh(state) => state,
            other => panic!("expected fresh, got {:?}", other),
        };
        state.transition(StageStatus::Completed, Utc::now()).unwrap();
        manager.store().save(&state).unwrap();

        // Not old enough yet
        assert_eq!(manager.cleanup(48, Utc::now()).unwrap(), 0);
        // Two days later it is
        let later = Utc::now() + chrono::Duration::hours(49);
        assert_eq!(manager.cleanup(48, later).unwrap(), 1);
        assert!(manager.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_progress_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, input) = seeded_manager(dir.path()).await;

        let disposition = manager
            .prepare_run(StageId::Discovery, &input, 4, "b1".to_string())
            .await
            .unwrap();
        let mut state = match disposition {
            StartDisposition::Fresh(state) => state,
            other => panic!("expected fresh, got {:?}", other),
        };
        state.record_item(0, "h0", ItemOutcome::Success, Utc::now()).unwrap();
        state.record_item(1, "h1", ItemOutcome::Failure, Utc::now()).unwrap();
        manager.store().save(&state).unwrap();

        let progress = manager.pipeline_progress(Utc::now()).unwrap();
        assert_eq!(progress.stages.len(), 1);
        assert!((progress.overall_ratio - 0.5).abs() < 1e-9);
        assert!((progress.stages[0].success_rate - 0.5).abs() < 1e-9);
    }
}
