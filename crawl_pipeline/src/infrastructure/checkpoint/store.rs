// /////////////////////////////////////////////////////////////////////////////
// Crawl Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Checkpoint Store
//!
//! Crash-safe persistence for [`CheckpointState`], one JSON file per stage
//! at `<checkpoint-dir>/<stage_id>.checkpoint.json`.
//!
//! ## Write protocol (atomic)
//!
//! 1. Serialize the new state to `<stage>.checkpoint.tmp`
//! 2. If the primary exists, rename it to `<stage>.checkpoint.backup`
//! 3. Rename `.tmp` to `<stage>.checkpoint.json`
//!
//! Renames within one directory are the atomic unit; a crash between steps
//! leaves either the old primary or a backup to fall back on. The payload
//! is a few KB, so the save runs as plain synchronous syscalls on the I/O
//! loop.
//!
//! ## Crash detection
//!
//! On load, a state still marked `running` whose recorded PID is not this
//! process and not alive transitions to `recovering` (and is saved back).
//! Resume then revalidates the input-file hash before trusting
//! `last_processed_index`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crawl_pipeline_domain::entities::checkpoint_state::ItemOutcome;
use crawl_pipeline_domain::{CheckpointState, PipelineError, StageId, StageStatus};

/// Forced save every N processed items.
pub const AUTOSAVE_EVERY_ITEMS: u32 = 10;

/// Filesystem store for per-stage checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens (and creates) the checkpoint directory.
    pub fn new(dir: &Path) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| PipelineError::checkpoint_error(format!("mkdir {}: {}", dir.display(), e)))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn primary_path(&self, stage: StageId) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", stage.as_str()))
    }

    fn tmp_path(&self, stage: StageId) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.tmp", stage.as_str()))
    }

    fn backup_path(&self, stage: StageId) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.backup", stage.as_str()))
    }

    /// Saves a state with the tmp → backup → primary rename protocol.
    pub fn save(&self, state: &CheckpointState) -> Result<(), PipelineError> {
        let primary = self.primary_path(state.stage_id);
        let tmp = self.tmp_path(state.stage_id);
        let backup = self.backup_path(state.stage_id);

        let payload = serde_json::to_vec_pretty(state)?;
        std::fs::write(&tmp, payload)
            .map_err(|e| PipelineError::checkpoint_error(format!("write {}: {}", tmp.display(), e)))?;

        if primary.exists() {
            std::fs::rename(&primary, &backup).map_err(|e| {
                PipelineError::checkpoint_error(format!(
                    "rename {} -> {}: {}",
                    primary.display(),
                    backup.display(),
                    e
                ))
            })?;
        }
        std::fs::rename(&tmp, &primary).map_err(|e| {
            PipelineError::checkpoint_error(format!("rename {} -> {}: {}", tmp.display(), primary.display(), e))
        })?;
        Ok(())
    }

    /// Loads a stage's state, falling back to `.backup` when the primary is
    /// missing or unparseable, and applying crash detection.
    pub fn load(&self, stage: StageId) -> Result<Option<CheckpointState>, PipelineError> {
        let state = match self.load_raw(stage)? {
            Some(state) => state,
            None => return Ok(None),
        };
        let state = self.detect_crash(state)?;
        state.check_invariants()?;
        Ok(Some(state))
    }

    fn load_raw(&self, stage: StageId) -> Result<Option<CheckpointState>, PipelineError> {
        let primary = self.primary_path(stage);
        match Self::read_state(&primary) {
            Ok(Some(state)) => return Ok(Some(state)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(stage = %stage, "primary checkpoint unreadable ({}), trying backup", e);
            }
        }
        let backup = self.backup_path(stage);
        match Self::read_state(&backup) {
            Ok(result) => Ok(result),
            Err(e) => Err(PipelineError::checkpoint_error(format!(
                "both primary and backup checkpoints unreadable for {}: {}",
                stage, e
            ))),
        }
    }

    fn read_state(path: &Path) -> Result<Option<CheckpointState>, PipelineError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::checkpoint_error(format!("read {}: {}", path.display(), e)))?;
        let state = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::checkpoint_error(format!("parse {}: {}", path.display(), e)))?;
        Ok(Some(state))
    }

    /// Transitions `running` to `recovering` when the owning process died.
    fn detect_crash(&self, mut state: CheckpointState) -> Result<CheckpointState, PipelineError> {
        if state.status != StageStatus::Running {
            return Ok(state);
        }
        let owner_alive = state.pid.is_some_and(pid_is_alive);
        if owner_alive {
            return Ok(state);
        }
        tracing::warn!(
            stage = %state.stage_id,
            pid = ?state.pid,
            "checkpoint marked running but owner is gone; entering recovery"
        );
        state.transition(StageStatus::Recovering, Utc::now())?;
        self.save(&state)?;
        Ok(state)
    }

    /// Removes primary, backup, and tmp files for a stage.
    pub fn delete(&self, stage: StageId) -> Result<(), PipelineError> {
        for path in [self.primary_path(stage), self.backup_path(stage), self.tmp_path(stage)] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|e| PipelineError::checkpoint_error(format!("remove {}: {}", path.display(), e)))?;
            }
        }
        Ok(())
    }
}

/// Liveness probe for the PID recorded in a checkpoint.
fn pid_is_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{}", pid)).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        // Without a portable probe, assume the owner died; recovery
        // revalidates the input hash before resuming, so this errs safe.
        false
    }
}

/// SHA-256 of a file's contents, hex-encoded; binds a run to its input.
pub async fn hash_file(path: &Path) -> Result<String, PipelineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::input_error(format!("hash {}: {}", path.display(), e)))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Mutating handle pairing a state with its store and the auto-save
/// cadence: force-save on status transitions, every
/// [`AUTOSAVE_EVERY_ITEMS`] processed items, and on graceful shutdown.
pub struct CheckpointHandle {
    store: CheckpointStore,
    state: CheckpointState,
    items_since_save: u32,
}

impl CheckpointHandle {
    pub fn new(store: CheckpointStore, state: CheckpointState) -> Self {
        Self {
            store,
            state,
            items_since_save: 0,
        }
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut CheckpointState {
        &mut self.state
    }

    /// Records an item outcome; flushes when the auto-save counter trips.
    pub fn record_item(
        &mut self,
        index: u64,
        item: impl Into<String>,
        outcome: ItemOutcome,
    ) -> Result<(), PipelineError> {
        self.state.record_item(index, item, outcome, Utc::now())?;
        self.items_since_save += 1;
        if self.items_since_save >= AUTOSAVE_EVERY_ITEMS {
            self.force_save()?;
        }
        Ok(())
    }

    /// Applies a status transition and force-saves.
    pub fn transition(&mut self, next: StageStatus) -> Result<(), PipelineError> {
        self.state.transition(next, Utc::now())?;
        self.force_save()
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.state.push_error(message);
    }

    pub fn force_save(&mut self) -> Result<(), PipelineError> {
        self.store.save(&self.state)?;
        self.items_since_save = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_state(store: &CheckpointStore, total: u64) -> CheckpointState {
        let now = Utc::now();
        let mut state = CheckpointState::new(StageId::Validation, "01JBATCH".to_string(), now);
        state
            .start(total, Some("in.jsonl".into()), Some("cd".repeat(32)), std::process::id(), now)
            .unwrap();
        store.save(&state).unwrap();
        state
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let state = new_state(&store, 10);

        let loaded = store.load(StageId::Validation).unwrap().unwrap();
        assert_eq!(loaded.total_items, state.total_items);
        assert_eq!(loaded.status, StageStatus::Running);
        assert_eq!(loaded.batch_id, state.batch_id);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        assert!(store.load(StageId::Discovery).unwrap().is_none());
    }

    #[test]
    fn test_second_save_creates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut state = new_state(&store, 10);
        state.record_item(0, "h0", ItemOutcome::Success, Utc::now()).unwrap();
        store.save(&state).unwrap();

        assert!(store.primary_path(StageId::Validation).exists());
        assert!(store.backup_path(StageId::Validation).exists());
    }

    #[test]
    fn test_corrupt_primary_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut state = new_state(&store, 10);
        state.record_item(0, "h0", ItemOutcome::Success, Utc::now()).unwrap();
        store.save(&state).unwrap(); // primary = 1 item, backup = 0 items

        std::fs::write(store.primary_path(StageId::Validation), "{ garbage").unwrap();

        let loaded = store.load(StageId::Validation).unwrap().unwrap();
        // backup predates the second save
        assert_eq!(loaded.processed_items, 0);
    }

    #[test]
    fn test_crash_detection_enters_recovering() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut state = new_state(&store, 10);
        // Simulate a dead owner: a PID that cannot exist.
        state.pid = Some(u32::MAX - 1);
        store.save(&state).unwrap();

        let loaded = store.load(StageId::Validation).unwrap().unwrap();
        assert_eq!(loaded.status, StageStatus::Recovering);
        // The recovery transition was persisted.
        let reloaded = store.load(StageId::Validation).unwrap().unwrap();
        assert_eq!(reloaded.status, StageStatus::Recovering);
    }

    #[test]
    fn test_live_owner_is_not_a_crash() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let _state = new_state(&store, 10); // pid = current process

        let loaded = store.load(StageId::Validation).unwrap().unwrap();
        assert_eq!(loaded.status, StageStatus::Running);
    }

    #[test]
    fn test_delete_removes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut state = new_state(&store, 10);
        state.record_item(0, "h0", ItemOutcome::Success, Utc::now()).unwrap();
        store.save(&state).unwrap();

        store.delete(StageId::Validation).unwrap();
        assert!(!store.primary_path(StageId::Validation).exists());
        assert!(!store.backup_path(StageId::Validation).exists());
        assert!(store.load(StageId::Validation).unwrap().is_none());
    }

    #[test]
    fn test_handle_autosaves_every_n_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let state = new_state(&store, 100);
        let mut handle = CheckpointHandle::new(store.clone(), state);

        for i in 0..(AUTOSAVE_EVERY_ITEMS as u64 - 1) {
            handle.record_item(i, format!("h{}", i), ItemOutcome::Success).unwrap();
        }
        // Not yet flushed: disk still shows zero progress.
        let on_disk = store.load(StageId::Validation).unwrap().unwrap();
        assert_eq!(on_disk.processed_items, 0);

        handle
            .record_item(AUTOSAVE_EVERY_ITEMS as u64 - 1, "hN", ItemOutcome::Success)
            .unwrap();
        let on_disk = store.load(StageId::Validation).unwrap().unwrap();
        assert_eq!(on_disk.processed_items, AUTOSAVE_EVERY_ITEMS as u64);
    }

    #[test]
    fn test_handle_transition_forces_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let state = new_state(&store, 10);
        let mut handle = CheckpointHandle::new(store.clone(), state);
        handle.record_item(0, "h0", ItemOutcome::Success).unwrap();
        handle.transition(StageStatus::Paused).unwrap();

        let on_disk = store.load(StageId::Validation).unwrap().unwrap();
        assert_eq!(on_disk.status, StageStatus::Paused);
        assert_eq!(on_disk.processed_items, 1);
    }

    #[tokio::test]
    async fn test_hash_file_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        tokio::fs::write(&a, "same").await.unwrap();
        tokio::fs::write(&b, "same").await.unwrap();
        assert_eq!(hash_file(&a).await.unwrap(), hash_file(&b).await.unwrap());

        tokio::fs::write(&b, "different").await.unwrap();
        assert_ne!(hash_file(&a).await.unwrap(), hash_file(&b).await.unwrap());
    }

    #[test]
    fn test_serialize_deserialize_serialize_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let state = new_state(&store, 10);

        let first = serde_json::to_vec_pretty(&state).unwrap();
        let back: CheckpointState = serde_json::from_slice(&first).unwrap();
        let second = serde_json::to_vec_pretty(&back).unwrap();
        assert_eq!(first, second);
    }
}
