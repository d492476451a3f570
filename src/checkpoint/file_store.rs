//! File-based checkpoint store implementation.
//!
//! One JSON file per plan id with:
//! - Single-writer discipline via an exclusive fs2 lock on a per-plan lock file
//! - Optimistic concurrency via a stored version counter
//! - Atomic writes via temp file + rename

use super::{CheckpointStore, StoreError, VersionedState};
use crate::domain::PlanId;
use crate::state::WorkflowState;
use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// On-disk checkpoint record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    pub version: u64,
    pub saved_at: String,
    pub state: WorkflowState,
}

/// Checkpoint store writing one `<plan_id>.json` per plan under a root
/// directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn state_path(&self, plan_id: &PlanId) -> PathBuf {
        self.root.join(format!("{}.json", plan_id.as_str()))
    }

    fn lock_path(&self, plan_id: &PlanId) -> PathBuf {
        self.root.join(format!("{}.lock", plan_id.as_str()))
    }

    /// Opens (creating if needed) and exclusively locks the per-plan lock
    /// file. The lock is released when the returned handle drops.
    fn acquire_lock(&self, plan_id: &PlanId) -> Result<File, StoreError> {
        std::fs::create_dir_all(&self.root).map_err(io_err)?;
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(plan_id))
            .map_err(io_err)?;
        lock.lock_exclusive().map_err(io_err)?;
        Ok(lock)
    }
}

fn io_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Io {
        message: e.to_string(),
    }
}

fn read_checkpoint(path: &Path) -> Result<Option<StoredCheckpoint>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(e)),
    };
    let record: StoredCheckpoint = serde_json::from_str(&content).map_err(io_err)?;
    Ok(Some(record))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, plan_id: &PlanId) -> Result<Option<VersionedState>, StoreError> {
        // Writes replace the file atomically via rename, so a plain read
        // always observes a complete record.
        Ok(read_checkpoint(&self.state_path(plan_id))?.map(|record| VersionedState {
            state: record.state,
            version: record.version,
        }))
    }

    async fn put(&self, state: &WorkflowState, expected_version: u64) -> Result<u64, StoreError> {
        let _lock = self.acquire_lock(&state.plan_id)?;

        let path = self.state_path(&state.plan_id);
        let current = read_checkpoint(&path)?.map(|r| r.version).unwrap_or(0);
        if current != expected_version {
            return Err(StoreError::Conflict {
                message: format!(
                    "plan {}: expected version {}, found {}",
                    state.plan_id, expected_version, current
                ),
            });
        }

        let record = StoredCheckpoint {
            version: expected_version + 1,
            saved_at: Utc::now().to_rfc3339(),
            state: state.clone(),
        };
        let content = serde_json::to_string_pretty(&record).map_err(io_err)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(io_err)?;
        std::fs::rename(&tmp_path, &path).map_err(io_err)?;

        Ok(record.version)
    }
}
