//! Checkpoint store for workflow state.
//!
//! One record per plan id, with a version counter providing atomic
//! read-modify-write semantics: `put` succeeds only when the caller's
//! expected version matches the stored one, so two racing resumes on the
//! same plan cannot both win.

pub mod file_store;

pub use file_store::FileCheckpointStore;

use crate::domain::PlanId;
use crate::state::WorkflowState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

/// A stored state together with its version token.
#[derive(Debug, Clone)]
pub struct VersionedState {
    pub state: WorkflowState,
    pub version: u64,
}

/// Storage-layer errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// The expected version did not match the stored one (lost race).
    Conflict { message: String },
    /// I/O or serialization failure.
    Io { message: String },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict { message } => write!(f, "version conflict: {}", message),
            Self::Io { message } => write!(f, "store i/o failure: {}", message),
        }
    }
}

impl std::error::Error for StoreError {}

/// Keyed persistence for workflow state, atomic per plan id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the state stored under the plan id, if any.
    async fn get(&self, plan_id: &PlanId) -> Result<Option<VersionedState>, StoreError>;

    /// Stores the state if the current version equals `expected_version`
    /// (0 when creating). Returns the new version.
    async fn put(&self, state: &WorkflowState, expected_version: u64) -> Result<u64, StoreError>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<HashMap<String, (u64, WorkflowState)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, plan_id: &PlanId) -> Result<Option<VersionedState>, StoreError> {
        let inner = self.inner.lock().map_err(|e| StoreError::Io {
            message: e.to_string(),
        })?;
        Ok(inner.get(plan_id.as_str()).map(|(version, state)| {
            VersionedState {
                state: state.clone(),
                version: *version,
            }
        }))
    }

    async fn put(&self, state: &WorkflowState, expected_version: u64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().map_err(|e| StoreError::Io {
            message: e.to_string(),
        })?;
        let current = inner
            .get(state.plan_id.as_str())
            .map(|(version, _)| *version)
            .unwrap_or(0);
        if current != expected_version {
            return Err(StoreError::Conflict {
                message: format!(
                    "plan {}: expected version {}, found {}",
                    state.plan_id, expected_version, current
                ),
            });
        }
        let next = expected_version + 1;
        inner.insert(state.plan_id.as_str().to_string(), (next, state.clone()));
        Ok(next)
    }
}
