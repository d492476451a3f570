//! Error types for the workflow orchestrator's caller-facing contract.

use std::fmt::{Display, Formatter};

/// Errors reported to callers of `advance`/`resume`. These are contract
/// violations or storage failures, never internal invariant breaks (those
/// are programming errors and panic).
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// No workflow state is stored under the given plan id.
    PlanNotFound { plan_id: String },
    /// The plan is not currently suspended, so there is nothing to resume.
    NoPendingInterrupt { plan_id: String },
    /// The resume payload does not match the kind of interrupt pending.
    PendingInterruptMismatch {
        expected: &'static str,
        got: &'static str,
    },
    /// A NEED_INFO resume carried neither corrected medications nor text.
    EmptyResume,
    /// Optimistic lock failure (concurrent modification detected).
    ConcurrencyConflict { message: String },
    /// Storage/persistence failure.
    Storage { message: String },
}

impl Display for OrchestratorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlanNotFound { plan_id } => write!(f, "plan not found: {}", plan_id),
            Self::NoPendingInterrupt { plan_id } => {
                write!(f, "plan {} has no pending interrupt to resume", plan_id)
            }
            Self::PendingInterruptMismatch { expected, got } => write!(
                f,
                "pending interrupt mismatch: plan is waiting for {}, got a {} payload",
                expected, got
            ),
            Self::EmptyResume => {
                write!(f, "resume requires corrected medications or extracted text")
            }
            Self::ConcurrencyConflict { message } => {
                write!(f, "concurrency conflict: {}", message)
            }
            Self::Storage { message } => write!(f, "storage failure: {}", message),
        }
    }
}

impl std::error::Error for OrchestratorError {}
