//! Domain model for the medication dosing workflow.
//!
//! This module provides the strongly typed data model shared by the
//! sanitizer, dispatcher and orchestrator:
//!
//! - **Types** (`types.rs`): medications, doses, plans, actions
//! - **Errors** (`errors.rs`): the caller-facing error contract

pub mod errors;
pub mod types;

pub use errors::OrchestratorError;
pub use types::{
    fresh_dose_id, ActionProposal, ActionType, ActorRole, Bucket, Dose, Frequency, Medication,
    Plan, PlanId, PlanStatus, ToolResult, SAFETY_NOTE,
};
