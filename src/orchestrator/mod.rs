//! Workflow orchestrator: the suspendable, checkpointed state machine.
//!
//! This module is the ONLY place where workflow transitions happen. It
//! sequences extraction -> planning -> (clarification | approval) ->
//! execution, persists state under the plan id after every transition, and
//! yields serializable pending interrupts instead of capturing in-process
//! continuations. Resumption is a typed call validated against the pending
//! interrupt kind.


use crate::checkpoint::{CheckpointStore, StoreError, VersionedState};
use crate::dispatch::{execute_approved, ToolRegistry};
use crate::domain::{ActorRole, Medication, OrchestratorError, Plan, PlanId, PlanStatus, ToolResult};
use crate::extraction::{MedicationExtractor, RuleBasedExtractor};
use crate::proposal::{obtain_draft, PlanProposer, ProposalOutcome};
use crate::sanitizer::{sanitize_plan, SanitizeOptions};
use crate::state::{
    ApprovalDecision, PendingInterrupt, ResumePayload, WorkflowNode, WorkflowState,
};
use crate::structured_logger::StructuredLogger;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

const APPROVAL_INSTRUCTIONS: &str =
    "Review schedule, optionally edit times, then approve actions.";

/// Inputs for starting a new plan workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    #[serde(default)]
    pub actor_role: ActorRole,
    #[serde(default)]
    pub timezone: Option<String>,
    /// Free text typed by the caller.
    #[serde(default)]
    pub input_text: Option<String>,
    /// Pre-extracted text (e.g. OCR output) to run extraction over.
    #[serde(default)]
    pub extracted_text: Option<String>,
    /// Structured medications; when present, extraction is skipped.
    #[serde(default)]
    pub meds: Vec<Medication>,
}

/// What the caller must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextStep {
    NeedInfo,
    NeedApproval,
    Done,
}

/// Snapshot returned from `advance`/`resume`: the current plan plus the
/// pending interrupt, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub next_step: NextStep,
    pub plan: Plan,
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<PendingInterrupt>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub executed: BTreeMap<String, ToolResult>,
}

/// Drives per-plan workflows over injected collaborators and a checkpoint
/// store. Cross-plan workflows are independent; within one plan the store's
/// versioned put serializes racing writers.
pub struct Orchestrator {
    store: Arc<dyn CheckpointStore>,
    extractor: Arc<dyn MedicationExtractor>,
    proposer: Arc<dyn PlanProposer>,
    tools: ToolRegistry,
    logger: Option<Arc<StructuredLogger>>,
    default_timezone: String,
    sanitize_opts: SanitizeOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        extractor: Arc<dyn MedicationExtractor>,
        proposer: Arc<dyn PlanProposer>,
        tools: ToolRegistry,
        default_timezone: String,
        sanitize_opts: SanitizeOptions,
    ) -> Self {
        Self {
            store,
            extractor,
            proposer,
            tools,
            logger: None,
            default_timezone,
            sanitize_opts,
        }
    }

    /// Attaches a structured logger mirroring audit events.
    pub fn with_logger(mut self, logger: Arc<StructuredLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Drives a workflow from EXTRACT to its first suspension point.
    ///
    /// With `plan_id` set, this is a side-effect-free re-read of an existing
    /// plan: an already-suspended plan returns the same pending interrupt
    /// without any state change.
    ///
    /// # Errors
    ///
    /// `PlanNotFound` when `plan_id` names no stored workflow, plus storage
    /// errors.
    pub async fn advance(
        &self,
        plan_id: Option<&PlanId>,
        request: PlanRequest,
    ) -> Result<PlanOutcome, OrchestratorError> {
        if let Some(id) = plan_id {
            let existing = self.load(id).await?;
            return Ok(outcome_from_state(&existing.state));
        }

        let id = PlanId::new();
        let mut state = WorkflowState::new(
            id,
            request.actor_role,
            self.normalize_timezone(request.timezone.as_deref()),
            request.input_text.unwrap_or_default(),
            request.extracted_text.unwrap_or_default(),
            request.meds,
        );

        let mut version = self.persist(&state, 0).await?;

        self.run_extract(&mut state).await;
        state.transition(WorkflowNode::Plan);
        version = self.persist(&state, version).await?;

        self.run_plan(&mut state).await;
        self.suspend_after_plan(&mut state);
        self.persist(&state, version).await?;

        self.mirror_audit(&state, 0);
        Ok(outcome_from_state(&state))
    }

    /// Resumes a suspended workflow with a payload matching the pending
    /// interrupt kind.
    ///
    /// # Errors
    ///
    /// - `PlanNotFound`: unknown plan id
    /// - `NoPendingInterrupt`: the plan is not suspended (including terminal)
    /// - `PendingInterruptMismatch`: payload kind differs from the pending
    ///   interrupt kind; stored state is unchanged
    /// - `EmptyResume`: a NEED_INFO resume carried no corrections
    /// - `ConcurrencyConflict`: a racing resume won the version check
    pub async fn resume(
        &self,
        plan_id: &PlanId,
        payload: ResumePayload,
    ) -> Result<PlanOutcome, OrchestratorError> {
        let VersionedState { mut state, version } = self.load(plan_id).await?;
        let audit_start = state.audit.len();

        let Some(pending) = state.pending.clone() else {
            return Err(OrchestratorError::NoPendingInterrupt {
                plan_id: plan_id.to_string(),
            });
        };

        match (&pending, payload) {
            (
                PendingInterrupt::NeedInfo { .. },
                ResumePayload::Corrections {
                    meds,
                    extracted_text,
                    actor_role,
                },
            ) => {
                let text = extracted_text
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string);
                if meds.is_empty() && text.is_none() {
                    return Err(OrchestratorError::EmptyResume);
                }

                state.pending = None;
                if let Some(role) = actor_role {
                    state.actor_role = role;
                }
                state.audit.record(
                    "need_info.resumed",
                    json!({ "meds": meds.len(), "has_text": text.is_some() }),
                );

                if !meds.is_empty() {
                    state.meds = meds;
                    if let Some(t) = text {
                        state.extracted_text = t;
                    }
                } else if let Some(t) = text {
                    state.extracted_text = t;
                    let previous = std::mem::take(&mut state.meds);
                    self.reextract(&mut state).await;
                    if state.meds.is_empty() {
                        // The new text yielded nothing; keep the prior
                        // candidates so the plan node re-asks about them.
                        state.meds = previous;
                    }
                }

                state.transition(WorkflowNode::Plan);
                let version = self.persist(&state, version).await?;

                self.run_plan(&mut state).await;
                self.suspend_after_plan(&mut state);
                self.persist(&state, version).await?;

                self.mirror_audit(&state, audit_start);
                Ok(outcome_from_state(&state))
            }

            (PendingInterrupt::ApprovalRequired { .. }, ResumePayload::Decision(decision)) => {
                state.pending = None;
                state.approval = Some(decision.clone());
                state
                    .audit
                    .record("approval.resumed", json!({ "decision": decision_name(&decision) }));

                state.transition(WorkflowNode::Execute);
                let version = self.persist(&state, version).await?;

                match &decision {
                    ApprovalDecision::Approve {
                        approved_action_types,
                        dose_time_overrides,
                        ..
                    } => {
                        let mut plan = state
                            .plan
                            .take()
                            .unwrap_or_else(|| Plan::empty(state.plan_id.clone()));
                        state.executed = execute_approved(
                            &self.tools,
                            &mut plan,
                            approved_action_types,
                            dose_time_overrides,
                        )
                        .await;
                        state.plan = Some(plan);
                        state.audit.record(
                            "execute.done",
                            json!({
                                "executed": state.executed.keys().collect::<Vec<_>>(),
                            }),
                        );
                    }
                    ApprovalDecision::Reject { reason, .. } => {
                        if let Some(plan) = state.plan.as_mut() {
                            plan.status = PlanStatus::Rejected;
                        }
                        state
                            .audit
                            .record("plan.rejected", json!({ "reason": reason }));
                    }
                }

                state.transition(WorkflowNode::Done);
                self.persist(&state, version).await?;

                self.mirror_audit(&state, audit_start);
                Ok(outcome_from_state(&state))
            }

            (pending, payload) => Err(OrchestratorError::PendingInterruptMismatch {
                expected: pending.kind(),
                got: payload.kind(),
            }),
        }
    }

    /// Read-only audit trail accessor.
    pub async fn audit_trail(
        &self,
        plan_id: &PlanId,
    ) -> Result<crate::audit::AuditTrail, OrchestratorError> {
        Ok(self.load(plan_id).await?.state.audit)
    }

    /// Read-only workflow state accessor.
    pub async fn state(&self, plan_id: &PlanId) -> Result<WorkflowState, OrchestratorError> {
        Ok(self.load(plan_id).await?.state)
    }

    /// EXTRACT node: skip when structured medications were provided, else
    /// extract candidates from the supplied text, falling back to the
    /// rule-based extractor when the collaborator fails.
    async fn run_extract(&self, state: &mut WorkflowState) {
        if !state.meds.is_empty() {
            state.audit.record(
                "extract.skip",
                json!({ "reason": "meds already provided" }),
            );
            return;
        }

        if !state.extracted_text.trim().is_empty() {
            self.reextract(state).await;
            return;
        }

        let candidates = RuleBasedExtractor::extract_lines(&state.input_text);
        state.audit.record(
            "extract.heuristic.done",
            json!({ "count": candidates.len() }),
        );
        state.meds = candidates;
    }

    /// Runs the extraction collaborator over `extracted_text`, recovering
    /// locally to the rule-based extractor on failure.
    async fn reextract(&self, state: &mut WorkflowState) {
        match self.extractor.extract(&state.extracted_text).await {
            Ok(candidates) => {
                state.audit.record(
                    "extract.collaborator.done",
                    json!({ "count": candidates.len() }),
                );
                state.meds = candidates;
            }
            Err(e) => {
                let candidates = RuleBasedExtractor::extract_lines(&state.extracted_text);
                state.audit.record(
                    "extract.fallback.done",
                    json!({ "count": candidates.len(), "error": format!("{:#}", e) }),
                );
                state.meds = candidates;
            }
        }
    }

    /// PLAN node: obtain an untrusted draft (or an explicit fallback marker)
    /// and funnel it through the sanitizer.
    async fn run_plan(&self, state: &mut WorkflowState) {
        let outcome = obtain_draft(
            self.proposer.as_ref(),
            &state.meds,
            &state.input_text,
            &state.timezone,
        )
        .await;

        let draft = match &outcome {
            ProposalOutcome::Proposed(bundle) => {
                state.audit.record(
                    "plan.proposal.done",
                    json!({ "schedule_count": bundle.schedule.len() }),
                );
                Some(bundle)
            }
            ProposalOutcome::Fallback { reason } => {
                state
                    .audit
                    .record("plan.fallback.done", json!({ "reason": reason }));
                None
            }
        };

        let sanitized = sanitize_plan(&state.plan_id, &state.meds, draft, &self.sanitize_opts);
        for event in sanitized.audit {
            state.audit.append(event);
        }

        state.needs_info = sanitized.needs_info;
        state.questions = sanitized.questions;
        state.audit.record(
            "plan.done",
            json!({
                "needs_info": sanitized.needs_info,
                "schedule_count": sanitized.plan.schedule.len(),
            }),
        );
        state.plan = Some(sanitized.plan);
    }

    /// Routes PLAN to its suspension point and records the interrupt.
    fn suspend_after_plan(&self, state: &mut WorkflowState) {
        if state.needs_info {
            state.transition(WorkflowNode::NeedInfo);
            state.pending = Some(PendingInterrupt::NeedInfo {
                questions: state.questions.clone(),
                current_meds: state.meds.clone(),
            });
            state.audit.record(
                "need_info.suspended",
                json!({ "questions": state.questions.len() }),
            );
        } else {
            state.transition(WorkflowNode::Approval);
            let plan = state
                .plan
                .clone()
                .unwrap_or_else(|| Plan::empty(state.plan_id.clone()));
            let schedule_count = plan.schedule.len();
            state.pending = Some(PendingInterrupt::ApprovalRequired {
                plan,
                instructions: APPROVAL_INSTRUCTIONS.to_string(),
            });
            state.audit.record(
                "approval.suspended",
                json!({ "schedule_count": schedule_count }),
            );
        }
    }

    fn normalize_timezone(&self, timezone: Option<&str>) -> String {
        match timezone.map(str::trim).filter(|t| !t.is_empty()) {
            Some(tz) if tz.parse::<chrono_tz::Tz>().is_ok() => tz.to_string(),
            Some(tz) => {
                tracing::warn!(
                    "unknown timezone {:?}, using default {}",
                    tz,
                    self.default_timezone
                );
                self.default_timezone.clone()
            }
            None => self.default_timezone.clone(),
        }
    }

    async fn load(&self, plan_id: &PlanId) -> Result<VersionedState, OrchestratorError> {
        match self.store.get(plan_id).await {
            Ok(Some(versioned)) => Ok(versioned),
            Ok(None) => Err(OrchestratorError::PlanNotFound {
                plan_id: plan_id.to_string(),
            }),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn persist(
        &self,
        state: &WorkflowState,
        expected_version: u64,
    ) -> Result<u64, OrchestratorError> {
        self.store
            .put(state, expected_version)
            .await
            .map_err(store_error)
    }

    /// Mirrors audit events appended during this call to the JSONL log.
    fn mirror_audit(&self, state: &WorkflowState, from: usize) {
        if let Some(logger) = &self.logger {
            for event in &state.audit.events()[from..] {
                logger.log_audit(&state.plan_id, event);
            }
        }
    }
}

fn decision_name(decision: &ApprovalDecision) -> &'static str {
    match decision {
        ApprovalDecision::Approve { .. } => "APPROVE",
        ApprovalDecision::Reject { .. } => "REJECT",
    }
}

fn store_error(e: StoreError) -> OrchestratorError {
    match e {
        StoreError::Conflict { message } => OrchestratorError::ConcurrencyConflict { message },
        StoreError::Io { message } => OrchestratorError::Storage { message },
    }
}

fn outcome_from_state(state: &WorkflowState) -> PlanOutcome {
    let plan = state
        .plan
        .clone()
        .unwrap_or_else(|| Plan::empty(state.plan_id.clone()));
    let next_step = match &state.pending {
        Some(PendingInterrupt::NeedInfo { .. }) => NextStep::NeedInfo,
        Some(PendingInterrupt::ApprovalRequired { .. }) => NextStep::NeedApproval,
        None => NextStep::Done,
    };

    PlanOutcome {
        plan_id: state.plan_id.clone(),
        status: plan.status,
        next_step,
        questions: state.questions.clone(),
        interrupt: state.pending.clone(),
        executed: state.executed.clone(),
        plan,
    }
}
