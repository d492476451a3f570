//! Persisted workflow state and the suspension/resume contract types.
//!
//! `WorkflowState` is the single source of truth for one plan's workflow.
//! It is owned exclusively by the orchestrator, persisted under the plan id
//! after every transition, and becomes immutable once the plan reaches a
//! terminal status. Suspension is explicit state: a serializable
//! `PendingInterrupt` plus a typed `ResumePayload` contract, not an
//! in-process continuation.

use crate::audit::AuditTrail;
use crate::domain::{ActionType, ActorRole, Medication, Plan, PlanId, ToolResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Workflow graph nodes. `Done` is terminal and never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNode {
    Extract,
    Plan,
    NeedInfo,
    Approval,
    Execute,
    Done,
}

impl WorkflowNode {
    fn can_transition(self, to: WorkflowNode) -> bool {
        use WorkflowNode::*;
        matches!(
            (self, to),
            (Extract, Plan)
                | (Plan, NeedInfo)
                | (Plan, Approval)
                | (NeedInfo, Plan)
                | (Approval, Execute)
                | (Execute, Done)
        )
    }
}

/// A suspension point descriptor, returned to the caller and persisted with
/// the state so resumption can happen in another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PendingInterrupt {
    #[serde(rename = "NEED_INFO")]
    NeedInfo {
        questions: Vec<String>,
        current_meds: Vec<Medication>,
    },
    #[serde(rename = "APPROVAL_REQUIRED")]
    ApprovalRequired { plan: Plan, instructions: String },
}

impl PendingInterrupt {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NeedInfo { .. } => "NEED_INFO",
            Self::ApprovalRequired { .. } => "APPROVAL_REQUIRED",
        }
    }
}

/// The caller's decision at the approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approve {
        #[serde(default)]
        actor_role: ActorRole,
        #[serde(default)]
        approved_action_types: Vec<ActionType>,
        /// dose_id -> "HH:MM" overrides applied before execution.
        #[serde(default)]
        dose_time_overrides: BTreeMap<String, String>,
    },
    Reject {
        #[serde(default)]
        actor_role: ActorRole,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Typed resume payload. Its kind must match the pending interrupt's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum ResumePayload {
    /// Answer to a NEED_INFO interrupt: corrected medications and/or new raw
    /// text to re-extract from.
    Corrections {
        #[serde(default)]
        meds: Vec<Medication>,
        #[serde(default)]
        extracted_text: Option<String>,
        #[serde(default)]
        actor_role: Option<ActorRole>,
    },
    /// Answer to an APPROVAL_REQUIRED interrupt.
    Decision(ApprovalDecision),
}

impl ResumePayload {
    /// The interrupt kind this payload answers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Corrections { .. } => "NEED_INFO",
            Self::Decision(_) => "APPROVAL_REQUIRED",
        }
    }
}

/// Complete persisted state of one plan's workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub plan_id: PlanId,
    pub node: WorkflowNode,
    pub actor_role: ActorRole,
    pub timezone: String,
    #[serde(default)]
    pub input_text: String,
    #[serde(default)]
    pub extracted_text: String,
    #[serde(default)]
    pub meds: Vec<Medication>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub needs_info: bool,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub pending: Option<PendingInterrupt>,
    #[serde(default)]
    pub approval: Option<ApprovalDecision>,
    /// Tool results keyed by wire action type.
    #[serde(default)]
    pub executed: BTreeMap<String, ToolResult>,
    #[serde(default)]
    pub audit: AuditTrail,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl WorkflowState {
    pub fn new(
        plan_id: PlanId,
        actor_role: ActorRole,
        timezone: String,
        input_text: String,
        extracted_text: String,
        meds: Vec<Medication>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            plan_id,
            node: WorkflowNode::Extract,
            actor_role,
            timezone,
            input_text,
            extracted_text,
            meds,
            plan: None,
            needs_info: false,
            questions: Vec::new(),
            pending: None,
            approval: None,
            executed: BTreeMap::new(),
            audit: AuditTrail::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Moves to the next node. Transitions are driven exclusively by the
    /// orchestrator; an invalid one is a programming error, not caller input.
    pub fn transition(&mut self, to: WorkflowNode) {
        assert!(
            self.node.can_transition(to),
            "invalid workflow transition {:?} -> {:?}",
            self.node,
            to
        );
        self.node = to;
        self.set_updated_at();
    }

    pub fn is_terminal(&self) -> bool {
        self.node == WorkflowNode::Done
    }

    pub fn set_updated_at(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Frequency;

    fn state() -> WorkflowState {
        WorkflowState::new(
            PlanId::from("plan_test"),
            ActorRole::Patient,
            "Asia/Kolkata".to_string(),
            String::new(),
            String::new(),
            Vec::new(),
        )
    }

    #[test]
    fn test_valid_transition_chain() {
        let mut s = state();
        s.transition(WorkflowNode::Plan);
        s.transition(WorkflowNode::NeedInfo);
        s.transition(WorkflowNode::Plan);
        s.transition(WorkflowNode::Approval);
        s.transition(WorkflowNode::Execute);
        s.transition(WorkflowNode::Done);
        assert!(s.is_terminal());
    }

    #[test]
    #[should_panic(expected = "invalid workflow transition")]
    fn test_invalid_transition_panics() {
        let mut s = state();
        s.transition(WorkflowNode::Done);
    }

    #[test]
    #[should_panic(expected = "invalid workflow transition")]
    fn test_done_is_never_left() {
        let mut s = state();
        s.transition(WorkflowNode::Plan);
        s.transition(WorkflowNode::Approval);
        s.transition(WorkflowNode::Execute);
        s.transition(WorkflowNode::Done);
        s.transition(WorkflowNode::Plan);
    }

    #[test]
    fn test_pending_interrupt_wire_format() {
        let interrupt = PendingInterrupt::NeedInfo {
            questions: vec!["Confirm frequency".to_string()],
            current_meds: Vec::new(),
        };
        let json = serde_json::to_value(&interrupt).unwrap();
        assert_eq!(json["type"], "NEED_INFO");

        let interrupt = PendingInterrupt::ApprovalRequired {
            plan: Plan::empty(PlanId::from("plan_x")),
            instructions: "Review and approve".to_string(),
        };
        let json = serde_json::to_value(&interrupt).unwrap();
        assert_eq!(json["type"], "APPROVAL_REQUIRED");
    }

    #[test]
    fn test_resume_payload_kind_matches_interrupt_kind() {
        let corrections = ResumePayload::Corrections {
            meds: Vec::new(),
            extracted_text: Some("Metformin 500mg".to_string()),
            actor_role: None,
        };
        assert_eq!(corrections.kind(), "NEED_INFO");

        let decision = ResumePayload::Decision(ApprovalDecision::Approve {
            actor_role: ActorRole::Caregiver,
            approved_action_types: vec![ActionType::CreateReminders],
            dose_time_overrides: BTreeMap::new(),
        });
        assert_eq!(decision.kind(), "APPROVAL_REQUIRED");
    }

    #[test]
    fn test_state_serde_round_trip() {
        let mut s = state();
        s.meds.push(Medication {
            name: "Metformin".to_string(),
            strength: Some("500mg".to_string()),
            frequency: Frequency::Bid,
            with_food: Some(true),
            instructions: None,
            duration_days: None,
        });
        s.audit.record("plan.done", serde_json::json!({"needs_info": false}));
        s.pending = Some(PendingInterrupt::NeedInfo {
            questions: vec!["q".to_string()],
            current_meds: s.meds.clone(),
        });

        let encoded = serde_json::to_string(&s).unwrap();
        let decoded: WorkflowState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, s);
    }

    #[test]
    fn test_approval_decision_wire_format() {
        let decision = ApprovalDecision::Reject {
            actor_role: ActorRole::Patient,
            reason: Some("wrong medicine list".to_string()),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "REJECT");
        assert_eq!(json["actor_role"], "PATIENT");
    }
}
