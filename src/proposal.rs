//! Planning-proposal collaborator interface.
//!
//! A proposer (typically a generative model behind an adapter) drafts a
//! schedule bundle for the sanitizer. Its output is UNTRUSTED: the sanitizer
//! re-derives everything safety-relevant from the canonical medication list.
//! Proposal failure is recovered locally: the workflow falls back to the
//! deterministic template path and never aborts.

use crate::domain::{ActionProposal, ActionType, Medication};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// An untrusted draft bundle as returned by a proposal collaborator.
///
/// Every field defaults so that partially malformed output still parses;
/// whatever cannot be salvaged is dropped by the sanitizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftBundle {
    #[serde(default)]
    pub schedule: Vec<DraftDose>,
    #[serde(default)]
    pub precautions: Vec<String>,
    #[serde(default)]
    pub why: Vec<String>,
    #[serde(default)]
    pub actions: Vec<DraftAction>,
    #[serde(default)]
    pub needs_info: bool,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// A draft dose. Times and buckets are plain strings here; validation
/// happens in the sanitizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftDose {
    #[serde(default)]
    pub med_name: String,
    #[serde(default)]
    pub time_local: String,
    #[serde(default)]
    pub bucket: String,
}

/// A draft action proposal. The type is a plain string checked against the
/// allow-list; the approval flag is ignored and forced on downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftAction {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// Result of the two-stage proposal pipeline: either an untrusted draft to
/// sanitize, or an explicit fallback marker. Both arms funnel through the
/// same sanitizer.
#[derive(Debug, Clone)]
pub enum ProposalOutcome {
    Proposed(DraftBundle),
    Fallback { reason: String },
}

/// Drafts a schedule bundle for a medication list.
#[async_trait]
pub trait PlanProposer: Send + Sync {
    async fn propose(
        &self,
        meds: &[Medication],
        free_text: &str,
        timezone: &str,
    ) -> Result<DraftBundle>;
}

/// Runs the proposer and converts any failure into a fallback marker.
pub async fn obtain_draft(
    proposer: &dyn PlanProposer,
    meds: &[Medication],
    free_text: &str,
    timezone: &str,
) -> ProposalOutcome {
    if meds.is_empty() {
        return ProposalOutcome::Fallback {
            reason: "no medications to plan".to_string(),
        };
    }
    match proposer.propose(meds, free_text, timezone).await {
        Ok(bundle) => ProposalOutcome::Proposed(bundle),
        Err(e) => {
            tracing::warn!("plan proposal failed, using heuristic fallback: {:#}", e);
            ProposalOutcome::Fallback {
                reason: format!("{:#}", e),
            }
        }
    }
}

/// Deterministic built-in proposer.
///
/// Mirrors what the sanitizer's template repair would generate, plus a
/// calendar-event suggestion when the free text mentions an appointment.
/// Useful as the default collaborator when no generative backend is wired.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedProposer;

const APPOINTMENT_KEYWORDS: [&str; 5] = ["doctor", "appointment", "checkup", "clinic", "meeting"];

#[async_trait]
impl PlanProposer for RuleBasedProposer {
    async fn propose(
        &self,
        meds: &[Medication],
        free_text: &str,
        _timezone: &str,
    ) -> Result<DraftBundle> {
        let mut schedule = Vec::new();
        for med in meds {
            for (bucket, hhmm) in crate::sanitizer::template_slots(med.frequency) {
                schedule.push(DraftDose {
                    med_name: med.name.clone(),
                    time_local: hhmm.to_string(),
                    bucket: bucket.wire().to_string(),
                });
            }
        }

        let mut actions = Vec::new();
        let text = free_text.to_lowercase();
        if APPOINTMENT_KEYWORDS.iter().any(|k| text.contains(k)) {
            actions.push(DraftAction {
                kind: ActionType::CreateCalendarEvent.wire().to_string(),
                payload: json!({
                    "title": "Doctor appointment (suggested)",
                    "duration_minutes": 30,
                }),
            });
        }

        Ok(DraftBundle {
            schedule,
            actions,
            ..DraftBundle::default()
        })
    }
}

/// Builds the canonical default action set for a non-empty schedule.
pub fn default_actions(schedule_count: usize, miss_threshold: u32) -> Vec<ActionProposal> {
    if schedule_count == 0 {
        return Vec::new();
    }
    vec![
        ActionProposal::new(
            ActionType::CreateReminders,
            json!({ "count": schedule_count }),
        ),
        ActionProposal::new(
            ActionType::SetEscalationRule,
            json!({ "miss_threshold": miss_threshold }),
        ),
    ]
}
