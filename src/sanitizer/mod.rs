//! Plan sanitizer: repairs an untrusted draft schedule into a canonical plan.
//!
//! The draft bundle comes from a collaborator whose output may be absent,
//! partial or fabricated. Everything safety-relevant (dose counts, notes,
//! rationale, actions) is re-derived from the canonical medication list;
//! the draft only contributes dose times that survive validation.
//!
//! This component never fails. On any inconsistency it degrades to the
//! smallest valid output: an empty schedule with needs-info set.

pub mod conflict;

#[cfg(test)]
mod tests;

use crate::audit::AuditEvent;
use crate::domain::{
    fresh_dose_id, ActionProposal, ActionType, Bucket, Dose, Frequency, Medication, Plan, PlanId,
    PlanStatus,
};
use crate::proposal::{default_actions, DraftBundle};
use conflict::{parse_hhmm, resolve_time_conflicts};
use regex::Regex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Tunables injected from configuration.
#[derive(Debug, Clone)]
pub struct SanitizeOptions {
    /// Missed-dose threshold carried by the default escalation action.
    pub escalation_miss_threshold: u32,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            escalation_miss_threshold: 2,
        }
    }
}

/// Output of a sanitizer run: the canonical plan, the clarification state,
/// and one audit event per safety decision taken.
#[derive(Debug, Clone)]
pub struct SanitizedPlan {
    pub plan: Plan,
    pub needs_info: bool,
    pub questions: Vec<String>,
    pub audit: Vec<AuditEvent>,
}

/// Fixed per-frequency time template: one (bucket, time) pair per expected
/// dose slot. Clarification-needing frequencies get no slots.
pub fn template_slots(frequency: Frequency) -> Vec<(Bucket, &'static str)> {
    match frequency {
        Frequency::Od => vec![(Bucket::Morning, "09:00")],
        Frequency::Bid => vec![(Bucket::Morning, "08:00"), (Bucket::Night, "20:00")],
        Frequency::Tid => vec![
            (Bucket::Morning, "08:00"),
            (Bucket::Afternoon, "14:00"),
            (Bucket::Night, "20:00"),
        ],
        Frequency::Qid => vec![
            (Bucket::Morning, "08:00"),
            (Bucket::Afternoon, "12:00"),
            (Bucket::Afternoon, "16:00"),
            (Bucket::Night, "20:00"),
        ],
        Frequency::Weekly => vec![(Bucket::Morning, "09:00")],
        Frequency::EveryNDays(_) => vec![(Bucket::Morning, "09:00")],
        Frequency::Prn | Frequency::Unknown => Vec::new(),
    }
}

/// The fixed fallback precaution set.
pub fn default_precautions() -> Vec<String> {
    vec![
        "Do not double-dose after a missed dose; follow your doctor/pharmacist guidance."
            .to_string(),
        "If you feel unusual side effects (dizziness, fainting, severe low sugar symptoms), \
         seek medical help."
            .to_string(),
        "Follow the prescription label exactly; this app does not prescribe or diagnose."
            .to_string(),
    ]
}

/// Deterministic per-medication rationale. Draft rationale is never surfaced:
/// it could carry fabricated medical claims.
pub fn deterministic_why(meds: &[Medication]) -> Vec<String> {
    let mut out = Vec::new();
    for med in meds {
        let name = med.name.trim();
        if name.is_empty() {
            continue;
        }
        match med.frequency {
            Frequency::Prn | Frequency::Unknown => out.push(format!(
                "{}: frequency needs confirmation before reminders are finalized.",
                name
            )),
            Frequency::EveryNDays(n) => out.push(format!(
                "{}: scheduled once every {} days for routine adherence.",
                name, n
            )),
            Frequency::Od => out.push(format!(
                "{}: scheduled once daily for routine consistency.",
                name
            )),
            other => out.push(format!(
                "{}: scheduled to match {} frequency and reduce missed doses.",
                name,
                other.wire()
            )),
        }
        if med.with_food == Some(true) {
            out.push(format!("{}: take with food (as per your input).", name));
        }
    }

    let mut seen = HashSet::new();
    out.retain(|line| seen.insert(line.clone()));
    out.truncate(MAX_LIST_ENTRIES);
    out
}

const MAX_LIST_ENTRIES: usize = 6;

/// Matches frequency-code text leaking into precautions, a tell that a
/// collaborator echoed its input instead of producing guidance.
fn frequency_leak_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(OD|BID|TID|QID|WEEKLY|EVERY_\d+_DAYS)\b").expect("static regex")
    })
}

/// Repairs and validates a draft bundle against the canonical medication
/// list, producing a plan that satisfies the scheduling invariants.
///
/// `draft` is `None` on the fallback path; the schedule then comes entirely
/// from the per-frequency templates.
pub fn sanitize_plan(
    plan_id: &PlanId,
    meds: &[Medication],
    draft: Option<&DraftBundle>,
    opts: &SanitizeOptions,
) -> SanitizedPlan {
    let mut audit = Vec::new();

    let med_map: HashMap<String, &Medication> = meds
        .iter()
        .filter(|m| !m.name.trim().is_empty())
        .map(|m| (m.name.trim().to_lowercase(), m))
        .collect();

    // 1. Keep only draft doses that reference a known medication, carry a
    //    valid HH:MM time and a valid bucket. Notes and metadata come from
    //    the medication record, never from the draft.
    let mut kept: Vec<Dose> = Vec::new();
    let mut dropped = 0usize;
    if let Some(bundle) = draft {
        for draft_dose in &bundle.schedule {
            let key = draft_dose.med_name.trim().to_lowercase();
            let Some(med) = med_map.get(&key) else {
                dropped += 1;
                continue;
            };
            let Some(bucket) = Bucket::parse(&draft_dose.bucket) else {
                dropped += 1;
                continue;
            };
            let time = draft_dose.time_local.trim();
            if parse_hhmm(time).is_none() {
                dropped += 1;
                continue;
            }
            kept.push(build_dose(med, bucket, time));
        }
        if dropped > 0 {
            audit.push(AuditEvent::new(
                "sanitize.draft.dropped",
                json!({ "count": dropped }),
            ));
        }
    }

    // 2. Enforce the expected dose count per medication; on any mismatch the
    //    draft doses for that medication are discarded and regenerated from
    //    the fixed template.
    let mut schedule: Vec<Dose> = Vec::new();
    let mut regenerated: Vec<String> = Vec::new();
    for med in meds {
        let name = med.name.trim();
        if name.is_empty() {
            continue;
        }
        let expected = med.frequency.expected_dose_count();
        if expected == 0 {
            continue; // PRN/UNKNOWN: no automatic reminders
        }

        // Take (not borrow) this medication's kept doses, so a duplicated
        // medication entry cannot claim the same dose twice.
        let mut existing = Vec::new();
        let mut rest = Vec::new();
        for dose in kept.drain(..) {
            if dose.med_name.to_lowercase() == name.to_lowercase() {
                existing.push(dose);
            } else {
                rest.push(dose);
            }
        }
        kept = rest;

        if existing.len() == expected {
            schedule.extend(existing);
            continue;
        }

        if draft.is_some() {
            regenerated.push(name.to_string());
        }
        for (bucket, hhmm) in template_slots(med.frequency).into_iter().take(expected) {
            schedule.push(build_dose(med, bucket, hhmm));
        }
    }
    if !regenerated.is_empty() {
        audit.push(AuditEvent::new(
            "sanitize.regenerated",
            json!({ "medications": regenerated }),
        ));
    }

    // 3. Resolve intra-bucket time collisions.
    resolve_time_conflicts(&mut schedule);

    // Duplicate dose ids would mean broken id generation, not bad input.
    let unique_ids: HashSet<&str> = schedule.iter().map(|d| d.dose_id.as_str()).collect();
    assert_eq!(
        unique_ids.len(),
        schedule.len(),
        "duplicate dose id generated"
    );

    // 4. Clarification state. Holds exactly when some medication needs its
    //    frequency confirmed, or medications exist but nothing was scheduled.
    let mut needs_info = false;
    let mut questions: Vec<String> = Vec::new();
    for med in meds {
        if med.frequency.needs_clarification() {
            needs_info = true;
            let name = med.name.trim();
            let display = if name.is_empty() { "this medicine" } else { name };
            let question = format!(
                "Confirm frequency for {} (OD/BID/TID) or PRN/as-needed.",
                display
            );
            if !questions.contains(&question) {
                questions.push(question);
            }
        }
    }
    if !meds.is_empty() && schedule.is_empty() {
        needs_info = true;
        let question =
            "Please confirm medicine frequency (OD/BID/TID) so reminders can be created."
                .to_string();
        if !questions.contains(&question) {
            questions.push(question);
        }
    }
    if needs_info {
        audit.push(AuditEvent::new(
            "sanitize.needs_info.forced",
            json!({ "questions": questions.len() }),
        ));
    }

    // 5. Precautions: empty or frequency-leaking draft precautions are
    //    replaced by the fixed default set.
    let raw_precautions: Vec<String> = draft
        .map(|b| {
            b.precautions
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let leaked = raw_precautions
        .iter()
        .any(|p| frequency_leak_re().is_match(p));
    let precautions = if raw_precautions.is_empty() || leaked {
        if leaked {
            audit.push(AuditEvent::new(
                "sanitize.precautions.replaced",
                json!({ "reason": "frequency_leak" }),
            ));
        }
        default_precautions()
    } else {
        let mut kept_precautions = raw_precautions;
        kept_precautions.truncate(MAX_LIST_ENTRIES);
        kept_precautions
    };

    // 6. Rationale is always deterministic.
    let why = deterministic_why(meds);

    // 7. Actions: admit allow-listed draft actions with approval forced on,
    //    then override with the canonical defaults whenever a schedule
    //    exists. The override is a safety policy, not a merge.
    let mut actions: Vec<ActionProposal> = draft
        .map(|b| {
            b.actions
                .iter()
                .filter_map(|a| {
                    ActionType::parse(&a.kind)
                        .map(|kind| ActionProposal::new(kind, a.payload.clone()))
                })
                .collect()
        })
        .unwrap_or_default();
    if !schedule.is_empty() {
        let proposed = actions.len();
        actions = default_actions(schedule.len(), opts.escalation_miss_threshold);
        if draft.is_some() {
            audit.push(AuditEvent::new(
                "sanitize.actions.overridden",
                json!({ "proposed": proposed, "enforced": actions.len() }),
            ));
        }
    }

    let plan = Plan {
        plan_id: plan_id.clone(),
        status: PlanStatus::Proposed,
        schedule,
        precautions,
        why,
        actions,
        safety_note: crate::domain::SAFETY_NOTE.to_string(),
    };

    SanitizedPlan {
        plan,
        needs_info,
        questions,
        audit,
    }
}

/// Builds a canonical dose for a medication, with a fresh id and notes
/// derived only from the medication record.
fn build_dose(med: &Medication, bucket: Bucket, time_local: &str) -> Dose {
    Dose {
        dose_id: fresh_dose_id(),
        med_name: med.name.trim().to_string(),
        time_local: time_local.to_string(),
        bucket,
        notes: dose_notes(med),
        repeat_every_days: med.frequency.repeat_every_days(),
        duration_days: med.duration_days.filter(|d| (1..=365).contains(d)),
    }
}

fn dose_notes(med: &Medication) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if med.with_food == Some(true) {
        parts.push("Take with food");
    }
    if let Some(strength) = med.strength.as_deref() {
        let strength = strength.trim();
        if !strength.is_empty() {
            parts.push(strength);
        }
    }
    parts.join(" • ")
}
