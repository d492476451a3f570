use super::*;
use crate::proposal::{DraftAction, DraftBundle, DraftDose};

fn med(name: &str, freq: &str) -> Medication {
    Medication {
        name: name.to_string(),
        strength: None,
        frequency: Frequency::parse(freq),
        with_food: None,
        instructions: None,
        duration_days: None,
    }
}

fn med_full(name: &str, strength: &str, freq: &str, with_food: bool) -> Medication {
    Medication {
        name: name.to_string(),
        strength: Some(strength.to_string()),
        frequency: Frequency::parse(freq),
        with_food: Some(with_food),
        instructions: None,
        duration_days: None,
    }
}

fn draft_dose(med_name: &str, time: &str, bucket: &str) -> DraftDose {
    DraftDose {
        med_name: med_name.to_string(),
        time_local: time.to_string(),
        bucket: bucket.to_string(),
    }
}

fn sanitize(meds: &[Medication], draft: Option<&DraftBundle>) -> SanitizedPlan {
    sanitize_plan(&PlanId::from("plan_test"), meds, draft, &SanitizeOptions::default())
}

#[test]
fn test_dose_count_matches_frequency_for_all_codes() {
    let cases = [
        ("OD", 1),
        ("BID", 2),
        ("TID", 3),
        ("QID", 4),
        ("WEEKLY", 1),
        ("EVERY_3_DAYS", 1),
        ("PRN", 0),
        ("UNKNOWN", 0),
        ("", 0),
    ];
    for (freq, expected) in cases {
        let meds = vec![med("TestMed", freq)];
        let out = sanitize(&meds, None);
        assert_eq!(
            out.plan.schedule.len(),
            expected,
            "frequency {:?} produced {} doses",
            freq,
            out.plan.schedule.len()
        );
    }
}

#[test]
fn test_two_medication_schedule_scenario() {
    let meds = vec![
        med_full("Metformin", "500mg", "BID", true),
        med_full("Amlodipine", "5mg", "OD", false),
    ];
    let out = sanitize(&meds, None);

    assert_eq!(out.plan.schedule.len(), 3);
    assert!(!out.needs_info);
    assert!(out.questions.is_empty());

    let metformin: Vec<&Dose> = out
        .plan
        .schedule
        .iter()
        .filter(|d| d.med_name == "Metformin")
        .collect();
    assert_eq!(metformin.len(), 2);
    assert_eq!(metformin[0].bucket, Bucket::Morning);
    assert_eq!(metformin[0].time_local, "08:00");
    assert_eq!(metformin[1].bucket, Bucket::Night);
    assert_eq!(metformin[1].time_local, "20:00");
    assert_eq!(metformin[0].notes, "Take with food • 500mg");

    let amlodipine: Vec<&Dose> = out
        .plan
        .schedule
        .iter()
        .filter(|d| d.med_name == "Amlodipine")
        .collect();
    assert_eq!(amlodipine.len(), 1);
    assert_eq!(amlodipine[0].bucket, Bucket::Morning);
    assert_eq!(amlodipine[0].time_local, "09:00");
    // with_food=false adds no food note
    assert_eq!(amlodipine[0].notes, "5mg");

    // No intra-bucket collisions
    let morning: Vec<&str> = out
        .plan
        .schedule
        .iter()
        .filter(|d| d.bucket == Bucket::Morning)
        .map(|d| d.time_local.as_str())
        .collect();
    assert_eq!(morning.len(), 2);
    assert_ne!(morning[0], morning[1]);
}

#[test]
fn test_two_od_medications_resolver_shifts_second() {
    let meds = vec![med("Atorvastatin", "OD"), med("Lisinopril", "OD")];
    let out = sanitize(&meds, None);

    assert_eq!(out.plan.schedule.len(), 2);
    let mut times: Vec<(&str, &str)> = out
        .plan
        .schedule
        .iter()
        .map(|d| (d.med_name.as_str(), d.time_local.as_str()))
        .collect();
    times.sort();
    // "Atorvastatin" wins the 09:00 slot on the name tie-break.
    assert_eq!(times, vec![("Atorvastatin", "09:00"), ("Lisinopril", "09:10")]);
}

#[test]
fn test_prn_medication_forces_needs_info_with_one_question_per_cause() {
    let meds = vec![med("Paracetamol", "PRN")];
    let out = sanitize(&meds, None);

    assert!(out.plan.schedule.is_empty());
    assert!(out.needs_info);
    // One question for the PRN frequency, one for the empty schedule;
    // exactly one of them names the medication.
    assert_eq!(out.questions.len(), 2);
    assert_eq!(
        out.questions
            .iter()
            .filter(|q| q.contains("Paracetamol"))
            .count(),
        1
    );
}

#[test]
fn test_needs_info_iff_conditions() {
    // No medications at all: no clarification required.
    let out = sanitize(&[], None);
    assert!(!out.needs_info);
    assert!(out.questions.is_empty());

    // Schedulable medication: no clarification.
    let out = sanitize(&[med("Metformin", "BID")], None);
    assert!(!out.needs_info);

    // Unknown frequency: clarification.
    let out = sanitize(&[med("Mystery", "whenever")], None);
    assert!(out.needs_info);
    assert!(!out.questions.is_empty());

    // All-PRN list leaves the schedule empty: both causes, deduplicated
    // question per medication plus the empty-schedule question.
    let out = sanitize(&[med("A", "PRN"), med("B", "PRN")], None);
    assert!(out.needs_info);
    assert_eq!(out.questions.len(), 3);
}

#[test]
fn test_duplicate_cause_yields_single_question() {
    // Same medication listed twice: the question text is identical and must
    // not be duplicated.
    let meds = vec![med("Paracetamol", "PRN"), med("Paracetamol", "PRN")];
    let out = sanitize(&meds, None);
    assert_eq!(
        out.questions
            .iter()
            .filter(|q| q.contains("Paracetamol"))
            .count(),
        1
    );
}

#[test]
fn test_draft_doses_with_unknown_med_bad_time_or_bucket_are_dropped() {
    let meds = vec![med("Metformin", "BID")];
    let draft = DraftBundle {
        schedule: vec![
            draft_dose("Metformin", "08:00", "MORNING"),
            draft_dose("Metformin", "20:00", "NIGHT"),
            draft_dose("Oxycodone", "08:00", "MORNING"), // not in list
            draft_dose("Metformin", "25:99", "MORNING"), // invalid time
            draft_dose("Metformin", "08:00", "DAWN"),    // invalid bucket
        ],
        ..DraftBundle::default()
    };
    let out = sanitize(&meds, Some(&draft));

    // The two valid doses match the expected BID count and are kept.
    assert_eq!(out.plan.schedule.len(), 2);
    assert!(out.plan.schedule.iter().all(|d| d.med_name == "Metformin"));
    assert!(out
        .audit
        .iter()
        .any(|e| e.event == "sanitize.draft.dropped"));
}

#[test]
fn test_wrong_dose_count_regenerates_from_template() {
    let meds = vec![med("Metformin", "BID")];
    // Draft proposes only one dose for a BID medication.
    let draft = DraftBundle {
        schedule: vec![draft_dose("Metformin", "10:30", "MORNING")],
        ..DraftBundle::default()
    };
    let out = sanitize(&meds, Some(&draft));

    assert_eq!(out.plan.schedule.len(), 2);
    assert_eq!(out.plan.schedule[0].time_local, "08:00");
    assert_eq!(out.plan.schedule[1].time_local, "20:00");
    assert!(out.audit.iter().any(|e| e.event == "sanitize.regenerated"));
}

#[test]
fn test_matching_draft_count_keeps_draft_times() {
    let meds = vec![med("Metformin", "BID")];
    let draft = DraftBundle {
        schedule: vec![
            draft_dose("metformin", "07:30", "MORNING"),
            draft_dose("METFORMIN", "21:30", "NIGHT"),
        ],
        ..DraftBundle::default()
    };
    let out = sanitize(&meds, Some(&draft));

    let times: Vec<&str> = out
        .plan
        .schedule
        .iter()
        .map(|d| d.time_local.as_str())
        .collect();
    assert_eq!(times, vec!["07:30", "21:30"]);
    // Canonical name casing comes from the medication record.
    assert!(out.plan.schedule.iter().all(|d| d.med_name == "Metformin"));
}

#[test]
fn test_notes_come_from_medication_record_not_draft() {
    let meds = vec![med_full("Metformin", "500mg", "OD", true)];
    let draft = DraftBundle {
        schedule: vec![draft_dose("Metformin", "09:00", "MORNING")],
        ..DraftBundle::default()
    };
    let out = sanitize(&meds, Some(&draft));
    assert_eq!(out.plan.schedule[0].notes, "Take with food • 500mg");
}

#[test]
fn test_repeat_and_duration_metadata() {
    let mut every3 = med("Alendronate", "EVERY_3_DAYS");
    every3.duration_days = Some(90);
    let mut out_of_range = med("ShortCourse", "OD");
    out_of_range.duration_days = Some(4000);

    let out = sanitize(&[every3, out_of_range], None);

    let alendronate = &out.plan.schedule[0];
    assert_eq!(alendronate.repeat_every_days, Some(3));
    assert_eq!(alendronate.duration_days, Some(90));

    let short = &out.plan.schedule[1];
    assert_eq!(short.repeat_every_days, None);
    assert_eq!(short.duration_days, None, "out-of-range duration ignored");
}

#[test]
fn test_precautions_replaced_when_empty_or_leaking() {
    let meds = vec![med("Metformin", "OD")];

    // Empty draft precautions
    let out = sanitize(&meds, Some(&DraftBundle::default()));
    assert_eq!(out.plan.precautions, default_precautions());

    // Frequency-code text leaking into precautions
    let draft = DraftBundle {
        precautions: vec!["Take OD as directed".to_string()],
        ..DraftBundle::default()
    };
    let out = sanitize(&meds, Some(&draft));
    assert_eq!(out.plan.precautions, default_precautions());
    assert!(out
        .audit
        .iter()
        .any(|e| e.event == "sanitize.precautions.replaced"));
}

#[test]
fn test_clean_precautions_kept_trimmed_and_capped() {
    let meds = vec![med("Metformin", "OD")];
    let draft = DraftBundle {
        precautions: (0..10)
            .map(|i| format!("  Precaution number {}  ", i))
            .collect(),
        ..DraftBundle::default()
    };
    let out = sanitize(&meds, Some(&draft));
    assert_eq!(out.plan.precautions.len(), 6);
    assert_eq!(out.plan.precautions[0], "Precaution number 0");
}

#[test]
fn test_why_is_deterministic_and_ignores_draft() {
    let meds = vec![med_full("Metformin", "500mg", "BID", true)];
    let draft = DraftBundle {
        why: vec!["This will cure your diabetes".to_string()],
        ..DraftBundle::default()
    };
    let out = sanitize(&meds, Some(&draft));

    assert_eq!(out.plan.why.len(), 2);
    assert!(out.plan.why[0].starts_with("Metformin: scheduled to match BID"));
    assert_eq!(out.plan.why[1], "Metformin: take with food (as per your input).");
    assert!(!out.plan.why.iter().any(|w| w.contains("cure")));
}

#[test]
fn test_actions_overridden_when_schedule_exists() {
    let meds = vec![med("Metformin", "BID")];
    let draft = DraftBundle {
        schedule: vec![
            draft_dose("Metformin", "08:00", "MORNING"),
            draft_dose("Metformin", "20:00", "NIGHT"),
        ],
        actions: vec![
            DraftAction {
                kind: "CREATE_CALENDAR_EVENT".to_string(),
                payload: serde_json::json!({"title": "visit"}),
            },
            DraftAction {
                kind: "WIRE_MONEY".to_string(),
                payload: serde_json::Value::Null,
            },
        ],
        ..DraftBundle::default()
    };
    let out = sanitize(&meds, Some(&draft));

    let kinds: Vec<ActionType> = out.plan.actions.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![ActionType::CreateReminders, ActionType::SetEscalationRule]
    );
    assert!(out.plan.actions.iter().all(|a| a.needs_approval));
    assert_eq!(out.plan.actions[0].payload["count"], 2);
    assert!(out
        .audit
        .iter()
        .any(|e| e.event == "sanitize.actions.overridden"));
}

#[test]
fn test_allow_listed_actions_survive_only_without_schedule() {
    // PRN-only list: no schedule, so admitted draft actions are kept.
    let meds = vec![med("Paracetamol", "PRN")];
    let draft = DraftBundle {
        actions: vec![
            DraftAction {
                kind: "SEND_ALERT".to_string(),
                payload: serde_json::json!({"to": "caregiver"}),
            },
            DraftAction {
                kind: "FORMAT_DISK".to_string(),
                payload: serde_json::Value::Null,
            },
        ],
        ..DraftBundle::default()
    };
    let out = sanitize(&meds, Some(&draft));

    assert!(out.plan.schedule.is_empty());
    assert_eq!(out.plan.actions.len(), 1);
    assert_eq!(out.plan.actions[0].kind, ActionType::SendAlert);
    assert!(out.plan.actions[0].needs_approval);
}

#[test]
fn test_sanitizer_is_idempotent() {
    let meds = vec![
        med_full("Metformin", "500mg", "BID", true),
        med_full("Amlodipine", "5mg", "OD", false),
        med("Vitamin D", "WEEKLY"),
    ];
    let first = sanitize(&meds, None);

    // Feed the sanitized schedule back as a draft.
    let echo = DraftBundle {
        schedule: first
            .plan
            .schedule
            .iter()
            .map(|d| draft_dose(&d.med_name, &d.time_local, d.bucket.wire()))
            .collect(),
        precautions: first.plan.precautions.clone(),
        why: first.plan.why.clone(),
        ..DraftBundle::default()
    };
    let second = sanitize(&meds, Some(&echo));

    let shape = |p: &SanitizedPlan| {
        p.plan
            .schedule
            .iter()
            .map(|d| {
                (
                    d.med_name.clone(),
                    d.time_local.clone(),
                    d.bucket,
                    d.notes.clone(),
                    d.repeat_every_days,
                    d.duration_days,
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&first), shape(&second));
    assert_eq!(first.needs_info, second.needs_info);
    assert_eq!(first.plan.precautions, second.plan.precautions);
    assert_eq!(first.plan.why, second.plan.why);
    assert_eq!(first.plan.actions, second.plan.actions);
}

#[test]
fn test_degenerate_input_degrades_to_empty_plan() {
    // Medication with an empty name and unknown frequency: nothing can be
    // scheduled, needs-info is set, and the sanitizer still returns a plan.
    let meds = vec![med("", ""), med("Mystery", "")];
    let out = sanitize(&meds, None);

    assert!(out.plan.schedule.is_empty());
    assert!(out.needs_info);
    assert!(!out.questions.is_empty());
    assert_eq!(out.plan.status, PlanStatus::Proposed);
    assert!(out.plan.actions.is_empty());
}

#[test]
fn test_dose_ids_are_unique() {
    let meds = vec![med("A", "QID"), med("B", "QID"), med("C", "TID")];
    let out = sanitize(&meds, None);
    let ids: std::collections::HashSet<&str> = out
        .plan
        .schedule
        .iter()
        .map(|d| d.dose_id.as_str())
        .collect();
    assert_eq!(ids.len(), out.plan.schedule.len());
}
