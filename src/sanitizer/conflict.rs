//! Deterministic dose-time conflict resolution.
//!
//! Ensures no two doses share the same local time within the same bucket,
//! whenever the bucket window still has free slots. Resolution walks each
//! bucket's doses in a total order (time, medication name, dose id), so the
//! outcome is reproducible for a given schedule.

use crate::domain::{Bucket, Dose};
use std::collections::HashSet;

/// Probe step between candidate times, in minutes.
pub const STEP_MINUTES: u32 = 10;

/// Maximum probe steps in each direction (12 steps of 10 minutes ~ 2 hours).
const MAX_STEPS: u32 = 12;

const LAST_MINUTE: u32 = 23 * 60 + 59;

/// Parses "HH:MM" into minutes from midnight. Rejects out-of-range fields
/// and anything that is not exactly two colon-separated numbers.
pub fn parse_hhmm(hhmm: &str) -> Option<u32> {
    let (h, m) = hhmm.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Formats minutes from midnight as "HH:MM", clamped to the day.
pub fn format_hhmm(total_minutes: u32) -> String {
    let clamped = total_minutes.min(LAST_MINUTE);
    format!("{:02}:{:02}", clamped / 60, clamped % 60)
}

fn in_window(bucket: Bucket, minutes: u32) -> bool {
    let (lo, hi) = bucket.window();
    (lo..=hi).contains(&minutes)
}

/// Resolves same-time collisions within each bucket independently.
///
/// For each bucket, doses are visited in (time, med name, dose id) order.
/// A dose whose time falls outside its bucket window is first snapped to the
/// bucket anchor. Each dose then claims its base time if free, otherwise the
/// first free time probing forward in 10-minute steps (bounded), then
/// backward. If both probes exhaust, the dose keeps its colliding time; that
/// degradation is accepted, not an error.
pub fn resolve_time_conflicts(schedule: &mut [Dose]) {
    for bucket in Bucket::ALL {
        let mut idxs: Vec<usize> = schedule
            .iter()
            .enumerate()
            .filter(|(_, d)| d.bucket == bucket && !d.time_local.is_empty())
            .map(|(i, _)| i)
            .collect();
        if idxs.is_empty() {
            continue;
        }

        idxs.sort_by(|&a, &b| {
            let da = &schedule[a];
            let db = &schedule[b];
            let ma = parse_hhmm(&da.time_local).unwrap_or(0);
            let mb = parse_hhmm(&db.time_local).unwrap_or(0);
            (ma, da.med_name.as_str(), da.dose_id.as_str())
                .cmp(&(mb, db.med_name.as_str(), db.dose_id.as_str()))
        });

        let mut used: HashSet<u32> = HashSet::new();

        for i in idxs {
            let base = match parse_hhmm(&schedule[i].time_local) {
                Some(m) if in_window(bucket, m) => m,
                _ => bucket.anchor_minutes(),
            };

            let mut chosen = base;
            let mut found = false;

            // forward probe
            for k in 0..=MAX_STEPS {
                let cand = base + k * STEP_MINUTES;
                if !in_window(bucket, cand) {
                    break;
                }
                if !used.contains(&cand) {
                    chosen = cand;
                    found = true;
                    break;
                }
            }

            // backward probe
            if !found {
                for k in 1..=MAX_STEPS {
                    let Some(cand) = base.checked_sub(k * STEP_MINUTES) else {
                        break;
                    };
                    if !in_window(bucket, cand) {
                        break;
                    }
                    if !used.contains(&cand) {
                        chosen = cand;
                        break;
                    }
                }
            }

            used.insert(chosen);
            schedule[i].time_local = format_hhmm(chosen);
        }
    }
}
