//! Medication extraction collaborator interface.
//!
//! Extraction turns raw text (typed notes, OCR output) into medication
//! candidates. It is a pure function of its input with no side effects; a
//! generative implementation can be plugged in behind the trait, with the
//! rule-based extractor below as the always-available fallback.

use crate::domain::{Frequency, Medication};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// Extracts medication candidates from free text.
#[async_trait]
pub trait MedicationExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<Medication>>;
}

/// Frequency keywords, matched on word boundaries so that e.g. "od" does not
/// fire inside "food". Multi-word phrases precede their prefixes.
fn freq_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(once daily|twice daily|thrice daily|as needed|1x|2x|3x|4x|once|twice|thrice|od|bd|bid|tid|qid|weekly|prn)\b",
        )
        .expect("static regex")
    })
}

fn freq_code_for(keyword: &str) -> &'static str {
    match keyword {
        "once daily" | "once" | "od" | "1x" => "OD",
        "twice daily" | "twice" | "bd" | "bid" | "2x" => "BID",
        "thrice daily" | "thrice" | "tid" | "3x" => "TID",
        "qid" | "4x" => "QID",
        "weekly" => "WEEKLY",
        "prn" | "as needed" => "PRN",
        _ => "UNKNOWN",
    }
}

fn med_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(tab|tabs|tablet|cap|caps|capsule|mg|mcg|ml|od|bd|bid|tid|qid|daily|weekly|prn)\b")
            .expect("static regex")
    })
}

fn strength_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+\s?(mg|mcg|g|ml))").expect("static regex"))
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z][A-Za-z0-9\- ]+)").expect("static regex"))
}

/// Deterministic line-oriented extractor.
///
/// Only lines that look like medication instructions (strength, frequency or
/// dosage-form keywords) produce candidates; plain prose is ignored so that
/// normal sentences are not parsed as medicine names.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedExtractor;

impl RuleBasedExtractor {
    /// Synchronous extraction core, shared by the trait impl and the
    /// orchestrator's local fallback path.
    pub fn extract_lines(text: &str) -> Vec<Medication> {
        let mut meds = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            // Must look like a medicine line (strength/frequency/keywords).
            if !(med_hint_re().is_match(line) || strength_re().is_match(line)) {
                continue;
            }

            let strength_match = strength_re().find(line);
            let freq_match = freq_keyword_re().find(line);

            // The name is the leading alphabetic run before the strength or
            // frequency token, whichever comes first.
            let name_end = match (strength_match, freq_match) {
                (Some(s), Some(f)) => s.start().min(f.start()),
                (Some(s), None) => s.start(),
                (None, Some(f)) => f.start(),
                (None, None) => line.len(),
            };
            let Some(name_match) = name_re().captures(&line[..name_end]) else {
                continue;
            };
            let name = name_match[1].trim().trim_end_matches('-').trim().to_string();
            if name.is_empty() {
                continue;
            }

            let strength = strength_match.map(|m| m.as_str().to_string());
            let freq = freq_match.map(|m| freq_code_for(&m.as_str().to_lowercase()));

            // Without a frequency or a strength this is likely a false
            // positive, skip it.
            if freq.is_none() && strength.is_none() {
                continue;
            }

            let line_low = line.to_lowercase();
            let with_food = if line_low.contains("with food") || line_low.contains("after food") {
                Some(true)
            } else if line_low.contains("before food") || line_low.contains("empty stomach") {
                Some(false)
            } else {
                None
            };

            meds.push(Medication {
                name,
                strength,
                // A strength-only line still gets a safe OD default because
                // it already looks like a medication instruction.
                frequency: Frequency::parse(freq.unwrap_or("OD")),
                with_food,
                instructions: Some(line.to_string()),
                duration_days: None,
            });
        }
        meds
    }
}

#[async_trait]
impl MedicationExtractor for RuleBasedExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<Medication>> {
        Ok(Self::extract_lines(text))
    }
}
