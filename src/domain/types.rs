//! Core data types for medications, doses and plans.
//!
//! Wire formats (field names and enum strings) are stable: they are what the
//! checkpoint store persists and what the CLI prints, so changes here require
//! a migration story.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standing disclaimer attached to every plan response.
pub const SAFETY_NOTE: &str = "Not medical advice. This service organizes user-provided medicines. \
     Always confirm instructions with a doctor/pharmacist.";

/// Unique identifier for a plan. Doubles as the resumption token for a
/// suspended workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(pub String);

impl PlanId {
    /// Creates a new random plan ID of the form `plan_<32 hex>`.
    pub fn new() -> Self {
        Self(format!("plan_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for PlanId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How often a medication is taken. Drives the expected dose count during
/// plan repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    Od,
    Bid,
    Tid,
    Qid,
    Weekly,
    Prn,
    /// Once every N days (wire form `EVERY_<N>_DAYS`).
    EveryNDays(u32),
    /// Unrecognized or missing frequency. Always forces clarification.
    Unknown,
}

impl Frequency {
    /// Parses a wire frequency string. Unrecognized input (including the
    /// empty string) parses to `Unknown` rather than failing: frequency
    /// strings arrive from untrusted collaborators.
    pub fn parse(s: &str) -> Self {
        let f = s.trim().to_ascii_uppercase();
        match f.as_str() {
            "OD" => Self::Od,
            "BID" => Self::Bid,
            "TID" => Self::Tid,
            "QID" => Self::Qid,
            "WEEKLY" => Self::Weekly,
            "PRN" => Self::Prn,
            _ => match every_n_days(&f) {
                Some(n) => Self::EveryNDays(n),
                None => Self::Unknown,
            },
        }
    }

    /// The number of daily dose slots this frequency must produce.
    pub fn expected_dose_count(&self) -> usize {
        match self {
            Self::Od | Self::Weekly | Self::EveryNDays(_) => 1,
            Self::Bid => 2,
            Self::Tid => 3,
            Self::Qid => 4,
            Self::Prn | Self::Unknown => 0,
        }
    }

    /// True when the frequency cannot support automatic reminders and the
    /// caller must clarify it.
    pub fn needs_clarification(&self) -> bool {
        matches!(self, Self::Prn | Self::Unknown)
    }

    /// Repeat interval in days, for `EVERY_<N>_DAYS` frequencies.
    pub fn repeat_every_days(&self) -> Option<u32> {
        match self {
            Self::EveryNDays(n) => Some(*n),
            _ => None,
        }
    }

    pub fn wire(&self) -> String {
        match self {
            Self::Od => "OD".to_string(),
            Self::Bid => "BID".to_string(),
            Self::Tid => "TID".to_string(),
            Self::Qid => "QID".to_string(),
            Self::Weekly => "WEEKLY".to_string(),
            Self::Prn => "PRN".to_string(),
            Self::EveryNDays(n) => format!("EVERY_{}_DAYS", n),
            Self::Unknown => "UNKNOWN".to_string(),
        }
    }
}

/// Parses `EVERY_<N>_DAYS` with a positive N.
fn every_n_days(f: &str) -> Option<u32> {
    let inner = f.strip_prefix("EVERY_")?.strip_suffix("_DAYS")?;
    let n: u32 = inner.parse().ok()?;
    if n == 0 {
        return None;
    }
    Some(n)
}

impl Default for Frequency {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire())
    }
}

impl Serialize for Frequency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.wire())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// A medication as supplied by the caller (or an extraction collaborator).
/// Immutable once handed to a planning cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    #[serde(default)]
    pub strength: Option<String>,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub with_food: Option<bool>,
    #[serde(default)]
    pub instructions: Option<String>,
    /// How long to continue this medicine, in days. None means
    /// ongoing/unknown. Values outside 1-365 are ignored downstream.
    #[serde(default)]
    pub duration_days: Option<u32>,
}

/// One of the three fixed daily time windows used for dose grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bucket {
    Morning,
    Afternoon,
    Night,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Morning, Bucket::Afternoon, Bucket::Night];

    /// Parses a wire bucket string; anything outside the three-value enum is
    /// rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MORNING" => Some(Self::Morning),
            "AFTERNOON" => Some(Self::Afternoon),
            "NIGHT" => Some(Self::Night),
            _ => None,
        }
    }

    /// Inclusive bucket window, in minutes from midnight.
    pub fn window(&self) -> (u32, u32) {
        match self {
            Self::Morning => (5 * 60, 11 * 60 + 59),
            Self::Afternoon => (12 * 60, 17 * 60 + 59),
            Self::Night => (18 * 60, 23 * 60 + 59),
        }
    }

    /// Canonical anchor time a dose snaps to when its time falls outside the
    /// bucket window.
    pub fn anchor_minutes(&self) -> u32 {
        match self {
            Self::Morning => 9 * 60,
            Self::Afternoon => 14 * 60,
            Self::Night => 20 * 60,
        }
    }

    pub fn wire(&self) -> &'static str {
        match self {
            Self::Morning => "MORNING",
            Self::Afternoon => "AFTERNOON",
            Self::Night => "NIGHT",
        }
    }
}

/// A single scheduled dose within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dose {
    pub dose_id: String,
    pub med_name: String,
    /// Local time of day, "HH:MM".
    pub time_local: String,
    pub bucket: Bucket,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_every_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<u32>,
}

/// Generates a fresh dose ID of the form `dose_<10 hex>`.
pub fn fresh_dose_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("dose_{}", &hex[..10])
}

/// Plan lifecycle status. Transitions are monotonic: `Proposed` moves to
/// exactly one of `Approved` or `Rejected`, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Proposed,
    Approved,
    Rejected,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// The closed allow-list of follow-up action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    CreateReminders,
    SetEscalationRule,
    CreateCalendarEvent,
    SendAlert,
}

impl ActionType {
    /// Parses a wire action type. Returns None for anything outside the
    /// allow-list; untrusted proposals use this as their admission check.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE_REMINDERS" => Some(Self::CreateReminders),
            "SET_ESCALATION_RULE" => Some(Self::SetEscalationRule),
            "CREATE_CALENDAR_EVENT" => Some(Self::CreateCalendarEvent),
            "SEND_ALERT" => Some(Self::SendAlert),
            _ => None,
        }
    }

    pub fn wire(&self) -> &'static str {
        match self {
            Self::CreateReminders => "CREATE_REMINDERS",
            Self::SetEscalationRule => "SET_ESCALATION_RULE",
            Self::CreateCalendarEvent => "CREATE_CALENDAR_EVENT",
            Self::SendAlert => "SEND_ALERT",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire())
    }
}

/// A follow-up action proposed by a plan. Approval is required by policy on
/// every action, regardless of what a collaborator proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub needs_approval: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ActionProposal {
    pub fn new(kind: ActionType, payload: serde_json::Value) -> Self {
        Self {
            kind,
            needs_approval: true,
            payload,
        }
    }
}

/// Structured result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub simulated: bool,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Who is acting on a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Patient,
    Caregiver,
}

impl Default for ActorRole {
    fn default() -> Self {
        Self::Patient
    }
}

/// A canonical dosing plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub schedule: Vec<Dose>,
    pub precautions: Vec<String>,
    pub why: Vec<String>,
    pub actions: Vec<ActionProposal>,
    #[serde(default = "default_safety_note")]
    pub safety_note: String,
}

fn default_safety_note() -> String {
    SAFETY_NOTE.to_string()
}

impl Plan {
    /// Creates an empty proposed plan.
    pub fn empty(plan_id: PlanId) -> Self {
        Self {
            plan_id,
            status: PlanStatus::Proposed,
            schedule: Vec::new(),
            precautions: Vec::new(),
            why: Vec::new(),
            actions: Vec::new(),
            safety_note: default_safety_note(),
        }
    }
}
