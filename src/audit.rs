//! Append-only audit trail attached to workflow state.
//!
//! Every orchestrator transition and every sanitizer safety decision records
//! exactly one event. Events are never rewritten or pruned.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single audit event: a dotted event name plus arbitrary metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event: String,
    #[serde(default)]
    pub meta: Value,
    /// RFC3339 timestamp recorded when the event was appended.
    #[serde(default)]
    pub at: String,
}

impl AuditEvent {
    pub fn new(event: &str, meta: Value) -> Self {
        Self {
            event: event.to_string(),
            meta,
            at: Utc::now().to_rfc3339(),
        }
    }
}

/// Append-only sequence of audit events. The API deliberately exposes no way
/// to remove or edit entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail(Vec<AuditEvent>);

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event with the given name and metadata.
    pub fn record(&mut self, event: &str, meta: Value) {
        self.0.push(AuditEvent::new(event, meta));
    }

    /// Appends a pre-built event (used to merge sanitizer decisions).
    pub fn append(&mut self, event: AuditEvent) {
        self.0.push(event);
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_appends_in_order() {
        let mut trail = AuditTrail::new();
        trail.record("extract.skip", json!({"reason": "meds already provided"}));
        trail.record("plan.done", json!({"needs_info": false}));

        assert_eq!(trail.len(), 2);
        assert_eq!(trail.events()[0].event, "extract.skip");
        assert_eq!(trail.events()[1].event, "plan.done");
        assert!(!trail.events()[0].at.is_empty());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut trail = AuditTrail::new();
        trail.record("approval.suspended", json!({"schedule_count": 3}));

        let encoded = serde_json::to_string(&trail).unwrap();
        let decoded: AuditTrail = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, trail);
    }
}
