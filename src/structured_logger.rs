//! Structured JSONL logger for debugging and event reconstruction.
//!
//! Mirrors workflow audit events to an append-only `events.jsonl` with
//! monotonic sequence numbers and microsecond timestamps, so a plan's
//! history can be inspected without loading its checkpoint.

use crate::audit::AuditEvent;
use crate::domain::PlanId;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Thread-safe JSONL event logger.
pub struct StructuredLogger {
    seq: AtomicU64,
    log_file: Mutex<File>,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number within this process.
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds.
    pub ts: String,
    /// Plan the event belongs to.
    pub plan_id: String,
    /// Component that emitted the log.
    pub component: String,
    /// Structured event data.
    pub event: Value,
}

impl StructuredLogger {
    /// Creates a logger writing to `<logs_dir>/events.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs directory cannot be created or the log
    /// file cannot be opened.
    pub fn new(logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(logs_dir.join("events.jsonl"))?;

        Ok(Self {
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event. Logging failures are swallowed: the log is
    /// an observability mirror, not the source of truth.
    pub fn log(&self, plan_id: &PlanId, component: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            plan_id: plan_id.as_str().to_string(),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Mirrors one workflow audit event.
    pub fn log_audit(&self, plan_id: &PlanId, event: &AuditEvent) {
        self.log(plan_id, "Workflow", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_logs_are_appended_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let logger = StructuredLogger::new(dir.path()).unwrap();
        let plan_id = PlanId::from("plan_log_test");

        logger.log(&plan_id, "Workflow", json!({"event": "plan.done"}));
        logger.log_audit(
            &plan_id,
            &AuditEvent::new("approval.suspended", json!({"schedule_count": 2})),
        );

        let content = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: LogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(first.plan_id, "plan_log_test");

        let second: LogEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.event["event"], "approval.suspended");
    }
}
