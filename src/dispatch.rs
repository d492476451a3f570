//! Execution dispatcher: applies approved actions through pluggable tools.
//!
//! Tools are external collaborators keyed by action type. The dispatcher
//! enforces the core safety invariant that an action type outside the
//! approved set is never executed; an approved type with no registered tool
//! yields a failed result instead of a panic.

use crate::domain::{ActionType, Dose, Plan, PlanId, PlanStatus, ToolResult};
use crate::sanitizer::conflict::parse_hhmm;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// External tool collaborator for one action type.
#[async_trait]
pub trait ActionTool: Send + Sync {
    async fn execute(&self, plan_id: &PlanId, schedule: &[Dose], payload: &Value) -> ToolResult;
}

/// Maps action types to their tool collaborators.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<ActionType, Arc<dyn ActionTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ActionType, tool: Arc<dyn ActionTool>) {
        self.tools.insert(kind, tool);
    }

    pub fn get(&self, kind: ActionType) -> Option<&Arc<dyn ActionTool>> {
        self.tools.get(&kind)
    }

    /// Registry with the built-in simulated tools for every allow-listed
    /// action type. Real integrations replace entries via `register`.
    pub fn simulated() -> Self {
        let mut registry = Self::new();
        registry.register(ActionType::CreateReminders, Arc::new(SimulatedReminderTool));
        registry.register(
            ActionType::CreateCalendarEvent,
            Arc::new(SimulatedCalendarTool),
        );
        registry.register(ActionType::SendAlert, Arc::new(SimulatedAlertTool));
        registry.register(
            ActionType::SetEscalationRule,
            Arc::new(SimulatedEscalationTool),
        );
        registry
    }
}

/// Applies approved actions to a plan.
///
/// Dose-time overrides are applied to the schedule in place first; overrides
/// with an unknown dose id or an invalid time are ignored. Each proposed
/// action whose type is in the approved set is executed through its tool;
/// everything else is skipped. On completion the plan status transitions to
/// `Approved`.
pub async fn execute_approved(
    registry: &ToolRegistry,
    plan: &mut Plan,
    approved: &[ActionType],
    dose_time_overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, ToolResult> {
    for dose in plan.schedule.iter_mut() {
        if let Some(time) = dose_time_overrides.get(&dose.dose_id) {
            if parse_hhmm(time).is_some() {
                dose.time_local = time.clone();
            } else {
                tracing::warn!(
                    "ignoring invalid time override {:?} for dose {}",
                    time,
                    dose.dose_id
                );
            }
        }
    }

    let mut executed = BTreeMap::new();
    for action in &plan.actions {
        if !approved.contains(&action.kind) {
            continue;
        }
        let result = match registry.get(action.kind) {
            Some(tool) => {
                tool.execute(&plan.plan_id, &plan.schedule, &action.payload)
                    .await
            }
            None => ToolResult {
                ok: false,
                simulated: true,
                details: json!({
                    "error": format!("no tool registered for {}", action.kind),
                }),
            },
        };
        executed.insert(action.kind.wire().to_string(), result);
    }

    plan.status = PlanStatus::Approved;
    executed
}

fn merged_details(base: Map<String, Value>, payload: &Value) -> Value {
    let mut details = base;
    if let Value::Object(extra) = payload {
        for (k, v) in extra {
            details.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    Value::Object(details)
}

/// Simulated reminder creation: reports how many reminders would be set.
pub struct SimulatedReminderTool;

#[async_trait]
impl ActionTool for SimulatedReminderTool {
    async fn execute(&self, plan_id: &PlanId, schedule: &[Dose], _payload: &Value) -> ToolResult {
        ToolResult {
            ok: true,
            simulated: true,
            details: json!({
                "created": schedule.len(),
                "plan_id": plan_id.as_str(),
            }),
        }
    }
}

/// Simulated calendar event creation.
pub struct SimulatedCalendarTool;

#[async_trait]
impl ActionTool for SimulatedCalendarTool {
    async fn execute(&self, _plan_id: &PlanId, _schedule: &[Dose], payload: &Value) -> ToolResult {
        let hex = Uuid::new_v4().simple().to_string();
        let mut base = Map::new();
        base.insert("event_id".to_string(), json!(format!("evt_{}", &hex[..8])));
        ToolResult {
            ok: true,
            simulated: true,
            details: merged_details(base, payload),
        }
    }
}

/// Simulated alert delivery.
pub struct SimulatedAlertTool;

#[async_trait]
impl ActionTool for SimulatedAlertTool {
    async fn execute(&self, _plan_id: &PlanId, _schedule: &[Dose], payload: &Value) -> ToolResult {
        let mut base = Map::new();
        base.insert("sent".to_string(), json!(true));
        ToolResult {
            ok: true,
            simulated: true,
            details: merged_details(base, payload),
        }
    }
}

/// Simulated escalation rule configuration.
pub struct SimulatedEscalationTool;

#[async_trait]
impl ActionTool for SimulatedEscalationTool {
    async fn execute(&self, _plan_id: &PlanId, _schedule: &[Dose], payload: &Value) -> ToolResult {
        let miss_threshold = payload
            .get("miss_threshold")
            .and_then(Value::as_u64)
            .unwrap_or(2);
        ToolResult {
            ok: true,
            simulated: true,
            details: json!({ "miss_threshold": miss_threshold }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionProposal, Bucket};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plan_with_actions(actions: Vec<ActionProposal>) -> Plan {
        let mut plan = Plan::empty(PlanId::from("plan_test"));
        plan.schedule = vec![Dose {
            dose_id: "dose_known00".to_string(),
            med_name: "Metformin".to_string(),
            time_local: "08:00".to_string(),
            bucket: Bucket::Morning,
            notes: String::new(),
            repeat_every_days: None,
            duration_days: None,
        }];
        plan.actions = actions;
        plan
    }

    /// Records invocations; used to prove unapproved actions never run.
    struct CountingTool(Arc<AtomicUsize>);

    #[async_trait]
    impl ActionTool for CountingTool {
        async fn execute(
            &self,
            _plan_id: &PlanId,
            _schedule: &[Dose],
            _payload: &Value,
        ) -> ToolResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            ToolResult {
                ok: true,
                simulated: true,
                details: Value::Null,
            }
        }
    }

    #[tokio::test]
    async fn test_unapproved_actions_are_never_executed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(ActionType::SendAlert, Arc::new(CountingTool(calls.clone())));
        registry.register(
            ActionType::CreateReminders,
            Arc::new(CountingTool(calls.clone())),
        );

        let mut plan = plan_with_actions(vec![
            ActionProposal::new(ActionType::CreateReminders, Value::Null),
            ActionProposal::new(ActionType::SendAlert, Value::Null),
        ]);

        let executed = execute_approved(
            &registry,
            &mut plan,
            &[ActionType::CreateReminders],
            &BTreeMap::new(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executed.len(), 1);
        assert!(executed.contains_key("CREATE_REMINDERS"));
        assert!(!executed.contains_key("SEND_ALERT"));
        assert_eq!(plan.status, PlanStatus::Approved);
    }

    #[tokio::test]
    async fn test_approved_action_without_tool_reports_failure() {
        let registry = ToolRegistry::new();
        let mut plan = plan_with_actions(vec![ActionProposal::new(
            ActionType::SendAlert,
            Value::Null,
        )]);

        let executed = execute_approved(
            &registry,
            &mut plan,
            &[ActionType::SendAlert],
            &BTreeMap::new(),
        )
        .await;

        let result = &executed["SEND_ALERT"];
        assert!(!result.ok);
        assert!(
            result.details["error"]
                .as_str()
                .unwrap()
                .contains("SEND_ALERT"),
            "got: {}",
            result.details
        );
    }

    #[tokio::test]
    async fn test_dose_time_overrides_applied_before_execution() {
        let registry = ToolRegistry::simulated();
        let mut plan = plan_with_actions(vec![ActionProposal::new(
            ActionType::CreateReminders,
            Value::Null,
        )]);

        let mut overrides = BTreeMap::new();
        overrides.insert("dose_known00".to_string(), "09:30".to_string());
        overrides.insert("dose_missing".to_string(), "10:00".to_string());

        execute_approved(
            &registry,
            &mut plan,
            &[ActionType::CreateReminders],
            &overrides,
        )
        .await;

        assert_eq!(plan.schedule[0].time_local, "09:30");
    }

    #[tokio::test]
    async fn test_invalid_override_time_is_ignored() {
        let registry = ToolRegistry::simulated();
        let mut plan = plan_with_actions(vec![]);

        let mut overrides = BTreeMap::new();
        overrides.insert("dose_known00".to_string(), "25:99".to_string());

        execute_approved(&registry, &mut plan, &[], &overrides).await;
        assert_eq!(plan.schedule[0].time_local, "08:00");
    }

    #[tokio::test]
    async fn test_simulated_tools_report_simulated_results() {
        let registry = ToolRegistry::simulated();
        let mut plan = plan_with_actions(vec![
            ActionProposal::new(ActionType::CreateReminders, json!({"count": 1})),
            ActionProposal::new(ActionType::SetEscalationRule, json!({"miss_threshold": 3})),
        ]);

        let executed = execute_approved(
            &registry,
            &mut plan,
            &[ActionType::CreateReminders, ActionType::SetEscalationRule],
            &BTreeMap::new(),
        )
        .await;

        assert_eq!(executed.len(), 2);
        assert!(executed.values().all(|r| r.ok && r.simulated));
        assert_eq!(executed["CREATE_REMINDERS"].details["created"], 1);
        assert_eq!(executed["SET_ESCALATION_RULE"].details["miss_threshold"], 3);
    }
}
