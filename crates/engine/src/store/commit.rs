//! Atomic execution updates.
//!
//! The engine never writes an execution directly. It builds a [`StateCommit`]
//! and the store applies it under a row lock with [`StateCommit::apply`],
//! which is pure so every backend shares the same validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::{DelayDraft, HistoryEntry, PendingDelay, WorkflowExecution};
use crate::engine::machine::{try_transition, ExecutionEvent, ExecutionStatus};
use crate::engine::plan::Step;
use crate::error::AppResult;

/// Where the execution points after the commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPointer {
    pub step_id: Option<String>,
    pub index: Option<i32>,
}

impl StepPointer {
    pub fn at(step_id: impl Into<String>, index: Option<i32>) -> Self {
        Self {
            step_id: Some(step_id.into()),
            index,
        }
    }

    pub fn finished() -> Self {
        Self {
            step_id: None,
            index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCommit {
    pub event: ExecutionEvent,
    /// `None` leaves the pointer untouched.
    pub pointer: Option<StepPointer>,
    pub history: Vec<HistoryEntry>,
    /// Deep-merged into the context.
    pub context_updates: serde_json::Map<String, serde_json::Value>,
    /// `Some` replaces the active spliced segment.
    pub dynamic_steps: Option<Vec<Step>>,
    pub retry_count: Option<i32>,
    pub error: Option<String>,
    pub delay: Option<DelayDraft>,
}

impl StateCommit {
    pub fn new(event: ExecutionEvent) -> Self {
        Self {
            event,
            pointer: None,
            history: Vec::new(),
            context_updates: serde_json::Map::new(),
            dynamic_steps: None,
            retry_count: None,
            error: None,
            delay: None,
        }
    }

    pub fn with_pointer(mut self, pointer: StepPointer) -> Self {
        self.pointer = Some(pointer);
        self
    }

    pub fn with_history(mut self, entry: HistoryEntry) -> Self {
        self.history.push(entry);
        self
    }

    pub fn with_context(mut self, updates: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context_updates = updates;
        self
    }

    pub fn with_dynamic_steps(mut self, steps: Vec<Step>) -> Self {
        self.dynamic_steps = Some(steps);
        self
    }

    pub fn with_retry_count(mut self, count: i32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_delay(mut self, delay: DelayDraft) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Apply to `execution` in place. Returns the delay row to insert in the
    /// same transaction, if the commit schedules one.
    ///
    /// Fails without touching `execution` when the event is not allowed from
    /// its current status, which also covers writes to terminal executions.
    pub fn apply(
        &self,
        execution: &mut WorkflowExecution,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PendingDelay>> {
        let previous = execution.status;
        let next = try_transition(previous, self.event, execution.state.paused_from)?;

        execution.status = next;
        match self.event {
            ExecutionEvent::Pause => execution.state.paused_from = Some(previous),
            ExecutionEvent::Unpause => execution.state.paused_from = None,
            _ => {}
        }

        if let Some(ref pointer) = self.pointer {
            execution.current_step_id = pointer.step_id.clone();
            execution.current_step_index = pointer.index;
        }

        execution.state.history.extend(self.history.iter().cloned());

        for (key, value) in &self.context_updates {
            merge_into(&mut execution.state.context, key, value);
        }

        if let Some(ref steps) = self.dynamic_steps {
            execution.state.dynamic_steps = steps.clone();
        }

        if let Some(count) = self.retry_count {
            execution.retry_count = count;
        }

        if let Some(ref error) = self.error {
            execution.error = Some(error.clone());
        }

        match next {
            ExecutionStatus::Completed => execution.completed_at = Some(now),
            ExecutionStatus::Failed => execution.failed_at = Some(now),
            _ => {}
        }
        execution.updated_at = now;

        Ok(self.delay.as_ref().map(|draft| {
            PendingDelay::from_draft(draft, execution.execution_id, &execution.state, now)
        }))
    }
}

/// Insert `value` at `key`, merging objects recursively.
fn merge_into(target: &mut serde_json::Value, key: &str, value: &serde_json::Value) {
    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    let Some(map) = target.as_object_mut() else {
        return;
    };

    if let serde_json::Value::Object(incoming) = value {
        if let Some(existing) = map.get_mut(key).filter(|e| e.is_object()) {
            for (k, v) in incoming {
                merge_into(existing, k, v);
            }
            return;
        }
    }
    map.insert(key.to_string(), value.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::plan::{Plan, StepPayload};
    use crate::error::AppError;
    use crate::store::models::{DelayKind, TriggerIdentity};
    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    fn execution() -> WorkflowExecution {
        let plan = Plan {
            workflow_id: "wf".into(),
            version: "1".into(),
            source_hash: String::new(),
            compiled_at: Utc::now(),
            steps: vec![Step {
                id: "s001".into(),
                branch: None,
                payload: StepPayload::End(Default::default()),
            }],
        };
        let identity = TriggerIdentity {
            workflow_id: "wf".into(),
            user_id: "u1".into(),
            trigger_type: "signup".into(),
            trigger_id: "1".into(),
        };
        WorkflowExecution::new(
            Uuid::new_v4(),
            &identity,
            plan,
            json!({"trigger": {"plan": "pro"}, "steps": {"s000": {"ok": true}}}),
            Utc::now(),
        )
    }

    fn updates(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_apply_merges_context_and_history() {
        let mut exec = execution();
        let now = Utc::now();
        StateCommit::new(ExecutionEvent::Start).apply(&mut exec, now).unwrap();

        let commit = StateCommit::new(ExecutionEvent::Advance)
            .with_pointer(StepPointer::at("s002", Some(1)))
            .with_history(HistoryEntry::succeeded("s001", None, now))
            .with_context(updates(json!({"steps": {"s001": {"sent": true}}})));
        commit.apply(&mut exec, now).unwrap();

        assert_eq!(exec.current_step_id.as_deref(), Some("s002"));
        assert_eq!(exec.state.history.len(), 1);
        assert_eq!(exec.state.context["steps"]["s000"]["ok"], true);
        assert_eq!(exec.state.context["steps"]["s001"]["sent"], true);
        assert_eq!(exec.state.context["trigger"]["plan"], "pro");
    }

    #[test]
    fn test_apply_rejects_illegal_event_without_mutation() {
        let mut exec = execution();
        let before = exec.clone();
        let err = StateCommit::new(ExecutionEvent::Advance)
            .with_history(HistoryEntry::succeeded("s001", None, Utc::now()))
            .apply(&mut exec, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(exec, before);
    }

    #[test]
    fn test_suspend_builds_delay_with_snapshot() {
        let mut exec = execution();
        let now = Utc::now();
        StateCommit::new(ExecutionEvent::Start).apply(&mut exec, now).unwrap();

        let draft = DelayDraft {
            step_id: "s002".into(),
            resume_step_id: Some("s003".into()),
            kind: DelayKind::Delay,
            resume_at: now + Duration::hours(2),
        };
        let delay = StateCommit::new(ExecutionEvent::Suspend)
            .with_pointer(StepPointer::at("s003", Some(2)))
            .with_delay(draft)
            .apply(&mut exec, now)
            .unwrap()
            .unwrap();

        assert_eq!(exec.status, ExecutionStatus::Delayed);
        assert_eq!(delay.execution_id, exec.execution_id);
        assert_eq!(delay.resume_step_id.as_deref(), Some("s003"));
        assert_eq!(delay.context["context"]["trigger"]["plan"], "pro");
        assert!(delay.context["dynamic_steps"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_pause_remembers_previous_status() {
        let mut exec = execution();
        let now = Utc::now();
        StateCommit::new(ExecutionEvent::Start).apply(&mut exec, now).unwrap();
        StateCommit::new(ExecutionEvent::Suspend).apply(&mut exec, now).unwrap();
        StateCommit::new(ExecutionEvent::Pause).apply(&mut exec, now).unwrap();
        assert_eq!(exec.state.paused_from, Some(ExecutionStatus::Delayed));

        StateCommit::new(ExecutionEvent::Unpause).apply(&mut exec, now).unwrap();
        assert_eq!(exec.status, ExecutionStatus::Delayed);
        assert_eq!(exec.state.paused_from, None);
    }

    #[test]
    fn test_terminal_stamps() {
        let mut exec = execution();
        let now = Utc::now();
        StateCommit::new(ExecutionEvent::Start).apply(&mut exec, now).unwrap();
        StateCommit::new(ExecutionEvent::Fail)
            .with_error("boom")
            .with_pointer(StepPointer::finished())
            .apply(&mut exec, now)
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.failed_at, Some(now));
        assert_eq!(exec.error.as_deref(), Some("boom"));

        assert!(StateCommit::new(ExecutionEvent::Cancel)
            .apply(&mut exec, now)
            .is_err());
    }
}
