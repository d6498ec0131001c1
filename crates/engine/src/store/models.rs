//! Execution, delay and trigger-event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::machine::ExecutionStatus;
use crate::engine::plan::{Plan, Step};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    /// The step scheduled a delay.
    Suspended,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

/// One executed step. History is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step_id: String,
    pub outcome: StepOutcome,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn succeeded(step_id: &str, result: Option<serde_json::Value>, at: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.to_string(),
            outcome: StepOutcome::Succeeded,
            timestamp: at,
            result,
            error: None,
        }
    }

    pub fn suspended(step_id: &str, result: Option<serde_json::Value>, at: DateTime<Utc>) -> Self {
        Self {
            outcome: StepOutcome::Suspended,
            ..Self::succeeded(step_id, result, at)
        }
    }

    pub fn failed(step_id: &str, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.to_string(),
            outcome: StepOutcome::Failed,
            timestamp: at,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Mutable part of an execution, persisted as one JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    /// Runtime context: trigger payload, identity fields and step results.
    #[serde(default = "empty_object")]
    pub context: serde_json::Value,

    /// Spliced inline branch steps currently being executed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_from: Option<ExecutionStatus>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ExecutionState {
    pub fn new(context: serde_json::Value) -> Self {
        Self {
            history: Vec::new(),
            context,
            dynamic_steps: Vec::new(),
            paused_from: None,
        }
    }
}

/// One run of a plan against one admitted trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub trigger_type: String,
    pub trigger_id: String,
    pub user_id: String,
    pub status: ExecutionStatus,
    pub current_step_id: Option<String>,
    /// Position in the static plan; `None` while in a spliced segment.
    pub current_step_index: Option<i32>,
    pub retry_count: i32,
    pub state: ExecutionState,
    /// The plan this execution was admitted with.
    pub workflow_definition: Plan,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// A `pending` execution positioned at the first plan step.
    pub fn new(
        execution_id: Uuid,
        identity: &TriggerIdentity,
        plan: Plan,
        context: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let current_step_id = plan.first_step().map(|s| s.id.clone());
        let current_step_index = current_step_id.as_ref().map(|_| 0);
        Self {
            execution_id,
            workflow_id: identity.workflow_id.clone(),
            trigger_type: identity.trigger_type.clone(),
            trigger_id: identity.trigger_id.clone(),
            user_id: identity.user_id.clone(),
            status: ExecutionStatus::Pending,
            current_step_id,
            current_step_index,
            retry_count: 0,
            state: ExecutionState::new(context),
            workflow_definition: plan,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
        }
    }

    pub fn identity(&self) -> TriggerIdentity {
        TriggerIdentity {
            workflow_id: self.workflow_id.clone(),
            user_id: self.user_id.clone(),
            trigger_type: self.trigger_type.clone(),
            trigger_id: self.trigger_id.clone(),
        }
    }

    pub fn product_id(&self) -> Option<&serde_json::Value> {
        self.state
            .context
            .get("product_id")
            .filter(|v| !v.is_null())
    }

    /// The step list the current step lives in.
    pub fn active_steps(&self) -> &[Step] {
        if self.state.dynamic_steps.is_empty() {
            &self.workflow_definition.steps
        } else {
            &self.state.dynamic_steps
        }
    }

    /// Find a step in the active segment first, then in the static plan.
    pub fn resolve_step(&self, step_id: &str) -> Option<&Step> {
        self.state
            .dynamic_steps
            .iter()
            .find(|s| s.id == step_id)
            .or_else(|| self.workflow_definition.step(step_id))
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.current_step_id
            .as_deref()
            .and_then(|id| self.resolve_step(id))
    }

    /// Whether `step_id` was recorded after the first `history_len` entries.
    pub fn ran_after(&self, step_id: &str, history_len: usize) -> bool {
        self.state
            .history
            .iter()
            .skip(history_len)
            .any(|h| h.step_id == step_id)
    }
}

/// The 4-tuple that identifies a live execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerIdentity {
    pub workflow_id: String,
    pub user_id: String,
    pub trigger_type: String,
    pub trigger_id: String,
}

impl std::fmt::Display for TriggerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.workflow_id, self.user_id, self.trigger_type, self.trigger_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayKind {
    /// A delay step.
    Delay,
    /// Backoff before re-running a failed step.
    Retry,
}

impl std::fmt::Display for DelayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delay => write!(f, "delay"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

impl std::str::FromStr for DelayKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delay" => Ok(Self::Delay),
            "retry" => Ok(Self::Retry),
            other => Err(AppError::Parse(format!("unknown delay kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayStatus {
    Pending,
    /// Claimed by a resume in progress.
    Processing,
    Executed,
    Failed,
}

impl DelayStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Executed | Self::Failed)
    }
}

impl std::fmt::Display for DelayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Executed => write!(f, "executed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DelayStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::Parse(format!("unknown delay status '{}'", other))),
        }
    }
}

/// A delay as scheduled by a step, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayDraft {
    /// Suspension key, unique per execution.
    pub step_id: String,
    /// Step to run on resume; `None` completes the execution.
    pub resume_step_id: Option<String>,
    pub kind: DelayKind,
    pub resume_at: DateTime<Utc>,
}

/// A persisted suspension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelay {
    pub delay_id: Uuid,
    pub execution_id: Uuid,
    pub step_id: String,
    pub resume_step_id: Option<String>,
    pub kind: DelayKind,
    pub resume_at: DateTime<Utc>,
    pub status: DelayStatus,
    /// Snapshot taken at suspension: `{dynamic_steps, context, history_len}`.
    pub context: serde_json::Value,
    pub error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingDelay {
    pub fn from_draft(
        draft: &DelayDraft,
        execution_id: Uuid,
        state: &ExecutionState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            delay_id: Uuid::new_v4(),
            execution_id,
            step_id: draft.step_id.clone(),
            resume_step_id: draft.resume_step_id.clone(),
            kind: draft.kind,
            resume_at: draft.resume_at,
            status: DelayStatus::Pending,
            context: serde_json::json!({
                "dynamic_steps": state.dynamic_steps,
                "context": state.context,
                "history_len": state.history.len(),
            }),
            error: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The spliced segment captured when the delay was scheduled.
    pub fn snapshot_steps(&self) -> Vec<Step> {
        self.context
            .get("dynamic_steps")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// History length of the execution when the delay was scheduled.
    pub fn history_len(&self) -> usize {
        self.context
            .get("history_len")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize
    }

    /// Claimable: pending, or processing with a claim older than `stale_before`.
    pub fn is_claimable(&self, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            DelayStatus::Pending => true,
            DelayStatus::Processing => self.claimed_at.map_or(true, |at| at < stale_before),
            DelayStatus::Executed | DelayStatus::Failed => false,
        }
    }
}

/// A raw trigger waiting for the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_id: i64,
    pub trigger_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub outcome: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Filter for execution listings. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub workflow_id: Option<String>,
    pub user_id: Option<String>,
    pub trigger_type: Option<String>,
    pub trigger_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ExecutionFilter {
    pub fn for_workflow_user(workflow_id: &str, user_id: &str) -> Self {
        Self {
            workflow_id: Some(workflow_id.to_string()),
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, execution: &WorkflowExecution) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w == have)
        }

        eq(&self.workflow_id, &execution.workflow_id)
            && eq(&self.user_id, &execution.user_id)
            && eq(&self.trigger_type, &execution.trigger_type)
            && eq(&self.trigger_id, &execution.trigger_id)
            && self.status.map_or(true, |s| s == execution.status)
            && self
                .created_after
                .map_or(true, |after| execution.created_at >= after)
            && self
                .created_before
                .map_or(true, |before| execution.created_at < before)
    }
}
