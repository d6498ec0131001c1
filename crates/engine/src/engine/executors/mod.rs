//! Step executors, keyed by step kind.
//!
//! Executors never touch the store. They get a read-only view of the
//! execution and return a [`StepResult`] that the engine turns into a
//! commit.

pub mod action;
pub mod condition;
pub mod delay;
pub mod end;
pub mod shared_flow;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::plan::{BranchBody, Plan, Step, StepKind, StepPayload};
use crate::error::{AppError, AppResult};
use crate::rules::{RuleDefinition, RuleKind};
use crate::store::DelayDraft;

pub use action::ActionExecutor;
pub use condition::ConditionExecutor;
pub use delay::DelayExecutor;
pub use end::EndExecutor;
pub use shared_flow::{SharedFlowExecutor, SharedFlowRegistry};

/// What an executor sees of the running execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub context: serde_json::Value,
    /// The step after the current one in the active step list.
    pub next_step_id: Option<String>,
    /// Retry attempt of the current step, 0 on the first run.
    pub attempt: i32,
    pub now: DateTime<Utc>,
}

impl ExecutionContext {
    /// Idempotency key for the `n`th side effect of `step_id`.
    pub fn idempotency_key(&self, step_id: &str, n: usize) -> String {
        format!("{}:{}:{}:{}", self.execution_id, step_id, self.attempt, n)
    }
}

/// Result of executing one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Explicit successor. `None` means the default successor.
    pub next_step: Option<String>,
    /// Inline branch steps to splice in as the active segment.
    pub extracted_steps: Option<Vec<Step>>,
    pub suspend: Option<DelayDraft>,
    /// Finish the execution after this step.
    pub complete: bool,
    pub context_updates: serde_json::Map<String, serde_json::Value>,
}

impl StepResult {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            complete: true,
            ..Self::ok(result)
        }
    }

    pub fn suspended(draft: DelayDraft, result: serde_json::Value) -> Self {
        Self {
            suspend: Some(draft),
            ..Self::ok(result)
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_next(mut self, step_id: impl Into<String>) -> Self {
        self.next_step = Some(step_id.into());
        self
    }

    pub fn with_extracted(mut self, steps: Vec<Step>) -> Self {
        self.extracted_steps = Some(steps);
        self
    }

    /// Record `value` under `steps.<step_id>` in the context.
    pub fn with_step_output(mut self, step_id: &str, value: serde_json::Value) -> Self {
        let mut steps = serde_json::Map::new();
        steps.insert(step_id.to_string(), value);
        self.context_updates
            .insert("steps".to_string(), serde_json::Value::Object(steps));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepValidation {
    pub is_valid: bool,
    pub errors: Vec<FieldError>,
    pub warnings: Vec<String>,
}

impl Default for StepValidation {
    fn default() -> Self {
        Self::valid()
    }
}

impl StepValidation {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> AppResult<StepResult>;

    fn validate(&self, step: &Step) -> StepValidation;
}

/// Executors available to the engine, composed at startup.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StepKind, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in executors.
    pub fn standard(
        actions: Arc<drip_actions::ActionRegistry>,
        flows: Arc<SharedFlowRegistry>,
        renderer: Arc<crate::template::TemplateRenderer>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(ActionExecutor::new(actions.clone(), renderer.clone()));
        registry.register(DelayExecutor);
        registry.register(ConditionExecutor::new(renderer.clone()));
        registry.register(EndExecutor);
        registry.register(SharedFlowExecutor::new(flows, actions, renderer));
        registry
    }

    pub fn register<X: StepExecutor + 'static>(&mut self, executor: X) {
        self.executors.insert(executor.kind(), Arc::new(executor));
    }

    pub fn register_shared(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn has(&self, kind: StepKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Validate every step of `plan`, including inline branch steps, and
    /// check that every jump target exists.
    ///
    /// Returns the collected warnings.
    pub fn validate_plan(&self, plan: &Plan) -> AppResult<Vec<String>> {
        let steps = plan.all_steps();
        let known: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for step in &steps {
            let Some(executor) = self.get(step.kind()) else {
                errors.push(format!("{}: no executor for {} steps", step.id, step.kind()));
                continue;
            };

            let validation = executor.validate(step);
            errors.extend(
                validation
                    .errors
                    .into_iter()
                    .map(|e| format!("{}.{}: {}", step.id, e.field, e.message)),
            );
            warnings.extend(
                validation
                    .warnings
                    .into_iter()
                    .map(|w| format!("{}: {}", step.id, w)),
            );

            if let StepPayload::Condition(ref cond) = step.payload {
                let bodies = cond.branches.iter().map(|b| &b.body).chain(cond.default.iter());
                for body in bodies {
                    if let BranchBody::Jump { step_id } = body {
                        if !known.contains(step_id.as_str()) {
                            errors.push(format!("{}: jump target {} does not exist", step.id, step_id));
                        }
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(AppError::Validation(errors.join("; ")))
        }
    }
}

/// Build the shared flow registry from rule documents.
pub fn shared_flows_from(rules: &[RuleDefinition]) -> SharedFlowRegistry {
    let mut registry = SharedFlowRegistry::new();
    for rule in rules.iter().filter(|r| r.kind == RuleKind::SharedFlow) {
        registry.register(rule.workflow_id(), rule.actions.clone());
    }
    registry
}
