//! Action steps: render parameters and dispatch to a sender.

use async_trait::async_trait;
use drip_actions::{ActionRegistry, ActionRequest};
use std::sync::Arc;

use super::{ExecutionContext, StepExecutor, StepResult, StepValidation};
use crate::engine::plan::{Step, StepKind, StepPayload};
use crate::error::{AppError, AppResult};
use crate::template::TemplateRenderer;

pub struct ActionExecutor {
    actions: Arc<ActionRegistry>,
    renderer: Arc<TemplateRenderer>,
}

impl ActionExecutor {
    pub fn new(actions: Arc<ActionRegistry>, renderer: Arc<TemplateRenderer>) -> Self {
        Self { actions, renderer }
    }
}

#[async_trait]
impl StepExecutor for ActionExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Action
    }

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> AppResult<StepResult> {
        let StepPayload::Action(ref spec) = step.payload else {
            return Err(AppError::step(&step.id, "not an action step"));
        };

        let params = self.renderer.render_value(&spec.params, &ctx.context)?;
        let request = ActionRequest::new(
            &spec.name,
            params,
            ctx.execution_id.to_string(),
            &step.id,
        )
        .with_idempotency_key(ctx.idempotency_key(&step.id, 0));

        let outcome = self.actions.dispatch(&request).await;

        let result = if outcome.success {
            StepResult::ok(outcome.audit.clone())
        } else {
            StepResult::failed(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("action '{}' failed", spec.name)),
            )
            .with_result(outcome.audit.clone())
        };
        Ok(result.with_step_output(&step.id, outcome.audit))
    }

    fn validate(&self, step: &Step) -> StepValidation {
        let mut validation = StepValidation::valid();
        let StepPayload::Action(ref spec) = step.payload else {
            validation.error("kind", "expected an action payload");
            return validation;
        };

        if spec.name.trim().is_empty() {
            validation.error("name", "action name is required");
        } else if !self.actions.has(&spec.name) {
            validation.error("name", format!("action '{}' is not registered", spec.name));
        }
        if !spec.params.is_object() {
            validation.error("params", "params must be a mapping");
        }
        validation
    }
}
