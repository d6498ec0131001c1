//! Shared flow steps run a named, reusable action sequence.

use async_trait::async_trait;
use drip_actions::{ActionRegistry, ActionRequest};
use std::collections::HashMap;
use std::sync::Arc;

use super::{ExecutionContext, StepExecutor, StepResult, StepValidation};
use crate::engine::plan::{ActionSpec, Step, StepKind, StepPayload};
use crate::error::{AppError, AppResult};
use crate::template::TemplateRenderer;

/// Fixed set of shared flows, loaded at startup.
#[derive(Debug, Default, Clone)]
pub struct SharedFlowRegistry {
    flows: HashMap<String, Vec<ActionSpec>>,
}

impl SharedFlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, actions: Vec<ActionSpec>) {
        self.flows.insert(name.to_string(), actions);
    }

    pub fn get(&self, name: &str) -> Option<&[ActionSpec]> {
        self.flows.get(name).map(Vec::as_slice)
    }

    pub fn has(&self, name: &str) -> bool {
        self.flows.contains_key(name)
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.flows.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

pub struct SharedFlowExecutor {
    flows: Arc<SharedFlowRegistry>,
    actions: Arc<ActionRegistry>,
    renderer: Arc<TemplateRenderer>,
}

impl SharedFlowExecutor {
    pub fn new(
        flows: Arc<SharedFlowRegistry>,
        actions: Arc<ActionRegistry>,
        renderer: Arc<TemplateRenderer>,
    ) -> Self {
        Self {
            flows,
            actions,
            renderer,
        }
    }
}

#[async_trait]
impl StepExecutor for SharedFlowExecutor {
    fn kind(&self) -> StepKind {
        StepKind::SharedFlow
    }

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> AppResult<StepResult> {
        let StepPayload::SharedFlow(ref spec) = step.payload else {
            return Err(AppError::step(&step.id, "not a shared flow step"));
        };

        let Some(actions) = self.flows.get(&spec.flow) else {
            return Ok(StepResult::failed(format!("unknown shared flow '{}'", spec.flow)));
        };

        let mut audits = Vec::with_capacity(actions.len());
        for (n, action) in actions.iter().enumerate() {
            let params = self.renderer.render_value(&action.params, &ctx.context)?;
            let request = ActionRequest::new(
                &action.name,
                params,
                ctx.execution_id.to_string(),
                &step.id,
            )
            .with_idempotency_key(ctx.idempotency_key(&step.id, n));

            let outcome = self.actions.dispatch(&request).await;
            audits.push(outcome.audit);

            if !outcome.success {
                let error = outcome
                    .error
                    .unwrap_or_else(|| format!("action '{}' failed", action.name));
                let output = serde_json::json!({ "flow": spec.flow, "actions": audits });
                return Ok(StepResult::failed(format!(
                    "shared flow '{}' action {}: {}",
                    spec.flow, n, error
                ))
                .with_result(output));
            }
        }

        let output = serde_json::json!({ "flow": spec.flow, "actions": audits });
        Ok(StepResult::ok(output.clone()).with_step_output(&step.id, output))
    }

    fn validate(&self, step: &Step) -> StepValidation {
        let mut validation = StepValidation::valid();
        let StepPayload::SharedFlow(ref spec) = step.payload else {
            validation.error("kind", "expected a shared flow payload");
            return validation;
        };

        if spec.flow.trim().is_empty() {
            validation.error("flow", "shared flow name is required");
        } else if !self.flows.has(&spec.flow) {
            validation.warn(format!("shared flow '{}' is not loaded", spec.flow));
        }
        validation
    }
}
