//! Condition steps pick a branch; they never have side effects.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ExecutionContext, StepExecutor, StepResult, StepValidation};
use crate::engine::evaluator::evaluate;
use crate::engine::plan::{BranchBody, Step, StepKind, StepPayload};
use crate::error::{AppError, AppResult};
use crate::template::TemplateRenderer;

pub struct ConditionExecutor {
    renderer: Arc<TemplateRenderer>,
}

impl ConditionExecutor {
    pub fn new(renderer: Arc<TemplateRenderer>) -> Self {
        Self { renderer }
    }
}

fn take_body(body: &BranchBody, label: Option<&str>) -> StepResult {
    let result = serde_json::json!({ "branch": label });
    match body {
        BranchBody::Jump { step_id } => StepResult::ok(result).with_next(step_id),
        BranchBody::Inline { steps } => match steps.first() {
            Some(first) => StepResult::ok(result)
                .with_next(&first.id)
                .with_extracted(steps.clone()),
            None => StepResult::completed(result),
        },
    }
}

#[async_trait]
impl StepExecutor for ConditionExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Condition
    }

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> AppResult<StepResult> {
        let StepPayload::Condition(ref cond) = step.payload else {
            return Err(AppError::step(&step.id, "not a condition step"));
        };

        for branch in &cond.branches {
            if evaluate(&branch.predicate, &ctx.context, &self.renderer)? {
                tracing::debug!(
                    execution_id = %ctx.execution_id,
                    step_id = %step.id,
                    branch = %branch.label,
                    "Branch selected"
                );
                return Ok(take_body(&branch.body, Some(branch.label.as_str())));
            }
        }

        match cond.default {
            Some(ref body) => {
                let label = cond.default_label.as_deref().unwrap_or("default");
                Ok(take_body(body, Some(label)))
            }
            None => {
                tracing::debug!(
                    execution_id = %ctx.execution_id,
                    step_id = %step.id,
                    "No branch matched"
                );
                Ok(StepResult::completed(serde_json::json!({ "branch": null })))
            }
        }
    }

    fn validate(&self, step: &Step) -> StepValidation {
        let mut validation = StepValidation::valid();
        let StepPayload::Condition(ref cond) = step.payload else {
            validation.error("kind", "expected a condition payload");
            return validation;
        };

        if cond.branches.is_empty() {
            validation.error("branches", "condition needs at least one branch");
        }
        for (i, branch) in cond.branches.iter().enumerate() {
            for message in branch.predicate.check(&self.renderer) {
                validation.error(format!("branches[{}].predicate", i), message);
            }
            if let BranchBody::Inline { ref steps } = branch.body {
                if steps.is_empty() {
                    validation.warn(format!("branch '{}' has no steps", branch.label));
                }
            }
        }
        validation
    }
}
