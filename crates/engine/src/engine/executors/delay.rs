//! Delay steps schedule a resume instead of waiting.

use async_trait::async_trait;
use chrono::Duration;

use super::{ExecutionContext, StepExecutor, StepResult, StepValidation};
use crate::engine::plan::{Step, StepKind, StepPayload};
use crate::error::{AppError, AppResult};
use crate::store::{DelayDraft, DelayKind};

pub struct DelayExecutor;

#[async_trait]
impl StepExecutor for DelayExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Delay
    }

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> AppResult<StepResult> {
        let StepPayload::Delay(ref spec) = step.payload else {
            return Err(AppError::step(&step.id, "not a delay step"));
        };
        if spec.duration_secs <= 0 {
            return Err(AppError::step(&step.id, "delay must be positive"));
        }

        let resume_at = ctx.now + Duration::seconds(spec.duration_secs);
        let draft = DelayDraft {
            step_id: step.id.clone(),
            resume_step_id: ctx.next_step_id.clone(),
            kind: DelayKind::Delay,
            resume_at,
        };

        tracing::debug!(
            execution_id = %ctx.execution_id,
            step_id = %step.id,
            resume_at = %resume_at,
            "Delay scheduled"
        );

        Ok(StepResult::suspended(
            draft,
            serde_json::json!({
                "resume_at": resume_at,
                "duration_secs": spec.duration_secs,
            }),
        ))
    }

    fn validate(&self, step: &Step) -> StepValidation {
        let mut validation = StepValidation::valid();
        match step.payload {
            StepPayload::Delay(ref spec) if spec.duration_secs > 0 => {}
            StepPayload::Delay(_) => validation.error("duration_secs", "delay must be positive"),
            _ => validation.error("kind", "expected a delay payload"),
        }
        validation
    }
}
