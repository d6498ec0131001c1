use async_trait::async_trait;

use super::{ExecutionContext, StepExecutor, StepResult, StepValidation};
use crate::engine::plan::{Step, StepKind, StepPayload};
use crate::error::AppResult;

pub struct EndExecutor;

#[async_trait]
impl StepExecutor for EndExecutor {
    fn kind(&self) -> StepKind {
        StepKind::End
    }

    async fn execute(&self, step: &Step, _ctx: &ExecutionContext) -> AppResult<StepResult> {
        let reason = match step.payload {
            StepPayload::End(ref spec) => spec.reason.clone(),
            _ => None,
        };
        Ok(StepResult::completed(serde_json::json!({ "reason": reason })))
    }

    fn validate(&self, step: &Step) -> StepValidation {
        let mut validation = StepValidation::valid();
        if !matches!(step.payload, StepPayload::End(_)) {
            validation.error("kind", "expected an end payload");
        }
        validation
    }
}
