//! Admission: turn a raw trigger into a pending execution.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::registry::TriggerRegistry;
use crate::clock::Clock;
use crate::engine::compiler::compile;
use crate::engine::executors::ExecutorRegistry;
use crate::error::{AppError, AppResult};
use crate::rules::RuleSource;
use crate::store::{ExecutionStore, WorkflowExecution};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub duplicate_prevented: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AdmissionOutcome {
    pub fn admitted(execution_id: Uuid, workflow_id: &str) -> Self {
        Self {
            success: true,
            execution_id: Some(execution_id),
            workflow_id: Some(workflow_id.to_string()),
            duplicate_prevented: false,
            reason: None,
        }
    }

    pub fn duplicate(workflow_id: &str, reason: impl Into<String>) -> Self {
        Self {
            success: true,
            execution_id: None,
            workflow_id: Some(workflow_id.to_string()),
            duplicate_prevented: true,
            reason: Some(reason.into()),
        }
    }
}

pub struct AdmissionController {
    triggers: TriggerRegistry,
    rules: Arc<dyn RuleSource>,
    executors: Arc<ExecutorRegistry>,
    store: Arc<dyn ExecutionStore>,
    clock: Arc<dyn Clock>,
}

impl AdmissionController {
    pub fn new(
        triggers: TriggerRegistry,
        rules: Arc<dyn RuleSource>,
        executors: Arc<ExecutorRegistry>,
        store: Arc<dyn ExecutionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            triggers,
            rules,
            executors,
            store,
            clock,
        }
    }

    pub fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    /// Validate, dedup, compile and insert.
    ///
    /// Compile and validation problems are returned as errors. A trigger that
    /// the re-entry policy or the live-identity constraint rejects is a
    /// successful outcome with `duplicate_prevented` set.
    pub async fn process(
        &self,
        trigger_type: &str,
        payload: &serde_json::Value,
    ) -> AppResult<AdmissionOutcome> {
        let handler = self.triggers.get(trigger_type).ok_or_else(|| {
            AppError::Validation(format!("unknown trigger type '{}'", trigger_type))
        })?;

        let now = self.clock.now();
        let ctx = handler.validate(payload, now)?;

        if !handler
            .should_execute(&ctx, self.store.as_ref(), now)
            .await?
        {
            return Ok(AdmissionOutcome::duplicate(
                &ctx.workflow_id,
                "re-entry policy prevented a new execution",
            ));
        }

        let rule = self
            .rules
            .load_rule(&ctx.workflow_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rule {}", ctx.workflow_id)))?;
        let plan = compile(&rule, now)?;
        for warning in self.executors.validate_plan(&plan)? {
            tracing::warn!(workflow_id = %ctx.workflow_id, warning = %warning, "Plan warning");
        }

        let execution =
            WorkflowExecution::new(ctx.execution_id, &ctx.identity(), plan, ctx.initial_context(), now);

        match self.store.insert_execution(&execution).await {
            Ok(()) => {
                tracing::info!(
                    execution_id = %execution.execution_id,
                    workflow_id = %execution.workflow_id,
                    user_id = %execution.user_id,
                    trigger_type = %trigger_type,
                    "Execution admitted"
                );
                Ok(AdmissionOutcome::admitted(
                    execution.execution_id,
                    &execution.workflow_id,
                ))
            }
            Err(AppError::DuplicateAdmission(identity)) => {
                tracing::info!(
                    trigger_type = %trigger_type,
                    identity = %identity,
                    "Live execution already exists"
                );
                Ok(AdmissionOutcome::duplicate(
                    &ctx.workflow_id,
                    "a live execution already exists for this trigger",
                ))
            }
            Err(e) => Err(e),
        }
    }
}
