//! Trigger handlers configured from a rule's `trigger` block.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::registry::{TriggerContext, TriggerHandler};
use crate::engine::evaluator::json_path;
use crate::error::{AppError, AppResult};
use crate::rules::{ReentryPolicy, RuleDefinition, TriggerSpec};
use crate::store::{ExecutionFilter, ExecutionStore};

#[derive(Debug, Clone)]
pub struct DeclarativeTrigger {
    workflow_id: String,
    spec: TriggerSpec,
}

impl DeclarativeTrigger {
    pub fn new(workflow_id: impl Into<String>, spec: TriggerSpec) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            spec,
        }
    }

    pub fn from_rule(rule: &RuleDefinition) -> AppResult<Self> {
        let spec = rule.trigger.clone().ok_or_else(|| {
            AppError::Validation(format!("rule '{}' has no trigger", rule.workflow_id()))
        })?;
        Ok(Self::new(rule.workflow_id(), spec))
    }

    pub fn policy(&self) -> ReentryPolicy {
        self.spec.reentry
    }

    fn required_key(&self, payload: &serde_json::Value, field: &str) -> AppResult<String> {
        match json_path(payload, field) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            _ => Err(AppError::Validation(format!(
                "{} trigger requires '{}'",
                self.spec.trigger_type, field
            ))),
        }
    }
}

#[async_trait]
impl TriggerHandler for DeclarativeTrigger {
    fn trigger_type(&self) -> &str {
        &self.spec.trigger_type
    }

    fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn validate(
        &self,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> AppResult<TriggerContext> {
        if !payload.is_object() {
            return Err(AppError::Validation(format!(
                "{} trigger payload must be an object",
                self.spec.trigger_type
            )));
        }

        let missing: Vec<&str> = self
            .spec
            .required_fields
            .iter()
            .filter(|f| json_path(payload, f).map_or(true, |v| v.is_null()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "{} trigger is missing required fields: {}",
                self.spec.trigger_type,
                missing.join(", ")
            )));
        }

        let user_id = self.required_key(payload, &self.spec.user_field)?;
        let trigger_id = self.required_key(payload, &self.spec.id_field)?;

        let product_id = match self.spec.product_field {
            Some(ref field) => {
                let value = json_path(payload, field).filter(|v| !v.is_null()).cloned();
                if value.is_none() && self.spec.reentry == ReentryPolicy::OncePerProduct {
                    return Err(AppError::Validation(format!(
                        "{} trigger requires '{}'",
                        self.spec.trigger_type, field
                    )));
                }
                value
            }
            None => None,
        };

        Ok(TriggerContext {
            execution_id: Uuid::new_v4(),
            workflow_id: self.workflow_id.clone(),
            trigger_type: self.spec.trigger_type.clone(),
            trigger_id,
            user_id,
            product_id,
            entity_data: payload.clone(),
            metadata: serde_json::json!({
                "received_at": now,
                "reentry": self.spec.reentry.to_string(),
            }),
        })
    }

    async fn should_execute(
        &self,
        ctx: &TriggerContext,
        store: &dyn ExecutionStore,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut filter = ExecutionFilter::for_workflow_user(&ctx.workflow_id, &ctx.user_id);
        filter.created_after = self
            .spec
            .dedup_window_secs
            .map(|secs| now - Duration::seconds(secs as i64));

        match self.spec.reentry {
            ReentryPolicy::Always => return Ok(true),
            ReentryPolicy::OnceOnly => {
                filter.trigger_type = Some(ctx.trigger_type.clone());
                filter.trigger_id = Some(ctx.trigger_id.clone());
            }
            ReentryPolicy::OncePerUser | ReentryPolicy::OncePerProduct => {}
        }

        let existing = store.list_executions(&filter).await?;
        let blocked = existing
            .iter()
            .filter(|e| e.status.blocks_reentry())
            .any(|e| match self.spec.reentry {
                ReentryPolicy::OncePerProduct => e.product_id() == ctx.product_id.as_ref(),
                _ => true,
            });

        if blocked {
            tracing::info!(
                workflow_id = %ctx.workflow_id,
                user_id = %ctx.user_id,
                trigger_type = %ctx.trigger_type,
                policy = %self.spec.reentry,
                "Re-entry policy blocked trigger"
            );
        }
        Ok(!blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::machine::{ExecutionEvent, ExecutionStatus};
    use crate::engine::plan::Plan;
    use crate::store::{MemoryStore, StateCommit, WorkflowExecution};
    use serde_json::json;

    fn handler(reentry: ReentryPolicy) -> DeclarativeTrigger {
        let mut spec = TriggerSpec::new("subscription_created");
        spec.reentry = reentry;
        spec.product_field = Some("product.id".into());
        spec.required_fields = vec!["email".into()];
        DeclarativeTrigger::new("welcome", spec)
    }

    fn payload(id: &str, product: &str) -> serde_json::Value {
        json!({"id": id, "user_id": 42, "email": "a@example.com", "product": {"id": product}})
    }

    async fn admit(store: &MemoryStore, handler: &DeclarativeTrigger, p: serde_json::Value) {
        let now = Utc::now();
        let ctx = handler.validate(&p, now).unwrap();
        let plan = Plan {
            workflow_id: "welcome".into(),
            version: "1".into(),
            source_hash: String::new(),
            compiled_at: now,
            steps: vec![],
        };
        let exec = WorkflowExecution::new(
            ctx.execution_id,
            &ctx.identity(),
            plan,
            ctx.initial_context(),
            now,
        );
        store.insert_execution(&exec).await.unwrap();
    }

    #[test]
    fn test_validate_extracts_identity() {
        let ctx = handler(ReentryPolicy::OncePerUser)
            .validate(&payload("sub-1", "B"), Utc::now())
            .unwrap();
        assert_eq!(ctx.user_id, "42");
        assert_eq!(ctx.trigger_id, "sub-1");
        assert_eq!(ctx.product_id, Some(json!("B")));
        assert_eq!(ctx.workflow_id, "welcome");
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let h = handler(ReentryPolicy::OncePerProduct);
        let now = Utc::now();
        assert!(h.validate(&json!({"id": "1", "user_id": "u"}), now).is_err());
        assert!(h
            .validate(&json!({"id": "1", "user_id": "u", "email": "e"}), now)
            .is_err());
        assert!(h.validate(&json!([1, 2]), now).is_err());
        assert!(h
            .validate(&json!({"user_id": "u", "email": "e", "product": {"id": "A"}}), now)
            .is_err());
    }

    #[tokio::test]
    async fn test_once_per_user_blocks_second_trigger() {
        let store = MemoryStore::new();
        let h = handler(ReentryPolicy::OncePerUser);
        admit(&store, &h, payload("sub-1", "A")).await;

        let ctx = h.validate(&payload("sub-2", "B"), Utc::now()).unwrap();
        assert!(!h.should_execute(&ctx, &store, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_once_per_product_allows_other_product() {
        let store = MemoryStore::new();
        let h = handler(ReentryPolicy::OncePerProduct);
        admit(&store, &h, payload("sub-1", "A")).await;

        let other = h.validate(&payload("sub-2", "B"), Utc::now()).unwrap();
        assert!(h.should_execute(&other, &store, Utc::now()).await.unwrap());
        let same = h.validate(&payload("sub-3", "A"), Utc::now()).unwrap();
        assert!(!h.should_execute(&same, &store, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_once_only_is_per_trigger_id() {
        let store = MemoryStore::new();
        let h = handler(ReentryPolicy::OnceOnly);
        admit(&store, &h, payload("sub-1", "A")).await;

        let other = h.validate(&payload("sub-2", "A"), Utc::now()).unwrap();
        assert!(h.should_execute(&other, &store, Utc::now()).await.unwrap());
        let same = h.validate(&payload("sub-1", "A"), Utc::now()).unwrap();
        assert!(!h.should_execute(&same, &store, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_runs_do_not_block() {
        let store = MemoryStore::new();
        let h = handler(ReentryPolicy::OncePerUser);
        admit(&store, &h, payload("sub-1", "A")).await;

        let existing = store.list_executions(&ExecutionFilter::default()).await.unwrap();
        let id = existing[0].execution_id;
        let now = Utc::now();
        store.commit(id, &StateCommit::new(ExecutionEvent::Start), now).await.unwrap();
        let failed = store
            .commit(id, &StateCommit::new(ExecutionEvent::Fail), now)
            .await
            .unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);

        let ctx = h.validate(&payload("sub-2", "A"), Utc::now()).unwrap();
        assert!(h.should_execute(&ctx, &store, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_dedup_window_ignores_old_runs() {
        let store = MemoryStore::new();
        let mut spec = TriggerSpec::new("subscription_created");
        spec.dedup_window_secs = Some(60);
        let h = DeclarativeTrigger::new("welcome", spec);
        admit(&store, &h, payload("sub-1", "A")).await;

        let later = Utc::now() + Duration::minutes(5);
        let ctx = h.validate(&payload("sub-2", "A"), later).unwrap();
        assert!(h.should_execute(&ctx, &store, later).await.unwrap());
        assert!(!h.should_execute(&ctx, &store, Utc::now()).await.unwrap());
    }
}
