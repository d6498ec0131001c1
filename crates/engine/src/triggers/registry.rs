//! Trigger handler registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::declarative::DeclarativeTrigger;
use crate::error::{AppError, AppResult};
use crate::rules::{RuleDefinition, RuleKind};
use crate::store::{ExecutionStore, TriggerIdentity};

/// A validated trigger, ready for admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Id the execution will get if admitted.
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub trigger_type: String,
    pub trigger_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<serde_json::Value>,
    /// The raw trigger payload.
    pub entity_data: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl TriggerContext {
    pub fn identity(&self) -> TriggerIdentity {
        TriggerIdentity {
            workflow_id: self.workflow_id.clone(),
            user_id: self.user_id.clone(),
            trigger_type: self.trigger_type.clone(),
            trigger_id: self.trigger_id.clone(),
        }
    }

    /// Initial execution context.
    pub fn initial_context(&self) -> serde_json::Value {
        let mut context = serde_json::json!({
            "trigger": self.entity_data,
            "trigger_type": self.trigger_type,
            "trigger_id": self.trigger_id,
            "user_id": self.user_id,
            "workflow_id": self.workflow_id,
            "metadata": self.metadata,
            "steps": {},
        });
        if let (Some(map), Some(product)) = (context.as_object_mut(), self.product_id.as_ref()) {
            map.insert("product_id".to_string(), product.clone());
        }
        context
    }
}

#[async_trait]
pub trait TriggerHandler: Send + Sync {
    fn trigger_type(&self) -> &str;

    fn workflow_id(&self) -> &str;

    /// Check the payload and extract the trigger identity.
    fn validate(&self, payload: &serde_json::Value, now: DateTime<Utc>)
        -> AppResult<TriggerContext>;

    /// Apply the re-entry policy against existing executions.
    async fn should_execute(
        &self,
        ctx: &TriggerContext,
        store: &dyn ExecutionStore,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;
}

/// Registry of trigger handlers by trigger type.
#[derive(Default)]
pub struct TriggerRegistry {
    handlers: HashMap<String, Arc<dyn TriggerHandler>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One declarative handler per `Rule` document.
    pub fn from_rules(rules: &[RuleDefinition]) -> AppResult<Self> {
        let mut registry = Self::new();
        for rule in rules.iter().filter(|r| r.kind == RuleKind::Rule) {
            let handler = DeclarativeTrigger::from_rule(rule)?;
            if registry.has(handler.trigger_type()) {
                return Err(AppError::Validation(format!(
                    "trigger type '{}' is claimed by more than one rule",
                    handler.trigger_type()
                )));
            }
            registry.register(handler);
        }
        Ok(registry)
    }

    pub fn register<H: TriggerHandler + 'static>(&mut self, handler: H) {
        let trigger_type = handler.trigger_type().to_string();
        self.handlers.insert(trigger_type, Arc::new(handler));
    }

    pub fn get(&self, trigger_type: &str) -> Option<Arc<dyn TriggerHandler>> {
        self.handlers.get(trigger_type).cloned()
    }

    pub fn has(&self, trigger_type: &str) -> bool {
        self.handlers.contains_key(trigger_type)
    }

    pub fn list(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }
}
