//! Action sender registry and dispatch.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ActionError;
use crate::result::{ActionOutcome, ActionReceipt};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A single action invocation issued by an action step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Registered action name (e.g. "send_email").
    pub action: String,

    /// Rendered action parameters.
    #[serde(default)]
    pub params: serde_json::Value,

    pub execution_id: String,
    pub step_id: String,

    /// Stable per (execution, step, attempt); forwarded to providers that
    /// support request deduplication.
    pub idempotency_key: String,
}

impl ActionRequest {
    pub fn new(
        action: impl Into<String>,
        params: serde_json::Value,
        execution_id: impl Into<String>,
        step_id: impl Into<String>,
    ) -> Self {
        let execution_id = execution_id.into();
        let step_id = step_id.into();
        let idempotency_key = format!("{}:{}", execution_id, step_id);
        Self {
            action: action.into(),
            params,
            execution_id,
            step_id,
            idempotency_key,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    /// Get a required string parameter.
    pub fn required_str(&self, field: &str) -> Result<&str, ActionError> {
        self.params
            .get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                ActionError::InvalidParams(format!(
                    "'{}' requires a non-empty '{}' parameter",
                    self.action, field
                ))
            })
    }

    /// Get an optional string parameter.
    pub fn optional_str(&self, field: &str) -> Option<&str> {
        self.params.get(field).and_then(|v| v.as_str())
    }
}

/// Sender trait for outbound side effects.
#[async_trait]
pub trait ActionSender: Send + Sync {
    /// Returns the sender's default action name.
    fn name(&self) -> &'static str;

    /// Perform the side effect.
    async fn send(&self, request: &ActionRequest) -> Result<ActionReceipt, ActionError>;
}

/// Registry of available action senders.
pub struct ActionRegistry {
    senders: HashMap<String, Arc<dyn ActionSender>>,
    timeout: Duration,
}

impl ActionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Bound every dispatch by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a sender under its own name.
    pub fn register<S: ActionSender + 'static>(&mut self, sender: S) {
        let name = sender.name().to_string();
        self.senders.insert(name, Arc::new(sender));
    }

    /// Register a sender under an explicit action name.
    pub fn register_named<S: ActionSender + 'static>(&mut self, name: &str, sender: S) {
        self.senders.insert(name.to_string(), Arc::new(sender));
    }

    /// Register an already shared sender under an explicit action name.
    pub fn register_shared(&mut self, name: &str, sender: Arc<dyn ActionSender>) {
        self.senders.insert(name.to_string(), sender);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionSender>> {
        self.senders.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.senders.contains_key(name)
    }

    /// List all registered action names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.senders.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch a request to its sender.
    ///
    /// Never returns an error: unknown actions, sender errors and timeouts all
    /// become an unsuccessful [`ActionOutcome`].
    pub async fn dispatch(&self, request: &ActionRequest) -> ActionOutcome {
        let started_at = Utc::now();

        let Some(sender) = self.get(&request.action) else {
            let err = ActionError::NotFound(request.action.clone());
            return ActionOutcome::failure(
                &request.action,
                &request.idempotency_key,
                started_at,
                err.to_string(),
            );
        };

        let result = tokio::time::timeout(self.timeout, sender.send(request)).await;

        match result {
            Ok(Ok(receipt)) => {
                tracing::debug!(
                    action = %request.action,
                    execution_id = %request.execution_id,
                    step_id = %request.step_id,
                    status = %receipt.status,
                    "Action dispatched"
                );
                ActionOutcome::from_receipt(
                    receipt,
                    &request.action,
                    &request.idempotency_key,
                    started_at,
                )
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    action = %request.action,
                    execution_id = %request.execution_id,
                    step_id = %request.step_id,
                    error = %e,
                    "Action failed"
                );
                ActionOutcome::failure(
                    &request.action,
                    &request.idempotency_key,
                    started_at,
                    e.to_string(),
                )
            }
            Err(_) => {
                let err = ActionError::Timeout(self.timeout.as_secs());
                tracing::warn!(
                    action = %request.action,
                    execution_id = %request.execution_id,
                    step_id = %request.step_id,
                    "Action timed out"
                );
                ActionOutcome::failure(
                    &request.action,
                    &request.idempotency_key,
                    started_at,
                    err.to_string(),
                )
            }
        }
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("senders", &self.list())
            .field("timeout", &self.timeout)
            .finish()
    }
}
