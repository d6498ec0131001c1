//! Action dispatch result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status reported by a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// Provider accepted the request.
    Sent,
    /// Provider refused the request.
    Failed,
    /// Nothing was sent (e.g. log-only sender).
    Skipped,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Sent => write!(f, "sent"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// What a sender hands back after talking to its provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub status: ActionStatus,

    /// Provider-specific response data (message id, HTTP status, ...).
    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionReceipt {
    /// Create a receipt for an accepted request.
    pub fn sent(data: serde_json::Value) -> Self {
        Self {
            status: ActionStatus::Sent,
            data,
            error: None,
        }
    }

    /// Create a receipt for a refused request.
    pub fn failed(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            status: ActionStatus::Failed,
            data,
            error: Some(message.into()),
        }
    }

    /// Create a receipt for a request that was intentionally not sent.
    pub fn skipped(data: serde_json::Value) -> Self {
        Self {
            status: ActionStatus::Skipped,
            data,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.status, ActionStatus::Failed)
    }
}

/// Result of [`ActionRegistry::dispatch`](crate::ActionRegistry::dispatch).
///
/// `audit` is what gets recorded in the execution history. It always carries
/// the action name, the idempotency key and the dispatch duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub audit: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub(crate) fn from_receipt(
        receipt: ActionReceipt,
        action: &str,
        idempotency_key: &str,
        started_at: DateTime<Utc>,
    ) -> Self {
        let success = receipt.is_success();
        Self {
            success,
            audit: audit_record(
                action,
                idempotency_key,
                started_at,
                receipt.status,
                receipt.data,
            ),
            error: receipt.error,
        }
    }

    pub(crate) fn failure(
        action: &str,
        idempotency_key: &str,
        started_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            audit: audit_record(
                action,
                idempotency_key,
                started_at,
                ActionStatus::Failed,
                serde_json::Value::Null,
            ),
            error: Some(error.into()),
        }
    }
}

fn audit_record(
    action: &str,
    idempotency_key: &str,
    started_at: DateTime<Utc>,
    status: ActionStatus,
    data: serde_json::Value,
) -> serde_json::Value {
    let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0);
    serde_json::json!({
        "action": action,
        "status": status,
        "idempotency_key": idempotency_key,
        "sent_at": started_at,
        "duration_ms": duration_ms,
        "response": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ActionStatus::Sent.to_string(), "sent");
        assert_eq!(ActionStatus::Failed.to_string(), "failed");
        assert_eq!(ActionStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_skipped_counts_as_success() {
        assert!(ActionReceipt::skipped(serde_json::json!({})).is_success());
        assert!(ActionReceipt::sent(serde_json::json!({})).is_success());
        assert!(!ActionReceipt::failed("nope", serde_json::Value::Null).is_success());
    }

    #[test]
    fn test_outcome_audit_fields() {
        let receipt = ActionReceipt::sent(serde_json::json!({"message_id": "m-1"}));
        let outcome = ActionOutcome::from_receipt(receipt, "send_email", "key-1", Utc::now());

        assert!(outcome.success);
        assert_eq!(outcome.audit["action"], "send_email");
        assert_eq!(outcome.audit["status"], "sent");
        assert_eq!(outcome.audit["idempotency_key"], "key-1");
        assert_eq!(outcome.audit["response"]["message_id"], "m-1");
    }

    #[test]
    fn test_failure_outcome() {
        let outcome = ActionOutcome::failure("webhook", "key-2", Utc::now(), "boom");
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
        assert_eq!(outcome.audit["status"], "failed");
    }
}
