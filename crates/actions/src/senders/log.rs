//! Log-only sender.

use async_trait::async_trait;

use crate::error::ActionError;
use crate::registry::{ActionRequest, ActionSender};
use crate::result::ActionReceipt;

/// Writes the request to the log and reports it as skipped.
///
/// Registered for `log`, and in place of email/SMS when no relay endpoint is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl ActionSender for LogSender {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, request: &ActionRequest) -> Result<ActionReceipt, ActionError> {
        tracing::info!(
            target: "drip.actions",
            action = %request.action,
            execution_id = %request.execution_id,
            step_id = %request.step_id,
            params = %request.params,
            "Action logged"
        );
        Ok(ActionReceipt::skipped(serde_json::json!({
            "logged": true,
            "params": request.params,
        })))
    }
}
