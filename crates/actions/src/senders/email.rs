//! Email relay sender.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use super::relay::{build_client, post_json, RelayConfig};
use crate::error::ActionError;
use crate::registry::{ActionRequest, ActionSender};
use crate::result::ActionReceipt;

fn is_valid_address(address: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)+$").ok())
        .as_ref()
        .map_or_else(|| address.contains('@'), |re| re.is_match(address))
}

/// Sends email through an HTTP relay.
///
/// Params: `to`, `subject`, `body`, optional `from` and `template`.
pub struct EmailSender {
    client: reqwest::Client,
    config: RelayConfig,
}

impl EmailSender {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            client: build_client(config.timeout),
            config,
        }
    }

    fn payload(request: &ActionRequest) -> Result<serde_json::Value, ActionError> {
        let to = request.required_str("to")?;
        if !is_valid_address(to) {
            return Err(ActionError::InvalidParams(format!(
                "invalid email address: {}",
                to
            )));
        }

        let subject = request.required_str("subject")?;
        let body = request
            .optional_str("body")
            .or_else(|| request.optional_str("template"))
            .ok_or_else(|| {
                ActionError::InvalidParams("send_email requires 'body' or 'template'".to_string())
            })?;

        Ok(serde_json::json!({
            "to": to,
            "from": request.optional_str("from"),
            "subject": subject,
            "body": body,
            "metadata": {
                "execution_id": request.execution_id,
                "step_id": request.step_id,
            },
        }))
    }
}

#[async_trait]
impl ActionSender for EmailSender {
    fn name(&self) -> &'static str {
        "send_email"
    }

    async fn send(&self, request: &ActionRequest) -> Result<ActionReceipt, ActionError> {
        let payload = Self::payload(request)?;
        post_json(&self.client, &self.config, &request.idempotency_key, &payload).await
    }
}
