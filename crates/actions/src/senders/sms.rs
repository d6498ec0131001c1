//! SMS relay sender.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use super::relay::{build_client, post_json, RelayConfig};
use crate::error::ActionError;
use crate::registry::{ActionRequest, ActionSender};
use crate::result::ActionReceipt;

/// Maximum length of a single-segment message.
const MAX_BODY_CHARS: usize = 1600;

fn is_e164(number: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\+[1-9][0-9]{6,14}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(number))
}

/// Sends SMS through an HTTP relay. Params: `to` (E.164), `body`.
pub struct SmsSender {
    client: reqwest::Client,
    config: RelayConfig,
}

impl SmsSender {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            client: build_client(config.timeout),
            config,
        }
    }

    fn payload(request: &ActionRequest) -> Result<serde_json::Value, ActionError> {
        let to: String = request
            .required_str("to")?
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
            .collect();
        if !is_e164(&to) {
            return Err(ActionError::InvalidParams(format!(
                "phone number is not E.164: {}",
                to
            )));
        }

        let body = request.required_str("body")?;
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(ActionError::InvalidParams(format!(
                "sms body exceeds {} characters",
                MAX_BODY_CHARS
            )));
        }

        Ok(serde_json::json!({
            "to": to,
            "body": body,
            "metadata": {
                "execution_id": request.execution_id,
                "step_id": request.step_id,
            },
        }))
    }
}

#[async_trait]
impl ActionSender for SmsSender {
    fn name(&self) -> &'static str {
        "send_sms"
    }

    async fn send(&self, request: &ActionRequest) -> Result<ActionReceipt, ActionError> {
        let payload = Self::payload(request)?;
        post_json(&self.client, &self.config, &request.idempotency_key, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(params: serde_json::Value) -> ActionRequest {
        ActionRequest::new("send_sms", params, "exec-3", "s004")
    }

    #[test]
    fn test_e164() {
        assert!(is_e164("+14155550100"));
        assert!(!is_e164("4155550100"));
        assert!(!is_e164("+0123456"));
    }

    #[test]
    fn test_payload_normalizes_number() {
        let payload = SmsSender::payload(&request(serde_json::json!({
            "to": "+1 (415) 555-0100",
            "body": "Your trial ends tomorrow"
        })))
        .unwrap();
        assert_eq!(payload["to"], "+14155550100");
    }

    #[test]
    fn test_payload_rejects_long_body() {
        let body = "x".repeat(MAX_BODY_CHARS + 1);
        let err = SmsSender::payload(&request(serde_json::json!({
            "to": "+14155550100",
            "body": body
        })))
        .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
