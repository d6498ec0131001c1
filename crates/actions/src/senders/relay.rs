//! Shared HTTP relay plumbing for provider-backed senders.

use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ActionError;
use crate::result::ActionReceipt;

/// Provider relay endpoint configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub endpoint: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
}

impl RelayConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// POST `body` to the relay and turn the response into a receipt.
///
/// 4xx responses are a refusal (`Failed` receipt); 5xx and transport errors
/// are errors so the engine can retry them.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    config: &RelayConfig,
    idempotency_key: &str,
    body: &serde_json::Value,
) -> Result<ActionReceipt, ActionError> {
    let mut request = client
        .post(&config.endpoint)
        .header("Idempotency-Key", idempotency_key)
        .json(body);

    for (key, value) in &config.headers {
        request = request.header(key.as_str(), value.as_str());
    }

    if let Some(ref token) = config.api_token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let data: serde_json::Value =
        serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!(text));

    classify(status, data)
}

fn classify(status: StatusCode, data: serde_json::Value) -> Result<ActionReceipt, ActionError> {
    let data = serde_json::json!({
        "status_code": status.as_u16(),
        "body": data,
    });

    if status.is_success() {
        Ok(ActionReceipt::sent(data))
    } else if status.is_client_error() {
        Ok(ActionReceipt::failed(
            format!("HTTP {} response", status.as_u16()),
            data,
        ))
    } else {
        Err(ActionError::Rejected {
            status: status.as_u16(),
            body: data["body"].to_string(),
        })
    }
}
