//! Generic webhook sender.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::relay::{build_client, post_json, RelayConfig};
use crate::error::ActionError;
use crate::registry::{ActionRequest, ActionSender};
use crate::result::ActionReceipt;

/// POSTs a JSON body to `url`.
///
/// Params: `url`, optional `body` (defaults to the whole params object minus
/// `url`), optional `headers` and `token`.
pub struct WebhookSender {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            timeout,
        }
    }

    fn body(request: &ActionRequest) -> serde_json::Value {
        if let Some(body) = request.params.get("body") {
            return body.clone();
        }
        let mut params = request.params.clone();
        if let Some(map) = params.as_object_mut() {
            map.remove("url");
            map.remove("headers");
            map.remove("token");
        }
        params
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ActionSender for WebhookSender {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, request: &ActionRequest) -> Result<ActionReceipt, ActionError> {
        let url = request.required_str("url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ActionError::InvalidParams(format!(
                "webhook url must be http(s): {}",
                url
            )));
        }

        let headers: HashMap<String, String> = match request.params.get("headers") {
            Some(h) => serde_json::from_value(h.clone())?,
            None => HashMap::new(),
        };

        let mut config = RelayConfig::new(url)
            .with_timeout(self.timeout)
            .with_headers(headers);
        if let Some(token) = request.optional_str("token") {
            config = config.with_token(token);
        }

        post_json(&self.client, &config, &request.idempotency_key, &Self::body(request)).await
    }
}
