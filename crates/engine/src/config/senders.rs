//! Action sender endpoints.

use serde::Deserialize;
use std::time::Duration;

/// Sender configuration, prefixed with `DRIP_SENDER_`.
///
/// Email and SMS fall back to the log sender when their endpoint is unset.
#[derive(Debug, Clone, Deserialize)]
pub struct SenderConfig {
    pub email_endpoint: Option<String>,
    pub sms_endpoint: Option<String>,
    pub api_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

impl SenderConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("DRIP_SENDER_").from_env::<SenderConfig>()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            email_endpoint: None,
            sms_endpoint: None,
            api_token: None,
            timeout_secs: default_timeout(),
        }
    }
}
