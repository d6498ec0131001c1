//! Engine tuning knobs.

use serde::Deserialize;
use std::time::Duration;

/// Engine configuration, prefixed with `DRIP_ENGINE_`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Retry attempts after the first failure of a step.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry; doubled per attempt.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    #[serde(default = "default_retry_backoff_max")]
    pub retry_backoff_max_secs: u64,

    /// Items processed concurrently within one poll cycle.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Maximum items fetched per poll query.
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: i64,

    /// Trigger events older than this are ignored by the poller.
    #[serde(default = "default_trigger_lookback")]
    pub trigger_lookback_secs: u64,

    /// A delay stuck in `processing` longer than this is reclaimed.
    #[serde(default = "default_delay_claim_timeout")]
    pub delay_claim_timeout_secs: u64,

    /// Upper bound for a single action dispatch.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    60
}

fn default_retry_backoff_max() -> u64 {
    3600
}

fn default_max_concurrency() -> usize {
    4
}

fn default_poll_batch_size() -> i64 {
    100
}

fn default_trigger_lookback() -> u64 {
    86_400
}

fn default_delay_claim_timeout() -> u64 {
    300
}

fn default_action_timeout() -> u64 {
    30
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("DRIP_ENGINE_").from_env::<EngineConfig>()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Backoff before retry number `attempt` (1-based), capped.
    pub fn retry_backoff(&self, attempt: u32) -> chrono::Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let secs = self
            .retry_backoff_secs
            .saturating_mul(1u64 << exp)
            .min(self.retry_backoff_max_secs);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    pub fn trigger_lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.trigger_lookback_secs).unwrap_or(i64::MAX))
    }

    pub fn delay_claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.delay_claim_timeout_secs).unwrap_or(i64::MAX),
        )
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff(),
            retry_backoff_max_secs: default_retry_backoff_max(),
            max_concurrency: default_max_concurrency(),
            poll_batch_size: default_poll_batch_size(),
            trigger_lookback_secs: default_trigger_lookback(),
            delay_claim_timeout_secs: default_delay_claim_timeout(),
            action_timeout_secs: default_action_timeout(),
        }
    }
}
