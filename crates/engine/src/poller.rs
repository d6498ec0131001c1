//! Periodic driver for trigger events and due delays.
//!
//! One loop, ticking every `poll_interval`. Each cycle drains a batch of
//! unprocessed trigger events and a batch of due delays, running up to
//! `max_concurrency` items at once, then starts executions stranded in
//! `pending`. Both passes are idempotent: a second
//! poller racing on the same rows loses the claim or hits the admission
//! guard.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::engine::WorkflowEngine;
use crate::error::{AppError, AppResult};
use crate::result_ext::ResultExt;
use crate::store::TriggerEvent;

const TARGET: &str = "drip.poller";

/// Counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub fetched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PollSummary {
    fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

pub struct Poller {
    engine: Arc<WorkflowEngine>,
    semaphore: Arc<Semaphore>,
}

impl Poller {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        let permits = engine.config().max_concurrency.max(1);
        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.engine.config().poll_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(target: TARGET, interval_secs = interval.as_secs(), "Poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let started = Instant::now();
            let triggers = self.poll_triggers().await.log_warn("poll trigger events");
            let delays = self.poll_due_delays().await.log_warn("poll due delays");
            let pending = self
                .poll_stale_pending()
                .await
                .log_warn("start stale pending executions");
            let elapsed = started.elapsed();

            if let (Ok(t), Ok(d), Ok(p)) = (triggers, delays, pending) {
                if t.fetched + d.fetched + p > 0 {
                    tracing::info!(
                        target: TARGET,
                        triggers = t.fetched,
                        triggers_failed = t.failed,
                        delays = d.fetched,
                        delays_failed = d.failed,
                        pending_started = p,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Poll cycle finished"
                    );
                }
            }

            if elapsed > interval {
                tracing::warn!(
                    target: TARGET,
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "Poll cycle overran its interval"
                );
            }
        }

        tracing::info!(target: TARGET, "Poller stopped");
    }

    /// Admit unprocessed trigger events created within the lookback window.
    pub async fn poll_triggers(&self) -> AppResult<PollSummary> {
        let now = self.engine.clock().now();
        let config = self.engine.config();
        let events = self
            .engine
            .store()
            .pending_triggers(now - config.trigger_lookback(), config.poll_batch_size)
            .await?;

        let mut summary = PollSummary {
            fetched: events.len(),
            ..Default::default()
        };
        let mut tasks = JoinSet::new();

        for event in events {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            let engine = self.engine.clone();
            tasks.spawn(async move {
                let _permit = permit;
                process_trigger(&engine, event).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            summary.record(matches!(joined, Ok(true)));
        }
        Ok(summary)
    }

    /// Resume every pending delay whose time has come, plus stale claims.
    pub async fn poll_due_delays(&self) -> AppResult<PollSummary> {
        let now = self.engine.clock().now();
        let config = self.engine.config();
        let due = self
            .engine
            .store()
            .due_delays(now, now - config.delay_claim_timeout(), config.poll_batch_size)
            .await?;

        let mut summary = PollSummary {
            fetched: due.len(),
            ..Default::default()
        };
        let mut tasks = JoinSet::new();

        for delay in due {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            let engine = self.engine.clone();
            tasks.spawn(async move {
                let _permit = permit;
                match engine.resume_from_delay(delay.delay_id).await {
                    Ok(outcome) => {
                        tracing::debug!(
                            target: TARGET,
                            delay_id = %delay.delay_id,
                            outcome = ?outcome,
                            "Delay processed"
                        );
                        true
                    }
                    Err(e) => {
                        tracing::error!(
                            target: TARGET,
                            delay_id = %delay.delay_id,
                            execution_id = %delay.execution_id,
                            error = %e,
                            "Delay resume failed"
                        );
                        false
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            summary.record(matches!(joined, Ok(true)));
        }
        Ok(summary)
    }

    /// Start executions whose admission committed but whose start did not.
    pub async fn poll_stale_pending(&self) -> AppResult<usize> {
        let started = self
            .engine
            .start_stale_pending(self.engine.config().poll_batch_size)
            .await?;
        Ok(started.len())
    }
}

/// Admit one queued event. Payload problems close the event with the error
/// as its outcome; store failures leave it for the next cycle.
async fn process_trigger(engine: &WorkflowEngine, event: TriggerEvent) -> bool {
    let result = engine
        .admit_trigger(&event.trigger_type, &event.payload)
        .await;

    let (outcome, ok) = match result {
        Ok(outcome) => match serde_json::to_value(&outcome) {
            Ok(value) => (value, true),
            Err(e) => (serde_json::json!({"success": false, "error": e.to_string()}), false),
        },
        Err(AppError::Database(e)) => {
            tracing::warn!(
                target: TARGET,
                event_id = event.event_id,
                error = %e,
                "Trigger admission hit the store; will retry"
            );
            return false;
        }
        Err(e) => {
            tracing::warn!(
                target: TARGET,
                event_id = event.event_id,
                trigger_type = %event.trigger_type,
                error = %e,
                "Trigger event rejected"
            );
            (serde_json::json!({"success": false, "error": e.to_string()}), false)
        }
    };

    let now = engine.clock().now();
    match engine
        .store()
        .mark_trigger_processed(event.event_id, &outcome, now)
        .await
    {
        Ok(true) => ok,
        Ok(false) => {
            tracing::debug!(target: TARGET, event_id = event.event_id, "Event already processed");
            ok
        }
        Err(e) => {
            tracing::error!(
                target: TARGET,
                event_id = event.event_id,
                error = %e,
                "Failed to mark trigger event processed"
            );
            false
        }
    }
}
