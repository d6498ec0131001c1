//! Test doubles shared by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use drip_actions::{ActionError, ActionReceipt, ActionRegistry, ActionRequest, ActionSender};

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::engine::executors::{shared_flows_from, ExecutorRegistry};
use crate::engine::WorkflowEngine;
use crate::rules::{MemoryRuleSource, RuleDefinition};
use crate::error::{AppError, AppResult};
use crate::store::{
    DelayStatus, ExecutionFilter, ExecutionStore, MemoryStore, PendingDelay, StateCommit,
    TriggerEvent, WorkflowExecution,
};
use crate::template::TemplateRenderer;
use crate::triggers::TriggerRegistry;
use uuid::Uuid;

/// Records every request; optionally fails the first `n` calls.
pub struct RecordingSender {
    action: String,
    failures_left: AtomicU32,
    calls: Mutex<Vec<ActionRequest>>,
}

impl RecordingSender {
    pub fn new(action: &str) -> Arc<Self> {
        Self::failing(action, 0)
    }

    pub fn failing(action: &str, times: u32) -> Arc<Self> {
        Arc::new(Self {
            action: action.to_string(),
            failures_left: AtomicU32::new(times),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ActionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

#[async_trait]
impl ActionSender for RecordingSender {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, request: &ActionRequest) -> Result<ActionReceipt, ActionError> {
        self.calls.lock().unwrap().push(request.clone());
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Ok(ActionReceipt::failed(
                format!("{} unavailable", self.action),
                serde_json::json!({"attempt": self.calls.lock().unwrap().len()}),
            ));
        }
        Ok(ActionReceipt::sent(serde_json::json!({"to": request.params.get("to")})))
    }
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// An engine over in-memory parts with a manual clock.
pub struct Harness {
    pub engine: Arc<WorkflowEngine>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub rules: Arc<MemoryRuleSource>,
}

impl Harness {
    pub fn new(rules: Vec<RuleDefinition>, senders: &[&Arc<RecordingSender>]) -> Self {
        Self::with_config(rules, senders, EngineConfig::default())
    }

    pub fn with_config(
        rules: Vec<RuleDefinition>,
        senders: &[&Arc<RecordingSender>],
        config: EngineConfig,
    ) -> Self {
        Self::with_store(rules, senders, config, |store| store as Arc<dyn ExecutionStore>)
    }

    pub fn with_executors(
        rules: Vec<RuleDefinition>,
        executors: ExecutorRegistry,
        config: EngineConfig,
    ) -> Self {
        Self::assemble(rules, executors, config, |store| store as Arc<dyn ExecutionStore>)
    }

    /// Like [`Harness::with_config`], with the engine talking to the store
    /// through `wrap`. `Harness::store` stays the inner store.
    pub fn with_store(
        rules: Vec<RuleDefinition>,
        senders: &[&Arc<RecordingSender>],
        config: EngineConfig,
        wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn ExecutionStore>,
    ) -> Self {
        let mut actions = ActionRegistry::new();
        for sender in senders {
            actions.register_shared(sender.action(), (*sender).clone());
        }
        let executors = ExecutorRegistry::standard(
            Arc::new(actions),
            Arc::new(shared_flows_from(&rules)),
            Arc::new(TemplateRenderer::new()),
        );
        Self::assemble(rules, executors, config, wrap)
    }

    fn assemble(
        rules: Vec<RuleDefinition>,
        executors: ExecutorRegistry,
        config: EngineConfig,
        wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn ExecutionStore>,
    ) -> Self {
        let triggers = TriggerRegistry::from_rules(&rules).unwrap();
        let rules = Arc::new(MemoryRuleSource::with_rules(rules).unwrap());
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let engine = Arc::new(WorkflowEngine::new(
            wrap(store.clone()),
            Arc::new(executors),
            triggers,
            rules.clone(),
            clock.clone(),
            config,
        ));
        Self {
            engine,
            store,
            clock,
            rules,
        }
    }
}

/// A [`MemoryStore`] whose next `n` commits fail with a database error.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing_commits: AtomicU32,
}

impl FlakyStore {
    pub fn failing_commits(inner: Arc<MemoryStore>, times: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_commits: AtomicU32::new(times),
        })
    }
}

#[async_trait]
impl ExecutionStore for FlakyStore {
    async fn insert_execution(&self, execution: &WorkflowExecution) -> AppResult<()> {
        self.inner.insert_execution(execution).await
    }

    async fn get_execution(&self, execution_id: Uuid) -> AppResult<Option<WorkflowExecution>> {
        self.inner.get_execution(execution_id).await
    }

    async fn list_executions(&self, filter: &ExecutionFilter) -> AppResult<Vec<WorkflowExecution>> {
        self.inner.list_executions(filter).await
    }

    async fn commit(
        &self,
        execution_id: Uuid,
        commit: &StateCommit,
        now: DateTime<Utc>,
    ) -> AppResult<WorkflowExecution> {
        let failing = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.commit(execution_id, commit, now).await
    }

    async fn get_delay(&self, delay_id: Uuid) -> AppResult<Option<PendingDelay>> {
        self.inner.get_delay(delay_id).await
    }

    async fn delays_for_execution(&self, execution_id: Uuid) -> AppResult<Vec<PendingDelay>> {
        self.inner.delays_for_execution(execution_id).await
    }

    async fn claim_delay(
        &self,
        delay_id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> AppResult<Option<PendingDelay>> {
        self.inner.claim_delay(delay_id, now, stale_before).await
    }

    async fn release_delay(&self, delay_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        self.inner.release_delay(delay_id, now).await
    }

    async fn finish_delay(
        &self,
        delay_id: Uuid,
        status: DelayStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.inner.finish_delay(delay_id, status, error, now).await
    }

    async fn due_delays(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<PendingDelay>> {
        self.inner.due_delays(now, stale_before, limit).await
    }

    async fn enqueue_trigger(
        &self,
        trigger_type: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> AppResult<TriggerEvent> {
        self.inner.enqueue_trigger(trigger_type, payload, now).await
    }

    async fn pending_triggers(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<TriggerEvent>> {
        self.inner.pending_triggers(since, limit).await
    }

    async fn mark_trigger_processed(
        &self,
        event_id: i64,
        outcome: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.inner.mark_trigger_processed(event_id, outcome, now).await
    }
}
