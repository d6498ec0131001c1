//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    DelayStatus, ExecutionFilter, ExecutionStore, PendingDelay, StateCommit, TriggerEvent,
    WorkflowExecution,
};
use crate::db::queries::{delay, execution, trigger};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn insert_execution(&self, execution: &WorkflowExecution) -> AppResult<()> {
        execution::insert_execution(&self.pool, execution).await
    }

    async fn get_execution(&self, execution_id: Uuid) -> AppResult<Option<WorkflowExecution>> {
        execution::get_execution(&self.pool, execution_id)
            .await?
            .map(WorkflowExecution::try_from)
            .transpose()
    }

    async fn list_executions(&self, filter: &ExecutionFilter) -> AppResult<Vec<WorkflowExecution>> {
        execution::list_executions(&self.pool, filter)
            .await?
            .into_iter()
            .map(WorkflowExecution::try_from)
            .collect()
    }

    async fn commit(
        &self,
        execution_id: Uuid,
        commit: &StateCommit,
        now: DateTime<Utc>,
    ) -> AppResult<WorkflowExecution> {
        let mut tx = self.pool.begin().await?;

        let row = execution::lock_execution(&mut *tx, execution_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("execution {}", execution_id)))?;
        let mut current = WorkflowExecution::try_from(row)?;

        let pending = commit.apply(&mut current, now)?;
        execution::update_execution(&mut *tx, &current).await?;
        if let Some(ref pending) = pending {
            delay::insert_delay(&mut *tx, pending).await?;
        }

        tx.commit().await?;
        Ok(current)
    }

    async fn get_delay(&self, delay_id: Uuid) -> AppResult<Option<PendingDelay>> {
        delay::get_delay(&self.pool, delay_id)
            .await?
            .map(PendingDelay::try_from)
            .transpose()
    }

    async fn delays_for_execution(&self, execution_id: Uuid) -> AppResult<Vec<PendingDelay>> {
        delay::delays_for_execution(&self.pool, execution_id)
            .await?
            .into_iter()
            .map(PendingDelay::try_from)
            .collect()
    }

    async fn claim_delay(
        &self,
        delay_id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> AppResult<Option<PendingDelay>> {
        delay::claim_delay(&self.pool, delay_id, now, stale_before)
            .await?
            .map(PendingDelay::try_from)
            .transpose()
    }

    async fn release_delay(&self, delay_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        delay::release_delay(&self.pool, delay_id, now).await
    }

    async fn finish_delay(
        &self,
        delay_id: Uuid,
        status: DelayStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let updated =
            delay::finish_delay(&self.pool, delay_id, status, error.as_deref(), now).await?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("delay {}", delay_id)));
        }
        Ok(())
    }

    async fn due_delays(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<PendingDelay>> {
        delay::due_delays(&self.pool, now, stale_before, limit)
            .await?
            .into_iter()
            .map(PendingDelay::try_from)
            .collect()
    }

    async fn enqueue_trigger(
        &self,
        trigger_type: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> AppResult<TriggerEvent> {
        trigger::insert_trigger(&self.pool, trigger_type, payload, now)
            .await
            .map(TriggerEvent::from)
    }

    async fn pending_triggers(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<TriggerEvent>> {
        Ok(trigger::pending_triggers(&self.pool, since, limit)
            .await?
            .into_iter()
            .map(TriggerEvent::from)
            .collect())
    }

    async fn mark_trigger_processed(
        &self,
        event_id: i64,
        outcome: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        trigger::mark_processed(&self.pool, event_id, outcome, now)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("trigger event {}", event_id)))
    }
}
