//! Execution state store.
//!
//! The store is the only writer of executions, delays and trigger events.
//! Every status change goes through [`ExecutionStore::commit`], which runs
//! [`StateCommit::apply`] under a row lock and inserts any scheduled delay in
//! the same transaction.

pub mod commit;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;

pub use commit::{StateCommit, StepPointer};
pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution. A live execution with the same
    /// [`TriggerIdentity`] yields `AppError::DuplicateAdmission`.
    async fn insert_execution(&self, execution: &WorkflowExecution) -> AppResult<()>;

    async fn get_execution(&self, execution_id: Uuid) -> AppResult<Option<WorkflowExecution>>;

    /// Newest first.
    async fn list_executions(&self, filter: &ExecutionFilter) -> AppResult<Vec<WorkflowExecution>>;

    /// Apply `commit` atomically and return the updated execution.
    async fn commit(
        &self,
        execution_id: Uuid,
        commit: &StateCommit,
        now: DateTime<Utc>,
    ) -> AppResult<WorkflowExecution>;

    async fn get_delay(&self, delay_id: Uuid) -> AppResult<Option<PendingDelay>>;

    async fn delays_for_execution(&self, execution_id: Uuid) -> AppResult<Vec<PendingDelay>>;

    /// Move a claimable delay to `processing`. `None` when someone else holds
    /// it or it is already finished.
    async fn claim_delay(
        &self,
        delay_id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> AppResult<Option<PendingDelay>>;

    /// Return a claimed delay to `pending`.
    async fn release_delay(&self, delay_id: Uuid, now: DateTime<Utc>) -> AppResult<()>;

    /// Mark a delay `executed` or `failed`.
    async fn finish_delay(
        &self,
        delay_id: Uuid,
        status: DelayStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Pending delays due at `now`, plus processing rows claimed before
    /// `stale_before`. Oldest first.
    async fn due_delays(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<PendingDelay>>;

    async fn enqueue_trigger(
        &self,
        trigger_type: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> AppResult<TriggerEvent>;

    /// Unprocessed events created at or after `since`. Oldest first.
    async fn pending_triggers(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<TriggerEvent>>;

    /// Returns false when the event was already processed.
    async fn mark_trigger_processed(
        &self,
        event_id: i64,
        outcome: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;
}
