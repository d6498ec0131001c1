//! In-memory store for tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    DelayStatus, ExecutionFilter, ExecutionStore, PendingDelay, StateCommit, TriggerEvent,
    WorkflowExecution,
};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Tables {
    executions: HashMap<Uuid, WorkflowExecution>,
    delays: HashMap<Uuid, PendingDelay>,
    triggers: Vec<TriggerEvent>,
}

/// A single mutex over all tables; every method is one "transaction".
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn live_duplicate(&self, candidate: &WorkflowExecution) -> bool {
        let identity = candidate.identity();
        self.executions.values().any(|e| {
            e.execution_id != candidate.execution_id
                && !e.status.is_terminal()
                && e.identity() == identity
        })
    }

    fn delay_key_taken(&self, delay: &PendingDelay) -> bool {
        self.delays
            .values()
            .any(|d| d.execution_id == delay.execution_id && d.step_id == delay.step_id)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert_execution(&self, execution: &WorkflowExecution) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.executions.contains_key(&execution.execution_id) {
            return Err(AppError::Conflict(format!(
                "execution {} already exists",
                execution.execution_id
            )));
        }
        if tables.live_duplicate(execution) {
            return Err(AppError::DuplicateAdmission(execution.identity().to_string()));
        }
        tables
            .executions
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> AppResult<Option<WorkflowExecution>> {
        Ok(self.tables.lock().await.executions.get(&execution_id).cloned())
    }

    async fn list_executions(&self, filter: &ExecutionFilter) -> AppResult<Vec<WorkflowExecution>> {
        let tables = self.tables.lock().await;
        let mut found: Vec<WorkflowExecution> = tables
            .executions
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(found.into_iter().skip(offset).take(limit).collect())
    }

    async fn commit(
        &self,
        execution_id: Uuid,
        commit: &StateCommit,
        now: DateTime<Utc>,
    ) -> AppResult<WorkflowExecution> {
        let mut tables = self.tables.lock().await;
        let mut execution = tables
            .executions
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("execution {}", execution_id)))?;

        let delay = commit.apply(&mut execution, now)?;
        if let Some(ref delay) = delay {
            if tables.delay_key_taken(delay) {
                return Err(AppError::DuplicateDelay(format!(
                    "{}/{}",
                    delay.execution_id, delay.step_id
                )));
            }
        }

        tables.executions.insert(execution_id, execution.clone());
        if let Some(delay) = delay {
            tables.delays.insert(delay.delay_id, delay);
        }
        Ok(execution)
    }

    async fn get_delay(&self, delay_id: Uuid) -> AppResult<Option<PendingDelay>> {
        Ok(self.tables.lock().await.delays.get(&delay_id).cloned())
    }

    async fn delays_for_execution(&self, execution_id: Uuid) -> AppResult<Vec<PendingDelay>> {
        let tables = self.tables.lock().await;
        let mut delays: Vec<PendingDelay> = tables
            .delays
            .values()
            .filter(|d| d.execution_id == execution_id)
            .cloned()
            .collect();
        delays.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(delays)
    }

    async fn claim_delay(
        &self,
        delay_id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> AppResult<Option<PendingDelay>> {
        let mut tables = self.tables.lock().await;
        let Some(delay) = tables.delays.get_mut(&delay_id) else {
            return Ok(None);
        };
        if !delay.is_claimable(stale_before) {
            return Ok(None);
        }
        delay.status = DelayStatus::Processing;
        delay.claimed_at = Some(now);
        delay.updated_at = now;
        Ok(Some(delay.clone()))
    }

    async fn release_delay(&self, delay_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(delay) = tables.delays.get_mut(&delay_id) {
            if delay.status == DelayStatus::Processing {
                delay.status = DelayStatus::Pending;
                delay.claimed_at = None;
                delay.updated_at = now;
            }
        }
        Ok(())
    }

    async fn finish_delay(
        &self,
        delay_id: Uuid,
        status: DelayStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        let delay = tables
            .delays
            .get_mut(&delay_id)
            .ok_or_else(|| AppError::NotFound(format!("delay {}", delay_id)))?;
        delay.status = status;
        delay.error = error;
        delay.updated_at = now;
        Ok(())
    }

    async fn due_delays(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<PendingDelay>> {
        let tables = self.tables.lock().await;
        let mut due: Vec<PendingDelay> = tables
            .delays
            .values()
            .filter(|d| d.resume_at <= now && d.is_claimable(stale_before))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.resume_at.cmp(&b.resume_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn enqueue_trigger(
        &self,
        trigger_type: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> AppResult<TriggerEvent> {
        let mut tables = self.tables.lock().await;
        let event = TriggerEvent {
            event_id: tables.triggers.len() as i64 + 1,
            trigger_type: trigger_type.to_string(),
            payload: payload.clone(),
            processed: false,
            outcome: None,
            created_at: now,
            processed_at: None,
        };
        tables.triggers.push(event.clone());
        Ok(event)
    }

    async fn pending_triggers(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<TriggerEvent>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .triggers
            .iter()
            .filter(|t| !t.processed && t.created_at >= since)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_trigger_processed(
        &self,
        event_id: i64,
        outcome: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut tables = self.tables.lock().await;
        let event = tables
            .triggers
            .iter_mut()
            .find(|t| t.event_id == event_id)
            .ok_or_else(|| AppError::NotFound(format!("trigger event {}", event_id)))?;
        if event.processed {
            return Ok(false);
        }
        event.processed = true;
        event.outcome = Some(outcome.clone());
        event.processed_at = Some(now);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::machine::{ExecutionEvent, ExecutionStatus};
    use crate::engine::plan::{Plan, Step, StepPayload};
    use crate::store::{DelayDraft, DelayKind, StepPointer, TriggerIdentity};
    use chrono::Duration;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn execution(trigger_id: &str, now: DateTime<Utc>) -> WorkflowExecution {
        let plan = Plan {
            workflow_id: "wf".into(),
            version: "1".into(),
            source_hash: String::new(),
            compiled_at: now,
            steps: vec![Step {
                id: "s001".into(),
                branch: None,
                payload: StepPayload::End(Default::default()),
            }],
        };
        let identity = TriggerIdentity {
            workflow_id: "wf".into(),
            user_id: "u1".into(),
            trigger_type: "signup".into(),
            trigger_id: trigger_id.into(),
        };
        WorkflowExecution::new(Uuid::new_v4(), &identity, plan, json!({}), now)
    }

    fn suspend(resume_at: DateTime<Utc>) -> StateCommit {
        StateCommit::new(ExecutionEvent::Suspend)
            .with_pointer(StepPointer::at("s002", Some(1)))
            .with_delay(DelayDraft {
                step_id: "s001".into(),
                resume_step_id: Some("s002".into()),
                kind: DelayKind::Delay,
                resume_at,
            })
    }

    #[tokio::test]
    async fn test_live_duplicate_is_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = execution("t1", now);
        assert_ok!(store.insert_execution(&first).await);

        let err = store.insert_execution(&execution("t1", now)).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateAdmission(_)));
        assert_ok!(store.insert_execution(&execution("t2", now)).await);

        store
            .commit(first.execution_id, &StateCommit::new(ExecutionEvent::Cancel), now)
            .await
            .unwrap();
        assert_ok!(store.insert_execution(&execution("t1", now)).await);
    }

    #[tokio::test]
    async fn test_commit_inserts_delay_atomically() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let exec = execution("t1", now);
        store.insert_execution(&exec).await.unwrap();
        store
            .commit(exec.execution_id, &StateCommit::new(ExecutionEvent::Start), now)
            .await
            .unwrap();

        let updated = store
            .commit(exec.execution_id, &suspend(now + Duration::hours(1)), now)
            .await
            .unwrap();
        assert_eq!(updated.status, ExecutionStatus::Delayed);
        assert_eq!(store.delays_for_execution(exec.execution_id).await.unwrap().len(), 1);

        // Second suspension on the same key fails and leaves the row untouched.
        store
            .commit(exec.execution_id, &StateCommit::new(ExecutionEvent::Resume), now)
            .await
            .unwrap();
        let err = store
            .commit(exec.execution_id, &suspend(now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateDelay(_)));
        let current = store.get_execution(exec.execution_id).await.unwrap().unwrap();
        assert_eq!(current.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_claim_and_stale_reclaim() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let exec = execution("t1", now);
        store.insert_execution(&exec).await.unwrap();
        store
            .commit(exec.execution_id, &StateCommit::new(ExecutionEvent::Start), now)
            .await
            .unwrap();
        store.commit(exec.execution_id, &suspend(now), now).await.unwrap();

        let delay = store.due_delays(now, now, 10).await.unwrap().remove(0);
        let stale_before = now - Duration::minutes(5);

        assert!(store.claim_delay(delay.delay_id, now, stale_before).await.unwrap().is_some());
        assert!(store.claim_delay(delay.delay_id, now, stale_before).await.unwrap().is_none());
        assert!(store.due_delays(now, stale_before, 10).await.unwrap().is_empty());

        let later = now + Duration::minutes(10);
        let reclaimed = store
            .claim_delay(delay.delay_id, later, later - Duration::minutes(5))
            .await
            .unwrap();
        assert!(reclaimed.is_some());

        store
            .finish_delay(delay.delay_id, DelayStatus::Executed, None, later)
            .await
            .unwrap();
        assert!(store
            .claim_delay(delay.delay_id, later + Duration::days(1), later + Duration::days(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_trigger_queue() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = store
            .enqueue_trigger("signup", &json!({"user_id": "u0"}), now - Duration::days(3))
            .await
            .unwrap();
        let fresh = store
            .enqueue_trigger("signup", &json!({"user_id": "u1"}), now)
            .await
            .unwrap();

        let pending = store.pending_triggers(now - Duration::days(1), 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_id, fresh.event_id);

        assert!(store.mark_trigger_processed(fresh.event_id, &json!({}), now).await.unwrap());
        assert!(!store.mark_trigger_processed(fresh.event_id, &json!({}), now).await.unwrap());
        assert_err!(store.mark_trigger_processed(99, &json!({}), now).await);
        assert!(!old.processed);
    }
}
