//! Execution queries.

use sqlx::PgExecutor;
use uuid::Uuid;

use super::map_unique_violation;
use crate::db::models::ExecutionRow;
use crate::error::AppResult;
use crate::store::{ExecutionFilter, WorkflowExecution};

/// Insert a new execution.
pub async fn insert_execution<'e, E: PgExecutor<'e>>(
    executor: E,
    execution: &WorkflowExecution,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO drip.workflow_execution (
            execution_id, workflow_id, trigger_type, trigger_id, user_id, status,
            current_step_id, current_step_index, retry_count, state, workflow_definition,
            error, created_at, updated_at, completed_at, failed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(execution.execution_id)
    .bind(&execution.workflow_id)
    .bind(&execution.trigger_type)
    .bind(&execution.trigger_id)
    .bind(&execution.user_id)
    .bind(execution.status.as_str())
    .bind(&execution.current_step_id)
    .bind(execution.current_step_index)
    .bind(execution.retry_count)
    .bind(serde_json::to_value(&execution.state)?)
    .bind(serde_json::to_value(&execution.workflow_definition)?)
    .bind(&execution.error)
    .bind(execution.created_at)
    .bind(execution.updated_at)
    .bind(execution.completed_at)
    .bind(execution.failed_at)
    .execute(executor)
    .await
    .map_err(map_unique_violation)?;

    Ok(())
}

/// Get an execution by id.
pub async fn get_execution<'e, E: PgExecutor<'e>>(
    executor: E,
    execution_id: Uuid,
) -> AppResult<Option<ExecutionRow>> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT *
        FROM drip.workflow_execution
        WHERE execution_id = $1
        "#,
    )
    .bind(execution_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Get an execution and hold its row lock until the transaction ends.
pub async fn lock_execution<'e, E: PgExecutor<'e>>(
    executor: E,
    execution_id: Uuid,
) -> AppResult<Option<ExecutionRow>> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT *
        FROM drip.workflow_execution
        WHERE execution_id = $1
        FOR UPDATE
        "#,
    )
    .bind(execution_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Write back every mutable column.
pub async fn update_execution<'e, E: PgExecutor<'e>>(
    executor: E,
    execution: &WorkflowExecution,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE drip.workflow_execution
        SET status = $2,
            current_step_id = $3,
            current_step_index = $4,
            retry_count = $5,
            state = $6,
            error = $7,
            updated_at = $8,
            completed_at = $9,
            failed_at = $10
        WHERE execution_id = $1
        "#,
    )
    .bind(execution.execution_id)
    .bind(execution.status.as_str())
    .bind(&execution.current_step_id)
    .bind(execution.current_step_index)
    .bind(execution.retry_count)
    .bind(serde_json::to_value(&execution.state)?)
    .bind(&execution.error)
    .bind(execution.updated_at)
    .bind(execution.completed_at)
    .bind(execution.failed_at)
    .execute(executor)
    .await
    .map_err(map_unique_violation)?;

    Ok(())
}

/// List executions, newest first.
pub async fn list_executions<'e, E: PgExecutor<'e>>(
    executor: E,
    filter: &ExecutionFilter,
) -> AppResult<Vec<ExecutionRow>> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        r#"
        SELECT *
        FROM drip.workflow_execution
        WHERE ($1::text IS NULL OR workflow_id = $1)
          AND ($2::text IS NULL OR user_id = $2)
          AND ($3::text IS NULL OR trigger_type = $3)
          AND ($4::text IS NULL OR trigger_id = $4)
          AND ($5::text IS NULL OR status = $5)
          AND ($6::timestamptz IS NULL OR created_at >= $6)
          AND ($7::timestamptz IS NULL OR created_at < $7)
        ORDER BY created_at DESC
        LIMIT $8 OFFSET $9
        "#,
    )
    .bind(&filter.workflow_id)
    .bind(&filter.user_id)
    .bind(&filter.trigger_type)
    .bind(&filter.trigger_id)
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.created_after)
    .bind(filter.created_before)
    .bind(filter.limit.unwrap_or(1000))
    .bind(filter.offset.unwrap_or(0))
    .fetch_all(executor)
    .await?;

    Ok(rows)
}
