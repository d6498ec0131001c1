//! Pending delay queries.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use super::map_unique_violation;
use crate::db::models::DelayRow;
use crate::error::AppResult;
use crate::store::{DelayStatus, PendingDelay};

/// Insert a delay. A second delay for the same `(execution_id, step_id)`
/// fails with `DuplicateDelay`.
pub async fn insert_delay<'e, E: PgExecutor<'e>>(
    executor: E,
    delay: &PendingDelay,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO drip.pending_delay (
            delay_id, execution_id, step_id, resume_step_id, kind, resume_at,
            status, context, error, claimed_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(delay.delay_id)
    .bind(delay.execution_id)
    .bind(&delay.step_id)
    .bind(&delay.resume_step_id)
    .bind(delay.kind.to_string())
    .bind(delay.resume_at)
    .bind(delay.status.to_string())
    .bind(&delay.context)
    .bind(&delay.error)
    .bind(delay.claimed_at)
    .bind(delay.created_at)
    .bind(delay.updated_at)
    .execute(executor)
    .await
    .map_err(map_unique_violation)?;

    Ok(())
}

pub async fn get_delay<'e, E: PgExecutor<'e>>(
    executor: E,
    delay_id: Uuid,
) -> AppResult<Option<DelayRow>> {
    let row = sqlx::query_as::<_, DelayRow>(
        "SELECT * FROM drip.pending_delay WHERE delay_id = $1",
    )
    .bind(delay_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

pub async fn delays_for_execution<'e, E: PgExecutor<'e>>(
    executor: E,
    execution_id: Uuid,
) -> AppResult<Vec<DelayRow>> {
    let rows = sqlx::query_as::<_, DelayRow>(
        r#"
        SELECT *
        FROM drip.pending_delay
        WHERE execution_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(execution_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// Compare-and-set a delay into `processing`.
pub async fn claim_delay<'e, E: PgExecutor<'e>>(
    executor: E,
    delay_id: Uuid,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> AppResult<Option<DelayRow>> {
    let row = sqlx::query_as::<_, DelayRow>(
        r#"
        UPDATE drip.pending_delay
        SET status = 'processing', claimed_at = $2, updated_at = $2
        WHERE delay_id = $1
          AND (
            status = 'pending'
            OR (status = 'processing' AND (claimed_at IS NULL OR claimed_at < $3))
          )
        RETURNING *
        "#,
    )
    .bind(delay_id)
    .bind(now)
    .bind(stale_before)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

pub async fn release_delay<'e, E: PgExecutor<'e>>(
    executor: E,
    delay_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE drip.pending_delay
        SET status = 'pending', claimed_at = NULL, updated_at = $2
        WHERE delay_id = $1 AND status = 'processing'
        "#,
    )
    .bind(delay_id)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

/// Returns the number of rows updated.
pub async fn finish_delay<'e, E: PgExecutor<'e>>(
    executor: E,
    delay_id: Uuid,
    status: DelayStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE drip.pending_delay
        SET status = $2, error = $3, updated_at = $4
        WHERE delay_id = $1
        "#,
    )
    .bind(delay_id)
    .bind(status.to_string())
    .bind(error)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn due_delays<'e, E: PgExecutor<'e>>(
    executor: E,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
    limit: i64,
) -> AppResult<Vec<DelayRow>> {
    let rows = sqlx::query_as::<_, DelayRow>(
        r#"
        SELECT *
        FROM drip.pending_delay
        WHERE resume_at <= $1
          AND (
            status = 'pending'
            OR (status = 'processing' AND (claimed_at IS NULL OR claimed_at < $2))
          )
        ORDER BY resume_at ASC
        LIMIT $3
        "#,
    )
    .bind(now)
    .bind(stale_before)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}
