//! Trigger event queue queries.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::db::models::TriggerEventRow;
use crate::error::AppResult;

pub async fn insert_trigger<'e, E: PgExecutor<'e>>(
    executor: E,
    trigger_type: &str,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> AppResult<TriggerEventRow> {
    let row = sqlx::query_as::<_, TriggerEventRow>(
        r#"
        INSERT INTO drip.trigger_event (trigger_type, payload, processed, created_at)
        VALUES ($1, $2, FALSE, $3)
        RETURNING *
        "#,
    )
    .bind(trigger_type)
    .bind(payload)
    .bind(now)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

pub async fn pending_triggers<'e, E: PgExecutor<'e>>(
    executor: E,
    since: DateTime<Utc>,
    limit: i64,
) -> AppResult<Vec<TriggerEventRow>> {
    let rows = sqlx::query_as::<_, TriggerEventRow>(
        r#"
        SELECT *
        FROM drip.trigger_event
        WHERE NOT processed AND created_at >= $1
        ORDER BY event_id ASC
        LIMIT $2
        "#,
    )
    .bind(since)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// Returns `None` when the event does not exist, `Some(false)` when it was
/// already processed.
pub async fn mark_processed<'e, E: PgExecutor<'e>>(
    executor: E,
    event_id: i64,
    outcome: &serde_json::Value,
    now: DateTime<Utc>,
) -> AppResult<Option<bool>> {
    let row: Option<(bool,)> = sqlx::query_as(
        r#"
        WITH target AS (
            SELECT event_id, processed FROM drip.trigger_event WHERE event_id = $1
        ),
        updated AS (
            UPDATE drip.trigger_event t
            SET processed = TRUE, outcome = $2, processed_at = $3
            FROM target
            WHERE t.event_id = target.event_id AND NOT t.processed
            RETURNING t.event_id
        )
        SELECT EXISTS (SELECT 1 FROM updated) FROM target
        "#,
    )
    .bind(event_id)
    .bind(outcome)
    .bind(now)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(updated,)| updated))
}
