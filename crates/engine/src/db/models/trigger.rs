//! `drip.trigger_event` rows.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::store::TriggerEvent;

#[derive(Debug, Clone, FromRow)]
pub struct TriggerEventRow {
    pub event_id: i64,
    pub trigger_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub outcome: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<TriggerEventRow> for TriggerEvent {
    fn from(row: TriggerEventRow) -> Self {
        TriggerEvent {
            event_id: row.event_id,
            trigger_type: row.trigger_type,
            payload: row.payload,
            processed: row.processed,
            outcome: row.outcome,
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}
