//! `drip.pending_delay` rows.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::PendingDelay;

#[derive(Debug, Clone, FromRow)]
pub struct DelayRow {
    pub delay_id: Uuid,
    pub execution_id: Uuid,
    pub step_id: String,
    pub resume_step_id: Option<String>,
    pub kind: String,
    pub resume_at: DateTime<Utc>,
    pub status: String,
    pub context: serde_json::Value,
    pub error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DelayRow> for PendingDelay {
    type Error = AppError;

    fn try_from(row: DelayRow) -> Result<Self, Self::Error> {
        Ok(PendingDelay {
            delay_id: row.delay_id,
            execution_id: row.execution_id,
            step_id: row.step_id,
            resume_step_id: row.resume_step_id,
            kind: row.kind.parse()?,
            resume_at: row.resume_at,
            status: row.status.parse()?,
            context: row.context,
            error: row.error,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
