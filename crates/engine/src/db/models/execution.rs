//! `drip.workflow_execution` rows.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::WorkflowExecution;

#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub trigger_type: String,
    pub trigger_id: String,
    pub user_id: String,
    pub status: String,
    pub current_step_id: Option<String>,
    pub current_step_index: Option<i32>,
    pub retry_count: i32,
    pub state: serde_json::Value,
    pub workflow_definition: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for WorkflowExecution {
    type Error = AppError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(WorkflowExecution {
            execution_id: row.execution_id,
            workflow_id: row.workflow_id,
            trigger_type: row.trigger_type,
            trigger_id: row.trigger_id,
            user_id: row.user_id,
            status: row.status.parse()?,
            current_step_id: row.current_step_id,
            current_step_index: row.current_step_index,
            retry_count: row.retry_count,
            state: serde_json::from_value(row.state)?,
            workflow_definition: serde_json::from_value(row.workflow_definition)?,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
        })
    }
}
