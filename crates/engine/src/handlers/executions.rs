//! Execution management API handlers.
//!
//! Handles listing, status and the operator controls.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::ExecutionStatus;
use crate::error::AppError;
use crate::state::AppState;
use crate::store::{ExecutionFilter, WorkflowExecution};

const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for listing executions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListExecutionsQuery {
    pub workflow_id: Option<String>,
    pub user_id: Option<String>,
    pub trigger_type: Option<String>,
    pub trigger_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TryFrom<ListExecutionsQuery> for ExecutionFilter {
    type Error = AppError;

    fn try_from(query: ListExecutionsQuery) -> Result<Self, Self::Error> {
        let status = query
            .status
            .as_deref()
            .map(str::parse::<ExecutionStatus>)
            .transpose()?;
        Ok(ExecutionFilter {
            workflow_id: query.workflow_id,
            user_id: query.user_id,
            trigger_type: query.trigger_type,
            trigger_id: query.trigger_id,
            status,
            created_after: None,
            created_before: None,
            limit: Some(query.limit.unwrap_or(DEFAULT_LIMIT)),
            offset: query.offset,
        })
    }
}

/// Execution without its plan and history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub trigger_type: String,
    pub trigger_id: String,
    pub user_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<WorkflowExecution> for ExecutionSummary {
    fn from(e: WorkflowExecution) -> Self {
        Self {
            execution_id: e.execution_id,
            workflow_id: e.workflow_id,
            trigger_type: e.trigger_type,
            trigger_id: e.trigger_id,
            user_id: e.user_id,
            status: e.status,
            current_step_id: e.current_step_id,
            retry_count: e.retry_count,
            error: e.error,
            created_at: e.created_at,
            updated_at: e.updated_at,
            completed_at: e.completed_at,
            failed_at: e.failed_at,
        }
    }
}

/// List executions, newest first.
///
/// GET /api/executions
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<Vec<ExecutionSummary>>, AppError> {
    let filter = ExecutionFilter::try_from(query)?;
    let executions = state.engine.list_executions(&filter).await?;
    Ok(Json(executions.into_iter().map(ExecutionSummary::from).collect()))
}

/// Full execution record, including the plan and history.
///
/// GET /api/executions/{execution_id}
pub async fn get(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<WorkflowExecution>, AppError> {
    let execution = state.engine.get_execution_status(execution_id).await?;
    Ok(Json(execution))
}

/// POST /api/executions/{execution_id}/start
pub async fn start(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionSummary>, AppError> {
    let execution = state.engine.start_execution(execution_id).await?;
    Ok(Json(execution.into()))
}

/// POST /api/executions/{execution_id}/stop
pub async fn stop(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionSummary>, AppError> {
    let execution = state.engine.stop_execution(execution_id).await?;
    Ok(Json(execution.into()))
}

/// POST /api/executions/{execution_id}/pause
pub async fn pause(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionSummary>, AppError> {
    let execution = state.engine.pause_execution(execution_id).await?;
    Ok(Json(execution.into()))
}

/// POST /api/executions/{execution_id}/resume
pub async fn resume(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionSummary>, AppError> {
    let execution = state.engine.resume_execution(execution_id).await?;
    Ok(Json(execution.into()))
}

/// Cancel an execution and fail its pending delays.
///
/// POST /api/executions/{execution_id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionSummary>, AppError> {
    let execution = state.engine.cancel_execution(execution_id).await?;
    Ok(Json(execution.into()))
}
