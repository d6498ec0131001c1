//! Delay endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::engine::ResumeOutcome;
use crate::error::AppError;
use crate::state::AppState;

/// Resume the execution suspended on a delay, ahead of the poller.
///
/// POST /api/delays/{delay_id}/resume
pub async fn resume(
    State(state): State<AppState>,
    Path(delay_id): Path<Uuid>,
) -> Result<Json<ResumeOutcome>, AppError> {
    let outcome = state.engine.resume_from_delay(delay_id).await?;
    Ok(Json(outcome))
}
