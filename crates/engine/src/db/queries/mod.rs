//! Query functions for the `drip` schema, organised by table.

pub mod delay;
pub mod execution;
pub mod trigger;

use crate::error::AppError;

/// Partial unique index over the identity of live executions.
pub const LIVE_IDENTITY_INDEX: &str = "workflow_execution_live_identity";

/// Unique constraint on `(execution_id, step_id)` of pending delays.
pub const DELAY_KEY_CONSTRAINT: &str = "pending_delay_execution_step";

/// Map unique violations to the domain error for the violated constraint.
pub fn map_unique_violation(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            let message = db.message().to_string();
            return match db.constraint() {
                Some(LIVE_IDENTITY_INDEX) => AppError::DuplicateAdmission(message),
                Some(DELAY_KEY_CONSTRAINT) => AppError::DuplicateDelay(message),
                _ => AppError::Conflict(message),
            };
        }
    }
    AppError::Database(err)
}
