//! Error types for the Drip engine.
//!
//! `AppError` implements `IntoResponse` so engine operations can be returned
//! straight from Axum handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error (malformed trigger payload, invalid step, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rule tree could not be compiled into a plan
    #[error("Compile error at {path}: {message}")]
    Compile { path: String, message: String },

    /// A step executor failed
    #[error("Step {step_id} failed: {message}")]
    StepExecution { step_id: String, message: String },

    /// Resume target does not match the execution's position
    #[error("Suspension inconsistency: {0}")]
    SuspensionInconsistency(String),

    /// A live execution already exists for the same trigger identity
    #[error("Duplicate admission: {0}")]
    DuplicateAdmission(String),

    /// A pending delay already exists for the same execution and step
    #[error("Duplicate delay: {0}")]
    DuplicateDelay(String),

    /// Status change not allowed by the execution state machine
    #[error("Invalid transition: cannot apply {event} to {status} execution")]
    InvalidTransition { status: String, event: String },

    /// Conflict error
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Template rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// Parse error (YAML, JSON, etc.)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl AppError {
    pub fn compile(path: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Compile {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn step(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::StepExecution {
            step_id: step_id.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Compile { .. } => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            AppError::StepExecution { .. } => {
                tracing::warn!(error = %self, "Step execution error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::SuspensionInconsistency(msg) => {
                tracing::warn!(error = %msg, "Suspension inconsistency");
                (StatusCode::CONFLICT, msg.clone())
            }
            AppError::DuplicateAdmission(msg)
            | AppError::DuplicateDelay(msg)
            | AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Serialization(e) => {
                tracing::error!(error = %e, "Serialization error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Template(msg) => {
                tracing::error!(error = %msg, "Template error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Parse(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display() {
        let err = AppError::compile("root.and[2].if[1].then", "unknown node kind 'sleep'");
        assert_eq!(
            err.to_string(),
            "Compile error at root.and[2].if[1].then: unknown node kind 'sleep'"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = AppError::InvalidTransition {
            status: "completed".to_string(),
            event: "resume".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition: cannot apply resume to completed execution"
        );
    }

    #[test]
    fn test_status_codes() {
        let resp = AppError::NotFound("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::compile("root", "bad").into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = AppError::SuspensionInconsistency("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
