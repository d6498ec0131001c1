//! Action sender error types.

use thiserror::Error;

/// Errors that can occur while sending an action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// No sender registered under the action name.
    #[error("Action not found: {0}")]
    NotFound(String),

    /// The action parameters are missing or malformed.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// The sender did not answer in time.
    #[error("Action timed out after {0} seconds")]
    Timeout(u64),

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider answered with a non-success status.
    #[error("Provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ActionError {
    fn from(e: serde_json::Error) -> Self {
        ActionError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for ActionError {
    fn from(e: reqwest::Error) -> Self {
        ActionError::Http(e.to_string())
    }
}
