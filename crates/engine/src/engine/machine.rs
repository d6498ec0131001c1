//! Execution status machine.
//!
//! Status changes only happen through [`transition`]; the store calls it for
//! every commit so an illegal change never reaches persistence.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    /// Suspended on a pending delay.
    Delayed,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 7] = [
        Self::Pending,
        Self::Running,
        Self::Delayed,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Terminal executions are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses that count as a previous run for re-entry checks.
    pub fn blocks_reentry(self) -> bool {
        !matches!(self, Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Delayed => "delayed",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "delayed" => Ok(Self::Delayed),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(AppError::Parse(format!(
                "unknown execution status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEvent {
    Start,
    /// A step finished and the pointer moved on.
    Advance,
    Suspend,
    Resume,
    Pause,
    Unpause,
    Complete,
    Fail,
    Cancel,
}

impl std::fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Advance => write!(f, "advance"),
            Self::Suspend => write!(f, "suspend"),
            Self::Resume => write!(f, "resume"),
            Self::Pause => write!(f, "pause"),
            Self::Unpause => write!(f, "unpause"),
            Self::Complete => write!(f, "complete"),
            Self::Fail => write!(f, "fail"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// Next status for `event`, or `None` when the change is not allowed.
///
/// `paused_from` is the status recorded when the execution was paused and is
/// only consulted for [`ExecutionEvent::Unpause`].
pub fn transition(
    status: ExecutionStatus,
    event: ExecutionEvent,
    paused_from: Option<ExecutionStatus>,
) -> Option<ExecutionStatus> {
    use ExecutionEvent as E;
    use ExecutionStatus as S;

    match (status, event) {
        (S::Pending, E::Start) => Some(S::Running),
        (S::Running, E::Advance) => Some(S::Running),
        (S::Running, E::Suspend) => Some(S::Delayed),
        (S::Delayed, E::Resume) => Some(S::Running),
        (S::Running | S::Delayed, E::Pause) => Some(S::Paused),
        (S::Paused, E::Unpause) => match paused_from {
            Some(prev @ (S::Running | S::Delayed)) => Some(prev),
            _ => Some(S::Running),
        },
        (S::Running, E::Complete) => Some(S::Completed),
        (S::Running, E::Fail) => Some(S::Failed),
        (s, E::Cancel) if !s.is_terminal() => Some(S::Cancelled),
        _ => None,
    }
}

/// Like [`transition`], with the rejection as an error.
pub fn try_transition(
    status: ExecutionStatus,
    event: ExecutionEvent,
    paused_from: Option<ExecutionStatus>,
) -> Result<ExecutionStatus, AppError> {
    transition(status, event, paused_from).ok_or_else(|| AppError::InvalidTransition {
        status: status.to_string(),
        event: event.to_string(),
    })
}
