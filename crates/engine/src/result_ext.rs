//! Logging helpers for `Result` and `Option`.

use std::fmt::Display;
use std::panic::Location;

/// Adds `log` / `log_warn` to `Result`, recording the caller location.
pub trait ResultExt<T, E> {
    /// Log an `Err` at error level and pass the result through.
    fn log<S: Display>(self, context: S) -> Result<T, E>;

    /// Log an `Err` at warn level and pass the result through.
    ///
    /// For failures that are expected to clear up on the next poll cycle.
    fn log_warn<S: Display>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: Display>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller = Location::caller();
            tracing::error!(
                target: "drip_engine",
                error = %e,
                file = %format!("{}:{}", caller.file(), caller.line()),
                context = %context,
                "Operation failed"
            );
        }
        self
    }

    #[track_caller]
    fn log_warn<S: Display>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller = Location::caller();
            tracing::warn!(
                target: "drip_engine",
                error = %e,
                file = %format!("{}:{}", caller.file(), caller.line()),
                context = %context,
                "Operation failed, will retry"
            );
        }
        self
    }
}

pub trait OptionResultExt<T> {
    /// Warn if this is `None`.
    fn log_none<S: Display>(self, context: S) -> Option<T>;
}

impl<T> OptionResultExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: Display>(self, context: S) -> Option<T> {
        if self.is_none() {
            let caller = Location::caller();
            tracing::warn!(
                target: "drip_engine",
                file = %format!("{}:{}", caller.file(), caller.line()),
                context = %context,
                "Expected value was None"
            );
        }
        self
    }
}
