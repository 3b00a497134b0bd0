//! Error types for juno-core.

use thiserror::Error;

/// Result type for juno-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in juno-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown note, paragraph, interpreter or setting id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is invalid for the current state (e.g. clearing a running paragraph).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Interpreter-side failure.
    ///
    /// The scheduler captures this as the job result with `ERROR` status;
    /// it is only returned directly by interpreter backends.
    #[error("execution error: {0}")]
    Execution(String),

    /// Submitting to a scheduler that has been stopped.
    #[error("scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    /// Cron expression could not be registered.
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Format the error with a recovery hint for CLI output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::NotFound(_) => Some("run `juno list` to see available notes"),
            Error::Conflict(_) => Some("wait for the paragraph to finish or restart its interpreter"),
            Error::InvalidCron { .. } => {
                Some("expressions have 6 or 7 fields: sec min hour day-of-month month day-of-week [year]")
            }
            Error::SchedulerUnavailable(_) => Some("the interpreter was shut down; restart it"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
