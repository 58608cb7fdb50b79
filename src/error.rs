//! Error types for the worker runtime.
//!
//! Two families exist on purpose: [`WorkerError`] is what the runtime itself
//! produces (configuration, transport, authorization), while [`HandlerError`]
//! is what application handlers raise. Handler failures never propagate out of
//! the runtime — they are converted into reported task results.

use thiserror::Error;

/// Main error type for worker runtime operations.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Invalid registration or startup configuration. Fatal, raised
    /// synchronously from the control API.
    #[error("Configuration error for '{field}': {message}")]
    Configuration { field: String, message: String },

    /// Network or server error while polling or reporting. Retried with
    /// backoff, never fatal.
    #[error("Transient communication error: {0}")]
    Transport(String),

    /// Expired or rejected credential. Triggers one refresh-and-retry.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        WorkerError::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkerError::Transport(_))
    }
}

/// Failure raised by an application handler.
///
/// `Failed` is retryable from the server's point of view and is reported as
/// `FAILED`; `Terminal` signals an unrecoverable condition and is reported as
/// `FAILED_WITH_TERMINAL_ERROR`, which excludes the task from server-side
/// auto-retry.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Terminal(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        HandlerError::Terminal(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Failed(format!("serialization error: {}", err))
    }
}

/// Result type alias for worker runtime operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(WorkerError::Transport("timeout".into()).is_transient());
        assert!(!WorkerError::Authorization("expired".into()).is_transient());
        assert!(!WorkerError::configuration("BATCH_SIZE", "must be positive").is_transient());
    }

    #[test]
    fn test_configuration_error_display() {
        let err =
            WorkerError::configuration("TASK_SERVER_URL", "Required environment variable not set");
        assert_eq!(
            err.to_string(),
            "Configuration error for 'TASK_SERVER_URL': Required environment variable not set"
        );
    }
}
