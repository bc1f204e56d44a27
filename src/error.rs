//! Error types for the Dojo toolkit

use thiserror::Error;

/// Result type used across the library
pub type Result<T> = std::result::Result<T, DojoError>;

/// Errors raised by the task store, the worker API client and the tracker
#[derive(Error, Debug)]
pub enum DojoError {
    #[error("Failed to create task: {0}")]
    CreateTaskFailed(String),

    #[error("Invalid miner response: {0}")]
    InvalidMinerResponse(String),

    #[error("Invalid validator request: {0}")]
    InvalidValidatorRequest(String),

    #[error("Invalid completion: {0}")]
    InvalidCompletion(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("{0}")]
    NoNewUnexpiredTasksYet(String),

    #[error("{0}")]
    UnexpiredTasksAlreadyProcessed(String),

    #[error("Invalid hotkey: {0}")]
    InvalidHotkey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Timeout")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl DojoError {
    /// True for the two "nothing to do yet" outcomes of the task store
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            DojoError::NoNewUnexpiredTasksYet(_) | DojoError::UnexpiredTasksAlreadyProcessed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_display_create_task_failed() {
        let err = DojoError::CreateTaskFailed("HTTP error".to_string());
        assert_eq!(err.to_string(), "Failed to create task: HTTP error");
    }

    #[test]
    fn test_idle_errors_pass_message_through() {
        let err = DojoError::NoNewUnexpiredTasksYet("wait for tasks".to_string());
        assert_eq!(err.to_string(), "wait for tasks");
        assert!(err.is_idle());
        assert!(DojoError::UnexpiredTasksAlreadyProcessed(String::new()).is_idle());
        assert!(!DojoError::Timeout.is_idle());
    }

    #[test]
    fn test_from_io_error() {
        let err: DojoError = IoError::new(ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, DojoError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DojoError = json_err.into();
        assert!(matches!(err, DojoError::Json(_)));
    }
}
