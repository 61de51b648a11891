//! Command error types for terminal and `--json` output
//!
//! Serializes to `{"code": "...", "message": "..."}` so scripts can match on
//! the code.

use serde::Serialize;
use xsmartkg_core::{ApiError, ConsoleError};

/// Errors returned by console commands
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CommandError {
    // Validation errors
    InvalidInput { message: String },
    Busy { message: String },

    // Backend errors
    NotFound { message: String },
    Rejected { message: String },
    BackendError { message: String, status: u16 },
    NetworkError { message: String },

    // Build outcomes
    BuildFailed { message: String, task_id: String },
    ConnectionLost { message: String, task_id: String },

    InternalError { message: String },
}

impl CommandError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn build_failed(task_id: impl Into<String>, detail: Option<&str>) -> Self {
        Self::BuildFailed {
            message: format!("Build failed: {}", detail.unwrap_or("unknown error")),
            task_id: task_id.into(),
        }
    }

    pub fn connection_lost(task_id: impl Into<String>, attempts: u32) -> Self {
        let task_id = task_id.into();
        Self::ConnectionLost {
            message: format!(
                "Lost connection to task {} after {} reconnect attempts",
                task_id, attempts
            ),
            task_id,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput { message }
            | Self::Busy { message }
            | Self::NotFound { message }
            | Self::Rejected { message }
            | Self::BackendError { message, .. }
            | Self::NetworkError { message }
            | Self::BuildFailed { message, .. }
            | Self::ConnectionLost { message, .. }
            | Self::InternalError { message } => message,
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for CommandError {}

impl From<ApiError> for CommandError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Server { status: 404, message } => Self::NotFound { message },
            ApiError::Server { status, message } => Self::BackendError { message, status },
            ApiError::Rejected(message) => Self::Rejected { message },
            ApiError::Network(e) => Self::NetworkError {
                message: e.to_string(),
            },
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<ConsoleError> for CommandError {
    fn from(err: ConsoleError) -> Self {
        match err {
            ConsoleError::Validation(message) => Self::InvalidInput { message },
            ConsoleError::Busy => Self::Busy {
                message: ConsoleError::Busy.to_string(),
            },
            ConsoleError::Api(e) => e.into(),
        }
    }
}

// Conversion from anyhow::Error (startup failures)
impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

// File selection errors
impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        Self::invalid_input(err.to_string())
    }
}

/// Result type alias for commands
pub type CommandResult<T> = Result<T, CommandError>;
