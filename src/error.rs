//! Error types for taskflow
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (missing record, bad input, name collision, bad config)
//! - 3: Blocked by the task/iteration state machine
//! - 4: Operation failed (I/O error, corrupt file)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the taskflow CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const INVALID_STATE: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for taskflow operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // State machine blocks (exit code 3)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Operation failures (exit code 4)
    #[error("Corrupt record {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound(_)
            | Error::Conflict(_)
            | Error::Validation(_)
            | Error::InvalidConfig(_) => exit_codes::USER_ERROR,

            Error::InvalidState(_) => exit_codes::INVALID_STATE,

            Error::Corrupt { .. }
            | Error::Storage(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Stable machine-readable kind, shared by every adapter.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Validation(_) | Error::InvalidConfig(_) => "validation",
            Error::InvalidState(_) => "invalid_state",
            Error::Corrupt { .. }
            | Error::Storage(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_) => "storage",
        }
    }

    /// Extra structured context for JSON error bodies.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Corrupt { path, .. } => Some(serde_json::json!({
                "path": path.display().to_string(),
            })),
            _ => None,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Error::Corrupt {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for taskflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            kind: err.kind(),
            details: err.details(),
        }
    }
}
