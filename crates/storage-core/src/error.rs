//! Error types for storage operations

use std::time::Duration;

use cloud_storage_types::SharedTypeError;
use thiserror::Error;

/// Main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Missing required parameter: {field}")]
    MissingParameter { field: String },

    #[error("Invalid {field}: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Duplicate resource: {message}")]
    DuplicateResource { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Bad request: {message}")]
    Unreachable { message: String },

    #[error("Timed out after {timeout:?}: {operation}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Device not found: {message}")]
    DeviceNotFound { message: String },

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Persistence error: {message}")]
    InternalPersistence { message: String },

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Invalid stored configuration: {0}")]
    Config(#[from] SharedTypeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// External tool execution errors
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to execute {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("{command} did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("{command} exited with {exit_code:?}: {output}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },
}

impl StorageError {
    pub fn missing(field: &str) -> Self {
        StorageError::MissingParameter {
            field: field.to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        StorageError::InvalidFormat {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(operation: &str) -> Self {
        StorageError::UnsupportedOperation {
            operation: operation.to_string(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        StorageError::InternalPersistence {
            message: message.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, StorageError::UnsupportedOperation { .. })
    }
}
