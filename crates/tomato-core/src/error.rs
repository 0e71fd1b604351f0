//! Core error types for tomato-core.
//!
//! This module defines the error hierarchy using thiserror. Sync failures
//! live in [`crate::sync::SyncError`] and convert into [`CoreError`].

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncError;

/// Core error type for tomato-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Local store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote store / sync errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Export/import errors
    #[error("{0}")]
    Transfer(#[from] TransferError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Local store errors.
///
/// Every variant is fatal for the operation that raised it; nothing retries.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open the store
    #[error("Failed to open local store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Store is locked by another process
    #[error("Local store is locked")]
    Locked,

    /// No room left for the write
    #[error("Local store quota exceeded while writing '{key}'")]
    QuotaExceeded { key: String },

    /// Stored value could not be decoded
    #[error("Stored value for '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-path key
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    /// Value could not be parsed for the target key
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Export/import errors.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Payload is not a valid transfer document
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => match e.code {
                rusqlite::ErrorCode::DatabaseLocked | rusqlite::ErrorCode::DatabaseBusy => {
                    StorageError::Locked
                }
                rusqlite::ErrorCode::DiskFull => StorageError::QuotaExceeded {
                    key: String::new(),
                },
                _ => StorageError::QueryFailed(err.to_string()),
            },
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_error_mentions_invalid_format() {
        let err = CoreError::from(TransferError::InvalidFormat("missing key `tasks`".into()));
        assert_eq!(err.to_string(), "invalid format: missing key `tasks`");
    }

    #[test]
    fn locked_sqlite_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(StorageError::from(err), StorageError::Locked));
    }
}
