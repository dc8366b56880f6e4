//! Core error types for pomosync-core.
//!
//! This module defines the error hierarchy using thiserror. Each collaborator
//! boundary (settings validation, session store, local database, configuration)
//! has its own error enum, and [`CoreError`] unifies them for callers.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for pomosync-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A proposed mode mapping was rejected before any state changed.
    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    /// Session store errors (lookup, transport, backend)
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// Local database errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Client identifier could not be read or created
    #[error("Client ID error: {0}")]
    ClientId(#[from] crate::storage::ClientIdError),

    /// No session exists for the given code.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The runtime task has shut down and can no longer accept commands.
    #[error("Timer runtime is not running")]
    RuntimeClosed,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons a mode mapping is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// Duration is zero or otherwise not a positive number of seconds
    #[error("Duration for mode '{mode}' must be a positive number of seconds, got {value}")]
    NonPositiveDuration { mode: String, value: String },

    /// Duration exceeds the longest countdown the engine accepts
    #[error("Duration for mode '{mode}' is {secs} seconds, longer than the maximum of {max}")]
    TooLong { mode: String, secs: u64, max: u64 },

    /// Duration could not be parsed as a number
    #[error("Duration for mode '{mode}' is not numeric: {value}")]
    NonNumericDuration { mode: String, value: String },

    /// The mapping contains no modes at all
    #[error("Mode mapping must contain at least one mode")]
    Empty,

    /// A referenced mode id does not exist in the mapping
    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    /// Input did not have the expected shape
    #[error("Malformed settings: {0}")]
    Malformed(String),
}

/// Session store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No record for the given session id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Could not allocate an unused session code
    #[error("Failed to allocate a session code after {attempts} attempts")]
    CodeExhausted { attempts: u32 },

    /// Backend failure (lock poisoning, unreachable store, ...)
    #[error("Session store backend failure: {0}")]
    Backend(String),

    /// SQLite-backed store failure
    #[error("Session database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored record could not be decoded
    #[error("Session record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded
    #[error("Corrupt value for key '{key}': {message}")]
    CorruptValue { key: String, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Data directory could not be determined or created
    #[error("Failed to prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dotted key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::Backend(format!("lock poisoned: {err}"))
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_error_converts_into_core_error() {
        let err: CoreError = SettingsError::UnknownMode("nap".into()).into();
        assert!(matches!(err, CoreError::InvalidSettings(_)));
        assert_eq!(err.to_string(), "Invalid settings: Unknown mode: nap");
    }

    #[test]
    fn locked_sqlite_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );
        assert!(matches!(DatabaseError::from(err), DatabaseError::Locked));
    }
}
