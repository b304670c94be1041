//! Error Handling
//!
//! Unified error types for the store, queue, and bridge.
//! Uses thiserror for ergonomic error definitions.

use claude_recall_core::CoreError;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed record or message; nothing was persisted
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown memory key or message id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock contention or timeout; safe to retry
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// The message was reclaimed and handed to another worker
    #[error("Stale claim: {0}")]
    StaleClaim(String),

    /// Hard ceiling reached and pruning cannot free space
    #[error("Capacity error: {0}")]
    Capacity(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite errors (busy/locked codes become `TransientStorage` instead)
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a transient storage error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientStorage(msg.into())
    }

    /// Create a capacity error
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }

    /// Create a stale claim error
    pub fn stale_claim(msg: impl Into<String>) -> Self {
        Self::StaleClaim(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller may retry the operation unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientStorage(_))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                AppError::TransientStorage(err.to_string())
            }
            _ => AppError::Sqlite(err),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) | CoreError::Parse(msg) => AppError::Validation(msg),
            CoreError::Serialization(e) => AppError::Serialization(e),
        }
    }
}

/// Convert AppError to a string suitable for dead-letter entries and logs
impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
