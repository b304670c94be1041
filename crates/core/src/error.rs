//! Core Error Types
//!
//! Foundational error types used across the Claude Recall workspace. These
//! are dependency-free (only thiserror + std) to keep the core crate
//! lightweight.
//!
//! The main crate extends these with storage-specific variants (Sqlite,
//! TransientStorage, Capacity) in its own `AppError`.

use thiserror::Error;

/// Core error type for the Claude Recall workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = CoreError::validation("content is required");
        assert_eq!(err.to_string(), "Validation error: content is required");
    }

    #[test]
    fn test_parse_error() {
        let err = CoreError::parse("unknown memory type: banana");
        assert_eq!(err.to_string(), "Parse error: unknown memory type: banana");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let core_err: CoreError = json_err.into();
        assert!(matches!(core_err, CoreError::Serialization(_)));
    }
}
