//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the design audit engine, providing structured
//! error types and conversion utilities for all system components.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from various system components
//! - **Output**: Structured error types with context and error chains
//! - **Error Categories**: Configuration, Rules, Guidance, Learning, History, API
//!
//! ## Key Features
//! - Hierarchical error types with detailed context
//! - Automatic error conversion and chaining
//! - User-friendly error messages for API responses
//! - Structured logging integration
//!
//! ## Usage
//! ```rust,ignore
//! use crate::errors::{Result, AuditError};
//!
//! fn save_operation() -> Result<()> {
//!     Err(AuditError::RuleValidation {
//!         field: "severity".to_string(),
//!         reason: "must be one of minor, major, critical".to_string(),
//!     })
//! }
//! ```

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, AuditError>;

/// Comprehensive error types for the design audit engine
#[derive(Debug, Error)]
pub enum AuditError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors for arbitrary fields
    #[error("Validation failed for field '{field}': {reason}")]
    ValidationFailed { field: String, reason: String },

    /// A rule definition failed schema validation on save
    #[error("Rule validation failed for '{field}': {reason}")]
    RuleValidation { field: String, reason: String },

    /// A rule carries a regex pattern that does not compile
    #[error("Invalid rule pattern '{pattern}': {details}")]
    InvalidRulePattern { pattern: String, details: String },

    /// Rule store file could not be read or written
    #[error("Rule store error at {path}: {details}")]
    RuleStore { path: String, details: String },

    /// Guidance corpus location unreadable
    #[error("Guidance corpus unavailable at {root}: {details}")]
    GuidanceCorpusUnavailable { root: String, details: String },

    /// Learning table file could not be read or written
    #[error("Learning store error at {path}: {details}")]
    LearningStore { path: String, details: String },

    /// History database errors
    #[error("History database error at {db_path}: {reason}")]
    HistoryStore { db_path: String, reason: String },

    /// History record not found
    #[error("History record not found: {key}")]
    HistoryRecordNotFound { key: String },

    /// Serialization/deserialization errors
    #[error("Serialization failed: {message}")]
    SerializationFailed { message: String },

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AuditError {
    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            AuditError::Config { .. } => "configuration",
            AuditError::RuleValidation { .. }
            | AuditError::InvalidRulePattern { .. }
            | AuditError::RuleStore { .. } => "rules",
            AuditError::GuidanceCorpusUnavailable { .. } => "guidance",
            AuditError::LearningStore { .. } => "learning",
            AuditError::HistoryStore { .. }
            | AuditError::HistoryRecordNotFound { .. }
            | AuditError::SerializationFailed { .. } => "history",
            AuditError::Toml(_) | AuditError::Json(_) => "serialization",
            AuditError::Internal { .. } | AuditError::ValidationFailed { .. } => "generic",
        }
    }

    /// Whether the operator can retry the failed operation after correcting input
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuditError::RuleValidation { .. }
                | AuditError::InvalidRulePattern { .. }
                | AuditError::ValidationFailed { .. }
                | AuditError::GuidanceCorpusUnavailable { .. }
        )
    }
}

// Conversion from common error types
impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        AuditError::Internal {
            message: format!("IO error: {}", err),
        }
    }
}

impl From<sled::Error> for AuditError {
    fn from(err: sled::Error) -> Self {
        AuditError::HistoryStore {
            db_path: String::new(),
            reason: err.to_string(),
        }
    }
}

impl From<bincode::Error> for AuditError {
    fn from(err: bincode::Error) -> Self {
        AuditError::SerializationFailed {
            message: format!("Binary serialization error: {}", err),
        }
    }
}

// Helper macros for common error patterns
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::errors::AuditError::Internal {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::AuditError::Internal {
            message: format!($fmt, $($arg)*),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($field:expr, $reason:expr) => {
        $crate::errors::AuditError::ValidationFailed {
            field: $field.to_string(),
            reason: $reason.to_string(),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let e = AuditError::RuleValidation {
            field: "id".to_string(),
            reason: "empty".to_string(),
        };
        assert_eq!(e.category(), "rules");
        assert!(e.is_recoverable());

        let e = AuditError::HistoryRecordNotFound {
            key: "abc".to_string(),
        };
        assert_eq!(e.category(), "history");
        assert!(!e.is_recoverable());
    }

    #[test]
    fn test_error_macros() {
        let e = internal_error!("failed after {} tries", 3);
        assert!(matches!(e, AuditError::Internal { .. }));
        assert_eq!(e.to_string(), "Internal error: failed after 3 tries");

        let e = validation_error!("file_name", "cannot be empty");
        assert_eq!(e.category(), "generic");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: AuditError = io.into();
        assert!(e.to_string().contains("missing"));
    }
}
