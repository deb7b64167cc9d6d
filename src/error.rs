//! Unified error hierarchy for rehabrs
//!
//! Every fallible operation in the crate returns [`RehabError`]. Persistence
//! failures are surfaced to the caller untouched; the only locally recovered
//! error is a malformed sample payload, which the metrics recompute path
//! turns into an empty sample sequence.

use thiserror::Error;

/// Top-level error type for all rehabrs operations
#[derive(Debug, Error)]
pub enum RehabError {
    /// Not enough history, peers or samples to produce a result
    #[error("Insufficient data for {operation}: {reason}")]
    InsufficientData { operation: String, reason: String },

    /// Store unreachable or write rejected
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Stored sample payload could not be decoded
    #[error("Malformed samples: {0}")]
    MalformedSamples(#[from] MalformedSampleError),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Store could not be opened or reached
    #[error("Store connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Store stayed locked past the configured busy timeout
    #[error("Store busy: {operation} timed out")]
    Busy { operation: String },

    /// Query execution failed
    #[error("Query failed in {operation}: {reason}")]
    QueryFailed { operation: String, reason: String },

    /// Write rejected by a constraint
    #[error("Constraint violation: {constraint}")]
    ConstraintViolation { constraint: String },

    /// Record not found
    #[error("Record not found: {table}.{id}")]
    NotFound { table: String, id: String },

    /// A stored row failed boundary validation
    #[error("Invalid {table} record: {reason}")]
    InvalidRecord { table: String, reason: String },
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => PersistenceError::Busy {
                    operation: message.clone().unwrap_or_else(|| "sqlite".to_string()),
                },
                ErrorCode::ConstraintViolation => PersistenceError::ConstraintViolation {
                    constraint: message.clone().unwrap_or_else(|| err.to_string()),
                },
                ErrorCode::CannotOpen | ErrorCode::NotADatabase => {
                    PersistenceError::ConnectionFailed {
                        reason: err.to_string(),
                    }
                }
                _ => PersistenceError::QueryFailed {
                    operation: "sqlite".to_string(),
                    reason: err.to_string(),
                },
            },
            _ => PersistenceError::QueryFailed {
                operation: "sqlite".to_string(),
                reason: err.to_string(),
            },
        }
    }
}

impl From<rusqlite::Error> for RehabError {
    fn from(err: rusqlite::Error) -> Self {
        RehabError::Persistence(err.into())
    }
}

/// Sample payload decoding failure
#[derive(Debug, Error)]
#[error("could not decode sample payload: {reason}")]
pub struct MalformedSampleError {
    pub reason: String,
}

/// Result type alias for rehabrs operations
pub type Result<T> = std::result::Result<T, RehabError>;

impl RehabError {
    /// Shorthand for [`RehabError::InsufficientData`]
    pub fn insufficient(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        RehabError::InsufficientData {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RehabError::Persistence(PersistenceError::ConnectionFailed { .. })
                | RehabError::Persistence(PersistenceError::Busy { .. })
                | RehabError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RehabError::InsufficientData { .. } => ErrorSeverity::Info,
            RehabError::MalformedSamples(_) => ErrorSeverity::Warning,
            RehabError::Validation(_) => ErrorSeverity::Warning,
            RehabError::Persistence(PersistenceError::NotFound { .. }) => ErrorSeverity::Warning,
            RehabError::Persistence(_) => ErrorSeverity::Error,
            RehabError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RehabError::InsufficientData { .. } => {
                "Not enough exercise data yet. Create the workout manually or record more exercises first."
                    .to_string()
            }
            RehabError::Persistence(PersistenceError::ConnectionFailed { .. }) => {
                "Unable to reach the database. Please check your configuration.".to_string()
            }
            RehabError::Persistence(PersistenceError::Busy { .. }) => {
                "The database is busy. Please try again in a moment.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = RehabError::insufficient("recommendation", "no exercises");
        assert_eq!(err.severity(), ErrorSeverity::Info);

        let err = RehabError::Internal("test".to_string());
        assert_eq!(err.severity(), ErrorSeverity::Critical);

        let err = RehabError::Persistence(PersistenceError::QueryFailed {
            operation: "insert".to_string(),
            reason: "disk full".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_error_retryable() {
        let err = RehabError::Persistence(PersistenceError::Busy {
            operation: "insert".to_string(),
        });
        assert!(err.is_retryable());

        let err = RehabError::Persistence(PersistenceError::ConstraintViolation {
            constraint: "one_active".to_string(),
        });
        assert!(!err.is_retryable());

        let err = RehabError::Validation("test".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err = RehabError::insufficient("admin_generate", "no peer samples");
        assert!(err.user_message().contains("manually"));
        assert!(err.to_string().contains("admin_generate"));
    }

    #[test]
    fn test_sqlite_busy_maps_to_busy() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let mapped: PersistenceError = err.into();
        assert!(matches!(mapped, PersistenceError::Busy { .. }));
    }
}
