//! Error types for storage operations

use crate::metric::{MetricKind, ValidationError};
use crate::retry::RetryError;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The record violates the field rules for its kind
    #[error("invalid metric: {0}")]
    Validation(#[from] ValidationError),

    /// No record with this identity exists
    #[error("{kind} metric {id} not found")]
    NotFound { id: String, kind: MetricKind },

    /// Database connection failed (refused, reset, pool exhausted)
    #[error("failed to connect to storage backend: {0}")]
    ConnectionFailed(String),

    /// Database query failed permanently (constraint, bad SQL)
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// Invalid configuration (malformed DSN, unusable path)
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// The operation did not finish within its deadline
    #[error("storage operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Snapshot serialization/deserialization error
    #[error("metric serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error (file access, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A retryable failure persisted through every attempt
    #[error("attempts: {attempts}, {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Whether the failure is connection-level and therefore worth retrying
    pub fn is_connection_error(&self) -> bool {
        matches!(self, StorageError::ConnectionFailed(_))
    }

    pub fn not_found(id: &str, kind: MetricKind) -> Self {
        StorageError::NotFound {
            id: id.to_string(),
            kind,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::Validation(_))
    }
}

impl From<RetryError<StorageError>> for StorageError {
    /// Permanent errors surface unchanged; only repeated failures are wrapped
    fn from(err: RetryError<StorageError>) -> Self {
        if err.attempts <= 1 {
            return err.source;
        }

        StorageError::Exhausted {
            attempts: err.attempts,
            source: Box::new(err.source),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if is_connection_error(&err) {
            return StorageError::ConnectionFailed(err.to_string());
        }

        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

/// SQLSTATE class 08 is "connection exception"
#[cfg(feature = "storage-sqlite")]
const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Classify a driver error as connection-level (retryable) or permanent
#[cfg(feature = "storage-sqlite")]
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    use std::io::ErrorKind;

    match err {
        sqlx::Error::Io(io_err) => matches!(
            io_err.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::NotConnected
        ),
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| code.starts_with(CONNECTION_EXCEPTION_CLASS)),
        _ => false,
    }
}
