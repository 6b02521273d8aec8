//! Error types for feed-aggregator
//!
//! Errors are grouped by where they originate:
//! - [`NetworkError`] for feed retrieval (timeouts, transport failures, HTTP status)
//! - [`Error::MalformedDocument`] for documents that cannot be decoded
//! - [`DatabaseError`] for store failures, including the expected
//!   [`DatabaseError::UniqueViolation`] raised for already-stored entries

use std::time::Duration;
use thiserror::Error;

/// Result type alias for feed-aggregator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for feed-aggregator
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "POLL_CONCURRENCY")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Feed retrieval failed
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Fetched bytes are not a well-formed feed document
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// A source URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error is a uniqueness-constraint rejection from the store
    ///
    /// Entry inserts that fail this way mean the entry already exists.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(DatabaseError::UniqueViolation(_)) => true,
            Error::Sqlx(e) => is_sqlx_unique_violation(e),
            _ => false,
        }
    }
}

/// Classify a driver error by its typed kind rather than its message text
pub(crate) fn is_sqlx_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Insert rejected by a uniqueness constraint
    #[error("uniqueness violation: {0}")]
    UniqueViolation(String),

    /// A store call did not complete in time
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The store operation that timed out
        operation: &'static str,
        /// The limit that was exceeded
        timeout: Duration,
    },
}

/// Feed retrieval errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The request exceeded the fetch timeout
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout {
        /// Requested URL
        url: String,
        /// The configured fetch timeout
        timeout: Duration,
    },

    /// The server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Connection, TLS, redirect or body-read failure
    #[error("request to {url} failed: {reason}")]
    Transport {
        /// Requested URL
        url: String,
        /// Underlying failure description
        reason: String,
    },
}
