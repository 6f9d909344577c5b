//! Common error types for the attribution pipeline

use thiserror::Error;

/// Common result type for attribution pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the attribution pipeline crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored row failed validation at the adapter boundary
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
