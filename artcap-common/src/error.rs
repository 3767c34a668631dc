//! Common error types for ARTCAP

use thiserror::Error;

/// Common result type for ARTCAP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the capture service
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

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Submission rejected by a validation gate (required fields, GPS)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Image decode or encode failure, fatal for the current submission
    #[error("Image error: {0}")]
    Image(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
