//! Common error types used throughout postforge.
//!
//! This module provides a unified error type that covers common failure cases
//! such as not found, invalid transitions, database errors, and I/O failures.

/// Common error type for postforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A status transition that the state machine forbids.
    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new InvalidTransition error.
    pub fn invalid_transition<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTransition(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a new Io error from a message (for external API errors, etc).
    pub fn io<S: Into<String>>(msg: S) -> Self {
        Self::Io(std::io::Error::other(msg.into()))
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
