//! Error types for the alder crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AlderError>;

/// All errors surfaced by this crate.
#[derive(Error, Debug)]
pub enum AlderError {
    /// A caller supplied something the operation cannot accept.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A named resource (index, document) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A map function failed to parse or to run against a document.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// A malformed request or response at the wire boundary.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backing key-value store rejected or corrupted an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// An invariant the crate maintains internally was violated.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AlderError {
    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        AlderError::InvalidArgument(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        AlderError::NotFound(msg.into())
    }

    /// Create an evaluation error.
    pub fn evaluation(msg: impl Into<String>) -> Self {
        AlderError::Evaluation(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        AlderError::Protocol(msg.into())
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        AlderError::Store(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        AlderError::Internal(msg.into())
    }
}
