//! Error types for the environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Request could not be delivered (connection refused, reset, DNS, ...)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The service answered with a non-success status
    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates a status error.
    pub fn status(status: u16) -> Self {
        Self::HttpStatus { status }
    }
}
