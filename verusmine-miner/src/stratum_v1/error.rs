//! Error types for Stratum v1 protocol.

use thiserror::Error;

/// Stratum protocol errors.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format received from pool
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// A line exceeded the 64 KiB protocol cap
    #[error("line exceeded the 64 KiB limit")]
    LineTooLong,

    /// Connection error
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Subscription failed
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Authorization failed; credentials are operator input, so this is
    /// not retried
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Unexpected response (wrong ID, missing fields, etc.)
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Connection lost
    #[error("Connection lost")]
    Disconnected,

    /// Timeout waiting for response
    #[error("Timeout waiting for response")]
    Timeout,
}

/// Convenient Result type for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;
