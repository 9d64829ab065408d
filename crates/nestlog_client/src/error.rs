//! Error types for the client core.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client core.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The device's durable storage failed.
    #[error("device storage error: {0}")]
    Storage(String),

    /// Persisted state or a frame could not be (de)serialized.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The transport rejected an outbound frame.
    #[error("transport error: {0}")]
    Transport(String),
}
