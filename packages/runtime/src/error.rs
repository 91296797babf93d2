//! Error types for the SoftPLC runtime.

use thiserror::Error;

use crate::protocol::MessageCode;

/// Errors that can occur in the runtime and host client.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The request is malformed or not allowed in the current state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No controller has been created yet.
    #[error("no controller")]
    NoController,

    /// A controller operation failed.
    #[error(transparent)]
    Core(#[from] softplc_core::CoreError),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The runtime answered a request with a failure.
    #[error("{code:?} rejected: {message}")]
    Rejected { code: MessageCode, message: String },

    /// The channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
