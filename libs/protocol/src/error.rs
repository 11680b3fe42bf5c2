//! Error types for the backend protocol layer.

use thiserror::Error;

use crate::envelope::Envelope;

/// Errors surfaced by connections, wrappers, and pools.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Invalid connection or pool configuration; fails fast at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The message could not be sent, or the transport dropped mid-flight.
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply arrived within the request's timeout.
    #[error("request timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// The backend replied with a failure status; the reply envelope is
    /// preserved so callers can surface its body.
    #[error("backend error: status {status_code}")]
    Backend {
        status_code: u16,
        envelope: Box<Envelope>,
    },

    /// The connection was closed before or while the request was in flight.
    #[error("connection is already closed")]
    ConnectionClosed,

    /// The envelope could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Transport(err.to_string())
    }
}
