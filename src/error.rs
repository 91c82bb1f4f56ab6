use thiserror::Error;

use crate::CorrelationKey;

/// Errors that can occur while correlating and dispatching RPC messages.
///
/// Only [`InvalidArgument`](RpcError::InvalidArgument) (bad construction input)
/// and transport failures during a send reach the immediate caller directly.
/// The table-level conditions ([`DuplicateKey`](RpcError::DuplicateKey),
/// [`UnknownCorrelation`](RpcError::UnknownCorrelation)) are recovered where
/// they occur and only reported.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Malformed input to a constructor or builder (e.g. an empty correlation key).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A request with this correlation key is already pending.
    #[error("correlation key already pending: {0}")]
    DuplicateKey(CorrelationKey),

    /// No pending request matches this correlation key (late, duplicate or stray reply).
    #[error("no pending request for correlation key: {0}")]
    UnknownCorrelation(CorrelationKey),

    /// Request deadline passed before a reply arrived.
    #[error("request timed out")]
    Timeout,

    /// Request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// Inbound stream ended or the session shut down while the request was pending.
    #[error("connection lost")]
    ConnectionLost,

    /// An inbound frame could not be decoded into an envelope.
    #[error("decode error: {0}")]
    Decode(String),

    /// The transport failed to send a frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The remote peer answered with an error message.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Status code reported by the peer.
        code: i32,
        /// Human readable status message.
        message: String,
    },

    /// A registered handler failed while processing a message.
    #[error("handler failed: {0}")]
    Handler(String),
}

impl RpcError {
    /// Shorthand for building an [`RpcError::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// True for outcomes that are a caller decision rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
