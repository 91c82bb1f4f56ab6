// src/domain/codec.rs

//! Codec domain abstraction: envelope <-> frame bytes.

use std::sync::Arc;

use bytes::Bytes;

use crate::{Envelope, Result};

/// Converts envelopes to wire frames and back.
///
/// `decode` must never panic on malformed input; it returns
/// [`RpcError::Decode`](crate::RpcError::Decode) instead so the reader loop can
/// drop the frame and keep going.
pub trait Codec: Send + Sync {
    /// Encode an envelope into a single frame.
    fn encode(&self, envelope: &Envelope) -> Result<Bytes>;

    /// Decode a single frame.
    fn decode(&self, frame: &[u8]) -> Result<Envelope>;

    /// MIME-style name of the wire format, for logging.
    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }
}

/// Shared codec pointer.
pub type CodecPtr = Arc<dyn Codec>;
