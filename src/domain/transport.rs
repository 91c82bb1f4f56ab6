// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the interface the correlation core uses to put frames
//! on the wire. It intentionally avoids any reference to concrete protocols,
//! sockets or client libraries.
//!
//! The transport is responsible only for moving opaque frames. Correlation,
//! timeouts and handler dispatch are handled by the layers above it.
//!
//! Concrete implementations live under `src/transport/`.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// Stream of raw inbound frames produced by a transport.
///
/// The reader loop owns the receiving end; the transport keeps the sender.
/// When every sender is dropped the stream ends and the session treats the
/// connection as lost.
pub type FrameStream = mpsc::Receiver<Bytes>;

/// Outbound half of a connection.
///
/// Implementations must ensure that:
/// - `send()` either hands the frame to the underlying medium or returns an
///   error; a frame that was not accepted must not be delivered later.
/// - `send()` does not wait for the peer to process the frame.
/// - after `close()` every further `send()` fails.
///
/// No assumption is made about ordering, duplication or loss beyond that;
/// the correlation core tolerates all three.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Identifier of this transport instance, used for logging.
    fn transport_id(&self) -> &str;

    /// Send one encoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`](crate::RpcError::Transport) if the frame
    /// could not be handed off.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` only increments a reference count; all clones share the same
/// underlying connection.
pub type TransportPtr = Arc<dyn Transport>;
