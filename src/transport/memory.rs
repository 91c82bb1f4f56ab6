//! In-memory transport implementation.
//!
//! A pure in-process implementation of the domain-level `Transport` trait: two
//! endpoints joined by a pair of bounded channels. It is intended for testing,
//! local execution, and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Frames are delivered to the peer in the order they were sent.
//! - No frame is dropped while both endpoints are open; a full channel applies
//!   backpressure to the sender instead.
//! - After `close()`, sends on that endpoint fail with [`RpcError::Transport`]
//!   and the peer's inbound stream ends once it has drained.
//!
//! ## Non-Goals
//!
//! This transport does not emulate loss, duplication or reordering. Tests that
//! need those inject frames directly into the dispatcher.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    FrameStream,
    Result,
    RpcError,
    Transport,
    TransportPtr,
};

/// One side of a [`memory_pair`].
pub struct MemoryEndpoint {
    /// Sends frames to the other endpoint.
    pub transport: TransportPtr,

    /// Frames sent by the other endpoint.
    pub inbound: FrameStream,
}

struct MemoryTransport {
    // ---
    transport_id: String,

    /// `None` once closed.
    peer: RwLock<Option<mpsc::Sender<Bytes>>>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn send(&self, frame: Bytes) -> Result<()> {
        // ---
        // Clone the sender so the lock is not held while waiting for capacity.
        let peer = self.peer.read().await.clone();

        let Some(peer) = peer else {
            return Err(RpcError::Transport(format!(
                "{}: transport closed",
                self.transport_id
            )));
        };

        peer.send(frame)
            .await
            .map_err(|_| RpcError::Transport(format!("{}: peer disconnected", self.transport_id)))
    }

    async fn close(&self) -> Result<()> {
        // ---
        if self.peer.write().await.take().is_some() {
            log_debug!("{}: transport closed", self.transport_id);
        }
        Ok(())
    }
}

/// Create two connected in-memory endpoints.
///
/// Each direction buffers up to `capacity` frames (at least one).
///
/// ```
/// # use rtremote_rpc::memory_pair;
/// # use bytes::Bytes;
/// # async fn example() -> rtremote_rpc::Result<()> {
/// let (a, mut b) = memory_pair(16);
/// a.transport.send(Bytes::from_static(b"hello")).await?;
/// assert_eq!(b.inbound.recv().await.unwrap(), Bytes::from_static(b"hello"));
/// # Ok(())
/// # }
/// ```
pub fn memory_pair(capacity: usize) -> (MemoryEndpoint, MemoryEndpoint) {
    // ---
    let capacity = capacity.max(1);
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);

    let a = MemoryEndpoint {
        transport: Arc::new(MemoryTransport {
            transport_id: "memory-a".to_string(),
            peer: RwLock::new(Some(b_tx)),
        }),
        inbound: a_rx,
    };
    let b = MemoryEndpoint {
        transport: Arc::new(MemoryTransport {
            transport_id: "memory-b".to_string(),
            peer: RwLock::new(Some(a_tx)),
        }),
        inbound: b_rx,
    };

    (a, b)
}
