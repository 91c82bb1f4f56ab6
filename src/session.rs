//! RPC session.
//!
//! Ties one transport to the RPC core: a single [`CorrelationTable`] shared by
//! the [`RpcClient`] (which registers requests) and the [`Dispatcher`] (which
//! resolves them), the reader loop feeding the dispatcher, and the reaper
//! enforcing deadlines. Every session can both send requests and serve them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::task::JoinHandle;

use crate::client::reaper::Reaper;
use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    log_error,
    log_info,
    CorrelationTable,
    Dispatcher,
    Result,
    RpcClient,
    RpcError,
    TransportPtr,
};

/// Running RPC session. Build one with [`RpcSessionBuilder`](crate::RpcSessionBuilder).
pub struct RpcSession {
    // ---
    node_id: String,
    client: RpcClient,
    dispatcher: Dispatcher,
    transport: TransportPtr,
    reaper: Reaper,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RpcSession {
    // ---

    pub(crate) fn new(
        node_id: String,
        client: RpcClient,
        dispatcher: Dispatcher,
        transport: TransportPtr,
        reaper: Reaper,
        reader: JoinHandle<()>,
    ) -> Self {
        Self {
            node_id,
            client,
            dispatcher,
            transport,
            reaper,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        }
    }

    /// Node identifier from the session configuration.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Client for outgoing requests. Clone it freely.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Dispatcher for registering handlers of unsolicited messages.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The table shared by the client and the dispatcher.
    pub fn table(&self) -> &CorrelationTable {
        self.dispatcher.table()
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the session.
    ///
    /// Stops the reaper and the reader loop, closes the transport and fails
    /// every outstanding request with [`RpcError::ConnectionLost`]. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if closing it fails. The rest of the
    /// shutdown still happens.
    pub async fn shutdown(&self) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        log_info!("{}: shutting down session", self.node_id);

        self.stop_tasks();

        let closed = self.transport.close().await;
        if let Err(_err) = &closed {
            log_error!("{}: closing transport failed: {_err}", self.node_id);
        }

        let _failed = self.table().fail_all(|| RpcError::ConnectionLost);
        log_debug!("{}: {_failed} pending request(s) failed on shutdown", self.node_id);

        closed
    }

    /// Synchronous part of teardown shared by [`shutdown`](Self::shutdown)
    /// and `Drop`.
    fn stop_tasks(&self) {
        // ---
        self.reaper.shutdown();

        let reader = lock_ignore_poison(&self.reader).take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

/// Dropping a session without calling [`RpcSession::shutdown`] stops the reader
/// and the reaper and fails every outstanding request with
/// [`RpcError::ConnectionLost`]. The transport is not closed, since closing is
/// asynchronous; call `shutdown` for that.
impl Drop for RpcSession {
    fn drop(&mut self) {
        // ---
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.stop_tasks();

        let _failed = self.table().fail_all(|| RpcError::ConnectionLost);
        log_debug!("{}: session dropped, {_failed} pending request(s) failed", self.node_id);
    }
}
