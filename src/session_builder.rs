//! RPC session builder.
//!
//! Provides a fluent builder API for wiring a transport, a codec and an
//! [`RpcConfig`] into a running [`RpcSession`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::client::reaper::Reaper;
use crate::transport::runner::spawn_reader;
use crate::{
    // ---
    codec::JsonCodec,
    log_debug,
    CodecPtr,
    CorrelationTable,
    Dispatcher,
    FrameStream,
    KeyStrategy,
    MessageType,
    Result,
    RpcClient,
    RpcConfig,
    RpcSession,
    TransportPtr,
};

/// Builder for [`RpcSession`].
///
/// # Example
///
/// ```no_run
/// use rtremote_rpc::{memory_pair, RpcSessionBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> rtremote_rpc::Result<()> {
/// let (a, _b) = memory_pair(64);
///
/// let session = RpcSessionBuilder::new(a.transport, a.inbound)
///     .node_id("display")
///     .request_timeout(Duration::from_secs(5))
///     .build()?;
///
/// let rtt = session.client().ping(Duration::from_secs(1)).await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcSessionBuilder {
    // ---
    transport: TransportPtr,
    inbound: FrameStream,
    codec: Option<CodecPtr>,
    config: RpcConfig,
}

impl RpcSessionBuilder {
    /// Create a builder for a transport and its inbound frame stream.
    ///
    /// The node ID defaults to `transport.transport_id()`; every other setting
    /// defaults as in [`RpcConfig::default`].
    pub fn new(transport: TransportPtr, inbound: FrameStream) -> Self {
        // ---
        let config = RpcConfig::new(transport.transport_id());
        Self {
            transport,
            inbound,
            codec: None,
            config,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the node ID.
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = id.into();
        self
    }

    /// Set the default request timeout.
    ///
    /// Default: 30s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the reaper sweep interval.
    ///
    /// Default: 250ms.
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.config.reaper_interval = interval;
        self
    }

    /// Set the correlation key strategy.
    ///
    /// Default: [`KeyStrategy::RandomToken`].
    pub fn key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.config.key_strategy = strategy;
        self
    }

    /// Use a codec other than [`JsonCodec`].
    pub fn codec(mut self, codec: CodecPtr) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Build the session (consumes self).
    ///
    /// Spawns the reader loop and the reaper, so it must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidArgument`](crate::RpcError::InvalidArgument)
    /// if the configuration is unusable (see [`RpcConfig::validate`]).
    pub fn build(self) -> Result<RpcSession> {
        // ---
        self.config.validate()?;

        let codec = self.codec.unwrap_or_else(|| Arc::new(JsonCodec));
        let table = CorrelationTable::new();

        let dispatcher = Dispatcher::new(table.clone());
        dispatcher.register_handler(MessageType::KeepAliveRequest, |_env| async {
            Ok(Some(Bytes::new()))
        })?;

        let client = RpcClient::new(
            table.clone(),
            self.transport.clone(),
            codec.clone(),
            &self.config,
        );
        let reaper = Reaper::spawn(&table, self.config.reaper_interval);
        let reader = spawn_reader(
            self.inbound,
            codec,
            dispatcher.clone(),
            self.transport.clone(),
        );

        log_debug!(
            "{}: session started on {}",
            self.config.node_id,
            self.transport.transport_id()
        );

        Ok(RpcSession::new(
            self.config.node_id,
            client,
            dispatcher,
            self.transport,
            reaper,
            reader,
        ))
    }
}
