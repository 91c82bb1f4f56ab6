//! Request lifecycle controller.
//!
//! This module contains the [`RpcClient`] type which turns an outgoing
//! message into a pending request and drives it to exactly one outcome.
//!
//! # Lifecycle
//!
//! 1. A correlation key is generated and registered in the
//!    [`CorrelationTable`] together with the request deadline. A key that is
//!    already pending is replaced by a fresh one.
//! 2. The envelope is encoded and handed to the transport. If either step
//!    fails the registration is withdrawn before the error is returned, so a
//!    failed send never leaves a pending entry behind.
//! 3. The caller waits for whichever happens first: the reply (resolved by the
//!    [`Dispatcher`](crate::Dispatcher)), a cancel, the reaper or its own
//!    deadline. Every path goes through the table, so the first commit wins
//!    and the caller observes exactly one outcome.
//!
//! # Concurrency
//!
//! Any number of requests can be in flight at once. The client itself holds no
//! lock; all shared state lives in the correlation table.

pub mod pending;
pub mod reaper;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{self, Instant};

use crate::{
    // ---
    log_debug,
    log_warn,
    CodecPtr,
    CorrelationKey,
    Envelope,
    KeyGenerator,
    Message,
    Result,
    RpcConfig,
    RpcError,
    TransportPtr,
};

use pending::{CorrelationTable, PendingHandle};

/// Sending side of the RPC core.
///
/// Cheap to clone (internally `Arc`-backed).
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    table: CorrelationTable,
    transport: TransportPtr,
    codec: CodecPtr,
    keys: KeyGenerator,
    request_timeout: Duration,
    max_key_attempts: u32,
}

impl RpcClient {
    // ---

    /// Create a client sending through `transport` and registering in `table`.
    ///
    /// Replies only reach the client if the same table is given to the
    /// [`Dispatcher`](crate::Dispatcher) fed by the transport's inbound stream.
    /// [`RpcSessionBuilder`](crate::RpcSessionBuilder) does this wiring.
    pub fn new(
        table: CorrelationTable,
        transport: TransportPtr,
        codec: CodecPtr,
        config: &RpcConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                table,
                transport,
                codec,
                keys: KeyGenerator::new(config.key_strategy, config.node_id.as_str()),
                request_timeout: config.request_timeout,
                max_key_attempts: config.max_key_attempts.max(1),
            }),
        }
    }

    /// Send a message that expects a reply and wait for the outcome.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidArgument`] if `message` is not a `Request` or
    ///   `KeepAliveRequest`, or `timeout` cannot be represented as a deadline
    /// - [`RpcError::DuplicateKey`] if no free key was found
    /// - the codec's or transport's error if encoding or sending fails;
    ///   nothing is left pending
    /// - [`RpcError::Timeout`] if no reply arrived before the deadline
    /// - [`RpcError::Cancelled`] if the request was cancelled
    /// - [`RpcError::Remote`] if the peer answered with an error
    /// - [`RpcError::ConnectionLost`] if the inbound stream ended
    pub async fn send(&self, message: Message, timeout: Duration) -> Result<Envelope> {
        self.begin(message, timeout).await?.response().await
    }

    /// Send a message and return the in-flight request without waiting.
    ///
    /// The returned [`InFlight`] exposes the correlation key immediately, so
    /// the request can be cancelled from elsewhere. Dropping it cancels the
    /// request.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send), minus the outcome errors.
    pub async fn begin(&self, message: Message, timeout: Duration) -> Result<InFlight> {
        // ---
        let message_type = message.message_type();
        if !message_type.expects_reply() {
            return Err(RpcError::invalid_argument(format!(
                "{message_type} messages do not expect a reply"
            )));
        }

        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| RpcError::invalid_argument(format!("timeout {timeout:?} is too large")))?;

        let handle = self.register_fresh(deadline)?;
        let envelope = Envelope::with_key(handle.key().clone(), message);

        // On failure `handle` is dropped, which withdraws the registration.
        let frame = self.inner.codec.encode(&envelope)?;
        if let Err(err) = self.inner.transport.send(frame).await {
            log_debug!("send of {} failed: {err}", handle.key());
            return Err(err);
        }

        Ok(InFlight {
            handle,
            table: self.inner.table.clone(),
        })
    }

    /// Cancel the pending request under `key`.
    ///
    /// Returns `false` if it already completed, timed out or was cancelled.
    pub fn cancel(&self, key: &CorrelationKey) -> bool {
        self.inner.table.cancel(key)
    }

    /// Send a `Request` with the configured default timeout and return the
    /// reply payload.
    pub async fn request(&self, payload: Bytes) -> Result<Bytes> {
        self.request_with_timeout(payload, self.inner.request_timeout)
            .await
    }

    /// Send a `Request` and return the reply payload.
    pub async fn request_with_timeout(&self, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        // ---
        let reply = self.send(Message::Request { payload }, timeout).await?;

        match reply.into_message() {
            Message::Response { payload } => Ok(payload),
            other => Err(RpcError::Decode(format!(
                "unexpected {} reply to request",
                other.message_type()
            ))),
        }
    }

    /// Send a serde_json request and deserialize the reply.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use rtremote_rpc::RpcClient;
    /// # use serde::{Deserialize, Serialize};
    /// #[derive(Serialize)]
    /// struct AddRequest { a: i32, b: i32 }
    /// #[derive(Deserialize)]
    /// struct AddResponse { sum: i32 }
    ///
    /// # async fn example(client: RpcClient) -> rtremote_rpc::Result<()> {
    /// let resp: AddResponse = client.request_json(&AddRequest { a: 2, b: 3 }).await?;
    /// assert_eq!(resp.sum, 5);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn request_json<TReq, TResp>(&self, req: &TReq) -> Result<TResp>
    where
        TReq: Serialize + ?Sized,
        TResp: DeserializeOwned,
    {
        // ---
        let bytes = serde_json::to_vec(req)?;
        let reply = self.request(Bytes::from(bytes)).await?;

        if reply.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&reply)?)
    }

    /// Send a fire-and-forget `Event`.
    ///
    /// Returns the key the event was sent under; nothing is registered.
    pub async fn notify(&self, payload: Bytes) -> Result<CorrelationKey> {
        // ---
        let key = self.inner.keys.generate();
        let envelope = Envelope::with_key(key.clone(), Message::Event { payload });

        let frame = self.inner.codec.encode(&envelope)?;
        self.inner.transport.send(frame).await?;
        Ok(key)
    }

    /// Keep-alive round trip. Returns the measured round-trip time.
    pub async fn ping(&self, timeout: Duration) -> Result<Duration> {
        // ---
        let started = Instant::now();
        self.send(Message::KeepAliveRequest, timeout).await?;
        Ok(started.elapsed())
    }

    /// Number of requests currently awaiting an outcome.
    pub fn pending_count(&self) -> usize {
        self.inner.table.len()
    }

    /// Register under a freshly generated key, replacing keys that collide with
    /// a pending request.
    fn register_fresh(&self, deadline: Instant) -> Result<PendingHandle> {
        // ---
        let mut attempt = 1;
        loop {
            let key = self.inner.keys.generate();
            match self.inner.table.register(key, deadline) {
                Ok(handle) => return Ok(handle),
                Err(RpcError::DuplicateKey(key)) if attempt < self.inner.max_key_attempts => {
                    log_warn!("correlation key {key} already pending, generating another");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A request that has been sent and is awaiting its outcome.
///
/// Dropping an `InFlight` cancels the request.
pub struct InFlight {
    handle: PendingHandle,
    table: CorrelationTable,
}

impl InFlight {
    /// Correlation key the request was sent under.
    pub fn key(&self) -> &CorrelationKey {
        self.handle.key()
    }

    /// Deadline after which the request times out.
    pub fn deadline(&self) -> Instant {
        self.handle.deadline()
    }

    /// Cancel the request. Returns `false` if it already has an outcome.
    pub fn cancel(&self) -> bool {
        self.table.cancel(self.handle.key())
    }

    /// Wait for the reply, or until the deadline passes.
    pub async fn response(mut self) -> Result<Envelope> {
        // ---
        let deadline = self.handle.deadline();

        match time::timeout_at(deadline, self.handle.wait()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                // A reply or the reaper may have committed first; either way the
                // table now holds no entry and the committed outcome is waiting.
                let _ = self.table.resolve(self.handle.key(), Err(RpcError::Timeout));
                self.handle.wait().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{codec::JsonCodec, Codec, KeyStrategy, MessageType, Transport};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        frames: Mutex<Vec<Bytes>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn transport_id(&self) -> &str {
            "recording"
        }

        async fn send(&self, frame: Bytes) -> Result<()> {
            if self.fail {
                return Err(RpcError::Transport("link down".into()));
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn client_with(
        transport: Arc<RecordingTransport>,
        config: &RpcConfig,
    ) -> (RpcClient, CorrelationTable) {
        let table = CorrelationTable::new();
        let client = RpcClient::new(table.clone(), transport, Arc::new(JsonCodec), config);
        (client, table)
    }

    fn request() -> Message {
        Message::Request {
            payload: Bytes::from_static(b"ping"),
        }
    }

    #[tokio::test]
    async fn test_reply_types_cannot_be_sent() {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let (client, _table) = client_with(transport.clone(), &RpcConfig::default());

        let msg = Message::Response {
            payload: Bytes::new(),
        };
        let err = client.send(msg, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidArgument(_)));

        let err = client
            .send(
                Message::Event {
                    payload: Bytes::new(),
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidArgument(_)));

        assert!(transport.frames.lock().unwrap().is_empty());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_nothing_pending() {
        // ---
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let (client, _table) = client_with(transport, &RpcConfig::default());

        let err = client.send(request(), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
        assert_eq!(client.pending_count(), 0);
    }

    struct RejectingCodec;

    impl Codec for RejectingCodec {
        fn encode(&self, _envelope: &Envelope) -> Result<Bytes> {
            Err(RpcError::invalid_argument("frame too large"))
        }

        fn decode(&self, frame: &[u8]) -> Result<Envelope> {
            JsonCodec.decode(frame)
        }
    }

    #[tokio::test]
    async fn test_encode_failure_leaves_nothing_pending() {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let table = CorrelationTable::new();
        let client = RpcClient::new(
            table,
            transport.clone(),
            Arc::new(RejectingCodec),
            &RpcConfig::default(),
        );

        let err = client.send(request(), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidArgument(_)));
        assert_eq!(client.pending_count(), 0);
        assert!(transport.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_opaque_payload_is_sent_verbatim() {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let (client, _table) = client_with(transport.clone(), &RpcConfig::default());

        let msg = Message::Request {
            payload: Bytes::from_static(b"ping"),
        };
        let _in_flight = client.begin(msg, Duration::from_secs(5)).await.unwrap();

        let sent = JsonCodec.decode(&transport.frames.lock().unwrap()[0]).unwrap();
        assert_eq!(sent.payload().unwrap().as_ref(), b"ping");
    }

    #[tokio::test]
    async fn test_reply_completes_in_flight_request() {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let (client, table) = client_with(transport.clone(), &RpcConfig::default());

        let in_flight = client.begin(request(), Duration::from_secs(5)).await.unwrap();
        let key = in_flight.key().clone();
        assert_eq!(client.pending_count(), 1);

        let sent = JsonCodec.decode(&transport.frames.lock().unwrap()[0]).unwrap();
        assert_eq!(sent.correlation_key(), &key);
        assert_eq!(sent.message_type(), MessageType::Request);

        let reply = Envelope::with_key(
            key.clone(),
            Message::Response {
                payload: Bytes::from_static(b"7"),
            },
        );
        table.resolve(&key, Ok(reply)).unwrap();

        let reply = in_flight.response().await.unwrap();
        assert_eq!(reply.payload().unwrap().as_ref(), b"7");
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out_request() {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let (client, _table) = client_with(transport, &RpcConfig::default());

        let started = Instant::now();
        let err = client.send(request(), Duration::from_secs(1)).await.unwrap_err();

        assert!(matches!(err, RpcError::Timeout));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_colliding_key_is_replaced() {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let config = RpcConfig::new("n").with_key_strategy(KeyStrategy::Counter);
        let (client, table) = client_with(transport, &config);

        let squatter = CorrelationKey::new("n.1").unwrap();
        let _held = table
            .register(squatter, Instant::now() + Duration::from_secs(60))
            .unwrap();

        let in_flight = client.begin(request(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(in_flight.key().as_str(), "n.2");
    }

    #[tokio::test]
    async fn test_collision_reported_when_attempts_exhausted() {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let config = RpcConfig::new("n")
            .with_key_strategy(KeyStrategy::Counter)
            .with_max_key_attempts(1);
        let (client, table) = client_with(transport, &config);

        let _held = table
            .register(
                CorrelationKey::new("n.1").unwrap(),
                Instant::now() + Duration::from_secs(60),
            )
            .unwrap();

        let err = client.send(request(), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, RpcError::DuplicateKey(_)));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_and_drop() {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let (client, _table) = client_with(transport, &RpcConfig::default());

        let in_flight = client.begin(request(), Duration::from_secs(5)).await.unwrap();
        assert!(client.cancel(in_flight.key()));
        assert!(!in_flight.cancel());
        assert!(in_flight.response().await.unwrap_err().is_cancelled());

        let in_flight = client.begin(request(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(client.pending_count(), 1);
        drop(in_flight);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_notify_registers_nothing() {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let (client, _table) = client_with(transport.clone(), &RpcConfig::default());

        let key = client.notify(Bytes::from_static(b"{\"level\":3}")).await.unwrap();
        assert_eq!(client.pending_count(), 0);

        let sent = JsonCodec.decode(&transport.frames.lock().unwrap()[0]).unwrap();
        assert_eq!(sent.message_type(), MessageType::Event);
        assert_eq!(sent.correlation_key(), &key);
    }
}
