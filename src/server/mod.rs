//! Inbound message dispatcher.
//!
//! The dispatcher routes each decoded [`Envelope`] by its message type:
//!
//! - **Replies** (`Response`, `Error`, `KeepAliveResponse`) resolve the pending
//!   request with the same correlation key in the [`CorrelationTable`]. A reply
//!   nobody is waiting for (late, duplicate, stray) is reported as
//!   [`Dispatched::Unmatched`] and otherwise ignored.
//! - **Everything else** is handed to the handlers registered for that type,
//!   in registration order. Each handler runs on its own task, so an error or
//!   panic in one handler is logged and counted and the next one still runs.
//!
//! The dispatcher never interprets payloads and never touches the transport;
//! replies produced by request handlers are returned to the caller (the reader
//! loop), which encodes and sends them.

mod handler;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{
    // ---
    log_debug,
    log_warn,
    CorrelationKey,
    CorrelationTable,
    Envelope,
    Fault,
    Message,
    MessageType,
    Result,
    RpcError,
};

pub use handler::{HandlerId, HandlerReply};
use handler::{wrap_json_handler, HandlerRegistry};

/// What [`Dispatcher::dispatch`] did with an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// A reply completed the pending request under this key.
    Resolved(CorrelationKey),

    /// A reply arrived for a key nobody is waiting for.
    Unmatched(CorrelationKey),

    /// Handlers ran for an unsolicited message.
    Handled {
        /// Number of handlers invoked.
        invoked: usize,
        /// Number of handlers that returned an error or panicked.
        failed: usize,
        /// Reply to send back, for message types that expect one.
        reply: Option<Envelope>,
    },

    /// No handler is registered for the message type.
    NoHandler {
        /// Error reply to send back, for message types that expect one.
        reply: Option<Envelope>,
    },
}

impl Dispatched {
    /// Reply that should be sent back to the peer, if any.
    pub fn reply(&self) -> Option<&Envelope> {
        match self {
            Dispatched::Handled { reply, .. } | Dispatched::NoHandler { reply } => reply.as_ref(),
            Dispatched::Resolved(_) | Dispatched::Unmatched(_) => None,
        }
    }

    pub fn into_reply(self) -> Option<Envelope> {
        match self {
            Dispatched::Handled { reply, .. } | Dispatched::NoHandler { reply } => reply,
            Dispatched::Resolved(_) | Dispatched::Unmatched(_) => None,
        }
    }
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Replies that completed a pending request.
    pub resolved: u64,
    /// Replies with no matching pending request.
    pub unmatched: u64,
    /// Unsolicited messages delivered to at least one handler.
    pub handled: u64,
    /// Individual handler invocations that failed or panicked.
    pub handler_failures: u64,
    /// Unsolicited messages with no registered handler.
    pub no_handler: u64,
    /// Inbound frames that could not be decoded.
    pub decode_failures: u64,
}

#[derive(Default)]
struct DispatchStats {
    resolved: AtomicU64,
    unmatched: AtomicU64,
    handled: AtomicU64,
    handler_failures: AtomicU64,
    no_handler: AtomicU64,
    decode_failures: AtomicU64,
}

impl DispatchStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            resolved: self.resolved.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            no_handler: self.no_handler.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    table: CorrelationTable,
    registry: HandlerRegistry,
    stats: DispatchStats,
}

/// Routes inbound envelopes to pending requests or registered handlers.
///
/// Cheap to clone (internally `Arc`-backed).
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    // ---

    /// Create a dispatcher resolving replies against `table`.
    pub fn new(table: CorrelationTable) -> Self {
        Self {
            inner: Arc::new(Inner {
                table,
                registry: HandlerRegistry::default(),
                stats: DispatchStats::default(),
            }),
        }
    }

    /// The correlation table replies are resolved against.
    pub fn table(&self) -> &CorrelationTable {
        &self.inner.table
    }

    /// Register a handler for unsolicited messages of `message_type`.
    ///
    /// Handlers for the same type run in registration order. Returning
    /// `Ok(Some(payload))` answers a `Request` (or `KeepAliveRequest`); only the
    /// first answer is sent.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidArgument`] for reply types (`Response`,
    /// `Error`, `KeepAliveResponse`), which are routed by correlation key.
    pub fn register_handler<F, Fut>(&self, message_type: MessageType, handler: F) -> Result<HandlerId>
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerReply>> + Send + 'static,
    {
        self.inner.registry.register(message_type, Arc::new(handler))
    }

    /// Register a typed handler whose request and reply are JSON payloads.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use rtremote_rpc::{CorrelationTable, Dispatcher, MessageType};
    /// # use serde::{Deserialize, Serialize};
    /// #[derive(Deserialize)]
    /// struct AddRequest { a: i32, b: i32 }
    /// #[derive(Serialize)]
    /// struct AddResponse { sum: i32 }
    ///
    /// # fn example() -> rtremote_rpc::Result<()> {
    /// let dispatcher = Dispatcher::new(CorrelationTable::new());
    /// dispatcher.register_json_handler(MessageType::Request, |req: AddRequest| async move {
    ///     Ok(AddResponse { sum: req.a + req.b })
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn register_json_handler<F, Fut, TReq, TResp>(
        &self,
        message_type: MessageType,
        handler: F,
    ) -> Result<HandlerId>
    where
        F: Fn(TReq) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
    {
        self.inner
            .registry
            .register(message_type, Arc::new(wrap_json_handler(handler)))
    }

    /// Remove a registration. Returns `false` if `id` was not registered for
    /// `message_type`.
    pub fn unregister_handler(&self, message_type: MessageType, id: HandlerId) -> bool {
        self.inner.registry.unregister(message_type, id)
    }

    /// Number of handlers registered for `message_type`.
    pub fn handler_count(&self, message_type: MessageType) -> usize {
        self.inner.registry.count(message_type)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DispatchSnapshot {
        self.inner.stats.snapshot()
    }

    pub(crate) fn record_decode_failure(&self) {
        DispatchStats::bump(&self.inner.stats.decode_failures);
    }

    /// Route one inbound envelope.
    ///
    /// Never fails: unmatched replies and handler failures are reported in the
    /// returned [`Dispatched`], in the logs and in [`stats`](Self::stats).
    pub async fn dispatch(&self, envelope: Envelope) -> Dispatched {
        // ---
        if envelope.message_type().is_reply() {
            self.route_reply(envelope)
        } else {
            self.invoke_handlers(envelope).await
        }
    }

    fn route_reply(&self, envelope: Envelope) -> Dispatched {
        // ---
        let key = envelope.correlation_key().clone();
        let outcome = match envelope.message() {
            Message::Error(fault) => Err(RpcError::from(fault.clone())),
            _ => Ok(envelope),
        };

        match self.inner.table.resolve(&key, outcome) {
            Ok(()) => {
                DispatchStats::bump(&self.inner.stats.resolved);
                Dispatched::Resolved(key)
            }
            Err(_err) => {
                // Late, duplicate or stray reply: the transport keeps running.
                DispatchStats::bump(&self.inner.stats.unmatched);
                log_debug!("dropping reply: {_err}");
                Dispatched::Unmatched(key)
            }
        }
    }

    async fn invoke_handlers(&self, envelope: Envelope) -> Dispatched {
        // ---
        let message_type = envelope.message_type();
        let key = envelope.correlation_key().clone();
        let handlers = self.inner.registry.snapshot(message_type);

        if handlers.is_empty() {
            DispatchStats::bump(&self.inner.stats.no_handler);
            log_warn!("no handler for {message_type} message {key}");

            let reply = message_type.expects_reply().then(|| {
                let fault = Fault::new(Fault::NO_HANDLER, format!("no handler for {message_type}"));
                Envelope::reply_to(&envelope, Message::Error(fault))
            });
            return Dispatched::NoHandler { reply };
        }

        let mut failed = 0;
        let mut answer: Option<Bytes> = None;
        let mut last_failure: Option<String> = None;

        for (id, handler) in &handlers {
            // Own task per handler: a panic surfaces as a JoinError here.
            let result = tokio::spawn(handler.call(envelope.clone())).await;

            let failure = match result {
                Ok(Ok(Some(payload))) => {
                    if answer.is_none() {
                        answer = Some(payload);
                    } else if message_type.expects_reply() {
                        log_warn!("handler {id:?} answered {key} after another handler, reply discarded");
                    }
                    None
                }
                Ok(Ok(None)) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(join_err) => Some(format!("handler panicked: {join_err}")),
            };

            if let Some(reason) = failure {
                failed += 1;
                DispatchStats::bump(&self.inner.stats.handler_failures);
                log_warn!("handler {id:?} failed on {message_type} message {key}: {reason}");
                last_failure = Some(reason);
            }
        }

        DispatchStats::bump(&self.inner.stats.handled);

        let reply = match message_type {
            MessageType::Request | MessageType::KeepAliveRequest => {
                Self::build_reply(&envelope, answer, last_failure)
            }
            _ => {
                if answer.is_some() {
                    log_debug!("ignoring handler reply to {message_type} message {key}");
                }
                None
            }
        };

        Dispatched::Handled {
            invoked: handlers.len(),
            failed,
            reply,
        }
    }

    fn build_reply(
        request: &Envelope,
        answer: Option<Bytes>,
        last_failure: Option<String>,
    ) -> Option<Envelope> {
        // ---
        let message = match (answer, last_failure) {
            (Some(payload), _) => match request.message_type() {
                MessageType::KeepAliveRequest => Message::KeepAliveResponse,
                _ => Message::Response { payload },
            },
            (None, Some(reason)) => {
                Message::Error(Fault::new(Fault::HANDLER_FAILED, reason))
            }
            // Handlers chose not to answer here.
            (None, None) => return None,
        };
        Some(Envelope::reply_to(request, message))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn key(s: &str) -> CorrelationKey {
        CorrelationKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_response_resolves_pending() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        let mut handle = dispatcher.table().register(key("r1"), later()).unwrap();

        let env = Envelope::response("r1", Bytes::from_static(b"42")).unwrap();
        assert_eq!(dispatcher.dispatch(env).await, Dispatched::Resolved(key("r1")));

        let reply = handle.wait().await.unwrap();
        assert_eq!(reply.payload().unwrap().as_ref(), b"42");
        assert_eq!(dispatcher.stats().resolved, 1);
    }

    #[tokio::test]
    async fn test_error_reply_becomes_remote_failure() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        let mut handle = dispatcher.table().register(key("e1"), later()).unwrap();

        let env = Envelope::error("e1", Fault::new(9, "denied")).unwrap();
        dispatcher.dispatch(env).await;

        match handle.wait().await {
            Err(RpcError::Remote { code, message }) => {
                assert_eq!(code, 9);
                assert_eq!(message, "denied");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_correlation_is_reported_not_handled() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        let calls = Arc::new(Mutex::new(0));

        let c = calls.clone();
        dispatcher
            .register_handler(MessageType::Event, move |_env| {
                *c.lock().unwrap() += 1;
                async { Ok(None) }
            })
            .unwrap();

        let env = Envelope::response("never-sent", Bytes::from_static(b"1")).unwrap();
        let result = dispatcher.dispatch(env).await;

        assert_eq!(result, Dispatched::Unmatched(key("never-sent")));
        assert!(result.reply().is_none());
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(dispatcher.stats().unmatched, 1);
    }

    #[tokio::test]
    async fn test_duplicate_reply_is_unmatched() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        let _handle = dispatcher.table().register(key("d"), later()).unwrap();

        let env = Envelope::response("d", Bytes::from_static(b"1")).unwrap();
        assert!(matches!(dispatcher.dispatch(env.clone()).await, Dispatched::Resolved(_)));
        assert!(matches!(dispatcher.dispatch(env).await, Dispatched::Unmatched(_)));
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            dispatcher
                .register_handler(MessageType::Event, move |_env| {
                    let order = order.clone();
                    async move {
                        // Later handlers finish faster; order must still hold.
                        tokio::time::sleep(Duration::from_millis(30 - n * 10)).await;
                        order.lock().unwrap().push(n);
                        Ok(None)
                    }
                })
                .unwrap();
        }

        let env = Envelope::event("ev", Bytes::from_static(b"{}")).unwrap();
        let result = dispatcher.dispatch(env).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(
            result,
            Dispatched::Handled {
                invoked: 3,
                failed: 0,
                reply: None
            }
        );
    }

    #[tokio::test]
    async fn test_handler_failure_and_panic_are_isolated() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        let reached = Arc::new(Mutex::new(false));

        dispatcher
            .register_handler(MessageType::Event, |_env| async {
                Err(RpcError::Handler("bad event".into()))
            })
            .unwrap();
        dispatcher
            .register_handler(MessageType::Event, |env: Envelope| async move {
                if env.message_type() == MessageType::Event {
                    panic!("handler bug");
                }
                Ok::<HandlerReply, RpcError>(None)
            })
            .unwrap();
        let r = reached.clone();
        dispatcher
            .register_handler(MessageType::Event, move |_env| {
                *r.lock().unwrap() = true;
                async { Ok(None) }
            })
            .unwrap();

        let env = Envelope::event("ev", Bytes::new()).unwrap();
        let result = dispatcher.dispatch(env).await;

        assert!(*reached.lock().unwrap());
        assert!(matches!(result, Dispatched::Handled { invoked: 3, failed: 2, .. }));
        assert_eq!(dispatcher.stats().handler_failures, 2);
    }

    #[tokio::test]
    async fn test_request_reply_uses_first_answer() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        dispatcher
            .register_handler(MessageType::Request, |_env| async {
                Ok(Some(Bytes::from_static(b"\"first\"")))
            })
            .unwrap();
        dispatcher
            .register_handler(MessageType::Request, |_env| async {
                Ok(Some(Bytes::from_static(b"\"second\"")))
            })
            .unwrap();

        let req = Envelope::request("q", Bytes::from_static(b"null")).unwrap();
        let reply = dispatcher.dispatch(req).await.into_reply().unwrap();

        assert_eq!(reply.correlation_key().as_str(), "q");
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.payload().unwrap().as_ref(), b"\"first\"");
    }

    #[tokio::test]
    async fn test_failed_request_gets_error_reply() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        dispatcher
            .register_handler(MessageType::Request, |_env| async {
                Err(RpcError::Handler("object not found".into()))
            })
            .unwrap();

        let req = Envelope::request("q", Bytes::new()).unwrap();
        let reply = dispatcher.dispatch(req).await.into_reply().unwrap();
        let fault = reply.fault().unwrap();
        assert_eq!(fault.code, Fault::HANDLER_FAILED);
        assert!(fault.message.contains("object not found"));
    }

    #[tokio::test]
    async fn test_request_without_handler_gets_error_reply() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());

        let req = Envelope::request("q", Bytes::new()).unwrap();
        let result = dispatcher.dispatch(req).await;
        assert_eq!(result.reply().unwrap().fault().unwrap().code, Fault::NO_HANDLER);

        // Events are never answered.
        let ev = Envelope::event("e", Bytes::new()).unwrap();
        assert_eq!(dispatcher.dispatch(ev).await, Dispatched::NoHandler { reply: None });
        assert_eq!(dispatcher.stats().no_handler, 2);
    }

    #[tokio::test]
    async fn test_unregistered_handler_not_invoked() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        let calls = Arc::new(Mutex::new(0));

        let c = calls.clone();
        let id = dispatcher
            .register_handler(MessageType::Event, move |_env| {
                *c.lock().unwrap() += 1;
                async { Ok(None) }
            })
            .unwrap();

        assert!(dispatcher.unregister_handler(MessageType::Event, id));
        assert_eq!(dispatcher.handler_count(MessageType::Event), 0);

        let ev = Envelope::event("e", Bytes::new()).unwrap();
        assert!(matches!(dispatcher.dispatch(ev).await, Dispatched::NoHandler { .. }));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keep_alive_handler_answers_with_keep_alive() {
        // ---
        let dispatcher = Dispatcher::new(CorrelationTable::new());
        dispatcher
            .register_handler(MessageType::KeepAliveRequest, |_env| async {
                Ok(Some(Bytes::new()))
            })
            .unwrap();

        let req = Envelope::keep_alive_request("ka").unwrap();
        let reply = dispatcher.dispatch(req).await.into_reply().unwrap();
        assert_eq!(reply.message_type(), MessageType::KeepAliveResponse);
    }
}
