//! Handler type erasure and the per-message-type registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{lock_ignore_poison, Envelope, MessageType, Result, RpcError};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reply produced by a handler: `Some(payload)` answers the message,
/// `None` leaves it unanswered.
pub type HandlerReply = Option<Bytes>;

/// Type-erased async handler.
pub(crate) trait HandlerFn: Send + Sync {
    fn call(&self, envelope: Envelope) -> BoxFuture<'static, Result<HandlerReply>>;
}

impl<F, Fut> HandlerFn for F
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerReply>> + Send + 'static,
{
    fn call(&self, envelope: Envelope) -> BoxFuture<'static, Result<HandlerReply>> {
        Box::pin((self)(envelope))
    }
}

/// Wrap a typed serde_json handler into a raw one.
///
/// The payload is deserialized into `TReq`; the handler's `TResp` is
/// serialized back into the reply payload. Messages without a payload
/// deserialize from JSON `null`.
pub(crate) fn wrap_json_handler<F, Fut, TReq, TResp>(
    handler: F,
) -> impl Fn(Envelope) -> BoxFuture<'static, Result<HandlerReply>> + Send + Sync + 'static
where
    F: Fn(TReq) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<TResp>> + Send + 'static,
    TReq: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
{
    // ---
    move |envelope: Envelope| {
        let handler = handler.clone();
        let fut = async move {
            // ---
            let req: TReq = match envelope.payload() {
                Some(payload) if !payload.is_empty() => serde_json::from_slice(payload)?,
                _ => serde_json::from_value(serde_json::Value::Null)?,
            };

            let resp = handler(req).await?;
            let bytes = serde_json::to_vec(&resp)?;
            Ok(Some(Bytes::from(bytes)))
        };

        Box::pin(fut) as BoxFuture<'static, Result<HandlerReply>>
    }
}

/// Identifies one registration, for [`Dispatcher::unregister_handler`](crate::Dispatcher::unregister_handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type HandlerList = Vec<(HandlerId, Arc<dyn HandlerFn>)>;

/// Message type → handlers, in registration order.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: Mutex<HashMap<MessageType, HandlerList>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    // ---

    pub(crate) fn register(
        &self,
        message_type: MessageType,
        handler: Arc<dyn HandlerFn>,
    ) -> Result<HandlerId> {
        // ---
        if message_type.is_reply() {
            return Err(RpcError::invalid_argument(format!(
                "{message_type} messages are routed by correlation key, not to handlers"
            )));
        }

        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock_ignore_poison(&self.handlers)
            .entry(message_type)
            .or_default()
            .push((id, handler));
        Ok(id)
    }

    pub(crate) fn unregister(&self, message_type: MessageType, id: HandlerId) -> bool {
        // ---
        let mut handlers = lock_ignore_poison(&self.handlers);
        let Some(list) = handlers.get_mut(&message_type) else {
            return false;
        };

        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;

        if list.is_empty() {
            handlers.remove(&message_type);
        }
        removed
    }

    /// Snapshot of the handlers for `message_type`, taken under the lock so
    /// invocation can happen without it.
    pub(crate) fn snapshot(&self, message_type: MessageType) -> HandlerList {
        lock_ignore_poison(&self.handlers)
            .get(&message_type)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, message_type: MessageType) -> usize {
        lock_ignore_poison(&self.handlers)
            .get(&message_type)
            .map_or(0, Vec::len)
    }
}
