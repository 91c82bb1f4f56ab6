// src/domain/envelope.rs

//! Message envelope domain types.
//!
//! An [`Envelope`] pairs a [`CorrelationKey`] with a [`Message`]. The message
//! is a tagged union over the protocol's message kinds, so each kind carries
//! only the fields it needs and the dispatcher can match on it exhaustively.
//!
//! Envelopes are immutable once built. They are created by the request
//! lifecycle (requests), by handlers (replies) or by a codec (inbound frames),
//! and consumed by the dispatcher.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{CorrelationKey, Result, RpcError};

/// Message kind discriminator.
///
/// The serialized names are the ones used on the wire by the JSON codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Call into a remote object. Answered by `Response` or `Error`.
    #[serde(rename = "request")]
    Request,

    /// Successful answer to a `Request`.
    #[serde(rename = "response")]
    Response,

    /// Failed answer to a `Request` or `KeepAliveRequest`.
    #[serde(rename = "error")]
    Error,

    /// Unsolicited notification; never answered.
    #[serde(rename = "event")]
    Event,

    /// Liveness check. Answered by `KeepAliveResponse`.
    #[serde(rename = "keep_alive.request")]
    KeepAliveRequest,

    /// Answer to a `KeepAliveRequest`.
    #[serde(rename = "keep_alive.response")]
    KeepAliveResponse,
}

impl MessageType {
    /// True for kinds that complete a pending request and are therefore routed
    /// through the correlation table.
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            MessageType::Response | MessageType::Error | MessageType::KeepAliveResponse
        )
    }

    /// True for kinds the sender waits on a reply for.
    pub fn expects_reply(self) -> bool {
        matches!(self, MessageType::Request | MessageType::KeepAliveRequest)
    }

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::Event => "event",
            MessageType::KeepAliveRequest => "keep_alive.request",
            MessageType::KeepAliveResponse => "keep_alive.response",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by an error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Status code. Application codes should avoid the reserved values below.
    pub code: i32,
    /// Human readable description.
    pub message: Arc<str>,
}

impl Fault {
    /// Every handler for a request failed and none produced a reply.
    pub const HANDLER_FAILED: i32 = 1;

    /// No handler is registered for the request's message type.
    pub const NO_HANDLER: i32 = 2;

    pub fn new(code: i32, message: impl Into<Arc<str>>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<Fault> for RpcError {
    fn from(fault: Fault) -> Self {
        RpcError::Remote {
            code: fault.code,
            message: fault.message.to_string(),
        }
    }
}

/// Message body, one variant per [`MessageType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request { payload: Bytes },
    Response { payload: Bytes },
    Error(Fault),
    Event { payload: Bytes },
    KeepAliveRequest,
    KeepAliveResponse,
}

impl Message {
    /// Discriminator for this body.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Request { .. } => MessageType::Request,
            Message::Response { .. } => MessageType::Response,
            Message::Error(_) => MessageType::Error,
            Message::Event { .. } => MessageType::Event,
            Message::KeepAliveRequest => MessageType::KeepAliveRequest,
            Message::KeepAliveResponse => MessageType::KeepAliveResponse,
        }
    }

    /// Opaque payload, for the kinds that have one.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Message::Request { payload }
            | Message::Response { payload }
            | Message::Event { payload } => Some(payload),
            Message::Error(_) | Message::KeepAliveRequest | Message::KeepAliveResponse => None,
        }
    }
}

/// Immutable message envelope: correlation key plus message body.
///
/// # Examples
///
/// ```
/// # use rtremote_rpc::{Envelope, MessageType};
/// # use bytes::Bytes;
/// let env = Envelope::request("req-1", Bytes::from_static(b"{\"ping\":1}")).unwrap();
/// assert_eq!(env.message_type(), MessageType::Request);
/// assert_eq!(env.correlation_key().as_str(), "req-1");
///
/// // An envelope without a correlation key cannot exist.
/// assert!(Envelope::request("", Bytes::new()).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    correlation_key: CorrelationKey,
    message: Message,
}

impl Envelope {
    // ---

    /// Build an envelope from a raw key.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidArgument`] if `key` is empty.
    pub fn new(key: impl AsRef<str>, message: Message) -> Result<Self> {
        Ok(Self::with_key(CorrelationKey::new(key)?, message))
    }

    /// Build an envelope from an already validated key.
    pub fn with_key(correlation_key: CorrelationKey, message: Message) -> Self {
        Self {
            correlation_key,
            message,
        }
    }

    pub fn request(key: impl AsRef<str>, payload: Bytes) -> Result<Self> {
        Self::new(key, Message::Request { payload })
    }

    pub fn response(key: impl AsRef<str>, payload: Bytes) -> Result<Self> {
        Self::new(key, Message::Response { payload })
    }

    pub fn error(key: impl AsRef<str>, fault: Fault) -> Result<Self> {
        Self::new(key, Message::Error(fault))
    }

    pub fn event(key: impl AsRef<str>, payload: Bytes) -> Result<Self> {
        Self::new(key, Message::Event { payload })
    }

    pub fn keep_alive_request(key: impl AsRef<str>) -> Result<Self> {
        Self::new(key, Message::KeepAliveRequest)
    }

    pub fn keep_alive_response(key: impl AsRef<str>) -> Result<Self> {
        Self::new(key, Message::KeepAliveResponse)
    }

    /// Build a reply that echoes `request`'s correlation key.
    pub fn reply_to(request: &Envelope, message: Message) -> Self {
        Self::with_key(request.correlation_key.clone(), message)
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.correlation_key
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Opaque payload, for the kinds that have one.
    pub fn payload(&self) -> Option<&Bytes> {
        self.message.payload()
    }

    /// Status of an error reply.
    pub fn fault(&self) -> Option<&Fault> {
        match &self.message {
            Message::Error(fault) => Some(fault),
            _ => None,
        }
    }

    /// Consume the envelope, keeping only the body.
    pub fn into_message(self) -> Message {
        self.message
    }
}
