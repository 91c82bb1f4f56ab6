// src/codec/json.rs

//! JSON wire codec.
//!
//! Each frame is one JSON object:
//!
//! ```text
//! {
//!   "message.type": "request",
//!   "correlation.key": "5f0c...",
//!   "payload": "cGluZw==",         // request / response / event
//!   "status.code": 2,              // error only
//!   "status.message": "..."        // error only
//! }
//! ```
//!
//! Payloads are opaque bytes, carried as standard base64 so any byte sequence
//! survives the round trip unchanged. An empty payload is omitted.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    // ---
    Codec,
    Envelope,
    Fault,
    Message,
    MessageType,
    Result,
    RpcError,
};

#[derive(Serialize, Deserialize)]
struct WireMessage<'a> {
    #[serde(rename = "message.type")]
    message_type: MessageType,

    #[serde(rename = "correlation.key", borrow)]
    correlation_key: Cow<'a, str>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,

    #[serde(rename = "status.code", default, skip_serializing_if = "Option::is_none")]
    status_code: Option<i32>,

    #[serde(
        rename = "status.message",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    status_message: Option<String>,
}

/// Codec producing one JSON object per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn encode_payload(payload: &Bytes) -> Option<String> {
        if payload.is_empty() {
            return None;
        }
        Some(STANDARD.encode(payload))
    }

    fn decode_payload(payload: Option<String>) -> Result<Bytes> {
        match payload {
            Some(text) => STANDARD
                .decode(text.as_bytes())
                .map(Bytes::from)
                .map_err(|e| RpcError::Decode(format!("payload is not base64: {e}"))),
            None => Ok(Bytes::new()),
        }
    }
}

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        // ---
        let mut wire = WireMessage {
            message_type: envelope.message_type(),
            correlation_key: Cow::Borrowed(envelope.correlation_key().as_str()),
            payload: None,
            status_code: None,
            status_message: None,
        };

        match envelope.message() {
            Message::Request { payload }
            | Message::Response { payload }
            | Message::Event { payload } => {
                wire.payload = Self::encode_payload(payload);
            }
            Message::Error(fault) => {
                wire.status_code = Some(fault.code);
                wire.status_message = Some(fault.message.to_string());
            }
            Message::KeepAliveRequest | Message::KeepAliveResponse => {}
        }

        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }

    fn decode(&self, frame: &[u8]) -> Result<Envelope> {
        // ---
        let wire: WireMessage<'_> =
            serde_json::from_slice(frame).map_err(|e| RpcError::Decode(e.to_string()))?;

        let message = match wire.message_type {
            MessageType::Request => Message::Request {
                payload: Self::decode_payload(wire.payload)?,
            },
            MessageType::Response => Message::Response {
                payload: Self::decode_payload(wire.payload)?,
            },
            MessageType::Event => Message::Event {
                payload: Self::decode_payload(wire.payload)?,
            },
            MessageType::Error => {
                let code = wire
                    .status_code
                    .ok_or_else(|| RpcError::Decode("error message without status.code".into()))?;
                Message::Error(Fault::new(code, wire.status_message.unwrap_or_default()))
            }
            MessageType::KeepAliveRequest => Message::KeepAliveRequest,
            MessageType::KeepAliveResponse => Message::KeepAliveResponse,
        };

        Envelope::new(&wire.correlation_key, message)
            .map_err(|e| RpcError::Decode(format!("invalid envelope: {e}")))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
