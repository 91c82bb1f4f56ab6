//! Inbound reader loop.
//!
//! This module provides the glue between a transport's inbound
//! [`FrameStream`] and the [`Dispatcher`].
//!
//! The reader is responsible for:
//! - decoding each inbound frame with the session codec
//! - handing decoded envelopes to the dispatcher
//! - encoding and sending the replies handlers produce
//! - failing outstanding requests once the stream ends
//!
//! It does **not** define RPC semantics; those live in the dispatcher and the
//! correlation table.
//!
//! ## Design notes
//!
//! ### Reply routing stays responsive
//!
//! Reply envelopes are dispatched inline: resolving a pending request never
//! awaits anything. Unsolicited envelopes are dispatched on their own task, so
//! a slow handler cannot delay the routing of later replies. As a consequence,
//! handlers for different unsolicited messages may run concurrently.
//!
//! ### Error handling
//!
//! Undecodable frames and failed reply sends are logged and counted, but do not
//! terminate the loop. This mirrors message-oriented middleware, where a single
//! bad message should not bring down the consumer.

use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_warn,
    CodecPtr,
    Dispatcher,
    Envelope,
    FrameStream,
    RpcError,
    TransportPtr,
};

/// Start the reader loop for one transport.
///
/// The returned [`JoinHandle`] represents the lifetime of the loop. The loop
/// ends when the inbound stream ends; at that point every request still
/// pending in the dispatcher's table fails with [`RpcError::ConnectionLost`].
///
/// Must be called from within a tokio runtime.
pub fn spawn_reader(
    mut inbound: FrameStream,
    codec: CodecPtr,
    dispatcher: Dispatcher,
    transport: TransportPtr,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        // ---
        while let Some(frame) = inbound.recv().await {
            let envelope = match codec.decode(&frame) {
                Ok(envelope) => envelope,
                Err(_err) => {
                    dispatcher.record_decode_failure();
                    log_warn!(
                        "{}: dropping undecodable frame ({} bytes): {_err}",
                        transport.transport_id(),
                        frame.len()
                    );
                    continue;
                }
            };

            if envelope.message_type().is_reply() {
                dispatcher.dispatch(envelope).await;
                continue;
            }

            let dispatcher = dispatcher.clone();
            let codec = codec.clone();
            let transport = transport.clone();

            tokio::spawn(async move {
                if let Some(reply) = dispatcher.dispatch(envelope).await.into_reply() {
                    send_reply(&codec, &transport, reply).await;
                }
            });
        }

        let _failed = dispatcher.table().fail_all(|| RpcError::ConnectionLost);
        log_debug!(
            "{}: inbound stream ended, {_failed} pending request(s) failed",
            transport.transport_id()
        );
    })
}

async fn send_reply(codec: &CodecPtr, transport: &TransportPtr, reply: Envelope) {
    // ---
    let frame = match codec.encode(&reply) {
        Ok(frame) => frame,
        Err(_err) => {
            log_warn!("cannot encode reply for {}: {_err}", reply.correlation_key());
            return;
        }
    };

    if let Err(_err) = transport.send(frame).await {
        log_warn!(
            "{}: reply for {} not sent: {_err}",
            transport.transport_id(),
            reply.correlation_key()
        );
    }
}
