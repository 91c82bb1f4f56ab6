//! Message correlation and dispatch core for remote-object RPC.
//!
//! Every message carries a message type and a correlation key. This library
//! tracks in-flight requests, routes replies back to the waiting caller,
//! routes unsolicited messages (requests, events, keep-alives) to handlers
//! registered by message type, and enforces request timeouts. Lost, late,
//! duplicated and out-of-order messages are tolerated.
//!
//! Transports and codecs are consumed through the [`Transport`] and [`Codec`]
//! traits; an in-memory transport ([`memory_pair`]) and a JSON codec
//! ([`JsonCodec`]) are included.
//!

// Import all sub modules once...
mod client;
mod codec;
mod domain;
mod server;
mod transport;

mod config;
mod session;
mod session_builder;

mod correlation;
mod error;
mod lock;
mod macros;

pub(crate) use lock::lock_ignore_poison;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::pending::{CorrelationTable, Outcome, PendingHandle};
pub use client::reaper::Reaper;
pub use client::{InFlight, RpcClient};
pub use server::{DispatchSnapshot, Dispatched, Dispatcher, HandlerId, HandlerReply};

pub use session::RpcSession;
pub use session_builder::RpcSessionBuilder;

pub use config::RpcConfig;

pub use correlation::{CorrelationKey, KeyGenerator, KeyStrategy};
pub use error::{Result, RpcError};

pub use codec::JsonCodec;
pub use transport::memory::{memory_pair, MemoryEndpoint};
pub use transport::runner::spawn_reader;

// --- public re-exports
pub use domain::{
    //
    Codec,
    CodecPtr,
    Envelope,
    Fault,
    FrameStream,
    Message,
    MessageType,
    Transport,
    TransportPtr,
};
