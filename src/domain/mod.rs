//! Domain layer public interface.
//!
//! This module defines the message model and the seams to external
//! collaborators (transport, codec). Nothing here depends on a concrete
//! transport or wire format.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod codec;
mod envelope;
mod transport;

// --- Envelope domain re-exports ---

pub use envelope::{
    //
    Envelope,
    Fault,
    Message,
    MessageType,
};

// --- Collaborator seams ---

pub use codec::{Codec, CodecPtr};
pub use transport::{FrameStream, Transport, TransportPtr};
