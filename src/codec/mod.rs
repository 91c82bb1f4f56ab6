//! Codec implementations.
//!
//! Concrete implementations of the domain-level `Codec` trait. Domain code
//! must not depend on codec-specific types beyond the constructor.

mod json;

pub use json::JsonCodec;
