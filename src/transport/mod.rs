//! Transport implementations and the inbound reader loop.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait, plus the glue that feeds a transport's inbound frames to
//! the dispatcher.
//!
//! Domain code must not depend on transport-specific types.

pub(crate) mod memory;
pub(crate) mod runner;
