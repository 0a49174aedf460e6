//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `EventTransport` trait, exposed only through constructor functions,
//! plus the receive-loop runner that drives engine consumers.
//!
//! Domain code must not depend on transport-specific types.

mod memory;
mod runner;

pub use memory::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};
pub(crate) use runner::{run, TransportConsumer};
