/// Protocol types for RPC message correlation and serialization
///
/// This module defines the wire format for request, reply and
/// acknowledgement messages exchanged between engines.
mod message;

pub use message::{ErrorKind, WireMessage};
