// src/domain/transport.rs

//! Event transport domain abstractions.
//!
//! Defines the primitive, fire-and-forget event channel the RPC engine is
//! built on. A transport can emit an opaque payload on a named channel to a
//! concrete target and deliver payloads received on a channel to
//! subscribers. It has no notion of replies; correlation, timeouts and
//! error marshaling live in the engine.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use crate::Result;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Which side of the conversation an endpoint plays.
///
/// A server addresses many peers and must say which ones; a client has
/// exactly one implicit peer (the server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    // ---
    /// Single engine addressed by, and addressing, many peers.
    Server,

    /// Engine with one implicit peer.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Identity of an endpoint on the event transport.
///
/// Opaque to the engine. Game servers commonly address players by numeric
/// slot, so integers convert directly.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub Arc<str>);

impl PeerId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        PeerId(value.into())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        PeerId(value.into())
    }
}

impl From<u32> for PeerId {
    fn from(value: u32) -> Self {
        PeerId(value.to_string().into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two fixed event names the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Carries `call` and `notify` messages.
    Request,
    /// Carries `result-ok`, `result-error` and `ack` messages.
    Response,
}

impl Channel {
    /// Event name used on the underlying transport.
    pub fn event_name(&self) -> &'static str {
        match self {
            Channel::Request => "__rpc:request",
            Channel::Response => "__rpc:response",
        }
    }
}

/// Transport-level destination produced by the target resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConcreteTarget {
    /// The single implicit peer of a client.
    Peer,
    /// One addressed endpoint.
    One(PeerId),
    /// Each listed endpoint once.
    Many(Vec<PeerId>),
    /// Every client endpoint.
    All,
}

/// Shared base state for all transport implementations.
///
/// ```ignore
/// struct SocketTransport {
///     base: TransportBase,
///     // ... socket specific fields
/// }
///
/// impl EventTransport for SocketTransport {
///     fn base(&self) -> &TransportBase { &self.base }
/// }
/// ```
pub struct TransportBase {
    /// Identity of this endpoint.
    pub node_id: PeerId,
    /// Role this endpoint plays.
    pub role: Role,
}

impl From<&TransportConfig> for TransportBase {
    fn from(config: &TransportConfig) -> Self {
        // ---
        Self {
            node_id: config.node_id.clone(),
            role: config.role,
        }
    }
}

/// Configuration for creating a transport instance.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Identity of this endpoint.
    pub node_id: PeerId,
    /// Role this endpoint plays.
    pub role: Role,
}

/// A delivered message.
///
/// The payload is opaque to the transport. `sender` is the delivery
/// context: who emitted this, used by the engine as the reply target.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Channel the payload was emitted on.
    pub channel: Channel,

    /// Endpoint that emitted the payload.
    pub sender: PeerId,

    /// Opaque payload bytes.
    pub payload: Bytes,
}

/// Handle returned from a successful subscription.
///
/// Dropping the handle unsubscribes.
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for delivered envelopes.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Event transport abstraction.
///
/// Best-effort, non-blocking emission of opaque payloads with at most
/// per-link FIFO ordering and no reply channel.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, payloads emitted *after* that
///   point on the same channel and addressed to this endpoint are deliverable.
/// - `emit()` does not wait for the receiver to process the payload.
/// - Every delivered [`Envelope`] names its sender.
#[async_trait::async_trait]
pub trait EventTransport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Identity of this endpoint.
    fn node_id(&self) -> &PeerId {
        &self.base().node_id
    }

    /// Role of this endpoint.
    fn role(&self) -> Role {
        self.base().role
    }

    /// Emit a payload on `channel` to `target`.
    async fn emit(&self, channel: Channel, payload: Bytes, target: ConcreteTarget) -> Result<()>;

    /// Subscribe to payloads arriving on `channel` for this endpoint.
    async fn subscribe(&self, channel: Channel) -> Result<SubscriptionHandle>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
pub type TransportPtr = Arc<dyn EventTransport>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_peer_id_conversions() {
        // ---
        assert_eq!(PeerId::from(7u32), PeerId::from("7"));
        assert_eq!(PeerId::from(String::from("server")).as_str(), "server");
    }

    #[test]
    fn test_channel_event_names_differ() {
        // ---
        assert_ne!(
            Channel::Request.event_name(),
            Channel::Response.event_name()
        );
    }
}
