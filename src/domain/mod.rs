//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! transport implementations.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod transport;

// --- Transport domain re-exports ---

pub use transport::{
    //
    Channel,
    ConcreteTarget,
    Envelope,
    EventTransport,
    PeerId,
    Role,
    SubscriptionHandle,
    TransportBase,
    TransportConfig,
    TransportPtr,
};
