//! Correlated RPC over fire-and-forget event channels.
//!
//! Game servers and their clients usually talk over a primitive event
//! channel: emit an event with some arguments at a peer (or at everyone),
//! subscribe to an event by name. There is no reply. This crate builds two
//! request types on top of such a channel:
//!
//! - **call**: one request, exactly one value-bearing reply or an error
//! - **notify**: one request, one delivery acknowledgement
//!
//! Requests and replies are matched by a random request id. Each pending
//! request has a deadline; a reply that arrives after the deadline, or a
//! second reply for the same id, is dropped. A server-role engine addresses
//! peers by [`Target`] (unicast, multicast, broadcast); a client-role
//! engine always talks to its single server.
//!
//! The engine does not retry, does not order independent calls and does
//! not authenticate. [`Retrying`] is an opt-in decorator for callers that
//! want retries on timeout.

// Import all sub modules once...
mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

mod correlation;
mod domain;
mod error;
mod protocol;
mod transport;

mod engine;
mod engine_builder;
mod engine_config;
mod handlers;
mod pending;
mod retry;
mod target;
mod transport_builder;

// Re-export main types
pub use engine::{NotifyFailure, RpcEngine};
pub use engine_builder::RpcEngineBuilder;
pub use engine_config::{EngineConfig, NotifyErrorHook, DEFAULT_REQUEST_TIMEOUT};
pub use handlers::RpcContext;
pub use retry::{RetryConfig, Retrying};
pub use target::{resolver_for, CallKind, ClientResolver, ServerResolver, Target, TargetResolver};
pub use transport_builder::{TransportBuilder, DEFAULT_SERVER_ID};

pub use correlation::RequestId;
pub use error::{RemoteError, Result, RpcError};
pub use protocol::{ErrorKind, WireMessage};

pub use transport::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};

// --- public re-exports
pub use domain::{
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
