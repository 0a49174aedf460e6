//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `EventTransport` trait. It is intended primarily for testing, local
//! execution, and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Once `subscribe()` returns successfully, payloads emitted *after* that
//!   point to this endpoint are deliverable.
//! - Each subscription is a FIFO queue, so ordering holds per link.
//! - Payloads addressed to unknown endpoints are dropped silently; the
//!   channel is fire-and-forget.
//! - `emit()` never waits on a recipient. A payload for an inbox that is
//!   full (the subscriber stopped draining) is dropped.
//!
//! ## Routing
//!
//! | target                  | delivered to                         |
//! |-------------------------|--------------------------------------|
//! | `ConcreteTarget::Peer`  | every server-role endpoint           |
//! | `ConcreteTarget::One`   | the named endpoint                   |
//! | `ConcreteTarget::Many`  | each named endpoint, once            |
//! | `ConcreteTarget::All`   | every client-role endpoint           |

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

#[allow(unused_imports)]
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Channel,
    ConcreteTarget,
    Envelope,
    EventTransport,
    PeerId,
    Result,
    Role,
    SubscriptionHandle,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

const INBOX_CAPACITY: usize = 64;

struct Endpoint {
    role: Role,
    inboxes: HashMap<Channel, Vec<mpsc::Sender<Envelope>>>,
}

/// Shared event bus for the in-memory transport.
///
/// All `MemoryTransport` instances sharing a `MemoryHub` can reach each
/// other, the way players connected to one game server can.
///
/// For integration tests that need isolation between parallel test cases,
/// construct a hub explicitly and pass it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use evrpc::{MemoryHub, TransportConfig, Role};
/// # async fn example() -> evrpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let server = evrpc::create_memory_transport_with_hub(
///     TransportConfig { node_id: "server".into(), role: Role::Server },
///     hub.clone(),
/// ).await?;
/// let player = evrpc::create_memory_transport_with_hub(
///     TransportConfig { node_id: 1u32.into(), role: Role::Client },
///     hub.clone(),
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    endpoints: RwLock<HashMap<PeerId, Endpoint>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    async fn attach(&self, node_id: &PeerId, role: Role) {
        // ---
        log_debug!("{node_id}: attach as {role}");

        let mut endpoints = self.endpoints.write().await;
        if endpoints.contains_key(node_id) {
            log_warn!("{node_id}: endpoint already attached, replacing");
        }
        endpoints.insert(
            node_id.clone(),
            Endpoint {
                role,
                inboxes: HashMap::new(),
            },
        );
    }

    /// Number of attached endpoints.
    pub async fn endpoint_count(&self) -> usize {
        self.endpoints.read().await.len()
    }

    async fn emit(
        &self,
        sender: &PeerId,
        channel: Channel,
        payload: Bytes,
        target: ConcreteTarget,
    ) -> Result<()> {
        // ---
        // Collect recipients first so no lock is held while sending.
        let recipients: Vec<mpsc::Sender<Envelope>> = {
            let endpoints = self.endpoints.read().await;

            let inboxes_of = |endpoint: &Endpoint| {
                endpoint
                    .inboxes
                    .get(&channel)
                    .cloned()
                    .unwrap_or_default()
            };

            match &target {
                ConcreteTarget::Peer => endpoints
                    .values()
                    .filter(|e| e.role == Role::Server)
                    .flat_map(inboxes_of)
                    .collect(),
                ConcreteTarget::All => endpoints
                    .values()
                    .filter(|e| e.role == Role::Client)
                    .flat_map(inboxes_of)
                    .collect(),
                ConcreteTarget::One(id) => endpoints.get(id).map(inboxes_of).unwrap_or_default(),
                ConcreteTarget::Many(ids) => ids
                    .iter()
                    .filter_map(|id| endpoints.get(id))
                    .flat_map(inboxes_of)
                    .collect(),
            }
        };

        log_debug!(
            "{sender}: emit {} to {target:?} ({} inboxes)",
            channel.event_name(),
            recipients.len()
        );

        for inbox in recipients {
            let env = Envelope {
                channel,
                sender: sender.clone(),
                payload: payload.clone(),
            };

            match inbox.try_send(env) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log_warn!("{sender}: recipient inbox full, dropping payload");
                }
                // A closed channel indicates a dropped SubscriptionHandle.
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log_info!("{sender}: inbox closed, dropping payload");
                }
            }
        }

        Ok(())
    }

    async fn subscribe(&self, node_id: &PeerId, channel: Channel) -> Result<SubscriptionHandle> {
        // ---
        log_debug!("{node_id}: subscribe to {}", channel.event_name());

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .get_mut(node_id)
            .ok_or_else(|| crate::RpcError::Transport(format!("{node_id}: endpoint is closed")))?;
        endpoint.inboxes.entry(channel).or_default().push(tx);

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn detach(&self, node_id: &PeerId) -> Result<()> {
        // ---
        log_debug!("{node_id}: closing transport...");

        let mut endpoints = self.endpoints.write().await;
        endpoints.remove(node_id);
        Ok(())
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            endpoints: RwLock::new(HashMap::new()),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes payloads through a shared [`MemoryHub`].
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl EventTransport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn emit(&self, channel: Channel, payload: Bytes, target: ConcreteTarget) -> Result<()> {
        self.hub
            .emit(self.node_id(), channel, payload, target)
            .await
    }

    async fn subscribe(&self, channel: Channel) -> Result<SubscriptionHandle> {
        self.hub.subscribe(self.node_id(), channel).await
    }

    /// Detach this endpoint from the hub. Other endpoints are unaffected.
    async fn close(&self) -> Result<()> {
        self.hub.detach(self.node_id()).await
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport attached to the provided hub.
///
/// # Errors
///
/// Currently infallible.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    hub.attach(&config.node_id, config.role).await;

    let transport = MemoryTransport {
        base: TransportBase::from(&config),
        hub,
    };

    Ok(Arc::new(transport))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use tokio::time::{timeout, Duration};

    async fn endpoint(hub: &Arc<MemoryHub>, id: &str, role: Role) -> TransportPtr {
        // ---
        create_memory_transport_with_hub(
            TransportConfig {
                node_id: id.into(),
                role,
            },
            hub.clone(),
        )
        .await
        .expect("create memory transport")
    }

    async fn recv(handle: &mut SubscriptionHandle) -> Option<Envelope> {
        timeout(Duration::from_millis(50), handle.inbox.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_client_peer_reaches_server_with_sender() {
        // ---
        let hub = MemoryHub::new();
        let server = endpoint(&hub, "server", Role::Server).await;
        let client = endpoint(&hub, "1", Role::Client).await;

        let mut inbox = server.subscribe(Channel::Request).await.unwrap();

        client
            .emit(
                Channel::Request,
                Bytes::from_static(b"hello"),
                ConcreteTarget::Peer,
            )
            .await
            .unwrap();

        let env = recv(&mut inbox).await.expect("delivered");
        assert_eq!(env.sender, PeerId::from("1"));
        assert_eq!(env.channel, Channel::Request);
        assert_eq!(env.payload, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_channels_are_separate() {
        // ---
        let hub = MemoryHub::new();
        let server = endpoint(&hub, "server", Role::Server).await;
        let client = endpoint(&hub, "1", Role::Client).await;

        let mut responses = server.subscribe(Channel::Response).await.unwrap();

        client
            .emit(Channel::Request, Bytes::new(), ConcreteTarget::Peer)
            .await
            .unwrap();

        assert!(recv(&mut responses).await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_clients_only() {
        // ---
        let hub = MemoryHub::new();
        let server = endpoint(&hub, "server", Role::Server).await;
        let a = endpoint(&hub, "1", Role::Client).await;
        let b = endpoint(&hub, "2", Role::Client).await;

        let mut server_inbox = server.subscribe(Channel::Request).await.unwrap();
        let mut a_inbox = a.subscribe(Channel::Request).await.unwrap();
        let mut b_inbox = b.subscribe(Channel::Request).await.unwrap();

        server
            .emit(Channel::Request, Bytes::new(), ConcreteTarget::All)
            .await
            .unwrap();

        assert!(recv(&mut a_inbox).await.is_some());
        assert!(recv(&mut b_inbox).await.is_some());
        assert!(recv(&mut server_inbox).await.is_none());
    }

    #[tokio::test]
    async fn test_many_and_unknown_ids() {
        // ---
        let hub = MemoryHub::new();
        let server = endpoint(&hub, "server", Role::Server).await;
        let a = endpoint(&hub, "1", Role::Client).await;
        let b = endpoint(&hub, "2", Role::Client).await;

        let mut a_inbox = a.subscribe(Channel::Request).await.unwrap();
        let mut b_inbox = b.subscribe(Channel::Request).await.unwrap();

        server
            .emit(
                Channel::Request,
                Bytes::new(),
                ConcreteTarget::Many(vec!["1".into(), "99".into()]),
            )
            .await
            .unwrap();

        assert!(recv(&mut a_inbox).await.is_some());
        assert!(recv(&mut a_inbox).await.is_none());
        assert!(recv(&mut b_inbox).await.is_none());
    }

    #[tokio::test]
    async fn test_close_detaches_only_self() {
        // ---
        let hub = MemoryHub::new();
        let server = endpoint(&hub, "server", Role::Server).await;
        let client = endpoint(&hub, "1", Role::Client).await;
        assert_eq!(hub.endpoint_count().await, 2);

        client.close().await.unwrap();
        assert_eq!(hub.endpoint_count().await, 1);

        assert!(client.subscribe(Channel::Request).await.is_err());
        assert!(server.subscribe(Channel::Request).await.is_ok());
    }

    #[tokio::test]
    async fn test_full_inbox_drops_without_blocking() {
        // ---
        let hub = MemoryHub::new();
        let server = endpoint(&hub, "server", Role::Server).await;
        let stalled = endpoint(&hub, "1", Role::Client).await;
        let healthy = endpoint(&hub, "2", Role::Client).await;

        let mut stalled_inbox = stalled.subscribe(Channel::Request).await.unwrap();
        let mut healthy_inbox = healthy.subscribe(Channel::Request).await.unwrap();

        // Overfill the stalled inbox; every emit must still return at once.
        for _ in 0..INBOX_CAPACITY + 5 {
            timeout(
                Duration::from_millis(50),
                server.emit(
                    Channel::Request,
                    Bytes::from_static(b"x"),
                    ConcreteTarget::One("1".into()),
                ),
            )
            .await
            .expect("emit blocked on a full inbox")
            .unwrap();
        }

        timeout(
            Duration::from_millis(50),
            server.emit(Channel::Request, Bytes::from_static(b"all"), ConcreteTarget::All),
        )
        .await
        .expect("broadcast blocked on a full inbox")
        .unwrap();

        let env = recv(&mut healthy_inbox).await.expect("healthy client served");
        assert_eq!(env.payload, Bytes::from_static(b"all"));

        let mut queued = 0;
        while stalled_inbox.inbox.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, INBOX_CAPACITY);
    }
}
