//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API with clear separation between required
//! and optional configuration.

use std::sync::Arc;

use crate::{MemoryHub, PeerId, Result, Role, RpcError, TransportConfig, TransportPtr};

/// Node id used by the server role when none is given.
pub const DEFAULT_SERVER_ID: &str = "server";

/// Builder for creating transport instances.
///
/// # Examples
///
/// ## Server role
/// ```no_run
/// use evrpc::TransportBuilder;
///
/// # async fn example() -> evrpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .server_role()  // node id defaults to "server"
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Client role on an isolated hub
/// ```no_run
/// use evrpc::{MemoryHub, TransportBuilder};
///
/// # async fn example() -> evrpc::Result<()> {
/// let hub = MemoryHub::new();
/// let transport = TransportBuilder::new()
///     .node_id(17u32)
///     .client_role()
///     .hub(hub)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TransportBuilder {
    node_id: Option<PeerId>,
    hub: Option<Arc<MemoryHub>>,

    // Track which role methods were called (conflicts detected at build())
    called_server_role: bool,
    called_client_role: bool,
}

impl TransportBuilder {
    /// Create a new transport builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node id.
    ///
    /// Required for the client role; defaults to [`DEFAULT_SERVER_ID`] for
    /// the server role.
    pub fn node_id(mut self, id: impl Into<PeerId>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Configure for the server role.
    pub fn server_role(mut self) -> Self {
        self.called_server_role = true;
        self
    }

    /// Configure for the client role.
    pub fn client_role(mut self) -> Self {
        self.called_client_role = true;
        self
    }

    /// Attach to `hub` instead of the process-global one.
    pub fn hub(mut self, hub: Arc<MemoryHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Build the transport (consumes self).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No role specified, or both roles specified
    /// - Client role without a node id
    /// - The node id is empty
    pub async fn build(self) -> Result<TransportPtr> {
        // ---
        let role = match (self.called_server_role, self.called_client_role) {
            (true, true) => {
                return Err(RpcError::ConfigConflict(
                    "cannot call both server_role() and client_role()".into(),
                ))
            }
            (true, false) => Role::Server,
            (false, true) => Role::Client,
            (false, false) => {
                return Err(RpcError::MissingConfig(
                    "role (server_role() or client_role())".into(),
                ))
            }
        };

        let node_id = match (self.node_id, role) {
            (Some(id), _) => id,
            (None, Role::Server) => PeerId::from(DEFAULT_SERVER_ID),
            (None, Role::Client) => return Err(RpcError::MissingConfig("node_id".into())),
        };

        if node_id.as_str().trim().is_empty() {
            return Err(RpcError::InvalidConfig("node_id must not be empty".into()));
        }

        let config = TransportConfig { node_id, role };

        match self.hub {
            Some(hub) => crate::create_memory_transport_with_hub(config, hub).await,
            None => crate::create_memory_transport(config).await,
        }
    }
}
