//! RPC engine builder.
//!
//! Fluent API for configuring an [`RpcEngine`] over a transport.

use crate::{EngineConfig, NotifyFailure, Result, RpcEngine, RpcError, TransportPtr};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating RPC engine instances.
///
/// The engine's role and identity come from the transport.
///
/// # Example
///
/// ```no_run
/// use evrpc::{RpcEngineBuilder, TransportBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> evrpc::Result<()> {
/// let transport = TransportBuilder::new().server_role().build().await?;
///
/// let server = RpcEngineBuilder::new(transport)
///     .request_timeout(Duration::from_secs(3))
///     .on_notify_error(|failure| {
///         eprintln!("notify '{}' failed: {}", failure.name, failure.message)
///     })
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcEngineBuilder {
    // ---
    transport: TransportPtr,
    config: EngineConfig,
}

impl RpcEngineBuilder {
    /// Create a new engine builder with default configuration.
    pub fn new(transport: TransportPtr) -> Self {
        // ---
        Self {
            transport,
            config: EngineConfig::default(),
        }
    }

    /// Set the per-request deadline.
    ///
    /// Default: 7.5s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Observe notify handler failures that are acknowledged anyway.
    pub fn on_notify_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NotifyFailure) + Send + Sync + 'static,
    {
        self.config.notify_error_hook = Some(Arc::new(hook));
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine (consumes self) and start its receive loops.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidConfig`] if the request timeout is zero
    /// - [`RpcError::Transport`] if the transport cannot subscribe
    pub async fn build(self) -> Result<RpcEngine> {
        // ---
        if self.config.request_timeout.is_zero() {
            return Err(RpcError::InvalidConfig(
                "request_timeout must be greater than zero".into(),
            ));
        }

        RpcEngine::new(self.transport, self.config).await
    }
}
