//! Transport execution runner.
//!
//! Glue between an [`EventTransport`](crate::EventTransport) and the
//! engine's two receive paths (requests and replies).
//!
//! The runner is responsible for:
//! - subscribing to the consumer's channel
//! - driving a receive loop over the subscription inbox
//! - dispatching received [`Envelope`]s to the consumer
//! - consolidating logging for consumer failures
//!
//! It does **not** define RPC semantics, timeouts or correlation.
//!
//! ## Error handling
//!
//! Errors returned by [`TransportConsumer::handle_envelope`] are logged and
//! do not terminate the loop; one undecodable message must not take the
//! engine down.
//!
//! ## Lifecycle
//!
//! The subscription is established before [`run`] returns, so anything
//! emitted to this endpoint afterwards is seen by the loop. The loop exits
//! when the transport closes, the subscription is dropped, or the returned
//! task is aborted.

use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_warn,
    Channel,
    Envelope,
    Result,
    TransportPtr,
};

/// A consumer of transport-delivered envelopes.
///
/// Implementations should assume envelopes may arrive out of order across
/// senders and may be duplicated.
#[async_trait::async_trait]
pub(crate) trait TransportConsumer: Send + Sync {
    /// Channel this consumer listens on.
    fn channel(&self) -> Channel;

    /// Handle a single incoming envelope.
    async fn handle_envelope(&self, env: Envelope) -> Result<()>;
}

/// Subscribe `consumer` to its channel and spawn the receive loop.
pub(crate) async fn run<T>(transport: TransportPtr, consumer: T) -> Result<JoinHandle<()>>
where
    T: TransportConsumer + 'static,
{
    // ---
    let channel = consumer.channel();
    let mut handle = transport.subscribe(channel).await?;
    let node_id = transport.node_id().clone();

    let join = tokio::spawn(async move {
        // ---
        log_debug!("{node_id}: receive loop started for {}", channel.event_name());

        while let Some(env) = handle.inbox.recv().await {
            if let Err(_err) = consumer.handle_envelope(env).await {
                log_warn!("{node_id}: {} consumer error: {_err}", channel.event_name());
            }
        }

        log_debug!("{node_id}: receive loop stopped for {}", channel.event_name());
    });

    Ok(join)
}
