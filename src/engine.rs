//! RPC engine.
//!
//! Builds request/response (`call`) and notify/acknowledge (`notify`)
//! semantics on top of a fire-and-forget [`EventTransport`]. One engine
//! owns one correlation registry and one handler registry.
//!
//! # Sending
//!
//! `call`/`notify` validate the name, resolve the target, register the
//! pending request with its deadline and only then emit on the request
//! channel. The returned future resolves when the matching reply arrives or
//! the deadline fires, whichever is first.
//!
//! # Receiving
//!
//! Two receive loops run per engine. The request loop looks up the handler,
//! runs it on its own task and sends exactly one reply (`result-ok`,
//! `result-error` or `ack`). The response loop hands replies to the
//! correlation registry; unmatched replies are dropped.
//!
//! # Notify failures
//!
//! A notify is always acknowledged once handled, even if the handler fails
//! or none is registered. The failure is logged and, after the ack has been
//! sent, passed to the configured [`NotifyErrorHook`]; the caller never
//! sees it. A panicking hook is logged and otherwise ignored.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::handlers::{self, HandlerRegistry, RpcContext};
use crate::pending::CorrelationRegistry;
use crate::target::{resolver_for, CallKind, Target, TargetResolver};
use crate::transport::{self, TransportConsumer};
use crate::{
    // ---
    log_debug,
    log_error,
    log_warn,
    Channel,
    ConcreteTarget,
    EngineConfig,
    Envelope,
    ErrorKind,
    NotifyErrorHook,
    PeerId,
    RemoteError,
    RequestId,
    Result,
    Role,
    RpcError,
    TransportPtr,
    WireMessage,
};

/// A notify handler failure that was acknowledged to the caller anyway.
#[derive(Debug, Clone)]
pub struct NotifyFailure {
    /// Name the notify was addressed to.
    pub name: String,
    /// Correlation id of the notify.
    pub request_id: RequestId,
    /// Peer that sent the notify.
    pub sender: PeerId,
    /// Flattened failure message.
    pub message: String,
    /// Failure classification.
    pub kind: ErrorKind,
}

type HookSlot = Arc<Mutex<Option<NotifyErrorHook>>>;

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Correlating RPC engine over an event transport.
///
/// Cheap to clone (internally `Arc`-backed). Every clone shares the same
/// registries and receive loops. Dropping the last clone without
/// [`shutdown`](Self::shutdown) rejects pending requests and closes the
/// transport on a background task.
///
/// # Example
///
/// ```no_run
/// use evrpc::{MemoryHub, RpcEngine, Target, TransportBuilder};
///
/// # async fn example() -> evrpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let server = RpcEngine::builder(
///     TransportBuilder::new().server_role().hub(hub.clone()).build().await?,
/// )
/// .build()
/// .await?;
///
/// let player = RpcEngine::builder(
///     TransportBuilder::new().node_id(1u32).client_role().hub(hub).build().await?,
/// )
/// .build()
/// .await?;
///
/// server.on("add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) });
///
/// let sum: i64 = player.call("add", None, (3, 7)).await?;
/// assert_eq!(sum, 10);
///
/// player.on("hud:flash", |_ctx, (text,): (String,)| async move {
///     println!("{text}");
///     Ok(())
/// });
/// server.notify("hud:flash", Some(Target::Broadcast), ("round over",)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcEngine {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    role: Role,
    resolver: Arc<dyn TargetResolver>,
    request_timeout: Duration,

    pending: CorrelationRegistry,
    handlers: HandlerRegistry,
    notify_error_hook: HookSlot,

    closed: AtomicBool,
    rx_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // ---
        for task in lock_ignore_poison(&self.rx_tasks).drain(..) {
            task.abort();
        }
        self.pending.fail_all(|| RpcError::Closed);

        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropped without shutdown(): detach the endpoint in the background.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let transport = self.transport.clone();
                runtime.spawn(async move {
                    if let Err(_err) = transport.close().await {
                        log_warn!("{}: close on drop failed: {_err}", transport.node_id());
                    }
                });
            }
            Err(_) => {
                log_warn!(
                    "{}: rpc engine dropped outside a runtime, transport left open",
                    self.transport.node_id()
                );
            }
        }
    }
}

impl RpcEngine {
    /// Start configuring an engine over `transport`.
    pub fn builder(transport: TransportPtr) -> crate::RpcEngineBuilder {
        crate::RpcEngineBuilder::new(transport)
    }

    /// Create an engine and start its receive loops.
    ///
    /// Both channel subscriptions are established before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`] if a subscription cannot be made.
    pub async fn new(transport: TransportPtr, config: EngineConfig) -> Result<Self> {
        // ---
        let role = transport.role();
        let resolver: Arc<dyn TargetResolver> = Arc::from(resolver_for(role));

        let pending = CorrelationRegistry::new();
        let handlers = HandlerRegistry::new();
        let notify_error_hook: HookSlot = Arc::new(Mutex::new(config.notify_error_hook));

        let request_task = transport::run(
            transport.clone(),
            RequestConsumer {
                transport: transport.clone(),
                resolver: resolver.clone(),
                handlers: handlers.clone(),
                notify_error_hook: notify_error_hook.clone(),
            },
        )
        .await?;

        let response_task = match transport::run(
            transport.clone(),
            ResponseConsumer {
                pending: pending.clone(),
            },
        )
        .await
        {
            Ok(task) => task,
            Err(e) => {
                request_task.abort();
                return Err(e);
            }
        };

        log_debug!(
            "{}: rpc engine started as {role}, timeout {:?}",
            transport.node_id(),
            config.request_timeout
        );

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                role,
                resolver,
                request_timeout: config.request_timeout,
                pending,
                handlers,
                notify_error_hook,
                closed: AtomicBool::new(false),
                rx_tasks: Mutex::new(vec![request_task, response_task]),
            }),
        })
    }

    /// Role this engine plays, taken from its transport.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Identity of this engine on the transport.
    pub fn node_id(&self) -> &PeerId {
        self.inner.transport.node_id()
    }

    /// Number of sent requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Register an async handler for `name`.
    ///
    /// Arguments are decoded from the request's argument array into `Args`
    /// (use a tuple for positional arguments). A second registration under
    /// the same name replaces the first.
    pub fn on<F, Args, Fut, R>(&self, name: &str, handler: F)
    where
        F: Fn(RpcContext, Args) -> Fut + Send + Sync + 'static,
        Args: DeserializeOwned + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.register(name, handlers::wrap_handler(handler));
    }

    /// Register a synchronous handler for `name`.
    pub fn on_sync<F, Args, R>(&self, name: &str, handler: F)
    where
        F: Fn(RpcContext, Args) -> Result<R> + Send + Sync + 'static,
        Args: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.register(name, handlers::wrap_sync_handler(handler));
    }

    fn register(&self, name: &str, handler: Arc<dyn handlers::HandlerFn>) {
        // ---
        if self.inner.handlers.insert(name, handler) {
            log_warn!(
                "{}: handler for '{name}' replaced by a new registration",
                self.node_id()
            );
        }
    }

    /// Remove the handler for `name`. Returns true if one was registered.
    pub fn off(&self, name: &str) -> bool {
        self.inner.handlers.remove(name)
    }

    /// Replace the notify failure observer.
    pub fn set_notify_error_hook<F>(&self, hook: F)
    where
        F: Fn(&NotifyFailure) + Send + Sync + 'static,
    {
        *lock_ignore_poison(&self.inner.notify_error_hook) = Some(Arc::new(hook));
    }

    /// Call `name` and wait for its result.
    ///
    /// `target` is required in the server role and ignored in the client
    /// role. `args` must serialize to a JSON array (tuples do); `()` sends
    /// no arguments and any other value is sent as the single argument.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidName`], [`RpcError::MissingTarget`],
    ///   [`RpcError::InvalidTarget`], [`RpcError::BroadcastCallNotSupported`]
    ///   before anything is sent
    /// - [`RpcError::Timeout`] if no reply arrives within the deadline
    /// - [`RpcError::Remote`] if the remote handler failed or is missing
    /// - [`RpcError::Serialization`] if the result does not decode into `T`
    pub async fn call<T>(
        &self,
        name: &str,
        target: Option<Target>,
        args: impl Serialize,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.call_with_timeout(name, target, args, self.inner.request_timeout)
            .await
    }

    /// [`call`](Self::call) with a deadline other than the configured one.
    pub async fn call_with_timeout<T>(
        &self,
        name: &str,
        target: Option<Target>,
        args: impl Serialize,
        timeout: Duration,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value = self
            .send_request(CallKind::Call, name, target, args, timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Notify `name` and wait for delivery to be acknowledged.
    ///
    /// Resolves once the first acknowledgement arrives. Never fails because
    /// of the remote handler; only validation errors and
    /// [`RpcError::Timeout`] are reported.
    pub async fn notify(
        &self,
        name: &str,
        target: Option<Target>,
        args: impl Serialize,
    ) -> Result<()> {
        self.notify_with_timeout(name, target, args, self.inner.request_timeout)
            .await
    }

    /// [`notify`](Self::notify) with a deadline other than the configured one.
    pub async fn notify_with_timeout(
        &self,
        name: &str,
        target: Option<Target>,
        args: impl Serialize,
        timeout: Duration,
    ) -> Result<()> {
        self.send_request(CallKind::Notify, name, target, args, timeout)
            .await
            .map(|_| ())
    }

    async fn send_request(
        &self,
        kind: CallKind,
        name: &str,
        target: Option<Target>,
        args: impl Serialize,
        timeout: Duration,
    ) -> Result<Value> {
        // ---
        if name.is_empty() {
            return Err(RpcError::InvalidName);
        }
        let target = self.inner.resolver.resolve(name, kind, target)?;

        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }

        let args = to_args(args)?;
        let request_id = RequestId::generate();

        let message = match kind {
            CallKind::Call => WireMessage::Call {
                request_id: request_id.clone(),
                name: name.to_string(),
                args,
            },
            CallKind::Notify => WireMessage::Notify {
                request_id: request_id.clone(),
                name: name.to_string(),
                args,
            },
        };
        let payload = message.encode()?;

        // Bookkeeping strictly before emission.
        let mut rx = self
            .inner
            .pending
            .register(request_id.clone(), name, kind, timeout);

        log_debug!(
            "{}: {kind} '{name}' -> {target:?} (request id {request_id})",
            self.node_id()
        );

        let emit = self
            .inner
            .transport
            .emit(Channel::Request, payload, target);

        // The deadline is armed already; a stuck emit must not outlive it.
        tokio::select! {
            emitted = emit => {
                if let Err(e) = emitted {
                    log_error!("{}: failed to emit {kind} '{name}': {e}", self.node_id());
                    self.inner.pending.complete(&request_id, Err(e));
                }
            }
            outcome = &mut rx => return flatten_outcome(outcome),
        }

        flatten_outcome(rx.await)
    }

    /// Stop the engine.
    ///
    /// Stops both receive loops, rejects every pending request with
    /// [`RpcError::Closed`] and closes the transport.
    pub async fn shutdown(&self) -> Result<()> {
        // ---
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for task in lock_ignore_poison(&self.inner.rx_tasks).drain(..) {
            task.abort();
        }

        let _failed = self.inner.pending.fail_all(|| RpcError::Closed);
        log_debug!(
            "{}: rpc engine shut down, {_failed} pending request(s) rejected",
            self.node_id()
        );

        self.inner.transport.close().await
    }
}

fn flatten_outcome(
    received: std::result::Result<Result<Value>, tokio::sync::oneshot::error::RecvError>,
) -> Result<Value> {
    received.unwrap_or(Err(RpcError::Closed))
}

/// Normalize call arguments into the wire argument array.
fn to_args(args: impl Serialize) -> Result<Vec<Value>> {
    match serde_json::to_value(args)? {
        Value::Array(values) => Ok(values),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

// --- receive side

struct RequestConsumer {
    transport: TransportPtr,
    resolver: Arc<dyn TargetResolver>,
    handlers: HandlerRegistry,
    notify_error_hook: HookSlot,
}

#[async_trait::async_trait]
impl TransportConsumer for RequestConsumer {
    fn channel(&self) -> Channel {
        Channel::Request
    }

    async fn handle_envelope(&self, env: Envelope) -> Result<()> {
        // ---
        let message = WireMessage::decode(&env.payload)?;

        let (kind, request_id, name, args) = match message {
            WireMessage::Call {
                request_id,
                name,
                args,
            } => (CallKind::Call, request_id, name, args),
            WireMessage::Notify {
                request_id,
                name,
                args,
            } => (CallKind::Notify, request_id, name, args),
            other => {
                return Err(RpcError::Transport(format!(
                    "reply {} from {} arrived on the request channel",
                    other.request_id(),
                    env.sender
                )));
            }
        };

        let reply_to = self.resolver.reply_target(&env.sender);

        let Some(handler) = self.handlers.get(&name) else {
            let reply = match kind {
                CallKind::Call => {
                    log_debug!("no handler registered for '{name}' (call from {})", env.sender);
                    WireMessage::ResultError {
                        request_id,
                        message: format!("no handler registered for '{name}'"),
                        kind: Some(ErrorKind::NoHandler),
                    }
                }
                CallKind::Notify => {
                    log_debug!(
                        "no handler registered for '{name}' (notify from {}), acking",
                        env.sender
                    );
                    WireMessage::Ack { request_id }
                }
            };
            return send_reply(&self.transport, reply, reply_to).await;
        };

        let ctx = RpcContext {
            request_id: request_id.clone(),
            sender: env.sender.clone(),
            name: name.clone(),
            kind,
        };

        let transport = self.transport.clone();
        let hook = self.notify_error_hook.clone();

        // Handlers run off the receive loop so other requests and replies
        // keep flowing while they await.
        tokio::spawn(async move {
            // ---
            let result = handlers::invoke(handler, ctx, args).await;
            let mut failure = None;

            let reply = match (kind, result) {
                (CallKind::Call, Ok(value)) => WireMessage::ResultOk { request_id, value },
                (CallKind::Call, Err(e)) => {
                    let (message, kind) = e.into_wire_parts();
                    log_debug!("call '{name}' from {} failed: {message}", env.sender);
                    WireMessage::ResultError {
                        request_id,
                        message,
                        kind: Some(kind),
                    }
                }
                (CallKind::Notify, Ok(_)) => WireMessage::Ack { request_id },
                (CallKind::Notify, Err(e)) => {
                    let (message, kind) = e.into_wire_parts();
                    log_warn!(
                        "notify '{name}' from {} failed, acknowledging anyway: {message}",
                        env.sender
                    );

                    failure = Some(NotifyFailure {
                        name,
                        request_id: request_id.clone(),
                        sender: env.sender,
                        message,
                        kind,
                    });
                    WireMessage::Ack { request_id }
                }
            };

            if let Err(_err) = send_reply(&transport, reply, reply_to).await {
                log_error!("failed to send reply: {_err}");
            }

            // Observed only after the ack is out.
            if let Some(failure) = failure {
                report_notify_failure(&hook, &failure);
            }
        });

        Ok(())
    }
}

fn report_notify_failure(hook: &HookSlot, failure: &NotifyFailure) {
    // ---
    let Some(hook) = lock_ignore_poison(hook).clone() else {
        return;
    };

    if std::panic::catch_unwind(AssertUnwindSafe(|| hook(failure))).is_err() {
        log_error!(
            "notify error hook panicked while reporting '{}' (request id {})",
            failure.name,
            failure.request_id
        );
    }
}

async fn send_reply(
    transport: &TransportPtr,
    reply: WireMessage,
    to: ConcreteTarget,
) -> Result<()> {
    let payload = reply.encode()?;
    transport.emit(Channel::Response, payload, to).await
}

struct ResponseConsumer {
    pending: CorrelationRegistry,
}

#[async_trait::async_trait]
impl TransportConsumer for ResponseConsumer {
    fn channel(&self) -> Channel {
        Channel::Response
    }

    async fn handle_envelope(&self, env: Envelope) -> Result<()> {
        // ---
        let message = WireMessage::decode(&env.payload)?;

        let (request_id, outcome) = match message {
            WireMessage::ResultOk { request_id, value } => (request_id, Ok(value)),
            WireMessage::ResultError {
                request_id,
                message,
                kind,
            } => (request_id, Err(RpcError::Remote(RemoteError { message, kind }))),
            WireMessage::Ack { request_id } => (request_id, Ok(Value::Null)),
            other => {
                return Err(RpcError::Transport(format!(
                    "request {} from {} arrived on the response channel",
                    other.request_id(),
                    env.sender
                )));
            }
        };

        if !self.pending.complete(&request_id, outcome) {
            log_debug!(
                "dropping unmatched reply from {} (request id {request_id})",
                env.sender
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{SubscriptionHandle, TransportBase};
    use bytes::Bytes;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// A transport whose emit never completes.
    struct HangingTransport {
        base: TransportBase,
        inboxes: Mutex<Vec<mpsc::Sender<Envelope>>>,
    }

    #[async_trait::async_trait]
    impl crate::EventTransport for HangingTransport {
        fn base(&self) -> &TransportBase {
            &self.base
        }

        async fn emit(&self, _: Channel, _: Bytes, _: ConcreteTarget) -> Result<()> {
            std::future::pending().await
        }

        async fn subscribe(&self, _channel: Channel) -> Result<SubscriptionHandle> {
            let (tx, rx) = mpsc::channel(1);
            lock_ignore_poison(&self.inboxes).push(tx);
            Ok(SubscriptionHandle { inbox: rx })
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_while_emit_hangs() {
        // ---
        let transport: TransportPtr = Arc::new(HangingTransport {
            base: TransportBase {
                node_id: PeerId::from(1u32),
                role: Role::Client,
            },
            inboxes: Mutex::new(Vec::new()),
        });

        let timeout = Duration::from_millis(300);
        let config = EngineConfig::default().with_request_timeout(timeout);
        let engine = RpcEngine::new(transport, config).await.unwrap();

        let started = tokio::time::Instant::now();
        let err = engine.notify("ping", None, ()).await.unwrap_err();

        assert!(err.is_timeout());
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout && elapsed < timeout + Duration::from_millis(10));
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_to_args() {
        // ---
        assert_eq!(to_args((3, 7)).unwrap(), vec![json!(3), json!(7)]);
        assert_eq!(to_args(()).unwrap(), Vec::<Value>::new());
        assert_eq!(to_args("solo").unwrap(), vec![json!("solo")]);
        assert_eq!(to_args(vec![1, 2]).unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(to_args((json!({"a": 1}),)).unwrap(), vec![json!({"a": 1})]);
    }
}
