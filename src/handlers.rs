//! Handler registry.
//!
//! Maps RPC names to type-erased handler functions. Handlers receive an
//! [`RpcContext`] and their arguments decoded from the request's argument
//! array; tuples decode positionally, so `(i64, i64)` matches `[3, 7]`.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::target::CallKind;
use crate::{PeerId, RequestId, Result, RpcError};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Delivery context handed to every handler.
#[derive(Debug, Clone)]
pub struct RpcContext {
    /// Correlation id of the request being handled.
    pub request_id: RequestId,

    /// Peer that sent the request; replies go back to it.
    pub sender: PeerId,

    /// Name the request was addressed to.
    pub name: String,

    /// Whether the caller expects a value (`Call`) or only an ack (`Notify`).
    pub kind: CallKind,
}

// Handler trait for type-erased async functions
pub(crate) trait HandlerFn: Send + Sync {
    fn call(&self, ctx: RpcContext, args: Vec<Value>) -> BoxFuture<'static, Result<Value>>;
}

struct Handler<F, Args, Fut, R> {
    func: F,
    _phantom: PhantomData<fn(Args, R, Fut)>,
}

impl<F, Args, Fut, R> HandlerFn for Handler<F, Args, Fut, R>
where
    F: Fn(RpcContext, Args) -> Fut + Send + Sync + 'static,
    Args: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    fn call(&self, ctx: RpcContext, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        // ---
        let args: Args = match decode_args(args) {
            Ok(a) => a,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.func)(ctx, args);

        Box::pin(async move {
            let value = fut.await?;
            Ok(serde_json::to_value(value)?)
        })
    }
}

/// Decode an argument array into the handler's argument type.
///
/// An empty array also accepts `()` so zero-argument handlers need no
/// special casing.
fn decode_args<A: DeserializeOwned>(args: Vec<Value>) -> Result<A> {
    // ---
    if args.is_empty() {
        if let Ok(decoded) = serde_json::from_value(Value::Null) {
            return Ok(decoded);
        }
    }
    Ok(serde_json::from_value(Value::Array(args))?)
}

/// Wrap a typed async handler.
pub(crate) fn wrap_handler<F, Args, Fut, R>(func: F) -> Arc<dyn HandlerFn>
where
    F: Fn(RpcContext, Args) -> Fut + Send + Sync + 'static,
    Args: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    Arc::new(Handler {
        func,
        _phantom: PhantomData,
    })
}

/// Wrap a typed synchronous handler.
pub(crate) fn wrap_sync_handler<F, Args, R>(func: F) -> Arc<dyn HandlerFn>
where
    F: Fn(RpcContext, Args) -> Result<R> + Send + Sync + 'static,
    Args: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    wrap_handler(move |ctx, args| std::future::ready(func(ctx, args)))
}

/// Run a handler on its own task so a panic becomes a handler error
/// instead of taking the receive loop down.
pub(crate) async fn invoke(
    handler: Arc<dyn HandlerFn>,
    ctx: RpcContext,
    args: Vec<Value>,
) -> Result<Value> {
    // ---
    let task = tokio::spawn(async move { handler.call(ctx, args).await });

    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(RpcError::handler("handler panicked")),
        Err(_) => Err(RpcError::handler("handler cancelled")),
    }
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Name → handler map. Last write wins.
#[derive(Clone, Default)]
pub(crate) struct HandlerRegistry {
    handlers: Arc<Mutex<HashMap<String, Arc<dyn HandlerFn>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handler` under `name`. Returns true if it replaced one.
    pub fn insert(&self, name: &str, handler: Arc<dyn HandlerFn>) -> bool {
        lock_ignore_poison(&self.handlers)
            .insert(name.to_string(), handler)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HandlerFn>> {
        lock_ignore_poison(&self.handlers).get(name).cloned()
    }

    /// Remove the handler for `name`. Returns true if one existed.
    pub fn remove(&self, name: &str) -> bool {
        lock_ignore_poison(&self.handlers).remove(name).is_some()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.handlers).len()
    }
}
