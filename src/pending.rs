//! Correlation registry.
//!
//! Tracks requests that have been sent and are waiting for a reply. Each
//! entry owns a deadline timer; whichever of {matching reply, deadline}
//! happens first removes the entry and resolves it. Removal always
//! happens before resolution, so an entry is resolved at most once and a
//! late or duplicated reply finds nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::target::CallKind;
use crate::{log_debug, RequestId, Result, RpcError};

/// What a pending request resolves to: the reply value (or `null` for an
/// ack) or the error that ended it.
pub(crate) type Outcome = Result<Value>;

struct PendingRequest {
    // ---
    name: String,
    kind: CallKind,
    reply: oneshot::Sender<Outcome>,
    deadline: JoinHandle<()>,
}

type PendingMap = HashMap<RequestId, PendingRequest>;

/// Acquire a mutex guard, ignoring poisoning.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Map of request id to pending continuation. Cheap to clone.
#[derive(Clone, Default)]
pub(crate) struct CorrelationRegistry {
    inner: Arc<Mutex<PendingMap>>,
}

impl CorrelationRegistry {
    // ---

    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and arm its deadline.
    ///
    /// Returns a receiver resolved by [`complete`](Self::complete),
    /// the deadline, or [`fail_all`](Self::fail_all).
    pub fn register(
        &self,
        request_id: RequestId,
        name: &str,
        kind: CallKind,
        timeout: Duration,
    ) -> oneshot::Receiver<Outcome> {
        // ---
        let (tx, rx) = oneshot::channel();

        // The timer is spawned under the lock: even a zero timeout cannot
        // observe the map before the entry exists.
        let mut pending = lock_ignore_poison(&self.inner);

        let weak: Weak<Mutex<PendingMap>> = Arc::downgrade(&self.inner);
        let timer_id = request_id.clone();
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                CorrelationRegistry { inner }.expire(&timer_id);
            }
        });

        let previous = pending.insert(
            request_id,
            PendingRequest {
                name: name.to_string(),
                kind,
                reply: tx,
                deadline,
            },
        );

        if let Some(previous) = previous {
            // Request ids are never reused; keep the newer entry regardless.
            previous.deadline.abort();
        }

        rx
    }

    /// Resolve a pending request with `outcome`.
    ///
    /// Returns false if no entry exists (already resolved, timed out, or
    /// never sent by us); the outcome is then dropped.
    pub fn complete(&self, request_id: &RequestId, outcome: Outcome) -> bool {
        // ---
        let entry = lock_ignore_poison(&self.inner).remove(request_id);

        let Some(entry) = entry else {
            return false;
        };

        entry.deadline.abort();

        if entry.reply.send(outcome).is_err() {
            log_debug!(
                "{} '{}' resolved after caller went away (request id {request_id})",
                entry.kind,
                entry.name
            );
        }
        true
    }

    /// Deadline path: remove the entry and reject it with a timeout.
    pub fn expire(&self, request_id: &RequestId) -> bool {
        // ---
        let entry = lock_ignore_poison(&self.inner).remove(request_id);

        let Some(entry) = entry else {
            return false;
        };

        log_debug!(
            "{} '{}' timed out (request id {request_id})",
            entry.kind,
            entry.name
        );

        let _ = entry.reply.send(Err(RpcError::Timeout {
            name: entry.name,
            request_id: request_id.to_string(),
        }));
        true
    }

    /// Reject every pending request with the error produced by `make_err`.
    pub fn fail_all(&self, make_err: impl Fn() -> RpcError) -> usize {
        // ---
        let drained: Vec<PendingRequest> = lock_ignore_poison(&self.inner)
            .drain()
            .map(|(_, entry)| entry)
            .collect();

        let count = drained.len();
        for entry in drained {
            entry.deadline.abort();
            let _ = entry.reply.send(Err(make_err()));
        }
        count
    }

    /// Whether `request_id` is still waiting for a reply.
    #[cfg(test)]
    pub fn contains(&self, request_id: &RequestId) -> bool {
        lock_ignore_poison(&self.inner).contains_key(request_id)
    }

    /// Number of requests waiting for a reply.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.inner).len()
    }
}
