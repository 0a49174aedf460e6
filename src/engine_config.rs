//! Engine configuration.
//!
//! Contains no transport-specific concepts; the engine's identity and role
//! are taken from the transport it is built on.

use std::time::Duration;

/// Default deadline for a `call` or `notify` to receive its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(7_500);

/// Hook invoked when a notify handler fails and the failure is swallowed.
pub type NotifyErrorHook = std::sync::Arc<dyn Fn(&crate::NotifyFailure) + Send + Sync>;

/// Engine tuning parameters.
#[derive(Clone)]
pub struct EngineConfig {
    // ---
    /// How long a request waits for its reply before failing with
    /// [`RpcError::Timeout`](crate::RpcError::Timeout).
    ///
    /// Default: 7.5 seconds
    pub request_timeout: Duration,

    /// Observer for notify handler failures. The caller of `notify` is
    /// still acknowledged; this is the only place such failures surface
    /// besides the log.
    pub notify_error_hook: Option<NotifyErrorHook>,
}

impl EngineConfig {
    /// Set the per-request deadline.
    ///
    /// # Example
    ///
    /// ```
    /// use evrpc::EngineConfig;
    /// use std::time::Duration;
    ///
    /// let config = EngineConfig::default().with_request_timeout(Duration::from_secs(2));
    /// assert_eq!(config.request_timeout, Duration::from_secs(2));
    /// ```
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Install a notify failure observer.
    pub fn with_notify_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&crate::NotifyFailure) + Send + Sync + 'static,
    {
        self.notify_error_hook = Some(std::sync::Arc::new(hook));
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            notify_error_hook: None,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("request_timeout", &self.request_timeout)
            .field("notify_error_hook", &self.notify_error_hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_defaults() {
        // ---
        let config = EngineConfig::default();
        assert_eq!(config.request_timeout, Duration::from_millis(7500));
        assert!(config.notify_error_hook.is_none());
    }

    #[test]
    fn test_hook_is_stored() {
        // ---
        let config = EngineConfig::default().with_notify_error_hook(|_failure| {});
        assert!(config.notify_error_hook.is_some());
        assert!(format!("{config:?}").contains("notify_error_hook: true"));
    }
}
