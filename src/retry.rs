//! Opt-in retry decorator.
//!
//! The engine itself never retries. [`Retrying`] wraps an engine and
//! re-issues a `call` when it times out, with exponential backoff. Each
//! attempt is a new request with a fresh request id, so a late reply to an
//! earlier attempt is dropped by the correlation registry.
//!
//! # Retry Strategy
//!
//! - Only retries [`RpcError::Timeout`]; remote and validation errors are
//!   returned immediately
//! - Exponential backoff with ±25% jitter
//! - Delay capped at `max_delay`
//!
//! Retrying is only safe for handlers that tolerate running more than once:
//! a timed-out attempt may still have run remotely.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::sleep;

use crate::{log_debug, Result, RpcEngine, RpcError, Target};

/// Retry configuration with exponential backoff.
///
/// # Example
///
/// ```
/// use evrpc::RetryConfig;
/// use std::time::Duration;
///
/// let retry_config = RetryConfig {
///     max_attempts: 5,
///     multiplier: 2.0,
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(2),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 = no retries).
    pub max_attempts: u32,

    /// Backoff multiplier applied to the delay after each retry.
    pub multiplier: f32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// - `max_attempts`: 3
    /// - `multiplier`: 2.0
    /// - `initial_delay`: 100ms
    /// - `max_delay`: 5s
    fn default() -> Self {
        // ---
        Self {
            max_attempts: 3,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Retry an async operation while it times out.
///
/// Executes `operation` and, if it fails with [`RpcError::Timeout`], waits
/// and runs it again, up to `max_attempts` more times. Any other error is
/// returned immediately.
pub(crate) async fn retry_on_timeout<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // ---
    let mut attempt = 0;
    let mut current_delay = config.initial_delay;

    loop {
        match operation().await {
            Err(err) if err.is_timeout() => {
                attempt += 1;

                if attempt > config.max_attempts {
                    log_debug!(
                        "retry exhausted after {} attempts, last error: {err}",
                        config.max_attempts
                    );
                    return Err(err);
                }

                let jittered_delay = apply_jitter(current_delay);

                log_debug!(
                    "retry attempt {attempt}/{}, waiting {jittered_delay:?} ({err})",
                    config.max_attempts
                );

                sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(current_delay.as_secs_f64() * config.multiplier as f64);
                current_delay = next_delay.min(config.max_delay);
            }
            other => return other,
        }
    }
}

/// Apply ±25% jitter: `delay * (0.75 + random(0.0..0.5))`.
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let hash = RandomState::new().hash_one(std::time::SystemTime::now());
    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier)
}

/// Retry decorator around [`RpcEngine::call`].
///
/// ```no_run
/// # use evrpc::{Retrying, RetryConfig, RpcEngine};
/// # async fn example(engine: RpcEngine) -> evrpc::Result<()> {
/// let inventory: Vec<String> = Retrying::new(engine, RetryConfig::default())
///     .call("inventory:list", None, ())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Retrying {
    engine: RpcEngine,
    config: RetryConfig,
}

impl Retrying {
    /// Wrap `engine` with `config`.
    pub fn new(engine: RpcEngine, config: RetryConfig) -> Self {
        Self { engine, config }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &RpcEngine {
        &self.engine
    }

    /// [`RpcEngine::call`], re-issued on timeout.
    ///
    /// # Errors
    ///
    /// The last [`RpcError::Timeout`] once retries are exhausted, or the
    /// first non-timeout error.
    pub async fn call<T, A>(&self, name: &str, target: Option<Target>, args: A) -> Result<T>
    where
        T: DeserializeOwned,
        A: Serialize,
    {
        // Encode once so every attempt sends identical arguments.
        let args = serde_json::to_value(&args).map_err(RpcError::from)?;

        retry_on_timeout(&self.config, || {
            let target = target.clone();
            let args = args.clone();
            async move { self.engine.call(name, target, args).await }
        })
        .await
    }
}
