//! Retrying acquisition on top of single-shot node selection.

use std::time::Duration;
use tidepool_config::PoolConfig;
use tracing::{debug, warn};

use crate::connection::PooledConnection;
use crate::context::AcquireContext;
use crate::errors::PoolError;
use crate::manager::PoolManager;
use crate::node::Route;

/// How many times to retry a failed acquisition and how long to wait
/// between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

impl PoolManager {
    /// Acquire for `route` using the pool's configured retry policy.
    pub async fn get_connection_with_retry(
        &self,
        route: Route,
        cx: &AcquireContext,
    ) -> Result<PooledConnection, PoolError> {
        self.acquire_with_policy(route, cx, RetryPolicy::from_config(self.config()))
            .await
    }

    /// Acquire for `route`, retrying retryable failures under `policy`.
    ///
    /// Only health-driven failures are retried. The wait between attempts
    /// ends early when `cx` is cancelled or reaches its deadline.
    pub async fn acquire_with_policy(
        &self,
        route: Route,
        cx: &AcquireContext,
        policy: RetryPolicy,
    ) -> Result<PooledConnection, PoolError> {
        let mut attempt = 0u32;
        loop {
            match self.acquire(route, cx) {
                Ok(conn) => {
                    if attempt > 0 {
                        debug!(route = %route, attempt = attempt, "Acquired after retry");
                    }
                    return Ok(conn);
                }
                Err(e) if e.is_retryable() && attempt < policy.attempts => {
                    attempt += 1;
                    debug!(
                        route = %route,
                        attempt = attempt,
                        max_attempts = policy.attempts,
                        error = %e,
                        "Acquisition failed, retrying"
                    );
                    cx.sleep(policy.interval).await?;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            route = %route,
                            attempts = attempt + 1,
                            error = %e,
                            "Acquisition failed after retries"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}
