//! Retry with exponential backoff and jitter, guarded by circuit breakers.
//!
//! # Example
//!
//! ```
//! use roster_resilience::{RetryPolicy, backoff_delay};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! // third attempt without jitter: 1s * 2^2
//! assert_eq!(
//!     backoff_delay(2, policy.base_delay, policy.max_delay, 1.0),
//!     Duration::from_secs(4)
//! );
//! ```
use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{CircuitBreakerRegistry, RequestError, Scope};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Delays are multiplied by a random factor in `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.15,
        }
    }
}

impl RetryPolicy {
    /// Random multiplier applied to the exponential delay.
    pub fn jitter_factor(&self) -> f64 {
        if self.jitter <= 0.0 {
            return 1.0;
        }
        rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter))
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (zero based).
    pub fn delay_for(&self, attempt: u32, base_delay: Duration) -> Duration {
        backoff_delay(attempt, base_delay, self.max_delay, self.jitter_factor())
    }
}

/// `min(base * 2^attempt * jitter, max)`.
pub fn backoff_delay(
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter: f64,
) -> Duration {
    let exponent = attempt.min(31) as i32;
    let millis = base.as_millis() as f64 * 2f64.powi(exponent) * jitter;
    let capped = millis.min(max.as_millis() as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

/// Runs operations with bounded retries, consulting the breakers before each
/// attempt and feeding them the outcome.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    breakers: Arc<CircuitBreakerRegistry>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, policy: RetryPolicy) -> Self {
        Self { breakers, policy }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn ensure_closed(&self, scope: &str) -> Result<(), RequestError> {
        if self.breakers.is_open(&Scope::Global) {
            return Err(RequestError::CircuitOpen("global".to_string()));
        }
        if self.breakers.is_open(&Scope::endpoint(scope)) {
            return Err(RequestError::CircuitOpen(scope.to_string()));
        }
        Ok(())
    }

    /// [`Self::execute_with_retry`] with the executor's own policy.
    pub async fn execute<F, Fut, T>(
        &self,
        operation: F,
        scope: &str,
    ) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        self.execute_with_retry(
            operation,
            scope,
            self.policy.max_retries,
            self.policy.base_delay,
        )
        .await
    }

    /// Attempt `operation` up to `1 + max_retries` times.
    ///
    /// Client errors and local rejections are returned at once. Network,
    /// server and timeout failures are recorded against `scope` and retried
    /// after an exponential delay.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        mut operation: F,
        scope: &str,
        max_retries: u32,
        base_delay: Duration,
    ) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            self.ensure_closed(scope)?;

            match operation().await {
                Ok(value) => {
                    self.breakers.record_success(scope);
                    if attempt > 0 {
                        info!(scope, attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(scope, error = %err, "operation failed, not retryable");
                    return Err(err);
                }
                Err(err) => {
                    self.breakers.record_failure(scope);

                    if attempt >= max_retries {
                        warn!(
                            scope,
                            attempts = attempt + 1,
                            error = %err,
                            "operation failed, retries exhausted"
                        );
                        return Err(err);
                    }

                    let delay = self.policy.delay_for(attempt, base_delay);
                    warn!(
                        scope,
                        attempt = attempt + 1,
                        max_retries,
                        error = %err,
                        ?delay,
                        "operation failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
