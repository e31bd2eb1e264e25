//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{Classify, ResilienceError};

/// Result of a single attempt handed to [`RetryHandler::run_attempts`].
#[derive(Debug)]
pub enum Attempt<E>
where
    E: std::error::Error + 'static,
{
    /// The call failed; the handler decides whether to retry.
    Failed(E),
    /// Stop immediately with this error.
    Abort(ResilienceError<E>),
}

/// Retry loop for one dependency class.
#[derive(Debug, Clone)]
pub struct RetryHandler {
    policy: RetryPolicy,
}

impl RetryHandler {
    /// Create a handler for the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deterministic backoff before attempt `attempt + 1`, without jitter.
    ///
    /// `base * exponential_base^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.policy.base_delay_ms as f64 * self.policy.exponential_base.powi(exponent);
        let capped = raw.min(self.policy.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retrying after `err` failed attempt `attempt`.
    ///
    /// Rate-limited failures wait the fixed rate-limit delay; everything else
    /// waits the jittered exponential backoff.
    pub fn delay_for<E: Classify>(&self, attempt: u32, err: &E) -> Duration {
        if err.retry_after().is_some() {
            return Duration::from_millis(self.policy.rate_limit_delay_ms);
        }
        let base = self.backoff(attempt).as_millis() as f64;
        let jitter = self.policy.jitter;
        if jitter <= 0.0 || base <= 0.0 {
            return Duration::from_millis(base as u64);
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        let jittered = (base * factor).min(self.policy.max_delay_ms as f64).max(0.0);
        Duration::from_millis(jittered as u64)
    }

    /// Run `op`, retrying transient failures.
    pub async fn run<T, E, F, Fut>(&self, dependency: &str, mut op: F) -> Result<T, ResilienceError<E>>
    where
        E: Classify + std::error::Error + 'static,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_attempts(dependency, |attempt| {
            let fut = op(attempt);
            async move { fut.await.map_err(Attempt::Failed) }
        })
        .await
    }

    /// Run `op` where each attempt may also abort the loop outright.
    ///
    /// Non-transient failures are returned as [`ResilienceError::Rejected`]
    /// after one attempt. Transient failures are retried until
    /// `max_attempts` is reached, then reported as
    /// [`ResilienceError::RetryExhausted`].
    pub async fn run_attempts<T, E, F, Fut>(
        &self,
        dependency: &str,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + std::error::Error + 'static,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(dependency, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(Attempt::Abort(err)) => return Err(err),
                Err(Attempt::Failed(err)) => {
                    if !err.is_transient() {
                        debug!(dependency, attempt, class = %err.class(), error = %err, "Not retrying");
                        return Err(ResilienceError::Rejected(err));
                    }
                    if attempt >= max_attempts {
                        warn!(dependency, attempts = attempt, error = %err, "Retries exhausted");
                        return Err(ResilienceError::RetryExhausted {
                            dependency: dependency.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let delay = self.delay_for(attempt, &err);
                    warn!(
                        dependency,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
