//! Retry plus per-dependency circuit breaking for outbound calls.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerSummary, CircuitState};
use super::retry::{Attempt, RetryHandler};
use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::error::{Classify, ResilienceError};
use crate::tracker::ResourceTracker;

fn lock(breaker: &Mutex<CircuitBreaker>) -> MutexGuard<'_, CircuitBreaker> {
    // A poisoned breaker still holds consistent counters
    breaker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Which retry policy applies to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyClass {
    /// The reasoning service.
    Reasoning,
    /// An external data source.
    DataSource,
}

/// Wraps outbound calls with retry and a circuit breaker per named
/// dependency.
///
/// Breakers are created lazily on first use and shared by every caller of the
/// same dependency name.
pub struct ResilienceExecutor {
    reasoning: RetryHandler,
    data_source: RetryHandler,
    breaker_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
    tracker: Arc<ResourceTracker>,
}

impl ResilienceExecutor {
    /// Create an executor recording into `tracker`.
    pub fn new(
        retry: RetryConfig,
        breaker_config: CircuitBreakerConfig,
        tracker: Arc<ResourceTracker>,
    ) -> Self {
        Self {
            reasoning: RetryHandler::new(retry.reasoning),
            data_source: RetryHandler::new(retry.data_source),
            breaker_config,
            breakers: RwLock::new(HashMap::new()),
            tracker,
        }
    }

    /// The tracker calls are recorded into.
    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    fn handler(&self, class: DependencyClass) -> &RetryHandler {
        match class {
            DependencyClass::Reasoning => &self.reasoning,
            DependencyClass::DataSource => &self.data_source,
        }
    }

    async fn breaker(&self, dependency: &str) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(breaker) = self.breakers.read().await.get(dependency) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write().await;
        Arc::clone(breakers.entry(dependency.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(CircuitBreaker::new(
                dependency,
                self.breaker_config.clone(),
            )))
        }))
    }

    /// Call `op` through the breaker for `dependency`, retrying transient
    /// failures per the policy of `class`.
    ///
    /// An open circuit fails fast with [`ResilienceError::CircuitOpen`]
    /// without invoking `op`. Only transient failures count toward opening
    /// the circuit.
    pub async fn call<T, E, F, Fut>(
        &self,
        dependency: &str,
        class: DependencyClass,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.breaker(dependency).await;
        let tracker = &self.tracker;

        self.handler(class)
            .run_attempts(dependency, |attempt| {
                let admitted = {
                    let mut cb = lock(&breaker);
                    if cb.can_execute() {
                        Ok(())
                    } else {
                        Err(cb.time_until_recovery())
                    }
                };
                let fut = admitted.map(|()| op());
                let breaker = Arc::clone(&breaker);

                async move {
                    let fut = match fut {
                        Ok(fut) => fut,
                        Err(retry_in) => {
                            tracker.record_rejection(dependency).await;
                            debug!(dependency, "Circuit open, failing fast");
                            return Err(Attempt::Abort(ResilienceError::CircuitOpen {
                                dependency: dependency.to_string(),
                                retry_in,
                            }));
                        }
                    };
                    if attempt > 1 {
                        tracker.record_retry(dependency).await;
                    }

                    let start = Instant::now();
                    let result = fut.await;
                    let latency = start.elapsed();

                    match result {
                        Ok(value) => {
                            lock(&breaker).record_success();
                            tracker.record_call(dependency, latency, true).await;
                            Ok(value)
                        }
                        Err(err) => {
                            if err.is_transient() {
                                let mut cb = lock(&breaker);
                                cb.record_failure();
                                if cb.is_open() {
                                    warn!(dependency, error = %err, "Circuit opened");
                                }
                            }
                            tracker.record_call(dependency, latency, false).await;
                            Err(Attempt::Failed(err))
                        }
                    }
                }
            })
            .await
    }

    /// Current breaker state for `dependency`, if it has been called.
    pub async fn circuit_state(&self, dependency: &str) -> Option<CircuitState> {
        let breaker = self.breakers.read().await.get(dependency).cloned()?;
        let state = lock(&breaker).state();
        Some(state)
    }

    /// Summaries of all breakers, keyed by dependency name.
    pub async fn circuit_summaries(&self) -> BTreeMap<String, CircuitBreakerSummary> {
        let breakers: Vec<(String, Arc<Mutex<CircuitBreaker>>)> = self
            .breakers
            .read()
            .await
            .iter()
            .map(|(name, cb)| (name.clone(), Arc::clone(cb)))
            .collect();

        let mut summaries = BTreeMap::new();
        for (name, breaker) in breakers {
            summaries.insert(name, lock(&breaker).summary());
        }
        summaries
    }

    /// Force the breaker for `dependency` back to closed. Returns its
    /// summary after the reset, or `None` if it has never been called.
    pub async fn reset_circuit(&self, dependency: &str) -> Option<CircuitBreakerSummary> {
        let breaker = self.breakers.read().await.get(dependency).cloned()?;
        let mut breaker = lock(&breaker);
        breaker.reset();
        Some(breaker.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::ConnectorError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(failure_threshold: u32) -> ResilienceExecutor {
        ResilienceExecutor::new(
            RetryConfig {
                reasoning: RetryPolicy::no_retry(),
                data_source: RetryPolicy::no_retry(),
            },
            CircuitBreakerConfig {
                failure_threshold,
                success_threshold: 1,
                recovery_timeout_ms: 60_000,
            },
            Arc::new(ResourceTracker::new()),
        )
    }

    fn unavailable() -> ConnectorError {
        ConnectorError::Api {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let exec = executor(2);
        let value: Result<u32, ResilienceError<ConnectorError>> = exec
            .call("worldbank", DependencyClass::DataSource, || async { Ok(7) })
            .await;
        assert_eq!(value.unwrap(), 7);
        assert_eq!(
            exec.circuit_state("worldbank").await,
            Some(CircuitState::Closed)
        );
        assert_eq!(exec.tracker().dependency("worldbank").await.successes, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_calling() {
        let exec = executor(2);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _: Result<(), _> = exec
                .call("worldbank", DependencyClass::DataSource, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(unavailable()) }
                })
                .await;
        }
        assert_eq!(exec.circuit_state("worldbank").await, Some(CircuitState::Open));

        let result: Result<(), _> = exec
            .call("worldbank", DependencyClass::DataSource, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(unavailable()) }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            exec.tracker().dependency("worldbank").await.circuit_rejections,
            1
        );
    }

    #[tokio::test]
    async fn test_permanent_failures_do_not_open_circuit() {
        let exec = executor(1);
        let result: Result<(), _> = exec
            .call("worldbank", DependencyClass::DataSource, || async {
                Err(ConnectorError::Api {
                    status: 404,
                    message: "missing".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Rejected(_))));
        assert_eq!(
            exec.circuit_state("worldbank").await,
            Some(CircuitState::Closed)
        );
    }

    #[tokio::test]
    async fn test_breakers_are_per_dependency() {
        let exec = executor(1);
        let _: Result<(), _> = exec
            .call("worldbank", DependencyClass::DataSource, || async {
                Err(unavailable())
            })
            .await;

        let ok: Result<u32, ResilienceError<ConnectorError>> = exec
            .call("census", DependencyClass::DataSource, || async { Ok(1) })
            .await;
        assert!(ok.is_ok());
        assert_eq!(exec.circuit_state("worldbank").await, Some(CircuitState::Open));
        assert_eq!(exec.circuit_state("census").await, Some(CircuitState::Closed));

        let summary = exec.reset_circuit("worldbank").await.unwrap();
        assert_eq!(summary.state, CircuitState::Closed);
        assert!(exec.reset_circuit("unknown").await.is_none());
        assert_eq!(
            exec.circuit_state("worldbank").await,
            Some(CircuitState::Closed)
        );
        assert_eq!(exec.circuit_summaries().await.len(), 2);
    }
}
