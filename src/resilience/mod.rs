//! Resilience layer: retry with backoff and per-dependency circuit breakers.
//!
//! Every outbound call to the reasoning service or a data source goes
//! through [`ResilienceExecutor::call`].

mod circuit_breaker;
mod executor;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSummary, CircuitState};
pub use executor::{DependencyClass, ResilienceExecutor};
pub use retry::{Attempt, RetryHandler};
