//! Circuit breaker guarding one named dependency.
//!
//! The circuit breaker stops calling a dependency after repeated transient
//! failures and probes it again once a recovery timeout has elapsed.
//!
//! # States
//!
//! - **Closed**: Normal operation, calls are allowed
//! - **Open**: Calls fail fast after too many consecutive failures
//! - **Half-Open**: Testing recovery, calls are allowed until the next failure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls allowed
    Closed,
    /// Failing fast - too many failures
    Open,
    /// Testing recovery
    HalfOpen,
}

impl CircuitState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Circuit breaker for a single dependency.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Dependency name, for logging
    name: String,

    /// Current state
    state: CircuitState,

    /// Number of consecutive failures
    consecutive_failures: u32,

    /// Number of consecutive successes
    consecutive_successes: u32,

    /// Total failures since creation
    total_failures: u32,

    /// Total successes since creation
    total_successes: u32,

    /// When the circuit last opened
    opened_at: Option<Instant>,

    /// Time of last state change
    last_state_change: DateTime<Utc>,

    /// Configuration
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_failures: 0,
            total_successes: 0,
            opened_at: None,
            last_state_change: Utc::now(),
            config,
        }
    }

    /// Check if a call can be executed.
    ///
    /// An open circuit moves to half-open here once the recovery timeout has
    /// elapsed, so the first call after the timeout is the probe.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.time_until_recovery() == Some(Duration::ZERO) {
                    self.transition_to(CircuitState::HalfOpen);
                    return true;
                }
                false
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        self.total_successes += 1;

        match self.state {
            CircuitState::HalfOpen => {
                if self.consecutive_successes >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                tracing::debug!(dependency = %self.name, "Success recorded while circuit is open");
            }
            CircuitState::Closed => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.total_failures += 1;

        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Failed during recovery - go back to open
                self.transition_to(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Transition to a new state.
    fn transition_to(&mut self, new_state: CircuitState) {
        tracing::info!(
            dependency = %self.name,
            from = %self.state,
            to = %new_state,
            consecutive_failures = self.consecutive_failures,
            consecutive_successes = self.consecutive_successes,
            "Circuit breaker state transition"
        );
        if new_state == CircuitState::Open {
            self.opened_at = Some(Instant::now());
        }
        if new_state == CircuitState::HalfOpen {
            self.consecutive_successes = 0;
        }
        self.state = new_state;
        self.last_state_change = Utc::now();
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Get the dependency name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get consecutive failures count.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Get consecutive successes count.
    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Check if the circuit is open (failing fast).
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Check if the circuit is closed.
    pub fn is_closed(&self) -> bool {
        self.state == CircuitState::Closed
    }

    /// Get time until the next probe is allowed (if open).
    pub fn time_until_recovery(&self) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }

        let timeout = self.config.recovery_timeout();
        self.opened_at.map(|opened| {
            let elapsed = opened.elapsed();
            timeout.saturating_sub(elapsed)
        })
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&mut self) {
        tracing::info!(
            dependency = %self.name,
            from = %self.state,
            "Circuit breaker manually reset to closed"
        );
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.opened_at = None;
        self.last_state_change = Utc::now();
    }

    /// Get a summary of the current state for display.
    pub fn summary(&self) -> CircuitBreakerSummary {
        CircuitBreakerSummary {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            success_threshold: self.config.success_threshold,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            time_until_recovery_ms: self.time_until_recovery().map(|d| d.as_millis() as u64),
            last_state_change: self.last_state_change,
        }
    }
}

/// Summary of circuit breaker state for display.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSummary {
    /// Current state
    pub state: CircuitState,
    /// Number of consecutive failures
    pub consecutive_failures: u32,
    /// Number of consecutive successes
    pub consecutive_successes: u32,
    /// Successes needed to close from half-open
    pub success_threshold: u32,
    /// Total failures
    pub total_failures: u32,
    /// Total successes
    pub total_successes: u32,
    /// Time until recovery attempt (if open)
    pub time_until_recovery_ms: Option<u64>,
    /// Time of last state change
    pub last_state_change: DateTime<Utc>,
}

impl std::fmt::Display for CircuitBreakerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Circuit Breaker: {} ", self.state.to_string().to_uppercase())?;

        match self.state {
            CircuitState::Closed => {
                write!(f, "({} consecutive failures)", self.consecutive_failures)
            }
            CircuitState::Open => match self.time_until_recovery_ms {
                Some(ms) if ms >= 1000 => write!(f, "(recovery in {}s)", ms / 1000),
                Some(ms) => write!(f, "(recovery in {}ms)", ms),
                None => write!(f, "(recovering soon)"),
            },
            CircuitState::HalfOpen => {
                write!(
                    f,
                    "({} consecutive successes needed)",
                    self.success_threshold
                        .saturating_sub(self.consecutive_successes)
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout_ms: 60_000,
        }
    }

    fn open_breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        let mut cb = CircuitBreaker::new("oracle", config);
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        cb
    }

    #[test]
    fn test_initial_state_is_closed() {
        let cb = CircuitBreaker::new("oracle", test_config());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_closed());
        assert!(!cb.is_open());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let mut cb = CircuitBreaker::new("oracle", test_config());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut cb = CircuitBreaker::new("oracle", test_config());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.consecutive_failures(), 2);

        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_cannot_execute_when_open() {
        let mut cb = open_breaker(test_config());
        assert!(!cb.can_execute());
        assert!(cb.time_until_recovery().unwrap() > Duration::ZERO);
    }

    #[test]
    fn test_recovery_timeout_moves_to_half_open() {
        let mut cb = open_breaker(CircuitBreakerConfig {
            recovery_timeout_ms: 0,
            ..test_config()
        });
        assert!(cb.is_open());

        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let mut cb = open_breaker(CircuitBreakerConfig {
            recovery_timeout_ms: 0,
            ..test_config()
        });
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let mut cb = open_breaker(CircuitBreakerConfig {
            recovery_timeout_ms: 0,
            ..test_config()
        });
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset() {
        let mut cb = open_breaker(test_config());
        assert!(cb.is_open());

        cb.reset();
        assert!(cb.is_closed());
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_summary_display() {
        let cb = CircuitBreaker::new("oracle", test_config());
        let display = cb.summary().to_string();
        assert!(display.contains("CLOSED"));

        let cb = open_breaker(test_config());
        let display = cb.summary().to_string();
        assert!(display.contains("OPEN"));
        assert!(display.contains("recovery in"));
    }

    #[test]
    fn test_circuit_state_string_conversion() {
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
        assert_eq!("closed".parse::<CircuitState>().unwrap(), CircuitState::Closed);
        assert_eq!("open".parse::<CircuitState>().unwrap(), CircuitState::Open);
        assert_eq!(
            "half_open".parse::<CircuitState>().unwrap(),
            CircuitState::HalfOpen
        );
        assert!("ajar".parse::<CircuitState>().is_err());
    }
}
