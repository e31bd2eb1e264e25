//! Resource tracker for external calls and task outcomes.
//!
//! One tracker is constructed by the caller that owns the pipeline and handed
//! to the resilience executor, the parallel executor and any connector
//! interceptors. There is no process-wide instance.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::{TaskKind, TaskStatus};

/// Counters for one named dependency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyStats {
    /// Attempts that reached the dependency.
    pub calls: u64,
    /// Attempts that succeeded.
    pub successes: u64,
    /// Attempts that failed.
    pub failures: u64,
    /// Attempts after the first one.
    pub retries: u64,
    /// Calls refused by an open circuit.
    pub circuit_rejections: u64,
    /// Sum of attempt latencies.
    pub total_latency_ms: u64,
    /// Prompt tokens reported by the reasoning service.
    pub prompt_tokens: u64,
    /// Completion tokens reported by the reasoning service.
    pub completion_tokens: u64,
}

impl DependencyStats {
    /// Mean attempt latency.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.calls as f64
        }
    }
}

/// Outcome counters for one task kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub completed: u64,
    pub partial: u64,
    pub failed: u64,
    /// Failed because the round deadline elapsed.
    pub timed_out: u64,
    pub total_duration_ms: u64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub dependencies: BTreeMap<String, DependencyStats>,
    pub tasks: BTreeMap<String, TaskStats>,
    pub rounds: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    dependencies: BTreeMap<String, DependencyStats>,
    tasks: BTreeMap<String, TaskStats>,
    rounds: u64,
}

/// Shared metrics sink.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    state: RwLock<TrackerState>,
}

impl ResourceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt against `dependency`.
    pub async fn record_call(&self, dependency: &str, latency: Duration, success: bool) {
        let mut state = self.state.write().await;
        let stats = state.dependencies.entry(dependency.to_string()).or_default();
        stats.calls += 1;
        stats.total_latency_ms += latency.as_millis() as u64;
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
    }

    /// Record a retry attempt.
    pub async fn record_retry(&self, dependency: &str) {
        let mut state = self.state.write().await;
        state
            .dependencies
            .entry(dependency.to_string())
            .or_default()
            .retries += 1;
    }

    /// Record a call refused by an open circuit.
    pub async fn record_rejection(&self, dependency: &str) {
        let mut state = self.state.write().await;
        state
            .dependencies
            .entry(dependency.to_string())
            .or_default()
            .circuit_rejections += 1;
    }

    /// Record token usage reported by the reasoning service.
    pub async fn record_tokens(&self, dependency: &str, prompt: u64, completion: u64) {
        let mut state = self.state.write().await;
        let stats = state.dependencies.entry(dependency.to_string()).or_default();
        stats.prompt_tokens += prompt;
        stats.completion_tokens += completion;
    }

    /// Record a settled task.
    pub async fn record_task(
        &self,
        kind: TaskKind,
        status: TaskStatus,
        duration: Duration,
        timed_out: bool,
    ) {
        let mut state = self.state.write().await;
        let stats = state.tasks.entry(kind.as_str().to_string()).or_default();
        match status {
            TaskStatus::Completed => stats.completed += 1,
            TaskStatus::Partial => stats.partial += 1,
            TaskStatus::Failed => stats.failed += 1,
        }
        if timed_out {
            stats.timed_out += 1;
        }
        stats.total_duration_ms += duration.as_millis() as u64;
    }

    /// Record a finished round.
    pub async fn record_round(&self) {
        self.state.write().await.rounds += 1;
    }

    /// Copy all counters.
    pub async fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.read().await;
        TrackerSnapshot {
            dependencies: state.dependencies.clone(),
            tasks: state.tasks.clone(),
            rounds: state.rounds,
        }
    }

    /// Counters for one dependency.
    pub async fn dependency(&self, dependency: &str) -> DependencyStats {
        self.state
            .read()
            .await
            .dependencies
            .get(dependency)
            .cloned()
            .unwrap_or_default()
    }
}
