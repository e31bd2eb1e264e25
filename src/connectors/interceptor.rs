use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::model::HttpMethod;

/// Description of an outbound connector call.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub method: HttpMethod,
    pub endpoint: String,
    pub host: String,
}

/// How a connector call ended.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// HTTP status, if a response arrived.
    pub status: Option<u16>,
    pub latency: Duration,
    pub success: bool,
}

/// Hook run around every connector call, in registration order.
#[async_trait]
pub trait CallInterceptor: Send + Sync {
    async fn before(&self, _call: &CallInfo) {}

    async fn after(&self, call: &CallInfo, outcome: &CallOutcome);
}

/// Per-host HTTP counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostMetrics {
    pub requests: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
    /// Responses by status code; transport failures are counted under 0.
    pub statuses: BTreeMap<u16, u64>,
}

/// Records call counts, errors, latency and status codes per host.
#[derive(Debug, Default)]
pub struct MetricsInterceptor {
    hosts: RwLock<BTreeMap<String, HostMetrics>>,
}

impl MetricsInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, HostMetrics> {
        self.hosts.read().await.clone()
    }
}

#[async_trait]
impl CallInterceptor for MetricsInterceptor {
    async fn after(&self, call: &CallInfo, outcome: &CallOutcome) {
        let mut hosts = self.hosts.write().await;
        let metrics = hosts.entry(call.host.clone()).or_default();
        metrics.requests += 1;
        if !outcome.success {
            metrics.errors += 1;
        }
        metrics.total_latency_ms += outcome.latency.as_millis() as u64;
        *metrics.statuses.entry(outcome.status.unwrap_or(0)).or_insert(0) += 1;

        debug!(
            host = %call.host,
            method = call.method.as_str(),
            status = outcome.status,
            latency_ms = outcome.latency.as_millis() as u64,
            "Connector call recorded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_per_host() {
        let metrics = MetricsInterceptor::new();
        let call = CallInfo {
            method: HttpMethod::Get,
            endpoint: "https://a.example/x".to_string(),
            host: "a.example".to_string(),
        };

        metrics
            .after(
                &call,
                &CallOutcome {
                    status: Some(200),
                    latency: Duration::from_millis(40),
                    success: true,
                },
            )
            .await;
        metrics
            .after(
                &call,
                &CallOutcome {
                    status: None,
                    latency: Duration::from_millis(10),
                    success: false,
                },
            )
            .await;

        let snapshot = metrics.snapshot().await;
        let host = &snapshot["a.example"];
        assert_eq!(host.requests, 2);
        assert_eq!(host.errors, 1);
        assert_eq!(host.total_latency_ms, 50);
        assert_eq!(host.statuses[&200], 1);
        assert_eq!(host.statuses[&0], 1);
    }
}
