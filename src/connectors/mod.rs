//! Data-source connectors: HTTP GET/POST wrappers returning JSON.
//!
//! Cross-cutting concerns (metrics, logging) are composed around a
//! connector as [`CallInterceptor`]s rather than patched into the HTTP
//! client.

mod http;
mod interceptor;

pub use http::HttpConnector;
pub use interceptor::{CallInfo, CallInterceptor, CallOutcome, HostMetrics, MetricsInterceptor};

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::model::HttpMethod;

/// A data source reachable by endpoint URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataConnector: Send + Sync {
    /// Call `endpoint` with `params` and return the JSON body.
    ///
    /// Makes exactly one attempt; errors are classifiable as transient,
    /// permanent or system.
    async fn call(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &serde_json::Value,
    ) -> ConnectorResult<serde_json::Value>;
}

/// Host part of an endpoint URL, used to name the dependency.
pub fn endpoint_host(endpoint: &str) -> Option<String> {
    reqwest::Url::parse(endpoint)
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_host() {
        assert_eq!(
            endpoint_host("https://API.worldbank.org/v2/country?format=json"),
            Some("api.worldbank.org".to_string())
        );
        assert_eq!(
            endpoint_host("http://127.0.0.1:8080/x"),
            Some("127.0.0.1".to_string())
        );
        assert_eq!(endpoint_host("not a url"), None);
    }
}
