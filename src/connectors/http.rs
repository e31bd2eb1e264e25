use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{endpoint_host, CallInfo, CallInterceptor, CallOutcome, DataConnector};
use crate::config::RequestConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::model::HttpMethod;
use crate::oracle::parse_retry_after;

/// JSON-over-HTTP data connector.
#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
    timeout_ms: u64,
    interceptors: Vec<Arc<dyn CallInterceptor>>,
}

impl HttpConnector {
    pub fn new(request_config: &RequestConfig) -> ConnectorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .user_agent(concat!("research-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ConnectorError::Http)?;

        Ok(Self {
            client,
            timeout_ms: request_config.timeout_ms,
            interceptors: Vec::new(),
        })
    }

    /// Add an interceptor; they run in the order added.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn CallInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &serde_json::Value,
    ) -> (Option<u16>, ConnectorResult<serde_json::Value>) {
        let request = match method {
            HttpMethod::Get => {
                let query = query_pairs(params);
                self.client.get(endpoint).query(&query)
            }
            HttpMethod::Post => self.client.post(endpoint).json(params),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return (
                    None,
                    Err(ConnectorError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }),
                )
            }
            Err(e) => return (None, Err(ConnectorError::Http(e))),
        };

        let status = response.status();
        let code = Some(status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            return (code, Err(ConnectorError::RateLimited { retry_after }));
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return (
                code,
                Err(ConnectorError::Api {
                    status: status.as_u16(),
                    message,
                }),
            );
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ConnectorError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            });
        (code, body)
    }
}

/// Flatten top-level scalar params into query pairs.
fn query_pairs(params: &serde_json::Value) -> Vec<(String, String)> {
    let Some(object) = params.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), value))
        })
        .collect()
}

#[async_trait]
impl DataConnector for HttpConnector {
    async fn call(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &serde_json::Value,
    ) -> ConnectorResult<serde_json::Value> {
        let host = endpoint_host(endpoint).ok_or_else(|| ConnectorError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
        })?;
        let info = CallInfo {
            method,
            endpoint: endpoint.to_string(),
            host,
        };

        for interceptor in &self.interceptors {
            interceptor.before(&info).await;
        }

        debug!(method = method.as_str(), endpoint, "Calling data source");
        let start = Instant::now();
        let (status, result) = self.send(method, endpoint, params).await;
        let outcome = CallOutcome {
            status,
            latency: start.elapsed(),
            success: result.is_ok(),
        };

        if let Err(e) = &result {
            warn!(
                endpoint,
                status,
                latency_ms = outcome.latency.as_millis() as u64,
                error = %e,
                "Data source call failed"
            );
        }

        for interceptor in &self.interceptors {
            interceptor.after(&info, &outcome).await;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_pairs_skip_nested_values() {
        let pairs = query_pairs(&json!({
            "country": "DE",
            "year": 2024,
            "strict": true,
            "nested": {"a": 1},
            "list": [1, 2]
        }));
        assert_eq!(
            pairs,
            vec![
                ("country".to_string(), "DE".to_string()),
                ("strict".to_string(), "true".to_string()),
                ("year".to_string(), "2024".to_string()),
            ]
        );
        assert!(query_pairs(&json!(null)).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_permanent() {
        use crate::error::Classify;

        let connector = HttpConnector::new(&RequestConfig::default()).unwrap();
        let err = connector
            .call(HttpMethod::Get, "not a url", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidEndpoint { .. }));
        assert!(!err.is_transient());
    }
}
