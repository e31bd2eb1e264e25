//! Integration tests for the HTTP data connector and the data task agent,
//! using wiremock for both the data source and the reasoning service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::{
    matchers::{body_json, body_string_contains, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use research_pipeline::agents::{AgentCore, OracleDataAgent, TaskCollaborator, TaskContext};
use research_pipeline::config::{
    CircuitBreakerConfig, OracleConfig, RequestConfig, RetryConfig, RetryPolicy,
};
use research_pipeline::connectors::{DataConnector, HttpConnector, MetricsInterceptor};
use research_pipeline::error::{ConnectorError, Classify};
use research_pipeline::model::{HttpMethod, Task, TaskPayload, TaskStatus};
use research_pipeline::oracle::OracleClient;
use research_pipeline::resilience::ResilienceExecutor;
use research_pipeline::tracker::ResourceTracker;

fn connector(metrics: &Arc<MetricsInterceptor>) -> HttpConnector {
    HttpConnector::new(&RequestConfig { timeout_ms: 5000 })
        .unwrap()
        .with_interceptor(metrics.clone())
}

#[cfg(test)]
mod http_connector_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_sends_params_as_query() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/indicators/ev-sales"))
            .and(query_param("country", "DE"))
            .and(query_param("year", "2024"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": 524_000})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let metrics = Arc::new(MetricsInterceptor::new());
        let data = connector(&metrics)
            .call(
                HttpMethod::Get,
                &format!("{}/indicators/ev-sales", mock_server.uri()),
                &json!({"country": "DE", "year": 2024}),
            )
            .await
            .unwrap();
        assert_eq!(data["value"], 524_000);

        let hosts = metrics.snapshot().await;
        let host = &hosts["127.0.0.1"];
        assert_eq!(host.requests, 1);
        assert_eq!(host.errors, 0);
        assert_eq!(host.statuses[&200], 1);
    }

    #[tokio::test]
    async fn test_post_sends_params_as_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/query"))
            .and(body_json(json!({"series": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": 2})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let metrics = Arc::new(MetricsInterceptor::new());
        let data = connector(&metrics)
            .call(
                HttpMethod::Post,
                &format!("{}/query", mock_server.uri()),
                &json!({"series": ["a", "b"]}),
            )
            .await
            .unwrap();
        assert_eq!(data["rows"], 2);
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified_and_counted() {
        let mock_server = MockServer::start().await;

        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such series"))
            .mount(&mock_server)
            .await;
        Mock::given(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&mock_server)
            .await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let metrics = Arc::new(MetricsInterceptor::new());
        let connector = connector(&metrics);
        let call = |route: &'static str| {
            let endpoint = format!("{}{}", mock_server.uri(), route);
            let connector = connector.clone();
            async move { connector.call(HttpMethod::Get, &endpoint, &json!({})).await }
        };

        let err = call("/missing").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Api { status: 404, .. }));
        assert!(!err.is_transient());

        let err = call("/busy").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(err.is_transient());

        let err = call("/broken").await.unwrap_err();
        assert!(err.is_transient());

        let host = &metrics.snapshot().await["127.0.0.1"];
        assert_eq!(host.requests, 3);
        assert_eq!(host.errors, 3);
        assert_eq!(host.statuses[&404], 1);
        assert_eq!(host.statuses[&429], 1);
        assert_eq!(host.statuses[&503], 1);
    }

    #[tokio::test]
    async fn test_non_json_body_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(path("/csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2"))
            .mount(&mock_server)
            .await;

        let metrics = Arc::new(MetricsInterceptor::new());
        let err = connector(&metrics)
            .call(
                HttpMethod::Get,
                &format!("{}/csv", mock_server.uri()),
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidResponse { .. }));
    }
}

#[cfg(test)]
mod data_agent_tests {
    use super::*;
    use tokio::time::Instant;

    fn data_agent(oracle_url: &str) -> (OracleDataAgent, Arc<ResilienceExecutor>) {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 10,
            max_delay_ms: 20,
            exponential_base: 2.0,
            jitter: 0.0,
            rate_limit_delay_ms: 10,
        };
        let resilience = Arc::new(ResilienceExecutor::new(
            RetryConfig {
                reasoning: policy.clone(),
                data_source: policy,
            },
            CircuitBreakerConfig::default(),
            Arc::new(ResourceTracker::new()),
        ));
        let oracle = OracleClient::new(
            &OracleConfig {
                api_key: "test-api-key".to_string(),
                base_url: oracle_url.to_string(),
            },
            RequestConfig { timeout_ms: 5000 },
        )
        .unwrap();
        let connector = HttpConnector::new(&RequestConfig { timeout_ms: 5000 }).unwrap();
        let core = AgentCore::new(Arc::new(oracle), Arc::clone(&resilience), false);
        (
            OracleDataAgent::new(core, Arc::new(connector), "research-data-agent-v1"),
            resilience,
        )
    }

    fn context(task: Task) -> TaskContext {
        TaskContext {
            session_id: "session-1".to_string(),
            round: 1,
            task,
            brief: Arc::new(common::ev_brief()),
            prior_results: Arc::new(Vec::new()),
        }
    }

    async fn mount_oracle(server: &MockServer, expected_prompt: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_string_contains(expected_prompt))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "completion": "{\"status\": \"completed\", \"confidence\": 0.9, \"metrics\": {\"chargers\": 120000}}"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetched_data_reaches_the_prompt() {
        let data_source = MockServer::start().await;
        let oracle = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/chargers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"public_chargers": 120000})))
            .expect(1)
            .mount(&data_source)
            .await;
        mount_oracle(&oracle, "public_chargers").await;

        let (agent, resilience) = data_agent(&oracle.uri());
        let task = Task::data("d1", "s2", "Count public chargers")
            .with_source(format!("{}/chargers", data_source.uri()), json!({}));

        let result = agent
            .execute(&context(task), Instant::now() + Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.confidence, 0.9);
        match &result.payload {
            TaskPayload::Data { metrics, .. } => assert_eq!(metrics["chargers"], 120000),
            other => panic!("expected data payload, got {:?}", other),
        }
        assert!(resilience.circuit_state("data:127.0.0.1").await.is_some());
    }

    #[tokio::test]
    async fn test_unavailable_source_yields_partial_with_gap() {
        let data_source = MockServer::start().await;
        let oracle = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/chargers"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&data_source)
            .await;
        mount_oracle(&oracle, "Count public chargers").await;

        let (agent, _) = data_agent(&oracle.uri());
        let endpoint = format!("{}/chargers", data_source.uri());
        let task = Task::data("d1", "s2", "Count public chargers").with_source(&endpoint, json!({}));

        let result = agent
            .execute(&context(task), Instant::now() + Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Partial);
        assert_eq!(
            result.gaps,
            vec![format!("data source unavailable: {}", endpoint)]
        );
    }
}
