use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::types::{CreatePipeRequest, CreatePipeResponse, Message, PipeRequest, PipeResponse};
use crate::config::{OracleConfig, PipeConfig, RequestConfig};
use crate::error::{OracleError, OracleResult};
use crate::prompts;

/// A reasoning service that runs named pipes.
///
/// [`OracleClient`] is the HTTP implementation; tests substitute scripted
/// fakes.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Run one pipe call. Implementations make exactly one attempt.
    async fn run_pipe(&self, request: PipeRequest) -> OracleResult<PipeResponse>;
}

/// HTTP client for the reasoning service pipes API.
///
/// Makes a single attempt per call; retry and circuit breaking belong to
/// [`crate::resilience::ResilienceExecutor`].
#[derive(Clone)]
pub struct OracleClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl OracleClient {
    /// Create a new client
    pub fn new(config: &OracleConfig, request_config: RequestConfig) -> OracleResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(OracleError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a pipe
    pub async fn call_pipe(&self, request: &PipeRequest) -> OracleResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let start = Instant::now();

        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling reasoning pipe"
        );

        let result = self.execute_request(&url, request).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(pipe = %request.name, latency_ms, "Pipe call succeeded"),
            Err(e) => warn!(pipe = %request.name, latency_ms, error = %e, "Pipe call failed"),
        }
        result
    }

    async fn execute_request(&self, url: &str, request: &PipeRequest) -> OracleResult<PipeResponse> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: PipeResponse =
            response
                .json()
                .await
                .map_err(|e| OracleError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        if !pipe_response.success {
            return Err(OracleError::InvalidResponse {
                message: "Pipe reported success=false".to_string(),
            });
        }

        Ok(pipe_response)
    }

    fn map_send_error(&self, e: reqwest::Error) -> OracleError {
        if e.is_timeout() {
            OracleError::Timeout {
                timeout_ms: self.request_config.timeout_ms,
            }
        } else {
            OracleError::Http(e)
        }
    }

    /// Create (or upsert) a pipe
    pub async fn create_pipe(&self, request: CreatePipeRequest) -> OracleResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating pipe");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: CreatePipeResponse =
            response
                .json()
                .await
                .map_err(|e| OracleError::InvalidResponse {
                    message: format!("Failed to parse create pipe response: {}", e),
                })?;

        info!(pipe = %pipe_response.name, "Pipe created successfully");

        Ok(pipe_response)
    }

    /// Ensure a pipe exists with the given system prompt, creating it if needed
    pub async fn ensure_pipe(
        &self,
        pipe_name: &str,
        description: &str,
        system_prompt: &str,
    ) -> OracleResult<()> {
        let request = CreatePipeRequest::new(pipe_name)
            .with_description(description)
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_json_output(true)
            .with_temperature(0.4)
            .with_max_tokens(4000)
            .with_messages(vec![Message::system(system_prompt)]);

        match self.create_pipe(request).await {
            Ok(_) => {
                info!(pipe = %pipe_name, "Pipe ready");
                Ok(())
            }
            Err(OracleError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ensure every collaborator pipe exists.
    pub async fn ensure_pipes(&self, pipes: &PipeConfig) -> OracleResult<()> {
        let definitions = [
            (&pipes.context, "Initial research context", prompts::CONTEXT_PROMPT),
            (&pipes.brief, "Research brief builder", prompts::BRIEF_PROMPT),
            (&pipes.planner, "Research round planner", prompts::PLANNER_PROMPT),
            (&pipes.data, "Data task agent", prompts::DATA_AGENT_PROMPT),
            (&pipes.research, "Research task agent", prompts::RESEARCH_AGENT_PROMPT),
            (&pipes.aggregator, "Cross-round aggregator", prompts::AGGREGATOR_PROMPT),
        ];
        for (name, description, prompt) in definitions {
            self.ensure_pipe(name, description, prompt).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Oracle for OracleClient {
    async fn run_pipe(&self, request: PipeRequest) -> OracleResult<PipeResponse> {
        self.call_pipe(&request).await
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
