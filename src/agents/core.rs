//! Infrastructure shared by the reasoning-service collaborators.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::warn;

use crate::error::{AgentError, AgentResult};
use crate::oracle::{Message, Oracle, PipeRequest, PipeResponse};
use crate::resilience::{DependencyClass, ResilienceExecutor};

/// Dependency name of the reasoning service in the resilience layer.
pub const ORACLE_DEPENDENCY: &str = "oracle";

/// Oracle access plus the resilience layer, composed into each
/// collaborator.
#[derive(Clone)]
pub struct AgentCore {
    oracle: Arc<dyn Oracle>,
    resilience: Arc<ResilienceExecutor>,
    strict_mode: bool,
}

impl AgentCore {
    pub fn new(oracle: Arc<dyn Oracle>, resilience: Arc<ResilienceExecutor>, strict_mode: bool) -> Self {
        Self {
            oracle,
            resilience,
            strict_mode,
        }
    }

    /// Whether malformed output is an error rather than degraded.
    #[inline]
    pub fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    #[inline]
    pub fn resilience(&self) -> &Arc<ResilienceExecutor> {
        &self.resilience
    }

    /// Run `pipe` through the resilience layer, bounded by `deadline`.
    pub async fn complete(
        &self,
        pipe: &str,
        messages: Vec<Message>,
        deadline: Option<Instant>,
    ) -> AgentResult<PipeResponse> {
        let request = PipeRequest::new(pipe, messages);
        let call = self
            .resilience
            .call(ORACLE_DEPENDENCY, DependencyClass::Reasoning, || {
                self.oracle.run_pipe(request.clone())
            });

        let response = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .map_err(|_| AgentError::DeadlineExceeded)??,
            None => call.await?,
        };

        let (prompt_tokens, completion_tokens) = response.token_usage();
        self.resilience
            .tracker()
            .record_tokens(ORACLE_DEPENDENCY, prompt_tokens, completion_tokens)
            .await;
        Ok(response)
    }

    /// Parse a JSON completion, or report which pipe produced garbage.
    pub fn parse<T: serde::de::DeserializeOwned>(
        &self,
        pipe: &str,
        response: &PipeResponse,
    ) -> AgentResult<T> {
        response.parse_json().map_err(|message| {
            warn!(pipe, error = %message, "Unparseable completion");
            AgentError::InvalidOutput {
                message: format!("{}: {}", pipe, message),
            }
        })
    }
}

/// Render a value as pretty JSON for a prompt.
pub(crate) fn to_prompt_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}
