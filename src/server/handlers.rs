use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::SharedState;
use crate::connectors::HostMetrics;
use crate::error::{Classify, ErrorClass, McpError, McpResult};
use crate::model::Session;
use crate::resilience::CircuitBreakerSummary;
use crate::tracker::TrackerSnapshot;

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "research_create_session" => handle_create_session(state, arguments).await,
        "research_send_message" => handle_send_message(state, arguments).await,
        "research_approve_brief" => handle_approve_brief(state, arguments).await,
        "research_get_status" => handle_get_status(state, arguments).await,
        "research_get_results" => handle_get_results(state, arguments).await,
        "research_resume" => handle_resume(state, arguments).await,
        "research_metrics" => handle_metrics(state).await,
        "research_reset_circuit" => handle_reset_circuit(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

/// Error body returned to clients in place of a tool result.
///
/// System errors carry only their code; the details go to the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolError {
    pub status: u16,
    pub class: ErrorClass,
    pub code: &'static str,
    pub message: String,
}

impl From<&McpError> for ToolError {
    fn from(err: &McpError) -> Self {
        let class = err.class();
        let code = err.code();
        let message = match class {
            ErrorClass::System => {
                error!(code, error = %err, "Tool call failed with system error");
                format!("Internal error ({}); see server logs", code)
            }
            _ => err.to_string(),
        };
        Self {
            status: err.http_status(),
            class,
            code,
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateSessionParams {
    user_id: String,
    query: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageParams {
    session_id: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ResetCircuitParams {
    dependency: String,
}

#[derive(Debug, Deserialize)]
struct RunParams {
    session_id: String,
    /// Block until the session waits for input or is terminal.
    #[serde(default)]
    wait: bool,
}

/// Handle research_create_session: create and gather initial context.
async fn handle_create_session(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "research_create_session",
        arguments,
        |params: CreateSessionParams| async move {
            state
                .pipeline
                .start_session(&params.user_id, &params.query)
                .await
        },
    )
    .await
}

/// Handle research_send_message: one turn of the brief conversation.
async fn handle_send_message(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "research_send_message",
        arguments,
        |params: SendMessageParams| async move {
            state
                .pipeline
                .process_message(&params.session_id, &params.message)
                .await
        },
    )
    .await
}

/// Handle research_approve_brief: approve the draft and start the rounds.
async fn handle_approve_brief(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: RunParams = parse_arguments("research_approve_brief", arguments)?;
    let session = state.pipeline.approve_brief(&params.session_id).await?;
    drive(state, session, params.wait).await
}

/// Handle research_resume: continue a session from its last checkpoint.
async fn handle_resume(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: RunParams = parse_arguments("research_resume", arguments)?;
    if params.wait {
        let session = state.pipeline.resume(&params.session_id).await?;
        return to_value(&session);
    }
    let status = state.pipeline.status(&params.session_id).await?;
    drive(state, status.session, false).await
}

/// Run the session inline, or in the background and return it as is.
async fn drive(state: &SharedState, session: Session, wait: bool) -> McpResult<Value> {
    if wait {
        let session = state.pipeline.run(&session.id).await?;
        return to_value(&session);
    }

    let pipeline = Arc::clone(&state.pipeline);
    let session_id = session.id.clone();
    tokio::spawn(async move {
        match pipeline.resume(&session_id).await {
            Ok(session) => info!(
                session_id = %session.id,
                status = %session.status,
                "Background run finished"
            ),
            Err(e) => warn!(session_id = %session_id, error = %e, "Background run failed"),
        }
    });
    to_value(&session)
}

/// Handle research_get_status
async fn handle_get_status(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "research_get_status",
        arguments,
        |params: SessionParams| async move { state.pipeline.status(&params.session_id).await },
    )
    .await
}

/// Handle research_get_results
async fn handle_get_results(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "research_get_results",
        arguments,
        |params: SessionParams| async move { state.pipeline.results(&params.session_id).await },
    )
    .await
}

/// Everything `research_metrics` reports.
#[derive(Debug, Serialize)]
pub struct MetricsReport {
    pub tracker: TrackerSnapshot,
    pub circuits: BTreeMap<String, CircuitBreakerSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub connectors: BTreeMap<String, HostMetrics>,
}

/// Handle research_metrics: tracker counters, breaker states and connector
/// host metrics.
async fn handle_metrics(state: &SharedState) -> McpResult<Value> {
    let connectors = match &state.connector_metrics {
        Some(metrics) => metrics.snapshot().await,
        None => BTreeMap::new(),
    };
    let report = MetricsReport {
        tracker: state.pipeline.tracker().snapshot().await,
        circuits: state.resilience.circuit_summaries().await,
        connectors,
    };
    to_value(&report)
}

/// Handle research_reset_circuit: close a breaker once the operator knows
/// its dependency has recovered.
async fn handle_reset_circuit(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    const TOOL: &str = "research_reset_circuit";
    let params: ResetCircuitParams = parse_arguments(TOOL, arguments)?;
    match state.resilience.reset_circuit(&params.dependency).await {
        Some(circuit) => {
            warn!(dependency = %params.dependency, "Circuit breaker reset by operator");
            to_value(&serde_json::json!({
                "dependency": params.dependency,
                "circuit": circuit,
            }))
        }
        None => Err(McpError::InvalidParameters {
            tool_name: TOOL.to_string(),
            message: format!("no circuit breaker for dependency '{}'", params.dependency),
        }),
    }
}

fn to_value<T: Serialize>(value: &T) -> McpResult<Value> {
    serde_json::to_value(value).map_err(McpError::Json)
}

fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Parse arguments, run one pipeline operation and serialize its result.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: Into<McpError>,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;
    let result = operation(params).await.map_err(Into::into)?;
    to_value(&result)
}
