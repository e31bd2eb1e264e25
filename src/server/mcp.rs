//! JSON-RPC 2.0 framing and the MCP stdio loop.
//!
//! One request per line on stdin, one response per line on stdout.
//! Notifications (requests without an id) never get a response. Tool calls
//! are dispatched to [`handle_tool_call`]; tool failures are returned as a
//! successful JSON-RPC response whose content carries `isError: true` and a
//! [`ToolError`] body.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing::{debug, error, info, warn};

use super::{handle_tool_call, SharedState, ToolError};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

const JSONRPC_VERSION: &str = "2.0";
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Predefined JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Incoming request or notification.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// `None` for notifications.
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outgoing response. Exactly one of `result` and `error` is set.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Echoes the request id, `null` when the request could not be parsed.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Serialize `result` into a success response, or an internal error if
    /// it cannot be represented as JSON.
    fn from_serializable<T: Serialize>(id: Option<Value>, result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::success(id, value),
            Err(e) => {
                error!(error = %e, "Failed to serialize result");
                Self::error(id, codes::INTERNAL_ERROR, format!("Internal error: {}", e))
            }
        }
    }
}

/// A tool advertised through `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl Tool {
    /// Build a tool whose input is an object with the given properties.
    fn new(name: &str, description: &str, properties: Value, required: &[&str]) -> Self {
        let mut input_schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            input_schema["required"] = json!(required);
        }
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Parameters of `tools/call`.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Result of `tools/call`. Tool failures set `isError`.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    fn text(text: String, is_error: bool) -> Self {
        Self {
            content: vec![ToolResultContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: is_error.then_some(true),
        }
    }
}

/// MCP server speaking JSON-RPC over stdin/stdout.
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Serve until stdin is closed.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Research pipeline MCP server starting...");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!(request = %line, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    warn!(error = %e, "Unparseable request");
                    Some(JsonRpcResponse::error(
                        None,
                        codes::PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ))
                }
            };
            if let Some(response) = response {
                write_response(&mut stdout, &response).await?;
            }
        }

        info!("EOF received, shutting down");
        Ok(())
    }

    /// Dispatch one request. Returns `None` for notifications.
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        let Some(id) = id else {
            debug!(method = %method, "Notification");
            return None;
        };
        let id = Some(id);

        let response = match method.as_str() {
            "initialize" => {
                info!("Handling initialize request");
                JsonRpcResponse::success(id, initialize_result())
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": all_tools() })),
            "tools/call" => self.handle_tool_call(id, params).await,
            other => {
                warn!(method = %other, "Unknown method");
                JsonRpcResponse::error(
                    id,
                    codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                )
            }
        };
        Some(response)
    }

    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "Missing params");
        };
        let params: ToolCallParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("Invalid params: {}", e),
                )
            }
        };

        info!(tool = %params.name, "Handling tool call");
        let result = match handle_tool_call(&self.state, &params.name, params.arguments).await {
            Ok(value) => ToolCallResult::text(pretty(&value), false),
            Err(e) => ToolCallResult::text(pretty(&ToolError::from(&e)), true),
        };
        JsonRpcResponse::from_serializable(id, &result)
    }
}

async fn write_response(stdout: &mut Stdout, response: &JsonRpcResponse) -> std::io::Result<()> {
    let mut encoded = serde_json::to_string(response)?;
    debug!(response = %encoded, "Sending response");
    encoded.push('\n');
    stdout.write_all(encoded.as_bytes()).await?;
    stdout.flush().await
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize tool output");
        json!({ "error": format!("Serialization failed: {}", e) }).to_string()
    })
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

// ============================================================================
// Tool definitions
// ============================================================================

/// Every tool the server exposes, in listing order.
pub fn all_tools() -> Vec<Tool> {
    vec![
        get_create_session_tool(),
        get_send_message_tool(),
        get_approve_brief_tool(),
        get_status_tool(),
        get_results_tool(),
        get_resume_tool(),
        get_metrics_tool(),
        get_reset_circuit_tool(),
    ]
}

fn session_id_schema() -> Value {
    json!({
        "type": "string",
        "description": "Session identifier returned by research_create_session"
    })
}

fn wait_schema() -> Value {
    json!({
        "type": "boolean",
        "description": "Block until the session needs user input or finishes (default: run in the background)",
        "default": false
    })
}

fn session_only(name: &str, description: &str) -> Tool {
    Tool::new(
        name,
        description,
        json!({ "session_id": session_id_schema() }),
        &["session_id"],
    )
}

fn session_run(name: &str, description: &str) -> Tool {
    Tool::new(
        name,
        description,
        json!({ "session_id": session_id_schema(), "wait": wait_schema() }),
        &["session_id"],
    )
}

fn get_create_session_tool() -> Tool {
    Tool::new(
        "research_create_session",
        "Start a research session for a query. Gathers initial context and opens the brief conversation.",
        json!({
            "user_id": { "type": "string", "description": "Owner of the session" },
            "query": { "type": "string", "description": "The research question in the user's words" }
        }),
        &["user_id", "query"],
    )
}

fn get_send_message_tool() -> Tool {
    Tool::new(
        "research_send_message",
        "Send a message in the brief conversation. Returns either a clarifying question or a draft brief awaiting approval.",
        json!({
            "session_id": session_id_schema(),
            "message": { "type": "string", "description": "The user's reply" }
        }),
        &["session_id", "message"],
    )
}

fn get_approve_brief_tool() -> Tool {
    session_run(
        "research_approve_brief",
        "Approve the latest draft brief and start the research rounds.",
    )
}

fn get_status_tool() -> Tool {
    session_only(
        "research_get_status",
        "Get the session status with per-round progress and coverage.",
    )
}

fn get_results_tool() -> Tool {
    session_only(
        "research_get_results",
        "Get the approved brief, latest coverage decision, aggregation and report, as far as they exist.",
    )
}

fn get_resume_tool() -> Tool {
    session_run(
        "research_resume",
        "Continue an interrupted session from its last persisted checkpoint. Completed tasks are not re-executed.",
    )
}

fn get_metrics_tool() -> Tool {
    Tool::new(
        "research_metrics",
        "Per-dependency call, retry and token counters, task outcomes, circuit breaker states and data connector metrics.",
        json!({}),
        &[],
    )
}

fn get_reset_circuit_tool() -> Tool {
    Tool::new(
        "research_reset_circuit",
        "Force a dependency's circuit breaker back to closed once it is known to have recovered.",
        json!({
            "dependency": {
                "type": "string",
                "description": "Dependency name as listed by research_metrics, e.g. \"oracle\" or \"data:<host>\""
            }
        }),
        &["dependency"],
    )
}
