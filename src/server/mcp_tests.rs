//! Unit tests for the MCP protocol layer: JSON-RPC framing, tool
//! definitions and request dispatch against an in-memory pipeline.

use super::*;
use crate::server::testing;
use serde_json::json;

fn server() -> McpServer {
    McpServer::new(testing::state())
}

fn request(id: Option<Value>, method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id,
        method: method.to_string(),
        params,
    }
}

/// Call a tool and decode the text content of its result.
async fn call_tool(server: &McpServer, name: &str, arguments: Value) -> (Value, bool) {
    let response = server
        .handle_request(request(
            Some(json!(7)),
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        ))
        .await
        .unwrap();
    let result = response.result.unwrap();
    let text = result["content"][0]["text"].as_str().unwrap();
    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
    (serde_json::from_str(text).unwrap(), is_error)
}

// ============================================================================
// JSON-RPC framing
// ============================================================================

#[test]
fn test_jsonrpc_response_success_keeps_id() {
    let response = JsonRpcResponse::success(Some(json!("req-123")), json!({"ok": true}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!("req-123"));
    assert!(response.error.is_none());
}

#[test]
fn test_jsonrpc_error_without_id_is_null() {
    let response = JsonRpcResponse::error(None, -32700, "Parse error");
    let serialized = serde_json::to_string(&response).unwrap();

    assert_eq!(response.id, Value::Null);
    assert!(serialized.contains("-32700"));
    assert!(!serialized.contains("\"result\""));
}

#[test]
fn test_notification_has_no_id() {
    let json_str = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
    let request: JsonRpcRequest = serde_json::from_str(json_str).unwrap();

    assert!(request.id.is_none());
    assert_eq!(request.method, "initialized");
}

#[test]
fn test_tool_call_params_without_arguments() {
    let params: ToolCallParams =
        serde_json::from_str(r#"{"name":"research_metrics"}"#).unwrap();

    assert_eq!(params.name, "research_metrics");
    assert!(params.arguments.is_none());
}

#[test]
fn test_tool_call_result_error_flag() {
    let result = ToolCallResult {
        content: vec![ToolResultContent {
            content_type: "text".to_string(),
            text: "{}".to_string(),
        }],
        is_error: None,
    };
    let json = serde_json::to_value(&result).unwrap();
    assert!(json.get("isError").is_none());

    let result = ToolCallResult {
        is_error: Some(true),
        ..result
    };
    assert_eq!(serde_json::to_value(&result).unwrap()["isError"], true);
}

// ============================================================================
// Tool definitions
// ============================================================================

#[test]
fn test_all_tools() {
    let names: Vec<String> = all_tools().into_iter().map(|t| t.name).collect();

    assert_eq!(
        names,
        vec![
            "research_create_session",
            "research_send_message",
            "research_approve_brief",
            "research_get_status",
            "research_get_results",
            "research_resume",
            "research_metrics",
            "research_reset_circuit",
        ]
    );
}

#[test]
fn test_all_tools_have_object_schemas() {
    for tool in all_tools() {
        assert!(!tool.description.is_empty(), "{} has no description", tool.name);
        assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        assert!(tool.input_schema["properties"].is_object(), "{}", tool.name);
    }
}

#[test]
fn test_session_tools_require_session_id() {
    for tool in all_tools() {
        if matches!(
            tool.name.as_str(),
            "research_create_session" | "research_metrics" | "research_reset_circuit"
        ) {
            continue;
        }
        let required = tool.input_schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("session_id")), "{}", tool.name);
    }
}

#[test]
fn test_create_session_schema() {
    let tool = get_create_session_tool();
    assert_eq!(
        tool.input_schema["required"],
        json!(["user_id", "query"])
    );
}

#[test]
fn test_run_tools_accept_wait() {
    for tool in [get_approve_brief_tool(), get_resume_tool()] {
        assert_eq!(tool.input_schema["properties"]["wait"]["type"], "boolean");
        assert_eq!(tool.input_schema["properties"]["wait"]["default"], false);
    }
}

// ============================================================================
// Request dispatch
// ============================================================================

#[tokio::test]
async fn test_initialize_reports_server_name() {
    let response = server()
        .handle_request(request(Some(json!(1)), "initialize", Some(json!({}))))
        .await
        .unwrap();
    let result = response.result.unwrap();

    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "research-pipeline");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
}

#[tokio::test]
async fn test_notifications_get_no_response() {
    let server = server();
    assert!(server
        .handle_request(request(None, "initialized", None))
        .await
        .is_none());
    assert!(server
        .handle_request(request(None, "something/else", None))
        .await
        .is_none());
}

#[tokio::test]
async fn test_unknown_method() {
    let response = server()
        .handle_request(request(Some(json!(3)), "resources/list", None))
        .await
        .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("resources/list"));
}

#[tokio::test]
async fn test_tools_list() {
    let response = server()
        .handle_request(request(Some(json!(2)), "tools/list", None))
        .await
        .unwrap();
    let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
    assert_eq!(tools, 8);
}

#[tokio::test]
async fn test_tools_call_without_params() {
    let response = server()
        .handle_request(request(Some(json!(4)), "tools/call", None))
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_tool_call_success_and_error_content() {
    let server = server();

    let (session, is_error) = call_tool(
        &server,
        "research_create_session",
        json!({"user_id": "u1", "query": "Heat pump adoption"}),
    )
    .await;
    assert!(!is_error);
    assert_eq!(session["status"], "BRIEF");

    let (body, is_error) = call_tool(
        &server,
        "research_approve_brief",
        json!({"session_id": session["id"]}),
    )
    .await;
    assert!(is_error);
    assert_eq!(body["status"], 409);
    assert_eq!(body["class"], "permanent");
    assert_eq!(body["code"], "BRIEF_NOT_READY");
}

#[tokio::test]
async fn test_tool_call_not_found() {
    let (body, is_error) = call_tool(
        &server(),
        "research_get_results",
        json!({"session_id": "missing"}),
    )
    .await;
    assert!(is_error);
    assert_eq!(body["status"], 404);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}
