//! MCP over streamable HTTP: JSON-RPC 2.0 request handling, the tool
//! registry, and the per-session notification channels.
//!
//! `POST /mcp` carries JSON-RPC requests; `initialize` mints an
//! `Mcp-Session-Id` that later requests echo in a header. `GET /mcp`
//! opens an SSE stream on which `notifications/progress` and
//! `notifications/message` payloads are pushed for that session.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use herald_notify::McpSender;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

fn ok_response(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result: Some(result),
        error: None,
        id,
    }
}

fn err_response(id: Value, code: i64, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.into(),
            data: None,
        }),
        id,
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Request-scoped context passed to tool handlers.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// The calling MCP session, captured for notification targeting.
    pub mcp_session_id: String,
}

/// One tool exposed to the remote client.
#[async_trait::async_trait]
pub trait ToolDefinition: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    /// `Err` becomes a tool result flagged `isError`, not a protocol
    /// error -- the client sees the message as text.
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String, String>;
}

/// Name-ordered registry of tools.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolDefinition>>,
}

impl ToolRegistry {
    pub fn new(mut tools: Vec<Arc<dyn ToolDefinition>>) -> Self {
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolDefinition>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn list(&self) -> &[Arc<dyn ToolDefinition>] {
        &self.tools
    }
}

// ---------------------------------------------------------------------------
// Session registry
// ---------------------------------------------------------------------------

/// Connected MCP sessions and their notification channels.
///
/// A session id is minted at `initialize`; the SSE stream for the session
/// registers a channel here. Implements [`McpSender`] so the notifier can
/// target sessions directly.
#[derive(Default)]
pub struct SessionRegistry {
    channels: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .unwrap()
            .insert(session_id.to_string(), tx);
        rx
    }

    pub fn unsubscribe(&self, session_id: &str) {
        self.channels.lock().unwrap().remove(session_id);
    }

    fn notification(method: &str, params: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        })
    }
}

impl McpSender for SessionRegistry {
    fn send_to_session(&self, session_id: &str, method: &str, params: Value) -> Result<(), String> {
        let channels = self.channels.lock().unwrap();
        let tx = channels
            .get(session_id)
            .ok_or_else(|| format!("session {session_id:?} not connected"))?;
        tx.send(Self::notification(method, params))
            .map_err(|_| format!("session {session_id:?} channel closed"))
    }

    fn broadcast(&self, method: &str, params: Value) {
        let mut dead = Vec::new();
        {
            let channels = self.channels.lock().unwrap();
            for (session_id, tx) in channels.iter() {
                if tx.send(Self::notification(method, params.clone())).is_err() {
                    dead.push(session_id.clone());
                }
            }
        }
        for session_id in dead {
            self.unsubscribe(&session_id);
        }
    }
}

// ---------------------------------------------------------------------------
// MCP server
// ---------------------------------------------------------------------------

/// Guidance returned to the client during `initialize`. Keeps remote
/// prompts functional instead of pasted code.
const SERVER_INSTRUCTIONS: &str = "Herald bridges you to Claude Code running on the user's \
machine.\n\nIMPORTANT -- prompt efficiency:\n\
- Claude Code has FULL access to the codebase, files, and git history. You do NOT need to \
write code, file contents, or documentation in your prompts.\n\
- Send concise, functional prompts that describe WHAT to do, not HOW.\n\
- If the user provides code or file content, summarize the intent instead of forwarding it \
verbatim.";

/// Routes MCP protocol methods to the tool registry.
pub struct McpServer {
    registry: ToolRegistry,
    pub sessions: Arc<SessionRegistry>,
    version: String,
}

impl McpServer {
    pub fn new(registry: ToolRegistry, sessions: Arc<SessionRegistry>, version: &str) -> Self {
        Self {
            registry,
            sessions,
            version: version.to_string(),
        }
    }

    /// Handle one JSON-RPC request. Returns `(response, new_session_id)`;
    /// the session id is set only for `initialize`. `None` response means
    /// the request was a notification.
    pub async fn handle(
        &self,
        request: JsonRpcRequest,
        ctx: &ToolContext,
    ) -> (Option<JsonRpcResponse>, Option<String>) {
        // Notifications get no response body.
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "mcp notification received");
            return (None, None);
        };

        match request.method.as_str() {
            "initialize" => {
                let session_id = uuid::Uuid::new_v4().to_string();
                let response = ok_response(
                    id,
                    json!({
                        "protocolVersion": "2025-03-26",
                        "capabilities": { "tools": {}, "logging": {} },
                        "serverInfo": { "name": "Herald", "version": self.version },
                        "instructions": SERVER_INSTRUCTIONS,
                    }),
                );
                (Some(response), Some(session_id))
            }
            "ping" => (Some(ok_response(id, json!({}))), None),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .registry
                    .list()
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name(),
                            "description": t.description(),
                            "inputSchema": t.input_schema(),
                        })
                    })
                    .collect();
                (Some(ok_response(id, json!({ "tools": tools }))), None)
            }
            "tools/call" => (Some(self.handle_tool_call(id, request.params, ctx).await), None),
            other => (
                Some(err_response(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                )),
                None,
            ),
        }
    }

    async fn handle_tool_call(
        &self,
        id: Value,
        params: Option<Value>,
        ctx: &ToolContext,
    ) -> JsonRpcResponse {
        let Some(params) = params else {
            return err_response(id, INVALID_PARAMS, "Missing params for tools/call");
        };

        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return err_response(id, INVALID_PARAMS, "Missing 'name' in tools/call params");
        };

        let Some(tool) = self.registry.get(name) else {
            return err_response(id, METHOD_NOT_FOUND, format!("Unknown tool: {name}"));
        };

        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match tool.execute(ctx, args).await {
            Ok(text) => ok_response(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                }),
            ),
            // Tool failures are results the model can read, not protocol
            // errors.
            Err(text) => ok_response(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": true,
                }),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Axum surface
// ---------------------------------------------------------------------------

fn session_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// `POST /mcp` -- one JSON-RPC request per call.
pub async fn post_mcp(
    State(server): State<Arc<McpServer>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(_) => {
            let response = err_response(Value::Null, PARSE_ERROR, "Parse error");
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    let ctx = ToolContext {
        mcp_session_id: session_from_headers(&headers),
    };

    match server.handle(request, &ctx).await {
        (None, _) => StatusCode::ACCEPTED.into_response(),
        (Some(response), Some(session_id)) => (
            StatusCode::OK,
            [(SESSION_HEADER, session_id)],
            Json(response),
        )
            .into_response(),
        (Some(response), None) => (StatusCode::OK, Json(response)).into_response(),
    }
}

/// `GET /mcp` -- the SSE notification stream for one session.
pub async fn get_mcp(
    State(server): State<Arc<McpServer>>,
    headers: HeaderMap,
) -> Response {
    let session_id = session_from_headers(&headers);
    if session_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response();
    }

    let rx = server.sessions.subscribe(&session_id);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|value| (Ok::<_, Infallible>(SseEvent::default().data(value.to_string())), rx))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait::async_trait]
    impl ToolDefinition for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the message argument"
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"],
            })
        }
        async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String, String> {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .ok_or("message is required")?;
            Ok(format!("session={} message={message}", ctx.mcp_session_id))
        }
    }

    fn server() -> McpServer {
        McpServer::new(
            ToolRegistry::new(vec![Arc::new(EchoTool)]),
            Arc::new(SessionRegistry::new()),
            "0.0-test",
        )
    }

    fn request(method: &str, params: Value, id: i64) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params: Some(params),
            id: Some(json!(id)),
        }
    }

    #[tokio::test]
    async fn initialize_mints_session_and_reports_capabilities() {
        let server = server();
        let (response, session_id) = server
            .handle(request("initialize", json!({}), 1), &ToolContext::default())
            .await;

        let response = response.unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "Herald");
        assert!(result["capabilities"].get("tools").is_some());
        assert!(result["instructions"].as_str().unwrap().contains("Claude Code"));
        assert!(!session_id.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tools_list_enumerates_registry() {
        let server = server();
        let (response, _) = server
            .handle(request("tools/list", json!({}), 2), &ToolContext::default())
            .await;

        let result = response.unwrap().result.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn tools_call_executes_with_context() {
        let server = server();
        let ctx = ToolContext {
            mcp_session_id: "sess-1".into(),
        };
        let (response, _) = server
            .handle(
                request(
                    "tools/call",
                    json!({ "name": "echo", "arguments": { "message": "hi" } }),
                    3,
                ),
                &ctx,
            )
            .await;

        let result = response.unwrap().result.unwrap();
        assert_eq!(
            result["content"][0]["text"],
            "session=sess-1 message=hi"
        );
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn tool_errors_become_is_error_results() {
        let server = server();
        let (response, _) = server
            .handle(
                request("tools/call", json!({ "name": "echo", "arguments": {} }), 4),
                &ToolContext::default(),
            )
            .await;

        let result = response.unwrap().result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "message is required");
    }

    #[tokio::test]
    async fn unknown_tool_and_method_are_protocol_errors() {
        let server = server();
        let (response, _) = server
            .handle(
                request("tools/call", json!({ "name": "nope" }), 5),
                &ToolContext::default(),
            )
            .await;
        assert_eq!(response.unwrap().error.unwrap().code, METHOD_NOT_FOUND);

        let (response, _) = server
            .handle(request("bogus/method", json!({}), 6), &ToolContext::default())
            .await;
        assert_eq!(response.unwrap().error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let server = server();
        let notification = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            method: "notifications/initialized".into(),
            params: None,
            id: None,
        };
        let (response, _) = server.handle(notification, &ToolContext::default()).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn session_registry_targets_and_broadcasts() {
        let registry = SessionRegistry::new();
        let mut rx_a = registry.subscribe("a");
        let mut rx_b = registry.subscribe("b");

        registry
            .send_to_session("a", "notifications/progress", json!({"message": "hi"}))
            .unwrap();
        let received = rx_a.try_recv().unwrap();
        assert_eq!(received["method"], "notifications/progress");
        assert_eq!(received["params"]["message"], "hi");
        assert!(rx_b.try_recv().is_err(), "only session a was targeted");

        registry.broadcast("notifications/message", json!({"level": "info"}));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        assert!(registry
            .send_to_session("missing", "notifications/progress", json!({}))
            .is_err());
    }
}
