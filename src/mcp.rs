//! MCP Protocol Handler
//!
//! Implements JSON-RPC 2.0 over stdio for Model Context Protocol.
//! Reference: https://modelcontextprotocol.io/specification
//!
//! Requests are served concurrently so that a tool call blocked on the
//! reviewer does not stall the connection. A `notifications/cancelled`
//! message cancels only the request it names.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::tools::ToolRegistry;

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Server-initiated notification
#[derive(Debug, Clone, Serialize)]
pub struct McpNotification {
    pub jsonrpc: String,
    pub method: String,
}

impl McpNotification {
    pub fn new(method: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
        }
    }
}

impl McpResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// MCP Error Codes
pub mod error_codes {
    // JSON-RPC standard errors
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;

    // MCP custom errors (-32000 to -32099)
    pub const TOOL_EXECUTION_ERROR: i32 = -32001;
    pub const REQUEST_CANCELLED: i32 = -32800;
}

/// Stable key for a JSON-RPC id
fn id_key(id: &serde_json::Value) -> String {
    id.to_string()
}

/// MCP Server
pub struct McpServer {
    tools: Arc<ToolRegistry>,
    /// Cancellation tokens of in-flight tool calls, by request id
    pending: Mutex<HashMap<String, CancellationToken>>,
}

impl McpServer {
    /// Create new MCP server
    pub fn new(tools: ToolRegistry) -> Arc<Self> {
        Arc::new(Self {
            tools: Arc::new(tools),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Run the MCP server (stdio mode)
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve one connection until EOF
    pub async fn serve<R, W>(self: Arc<Self>, mut reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let writer_task = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                debug!("→ {}", message);
                writer.write_all(message.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        let mut in_flight = JoinSet::new();
        let mut line = String::new();

        info!("MCP server ready, waiting for requests...");

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("Client disconnected (EOF)");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!("← {}", trimmed);

            let request = match serde_json::from_str::<McpRequest>(trimmed) {
                Ok(request) => request,
                Err(e) => {
                    error!("Parse error: {}", e);
                    let response =
                        McpResponse::error(None, error_codes::PARSE_ERROR, format!("Parse error: {}", e));
                    let _ = out_tx.send(serde_json::to_string(&response)?);
                    continue;
                }
            };

            if request.id.is_none() {
                self.handle_notification(&request);
                continue;
            }

            // Registered before spawning so a cancellation that follows
            // immediately on the wire always finds it
            let token = CancellationToken::new();
            let pending_key = match (request.method.as_str(), request.id.as_ref()) {
                ("tools/call", Some(id)) => Some(id_key(id)),
                _ => None,
            };
            if let Some(ref key) = pending_key {
                self.pending.lock().insert(key.clone(), token.clone());
            }

            let server = self.clone();
            let out_tx = out_tx.clone();
            in_flight.spawn(async move {
                let (response, list_changed) = server.handle_request(request, token).await;
                if let Some(key) = pending_key {
                    server.pending.lock().remove(&key);
                }
                match serde_json::to_string(&response) {
                    Ok(json) => {
                        let _ = out_tx.send(json);
                    }
                    Err(e) => error!("Failed to encode response: {}", e),
                }
                if list_changed {
                    if let Ok(json) =
                        serde_json::to_string(&McpNotification::new("notifications/tools/list_changed"))
                    {
                        let _ = out_tx.send(json);
                    }
                }
            });
        }

        // No client is left to answer; release calls still waiting on a reviewer
        self.cancel_pending();

        // Let in-flight calls finish before closing the output
        while in_flight.join_next().await.is_some() {}
        drop(out_tx);
        writer_task.await??;

        Ok(())
    }

    fn cancel_pending(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (key, token) in pending {
            info!("Cancelling request {} on disconnect", key);
            token.cancel();
        }
    }

    fn handle_notification(&self, request: &McpRequest) {
        match request.method.as_str() {
            "notifications/initialized" | "initialized" => {
                debug!("Received initialized notification");
            }
            "notifications/cancelled" => {
                let Some(request_id) = request.params.get("requestId") else {
                    warn!("Cancellation without requestId");
                    return;
                };
                let key = id_key(request_id);
                match self.pending.lock().get(&key) {
                    Some(token) => {
                        info!("Cancelling request {}", key);
                        token.cancel();
                    }
                    None => debug!("Cancellation for unknown request {}", key),
                }
            }
            method => debug!("Ignoring notification: {}", method),
        }
    }

    /// Handle a single MCP request; the flag reports a tool list change
    async fn handle_request(
        &self,
        request: McpRequest,
        token: CancellationToken,
    ) -> (McpResponse, bool) {
        if request.jsonrpc != "2.0" {
            return (
                McpResponse::error(request.id, error_codes::INVALID_REQUEST, "jsonrpc must be \"2.0\""),
                false,
            );
        }

        match request.method.as_str() {
            // Lifecycle
            "initialize" => (self.handle_initialize(request.id), false),
            "shutdown" => {
                info!("Shutdown requested");
                (McpResponse::success(request.id, serde_json::json!({})), false)
            }

            // Tools
            "tools/list" => (self.handle_tools_list(request.id), false),
            "tools/call" => self.handle_tools_call(request.id, request.params, token).await,

            // Ping
            "ping" => (McpResponse::success(request.id, serde_json::json!({})), false),

            // Unknown
            method => {
                warn!("Unknown method: {}", method);
                (
                    McpResponse::error(
                        request.id,
                        error_codes::METHOD_NOT_FOUND,
                        format!("Method not found: {}", method),
                    ),
                    false,
                )
            }
        }
    }

    /// Handle initialize
    fn handle_initialize(&self, id: Option<serde_json::Value>) -> McpResponse {
        McpResponse::success(
            id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {
                        "listChanged": true
                    }
                },
                "serverInfo": {
                    "name": "skillgate",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    /// Handle tools/list
    fn handle_tools_list(&self, id: Option<serde_json::Value>) -> McpResponse {
        let tools = self.tools.list_definitions();
        McpResponse::success(id, serde_json::json!({ "tools": tools }))
    }

    /// Handle tools/call
    async fn handle_tools_call(
        &self,
        id: Option<serde_json::Value>,
        params: serde_json::Value,
        token: CancellationToken,
    ) -> (McpResponse, bool) {
        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => {
                return (
                    McpResponse::error(id, error_codes::INVALID_PARAMS, "Missing 'name' parameter"),
                    false,
                )
            }
        };

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::json!({}));

        let result = self.tools.call(&name, arguments, &token).await;

        match result {
            Ok(output) => (
                McpResponse::success(
                    id,
                    serde_json::json!({
                        "content": [{
                            "type": "text",
                            "text": output.text
                        }]
                    }),
                ),
                output.list_changed,
            ),
            Err(_) if token.is_cancelled() => (
                McpResponse::error(
                    id,
                    error_codes::REQUEST_CANCELLED,
                    format!("Tool '{}' cancelled", name),
                ),
                false,
            ),
            Err(e) => (
                McpResponse::error(
                    id,
                    error_codes::TOOL_EXECUTION_ERROR,
                    format!("Tool '{}' failed: {:#}", name, e),
                ),
                false,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{
        AdmissionController, CapabilityRegistry, PolicyValidator, PreviewExecutor, RecordStore,
    };
    use tempfile::TempDir;

    fn server(dir: &TempDir) -> Arc<McpServer> {
        let capabilities = Arc::new(CapabilityRegistry::new());
        let store = Arc::new(RecordStore::new(dir.path().join("library.json")));
        let admission = Arc::new(AdmissionController::new(
            PolicyValidator::default(),
            Arc::new(PreviewExecutor::default()),
            capabilities.clone(),
            store,
            false,
        ));
        McpServer::new(ToolRegistry::new(admission, capabilities, None))
    }

    async fn exchange(server: Arc<McpServer>, input: &str) -> Vec<serde_json::Value> {
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        server.serve(input.as_bytes(), server_side).await.unwrap();

        let mut out = String::new();
        let mut client = BufReader::new(client);
        loop {
            let mut line = String::new();
            let n = client.read_line(&mut line).await.unwrap();
            if n == 0 {
                break;
            }
            out.push_str(&line);
        }

        out.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn by_id(messages: &[serde_json::Value], id: i64) -> serde_json::Value {
        messages
            .iter()
            .find(|m| m["id"] == id)
            .cloned()
            .unwrap_or_else(|| panic!("no response with id {}", id))
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let dir = TempDir::new().unwrap();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );

        let messages = exchange(server(&dir), input).await;
        assert_eq!(messages.len(), 2);

        let init = by_id(&messages, 1);
        assert_eq!(init["result"]["serverInfo"]["name"], "skillgate");

        let list = by_id(&messages, 2);
        let tools = list["result"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == "create_tool"));
    }

    #[tokio::test]
    async fn test_create_tool_notifies_list_changed() {
        let dir = TempDir::new().unwrap();
        let call = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "create_tool",
                "arguments": {
                    "name": "Greeter",
                    "description": "says hi",
                    "sourceCode": "\"\"\"says hi\"\"\"\ndef greet(): return 'hi'"
                }
            }
        });
        let input = format!("{}\n", call);

        let messages = exchange(server(&dir), &input).await;
        let response = by_id(&messages, 7);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Greeter"));

        assert!(messages
            .iter()
            .any(|m| m["method"] == "notifications/tools/list_changed"));
    }

    #[tokio::test]
    async fn test_parse_error_and_unknown_method() {
        let dir = TempDir::new().unwrap();
        let input = concat!(
            "not json\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#,
            "\n",
        );

        let messages = exchange(server(&dir), input).await;
        assert!(messages
            .iter()
            .any(|m| m["error"]["code"] == error_codes::PARSE_ERROR));
        assert_eq!(by_id(&messages, 3)["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    fn reviewing_server(dir: &TempDir) -> Arc<McpServer> {
        use crate::skills::{ApprovalError, ApprovalMachine, Reviewer};
        use async_trait::async_trait;

        // Never answers
        struct Silent;

        #[async_trait]
        impl Reviewer for Silent {
            async fn display(&self, _label: &str, _text: &str) -> Result<(), ApprovalError> {
                Ok(())
            }

            async fn ask_line(&self, _prompt: &str, _cancel: &CancellationToken) -> Result<String, ApprovalError> {
                std::future::pending().await
            }
        }

        let capabilities = Arc::new(CapabilityRegistry::new());
        let store = Arc::new(RecordStore::new(dir.path().join("library.json")));
        let admission = Arc::new(AdmissionController::new(
            PolicyValidator::default(),
            Arc::new(PreviewExecutor::default()),
            capabilities.clone(),
            store,
            true,
        ));
        let approval = ApprovalMachine::new(Arc::new(Silent));
        McpServer::new(ToolRegistry::new(admission, capabilities, Some(approval)))
    }

    #[tokio::test]
    async fn test_cancel_pending_review() {
        let dir = TempDir::new().unwrap();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"ask_reviewer","arguments":{"scenario":"approval","message":"ok?"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":6,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":5}}"#,
            "\n",
        );

        let messages = exchange(reviewing_server(&dir), input).await;
        let response = by_id(&messages, 5);
        assert_eq!(response["error"]["code"], error_codes::REQUEST_CANCELLED);
        assert!(response.get("result").is_none());
        assert!(by_id(&messages, 6).get("result").is_some());
    }

    #[tokio::test]
    async fn test_disconnect_releases_waiting_review() {
        let dir = TempDir::new().unwrap();
        let server = reviewing_server(&dir);
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"ask_reviewer","arguments":{"scenario":"approval","message":"ok?"}}}"#,
            "\n",
        );

        let messages = tokio::time::timeout(std::time::Duration::from_secs(5), exchange(server.clone(), input))
            .await
            .expect("serve must return after EOF");
        assert_eq!(by_id(&messages, 7)["error"]["code"], error_codes::REQUEST_CANCELLED);
        assert!(server.pending.lock().is_empty());
    }

    #[test]
    fn test_id_key_distinguishes_types() {
        assert_ne!(id_key(&serde_json::json!(1)), id_key(&serde_json::json!("1")));
    }
}
