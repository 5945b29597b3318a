use crate::app::App;
use crate::errors::{McpError, ToolError};
use crate::mcp::catalog::ToolCatalog;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::services::logger::Logger;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "http-tool";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct McpServer {
    catalog: ToolCatalog,
    logger: Logger,
    shutdown: CancellationToken,
    /// Tokens of running `tools/call` requests keyed by their JSON-encoded id.
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl McpServer {
    pub fn new(catalog: ToolCatalog, logger: Logger) -> Self {
        Self {
            catalog,
            logger: logger.child("mcp"),
            shutdown: CancellationToken::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_app(app: App) -> Self {
        Self::new(app.catalog, app.logger)
    }

    /// Cancelling it aborts in-flight tool calls.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    fn register_call(&self, key: &str) -> CancellationToken {
        let token = self.shutdown.child_token();
        if let Ok(mut calls) = self.in_flight.lock() {
            calls.insert(key.to_string(), token.clone());
        }
        token
    }

    fn release_call(&self, key: &str) {
        if let Ok(mut calls) = self.in_flight.lock() {
            calls.remove(key);
        }
    }

    /// Handles `notifications/cancelled`; unknown or finished ids are ignored.
    fn cancel_call(&self, params: &Value) {
        let Some(request_id) = params.get("requestId") else {
            return;
        };
        let key = request_id.to_string();
        let token = self
            .in_flight
            .lock()
            .ok()
            .and_then(|calls| calls.get(&key).cloned());
        match token {
            Some(token) => {
                self.logger.info(
                    "Cancelling tool call",
                    Some(&json!({"request_id": request_id, "reason": params.get("reason")})),
                );
                token.cancel();
            }
            None => self.logger.debug(
                "Cancellation for unknown request",
                Some(&json!({"request_id": request_id})),
            ),
        }
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
        })
    }

    fn handle_tools_list(&self) -> Value {
        json!({ "tools": self.catalog.definitions() })
    }

    async fn handle_tools_call(
        &self,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, McpError> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if name.is_empty() {
            return Err(McpError::invalid_params("Missing tool name"));
        }
        let tool = self.catalog.get(name)?;
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        let started = std::time::Instant::now();
        let text = tool
            .invoke_with_cancel(args, cancel)
            .await;
        self.logger.info(
            "Tool call finished",
            Some(&json!({
                "tool": name,
                "duration_ms": started.elapsed().as_millis() as u64,
                "chars": text.chars().count(),
            })),
        );
        Ok(json!({
            "content": [ { "type": "text", "text": text } ]
        }))
    }

    /// Handles one line of input; `None` means nothing is written back.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let parsed: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => {
                return Some(JsonRpcResponse::from_error(
                    Value::Null,
                    McpError::parse_error(),
                ))
            }
        };
        let request: JsonRpcRequest = match serde_json::from_value(parsed) {
            Ok(request) => request,
            Err(_) => {
                return Some(JsonRpcResponse::from_error(
                    Value::Null,
                    McpError::invalid_request(),
                ))
            }
        };
        if request.is_notification() {
            self.logger
                .debug("Notification received", Some(&json!({"method": request.method})));
            if request.method == "notifications/cancelled" {
                self.cancel_call(&request.params);
            }
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.handle_initialize()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, self.handle_tools_list()),
            "tools/call" => {
                let key = id.to_string();
                let cancel = self.register_call(&key);
                let outcome = self.handle_tools_call(&request.params, &cancel).await;
                self.release_call(&key);
                // A cancelled request gets no response.
                if cancel.is_cancelled() {
                    return None;
                }
                match outcome {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(err) => JsonRpcResponse::from_error(id, err),
                }
            }
            other => JsonRpcResponse::from_error(id, McpError::method_not_found(other)),
        };
        Some(response)
    }

    /// Reads requests line by line and handles each on its own task so a
    /// slow tool call never blocks `notifications/cancelled`. Responses go out
    /// through a single writer. At end of input every running call is
    /// cancelled and drained before returning.
    pub async fn run_stdio(self: Arc<Self>) -> Result<(), ToolError> {
        let mut reader = BufReader::new(tokio::io::stdin()).lines();
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer = tokio::spawn(async move {
            let mut writer = BufWriter::new(tokio::io::stdout());
            while let Some(response) = rx.recv().await {
                let payload = serde_json::to_string(&response).unwrap_or_default();
                writer.write_all(payload.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        self.logger.info(
            "Serving tools over stdio",
            Some(&json!({"tools": self.catalog.names()})),
        );
        let mut tasks = JoinSet::new();
        let read_result = loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(err) => break Err(ToolError::internal(err.to_string())),
            };
            let server = Arc::clone(&self);
            let tx = tx.clone();
            tasks.spawn(async move {
                if let Some(response) = server.handle_line(&line).await {
                    let _ = tx.send(response);
                }
            });
            while tasks.try_join_next().is_some() {}
        };

        self.shutdown.cancel();
        while tasks.join_next().await.is_some() {}
        drop(tx);
        match writer.await {
            Ok(result) => result?,
            Err(err) => return Err(ToolError::internal(err.to_string())),
        }
        read_result
    }
}

pub async fn run_stdio(app: App) -> Result<(), ToolError> {
    Arc::new(McpServer::from_app(app)).run_stdio().await
}
