mod common;

use async_trait::async_trait;
use common::{json_response, RecordingExecutor};
use http_tool::app::App;
use http_tool::errors::{ErrorCode, ToolError};
use http_tool::mcp::server::McpServer;
use http_tool::services::credentials::StaticCredentialProvider;
use http_tool::services::logger::Logger;
use http_tool::services::tool_config::parse_tool_configs;
use http_tool::services::transport::{HttpExecutor, RawResponse, RequestDescriptor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Signals when a request starts, then never answers in time.
#[derive(Default)]
struct StalledExecutor {
    started: Notify,
}

#[async_trait]
impl HttpExecutor for StalledExecutor {
    async fn send(&self, _request: &RequestDescriptor) -> Result<RawResponse, ToolError> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(RawResponse::text(200, "text/plain", "late"))
    }

    async fn send_with_credential_type(
        &self,
        _credential_type: &str,
        request: &RequestDescriptor,
    ) -> Result<RawResponse, ToolError> {
        self.send(request).await
    }
}

fn server(executor: Arc<dyn HttpExecutor>) -> McpServer {
    let configs = parse_tool_configs(
        &json!([
            {
                "name": "get_weather",
                "toolDescription": "Current weather for a city",
                "url": "https://api.weather.example/{city}",
                "placeholderDefinitions": [{"name": "city", "description": "City name"}]
            },
            {
                "name": "ping",
                "url": "https://status.example.com/health"
            }
        ])
        .to_string(),
    )
    .unwrap();
    let app = App::build(
        configs,
        executor,
        Arc::new(StaticCredentialProvider::new()),
        None,
        Logger::new("test"),
    )
    .unwrap();
    McpServer::from_app(app)
}

fn request(id: u64, method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
}

#[tokio::test]
async fn initialize_reports_tool_capability() {
    let server = server(RecordingExecutor::new());
    let response = server
        .handle_line(&request(1, "initialize", json!({})))
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["serverInfo"]["name"], "http-tool");
    assert!(result["capabilities"]["tools"].is_object());
    assert_eq!(response.id, json!(1));
}

#[tokio::test]
async fn tools_list_exposes_normalized_schemas() {
    let server = server(RecordingExecutor::new());
    let response = server
        .handle_line(&request(2, "tools/list", json!({})))
        .await
        .unwrap();
    let tools = response.result.unwrap()["tools"].clone();
    let tools = tools.as_array().unwrap();
    assert_eq!(tools.len(), 2);

    let weather = &tools[0];
    assert_eq!(weather["name"], "get_weather");
    assert_eq!(weather["inputSchema"]["required"], json!(["city"]));
    assert!(weather["description"]
        .as_str()
        .unwrap()
        .starts_with("Current weather for a city"));

    let ping = &tools[1];
    assert_eq!(ping["inputSchema"]["properties"], json!({}));
    assert!(ping["inputSchema"].get("required").is_none());
}

#[tokio::test]
async fn tools_call_returns_text_content() {
    let executor = RecordingExecutor::with_responses(vec![json_response(json!({"temp": 21}))]);
    let server = server(executor.clone());
    let response = server
        .handle_line(&request(
            3,
            "tools/call",
            json!({"name": "get_weather", "arguments": {"city": "Oslo"}}),
        ))
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(result["content"][0]["text"], r#"{"temp":21}"#);
    assert_eq!(executor.last().request.url, "https://api.weather.example/Oslo");
}

#[tokio::test]
async fn tool_failures_stay_inside_the_result() {
    let server = server(RecordingExecutor::new());
    let response = server
        .handle_line(&request(4, "tools/call", json!({"name": "get_weather", "arguments": {}})))
        .await
        .unwrap();
    assert!(response.error.is_none());
    let text = response.result.unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(text.contains("Model did not provide parameter 'city'"));
}

#[tokio::test]
async fn unknown_tools_and_methods_are_protocol_errors() {
    let server = server(RecordingExecutor::new());
    let unknown_tool = server
        .handle_line(&request(5, "tools/call", json!({"name": "nope"})))
        .await
        .unwrap();
    let error = unknown_tool.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidParams.as_i32());
    assert!(error.message.contains("Available: get_weather, ping"));

    let unknown_method = server
        .handle_line(&request(6, "resources/list", json!({})))
        .await
        .unwrap();
    assert_eq!(unknown_method.error.unwrap().code, ErrorCode::MethodNotFound.as_i32());
}

#[tokio::test]
async fn notifications_and_garbage_lines() {
    let server = server(RecordingExecutor::new());
    let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
    assert!(server.handle_line(&notification).await.is_none());
    assert!(server.handle_line("   ").await.is_none());

    let garbage = server.handle_line("{not json").await.unwrap();
    assert_eq!(garbage.error.unwrap().code, ErrorCode::ParseError.as_i32());
}

#[tokio::test]
async fn duplicate_tool_names_are_rejected() {
    let configs = parse_tool_configs(
        &json!([
            {"name": "dup", "url": "https://a.example.com"},
            {"name": "dup", "url": "https://b.example.com"}
        ])
        .to_string(),
    )
    .unwrap();
    let err = App::build(
        configs,
        RecordingExecutor::new(),
        Arc::new(StaticCredentialProvider::new()),
        None,
        Logger::new("test"),
    )
    .err()
    .unwrap();
    assert!(err.message.contains("configured more than once"));
}

#[tokio::test]
async fn cancelled_notification_aborts_the_running_call() {
    let executor = Arc::new(StalledExecutor::default());
    let server = Arc::new(server(executor.clone()));

    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            server
                .handle_line(&request(
                    11,
                    "tools/call",
                    json!({"name": "get_weather", "arguments": {"city": "Oslo"}}),
                ))
                .await
        })
    };
    executor.started.notified().await;
    assert_eq!(server.in_flight_count(), 1);

    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": {"requestId": 11, "reason": "user aborted"}
    })
    .to_string();
    assert!(server.handle_line(&cancel).await.is_none());

    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("call stops once cancelled")
        .unwrap();
    assert!(outcome.is_none());
    assert_eq!(server.in_flight_count(), 0);
}

#[tokio::test]
async fn shutdown_token_cancels_running_calls() {
    let executor = Arc::new(StalledExecutor::default());
    let server = Arc::new(server(executor.clone()));

    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            server
                .handle_line(&request(12, "tools/call", json!({"name": "ping"})))
                .await
        })
    };
    executor.started.notified().await;
    server.shutdown_token().cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("call stops on shutdown")
        .unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn cancelling_an_unknown_request_is_ignored() {
    let server = server(RecordingExecutor::new());
    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": {"requestId": "nope"}
    })
    .to_string();
    assert!(server.handle_line(&cancel).await.is_none());
    assert_eq!(server.in_flight_count(), 0);
}
