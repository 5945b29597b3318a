#![allow(dead_code)]

use async_trait::async_trait;
use http_tool::errors::ToolError;
use http_tool::managers::http_tool::{HttpTool, ToolDeps};
use http_tool::services::credentials::StaticCredentialProvider;
use http_tool::services::tool_config::parse_tool_configs;
use http_tool::services::trace::MemoryTraceSink;
use http_tool::services::transport::{HttpExecutor, RawResponse, RequestDescriptor};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub static ENV_LOCK: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub credential_type: Option<String>,
    pub request: RequestDescriptor,
}

/// Replays scripted responses in order and records every request. Once the
/// script runs out it answers `200 {}`.
#[derive(Default)]
pub struct RecordingExecutor {
    script: Mutex<VecDeque<Result<RawResponse, ToolError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_responses(responses: Vec<Result<RawResponse, ToolError>>) -> Arc<Self> {
        let executor = Self::default();
        *executor.script.lock().unwrap() = responses.into();
        Arc::new(executor)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last(&self) -> RecordedCall {
        self.calls().pop().expect("at least one request")
    }

    fn next(&self, credential_type: Option<&str>, request: &RequestDescriptor) -> Result<RawResponse, ToolError> {
        self.calls.lock().unwrap().push(RecordedCall {
            credential_type: credential_type.map(|s| s.to_string()),
            request: request.clone(),
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawResponse::text(200, "application/json", "{}")))
    }
}

#[async_trait]
impl HttpExecutor for RecordingExecutor {
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, ToolError> {
        self.next(None, request)
    }

    async fn send_with_credential_type(
        &self,
        credential_type: &str,
        request: &RequestDescriptor,
    ) -> Result<RawResponse, ToolError> {
        self.next(Some(credential_type), request)
    }
}

pub fn json_response(body: Value) -> Result<RawResponse, ToolError> {
    Ok(RawResponse::text(200, "application/json", body.to_string()))
}

pub fn text_response(content_type: &str, body: &str) -> Result<RawResponse, ToolError> {
    Ok(RawResponse::text(200, content_type, body))
}

pub struct Harness {
    pub tool: HttpTool,
    pub executor: Arc<RecordingExecutor>,
    pub trace: Arc<MemoryTraceSink>,
}

pub fn try_tool(config: Value, executor: Arc<RecordingExecutor>) -> Result<Harness, ToolError> {
    try_tool_with_credentials(config, executor, StaticCredentialProvider::new())
}

pub fn try_tool_with_credentials(
    config: Value,
    executor: Arc<RecordingExecutor>,
    credentials: StaticCredentialProvider,
) -> Result<Harness, ToolError> {
    let config = parse_tool_configs(&config.to_string())
        .expect("config parses")
        .remove(0);
    let trace = Arc::new(MemoryTraceSink::new());
    let deps = ToolDeps::new(executor.clone())
        .with_credentials(Arc::new(credentials))
        .with_trace(trace.clone());
    let tool = HttpTool::from_config(config, deps)?;
    Ok(Harness {
        tool,
        executor,
        trace,
    })
}

pub fn tool(config: Value, executor: Arc<RecordingExecutor>) -> Harness {
    try_tool(config, executor).expect("tool builds")
}
