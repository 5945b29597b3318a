//! A declaratively configured HTTP call exposed as one agent-callable tool.

pub mod contract;
pub mod execute;
pub mod optimize;
pub mod request;
pub mod resolver;

use crate::constants::protocols;
use crate::errors::ToolError;
use crate::mcp::catalog::ToolDef;
use crate::services::credentials::CredentialProvider;
use crate::services::logger::Logger;
use crate::services::tool_config::{AuthenticationMode, ToolConfig};
use crate::services::trace::{NoopTraceSink, TraceSink};
use crate::services::transport::{auth_from_value, AuthRef, HttpExecutor, RequestDescriptor};
use crate::utils::expression::{ExpressionEvaluator, SandboxedEvaluator};
use contract::{build_contract, ParameterContract};
use execute::ExecutionEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];
const DIGEST_AUTH: &str = "httpDigestAuth";
const DEFAULT_DESCRIPTION: &str = "Makes an HTTP request and returns the response data";

/// Collaborators a tool talks to. Only the executor is mandatory; tracing is
/// off unless a sink is given.
#[derive(Clone)]
pub struct ToolDeps {
    executor: Arc<dyn HttpExecutor>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    trace: Arc<dyn TraceSink>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    logger: Logger,
}

impl ToolDeps {
    pub fn new(executor: Arc<dyn HttpExecutor>) -> Self {
        Self {
            executor,
            credentials: None,
            trace: Arc::new(NoopTraceSink),
            evaluator: Arc::new(SandboxedEvaluator::new()),
            logger: Logger::new("http-tool"),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

pub struct HttpTool {
    config: ToolConfig,
    contract: ParameterContract,
    engine: ExecutionEngine,
    credentials: Option<Arc<dyn CredentialProvider>>,
    trace: Arc<dyn TraceSink>,
    logger: Logger,
}

impl std::fmt::Debug for HttpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTool")
            .field("name", &self.config.name)
            .field("method", &self.config.method)
            .field("url", &self.config.url)
            .finish()
    }
}

fn validate_request_shape(config: &ToolConfig) -> Result<(), ToolError> {
    let method = config.method.trim().to_uppercase();
    if !METHODS.contains(&method.as_str()) {
        return Err(ToolError::configuration(format!(
            "Unsupported HTTP method '{}'",
            config.method
        ))
        .with_hint(format!("Use one of: {}", METHODS.join(", "))));
    }
    let url = config.url.trim().to_lowercase();
    let allowed = protocols::ALLOWED_HTTP
        .iter()
        .any(|scheme| url.starts_with(&format!("{}//", scheme)));
    if !allowed {
        return Err(ToolError::configuration(format!(
            "URL '{}' must start with http:// or https://",
            config.url
        )));
    }
    match config.authentication {
        AuthenticationMode::PredefinedCredentialType
            if config.node_credential_type.as_deref().unwrap_or("").trim().is_empty() =>
        {
            Err(ToolError::configuration(
                "Authentication 'predefinedCredentialType' needs nodeCredentialType",
            ))
        }
        AuthenticationMode::GenericCredentialType
            if config.generic_auth_type.as_deref().unwrap_or("").trim().is_empty() =>
        {
            Err(ToolError::configuration(
                "Authentication 'genericCredentialType' needs genericAuthType",
            ))
        }
        AuthenticationMode::GenericCredentialType
            if config.generic_auth_type.as_deref().map(str::trim) == Some(DIGEST_AUTH) =>
        {
            Err(digest_unsupported())
        }
        _ => Ok(()),
    }
}

fn credential_text(creds: &Value, keys: &[&str], kind: &str) -> Result<String, ToolError> {
    keys.iter()
        .find_map(|key| creds.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ToolError::configuration(format!(
                "Credentials for '{}' are missing '{}'",
                kind, keys[0]
            ))
        })
}

fn digest_unsupported() -> ToolError {
    ToolError::configuration("Generic auth type 'httpDigestAuth' is not supported")
        .with_hint("Use httpBasicAuth, or a header credential carrying the Authorization value")
}

/// Maps generic credential types onto request auth. Digest is refused rather
/// than sent as preemptive Basic auth.
pub fn generic_auth(kind: &str, creds: &Value) -> Result<AuthRef, ToolError> {
    match kind {
        DIGEST_AUTH => Err(digest_unsupported()),
        "httpBasicAuth" => Ok(AuthRef::Basic {
            user: credential_text(creds, &["user", "username"], kind)?,
            password: credential_text(creds, &["password"], kind)?,
        }),
        "httpHeaderAuth" => Ok(AuthRef::Header {
            name: credential_text(creds, &["name"], kind)?,
            value: credential_text(creds, &["value"], kind)?,
        }),
        "httpQueryAuth" => Ok(AuthRef::Query {
            name: credential_text(creds, &["name"], kind)?,
            value: credential_text(creds, &["value"], kind)?,
        }),
        "httpBearerAuth" => Ok(AuthRef::Bearer {
            token: credential_text(creds, &["token", "accessToken"], kind)?,
        }),
        _ => auth_from_value(creds).ok_or_else(|| {
            ToolError::configuration(format!(
                "Credentials for '{}' hold no usable token, user/password or header",
                kind
            ))
        }),
    }
}

/// A non-empty array of objects, given as a value or as JSON text, is a
/// multi-item invocation.
fn split_items(input: &Value) -> Option<Vec<Value>> {
    let parsed;
    let array = match input {
        Value::Array(items) => items,
        Value::String(text) if text.trim_start().starts_with('[') => {
            parsed = serde_json::from_str::<Value>(text.trim()).ok()?;
            parsed.as_array()?
        }
        _ => return None,
    };
    if array.is_empty() || !array.iter().all(|item| item.is_object()) {
        return None;
    }
    Some(array.clone())
}

impl HttpTool {
    /// Validates the configuration and derives the parameter contract.
    /// Any configuration error means no tool is produced.
    pub fn from_config(config: ToolConfig, deps: ToolDeps) -> Result<Self, ToolError> {
        validate_request_shape(&config)?;
        let contract = build_contract(&config)?;
        let logger = deps.logger.child(&config.name);
        let engine = ExecutionEngine::new(deps.executor, deps.evaluator, logger.clone(), &config.options);
        logger.debug(
            "Tool configured",
            Some(&json!({"method": config.method, "url": config.url, "schema": contract.input_schema()})),
        );
        Ok(Self {
            config,
            contract,
            engine,
            credentials: deps.credentials,
            trace: deps.trace,
            logger,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn contract(&self) -> &ParameterContract {
        &self.contract
    }

    pub fn input_schema(&self) -> &Value {
        self.contract.input_schema()
    }

    pub fn description(&self) -> String {
        let base = self.config.tool_description.trim();
        let base = if base.is_empty() { DEFAULT_DESCRIPTION } else { base };
        format!("{}\n\n{}", base, self.contract.describe())
    }

    pub fn definition(&self) -> ToolDef {
        ToolDef {
            name: self.config.name.clone(),
            description: self.description(),
            input_schema: self.input_schema().clone(),
        }
    }

    pub async fn invoke(&self, input: Value) -> String {
        self.invoke_with_cancel(input, &CancellationToken::new()).await
    }

    /// Never fails: errors come back as text and are recorded to the trace.
    pub async fn invoke_with_cancel(&self, input: Value, cancel: &CancellationToken) -> String {
        let index = self.trace.add_input(&input);
        match self.run(&input, cancel).await {
            Ok(text) => {
                self.trace.add_output(index, Ok(&text));
                text
            }
            Err(err) => {
                self.logger.warn(
                    "Invocation failed",
                    Some(&json!({"kind": err.kind, "message": err.message})),
                );
                self.trace.add_output(index, Err(&err));
                err.to_agent_text()
            }
        }
    }

    async fn run(&self, input: &Value, cancel: &CancellationToken) -> Result<String, ToolError> {
        let auth = self.resolve_auth().await?;
        let full_response = self.config.options.response.full_response;

        let Some(items) = split_items(input) else {
            let request = self.prepare(input, &auth)?;
            let response = self.engine.execute(&request, cancel).await?;
            return Ok(optimize::optimize(&response, &self.config.optimize, full_response));
        };

        self.logger
            .info("Multi-item invocation", Some(&json!({"items": items.len()})));
        let requests = items
            .iter()
            .map(|item| self.prepare(item, &auth))
            .collect::<Result<Vec<_>, _>>()?;
        let responses = self
            .engine
            .execute_batch(&requests, self.config.options.batching.as_ref(), cancel)
            .await?;
        let outputs: Vec<Value> = responses
            .iter()
            .map(|response| {
                let text = optimize::optimize(response, &self.config.optimize, full_response);
                serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
            })
            .collect();
        Ok(serde_json::to_string_pretty(&outputs).unwrap_or_default())
    }

    fn prepare(&self, input: &Value, auth: &AuthRef) -> Result<RequestDescriptor, ToolError> {
        let resolved = resolver::resolve(input, &self.contract)?;
        let request = request::build(&resolved, &self.config, &self.contract, auth)?;
        self.logger
            .debug("Request built", Some(&request.to_log_value()));
        Ok(request)
    }

    async fn resolve_auth(&self) -> Result<AuthRef, ToolError> {
        match self.config.authentication {
            AuthenticationMode::None => Ok(AuthRef::None),
            AuthenticationMode::PredefinedCredentialType => Ok(AuthRef::CredentialType(
                self.config
                    .node_credential_type
                    .clone()
                    .unwrap_or_default(),
            )),
            AuthenticationMode::GenericCredentialType => {
                let kind = self.config.generic_auth_type.clone().unwrap_or_default();
                let provider = self.credentials.as_ref().ok_or_else(|| {
                    ToolError::configuration(format!(
                        "No credential provider available for '{}'",
                        kind
                    ))
                })?;
                let creds = provider.get_credentials(&kind).await?;
                generic_auth(&kind, &creds)
            }
        }
    }
}
