use crate::constants::{env, network};
use crate::errors::ToolError;
use crate::services::credentials::CredentialProvider;
use crate::services::logger::Logger;
use crate::services::tool_config::{ArrayFormat, ResponseFormat};
use crate::utils::expression::to_text;
use crate::utils::redact::redact_object;
use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthRef {
    None,
    /// Resolved by the executor itself from the named credential.
    CredentialType(String),
    Basic { user: String, password: String },
    Header { name: String, value: String },
    Query { name: String, value: String },
    Bearer { token: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    Form(Map<String, Value>),
}

/// One fully resolved HTTP call. Built fresh per page and per item.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    pub query: Map<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub body: RequestBody,
    pub auth: AuthRef,
    pub timeout_ms: u64,
    pub allow_unauthorized_certs: bool,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub proxy: Option<String>,
    pub array_format: ArrayFormat,
    pub lowercase_headers: bool,
    pub response_format: ResponseFormat,
}

impl RequestDescriptor {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            query: Map::new(),
            headers: BTreeMap::new(),
            body: RequestBody::None,
            auth: AuthRef::None,
            timeout_ms: network::TIMEOUT_REQUEST_MS,
            allow_unauthorized_certs: false,
            follow_redirects: true,
            max_redirects: network::MAX_REDIRECTS,
            proxy: None,
            array_format: ArrayFormat::Brackets,
            lowercase_headers: true,
            response_format: ResponseFormat::Autodetect,
        }
    }

    /// Header lookup ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Loggable view with credentials masked.
    pub fn to_log_value(&self) -> Value {
        let body = match &self.body {
            RequestBody::None => Value::Null,
            RequestBody::Json(value) => value.clone(),
            RequestBody::Form(map) => Value::Object(map.clone()),
        };
        let auth = match &self.auth {
            AuthRef::None => Value::Null,
            AuthRef::CredentialType(name) => json!({"credentialType": name}),
            AuthRef::Basic { user, .. } => json!({"basic": {"user": user, "password": "x"}}),
            AuthRef::Header { name, .. } => json!({"header": name}),
            AuthRef::Query { name, .. } => json!({"query": name}),
            AuthRef::Bearer { .. } => json!({"bearer": {"token": "x"}}),
        };
        redact_object(
            &json!({
                "method": self.method,
                "url": self.url,
                "query": self.query,
                "headers": self.headers,
                "body": body,
                "auth": auth,
            }),
            512,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status_code: u16,
    /// Header names are lower-case.
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
    /// The body was cut at the capture limit.
    pub truncated: bool,
}

impl RawResponse {
    pub fn from_bytes(status_code: u16, headers: BTreeMap<String, String>, bytes: Vec<u8>) -> Self {
        let body = match String::from_utf8(bytes) {
            Ok(text) => ResponseBody::Text(text),
            Err(err) => ResponseBody::Binary(err.into_bytes()),
        };
        Self {
            status_code,
            headers,
            body,
            truncated: false,
        }
    }

    /// Decodes `bytes` the way `format` asks. `text` and `json` decode lossily
    /// and label the body accordingly, `file` always keeps raw bytes.
    pub fn decode(
        status_code: u16,
        mut headers: BTreeMap<String, String>,
        bytes: Vec<u8>,
        format: ResponseFormat,
    ) -> Self {
        let label = match format {
            ResponseFormat::Autodetect => return Self::from_bytes(status_code, headers, bytes),
            ResponseFormat::File => {
                return Self {
                    status_code,
                    headers,
                    body: ResponseBody::Binary(bytes),
                    truncated: false,
                }
            }
            ResponseFormat::Json => "application/json",
            ResponseFormat::Text => "text/plain",
        };
        headers.insert("content-type".to_string(), label.to_string());
        Self {
            status_code,
            headers,
            body: ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned()),
            truncated: false,
        }
    }

    pub fn text(status_code: u16, content_type: &str, body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        if !content_type.is_empty() {
            headers.insert("content-type".to_string(), content_type.to_string());
        }
        Self {
            status_code,
            headers,
            body: ResponseBody::Text(body.into()),
            truncated: false,
        }
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .map(|value| value.as_str())
            .unwrap_or("")
    }

    pub fn body_text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Text(text) => Some(text),
            ResponseBody::Binary(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// The body as JSON when it is text holding valid JSON.
    pub fn body_json(&self) -> Option<Value> {
        self.body_text()
            .and_then(|text| serde_json::from_str::<Value>(text).ok())
    }

    /// Body for expression contexts: JSON when it parses, text otherwise.
    pub fn body_value(&self) -> Value {
        match self.body_json() {
            Some(value) => value,
            None => self
                .body_text()
                .map(|text| Value::String(text.to_string()))
                .unwrap_or(Value::Null),
        }
    }

    pub fn headers_value(&self) -> Value {
        Value::Object(
            self.headers
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect(),
        )
    }
}

/// The narrow transport seam: one request in, one response out, whatever the
/// status code. Errors mean no response was obtained.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, ToolError>;

    async fn send_with_credential_type(
        &self,
        credential_type: &str,
        request: &RequestDescriptor,
    ) -> Result<RawResponse, ToolError>;
}

/// Flattens query-style pairs; arrays follow `format`, nested objects are
/// sent as JSON text.
pub fn encode_pairs(values: &Map<String, Value>, format: ArrayFormat) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (key, value) in values.iter() {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    let name = match format {
                        ArrayFormat::Repeat => key.clone(),
                        ArrayFormat::Brackets => format!("{}[]", key),
                        ArrayFormat::Indices => format!("{}[{}]", key, idx),
                    };
                    out.push((name, to_text(item)));
                }
            }
            other => out.push((key.clone(), to_text(other))),
        }
    }
    out
}

pub fn encode_query(values: &Map<String, Value>, format: ArrayFormat) -> String {
    serde_urlencoded::to_string(encode_pairs(values, format)).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    follow_redirects: bool,
    max_redirects: usize,
    insecure: bool,
    proxy: Option<String>,
}

#[derive(Clone)]
pub struct ReqwestExecutor {
    logger: Logger,
    credentials: Option<Arc<dyn CredentialProvider>>,
    clients: Arc<Mutex<HashMap<ClientKey, Client>>>,
    max_capture_bytes: usize,
}

impl ReqwestExecutor {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("http"),
            credentials: None,
            clients: Arc::new(Mutex::new(HashMap::new())),
            max_capture_bytes: resolve_max_capture_bytes(),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Overrides the per-response capture limit read from the environment.
    pub fn with_max_capture_bytes(mut self, max_bytes: usize) -> Self {
        self.max_capture_bytes = max_bytes.max(1);
        self
    }

    fn get_client(&self, request: &RequestDescriptor) -> Result<Client, ToolError> {
        let key = ClientKey {
            follow_redirects: request.follow_redirects,
            max_redirects: request.max_redirects,
            insecure: request.allow_unauthorized_certs,
            proxy: request.proxy.clone().filter(|p| !p.trim().is_empty()),
        };
        let mut guard = self
            .clients
            .lock()
            .map_err(|_| ToolError::internal("Failed to access HTTP client cache"))?;
        if let Some(existing) = guard.get(&key) {
            return Ok(existing.clone());
        }
        let mut builder = Client::builder().user_agent(network::USER_AGENT);
        if key.follow_redirects {
            // The limit counts the original URL as well as every hop.
            builder = builder.redirect(reqwest::redirect::Policy::limited(
                key.max_redirects.saturating_add(1),
            ));
        } else {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }
        if key.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(proxy) = key.proxy.as_ref() {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|err| {
                ToolError::configuration(format!("Invalid proxy '{}': {}", proxy, err))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| ToolError::internal(format!("Failed to build HTTP client: {}", err)))?;
        guard.insert(key, client.clone());
        Ok(client)
    }

    async fn auth_from_credentials(&self, credential_type: &str) -> Result<AuthRef, ToolError> {
        let provider = self.credentials.as_ref().ok_or_else(|| {
            ToolError::configuration(format!(
                "No credential provider available for '{}'",
                credential_type
            ))
        })?;
        let creds = provider.get_credentials(credential_type).await?;
        auth_from_value(&creds).ok_or_else(|| {
            ToolError::configuration(format!(
                "Credentials for '{}' hold no usable token, user/password or header",
                credential_type
            ))
        })
    }

    async fn execute(&self, request: &RequestDescriptor, auth: &AuthRef) -> Result<RawResponse, ToolError> {
        let client = self.get_client(request)?;
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            ToolError::configuration(format!("Unsupported HTTP method '{}'", request.method))
        })?;
        let mut url = url::Url::parse(&request.url)
            .map_err(|err| ToolError::configuration(format!("Invalid URL '{}': {}", request.url, err)))?;

        let mut query = request.query.clone();
        if let AuthRef::Query { name, value } = auth {
            query.insert(name.clone(), Value::String(value.clone()));
        }
        let pairs = encode_pairs(&query, request.array_format);
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs.iter());
        }

        let mut headers = HeaderMap::new();
        for (name, value) in request.headers.iter() {
            insert_header(&mut headers, name, value)?;
        }
        match auth {
            AuthRef::Basic { user, password } => {
                let encoded =
                    base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password));
                insert_header(&mut headers, "authorization", &format!("Basic {}", encoded))?;
            }
            AuthRef::Bearer { token } => {
                let value = if token.to_lowercase().starts_with("bearer ") {
                    token.clone()
                } else {
                    format!("Bearer {}", token)
                };
                insert_header(&mut headers, "authorization", &value)?;
            }
            AuthRef::Header { name, value } => insert_header(&mut headers, name, value)?,
            _ => {}
        }

        let mut req = client
            .request(method, url)
            .timeout(Duration::from_millis(request.timeout_ms.max(1)));
        match &request.body {
            RequestBody::None => {}
            RequestBody::Json(value) => {
                if !headers.contains_key(reqwest::header::CONTENT_TYPE) {
                    headers.insert(
                        reqwest::header::CONTENT_TYPE,
                        HeaderValue::from_static("application/json"),
                    );
                }
                req = req.body(serde_json::to_vec(value).map_err(|err| {
                    ToolError::internal(format!("Failed to encode JSON body: {}", err))
                })?);
            }
            RequestBody::Form(map) => {
                headers.insert(
                    reqwest::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                req = req.body(encode_query(map, request.array_format));
            }
        }
        req = req.headers(headers);

        self.logger
            .debug("Sending request", Some(&request.to_log_value()));
        let response = req.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let response_headers = headers_to_map(response.headers());
        let capture = read_capped(response, self.max_capture_bytes).await?;
        self.logger.debug(
            "Received response",
            Some(&json!({
                "status": status,
                "bytes": capture.buffer.len(),
                "truncated": capture.truncated,
            })),
        );
        let buffer = if capture.truncated {
            trim_partial_utf8(capture.buffer)
        } else {
            capture.buffer
        };
        let mut decoded = RawResponse::decode(status, response_headers, buffer, request.response_format);
        decoded.truncated = capture.truncated;
        Ok(decoded)
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, ToolError> {
        match &request.auth {
            AuthRef::CredentialType(name) => self.send_with_credential_type(name, request).await,
            auth => self.execute(request, auth).await,
        }
    }

    async fn send_with_credential_type(
        &self,
        credential_type: &str,
        request: &RequestDescriptor,
    ) -> Result<RawResponse, ToolError> {
        let auth = self.auth_from_credentials(credential_type).await?;
        self.execute(request, &auth).await
    }
}

/// Picks the auth shape a credential object describes: a token, a
/// user/password pair, or a header name/value pair.
pub fn auth_from_value(creds: &Value) -> Option<AuthRef> {
    let text = |key: &str| creds.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());
    if let Some(token) = text("accessToken")
        .or_else(|| text("token"))
        .or_else(|| text("apiKey"))
        .or_else(|| {
            creds
                .get("oauthTokenData")
                .and_then(|data| data.get("access_token"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
    {
        return Some(AuthRef::Bearer { token });
    }
    if let Some(user) = text("user").or_else(|| text("username")) {
        return Some(AuthRef::Basic {
            user,
            password: text("password").unwrap_or_default(),
        });
    }
    if let (Some(name), Some(value)) = (text("name"), text("value")) {
        return Some(AuthRef::Header { name, value });
    }
    None
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), ToolError> {
    let header = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ToolError::configuration(format!("Invalid header name '{}'", name)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| ToolError::configuration(format!("Invalid value for header '{}'", name)))?;
    headers.insert(header, value);
    Ok(())
}

fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers.iter() {
        if let Ok(text) = value.to_str() {
            out.entry(name.as_str().to_lowercase())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(text);
                })
                .or_insert_with(|| text.to_string());
        }
    }
    out
}

fn resolve_max_capture_bytes() -> usize {
    std::env::var(env::MAX_CAPTURE_BYTES)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(network::MAX_CAPTURE_BYTES)
}

struct BodyCapture {
    buffer: Vec<u8>,
    truncated: bool,
}

async fn read_capped(response: reqwest::Response, max_bytes: usize) -> Result<BodyCapture, ToolError> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk: bytes::Bytes = chunk.map_err(map_reqwest_error)?;
        let remaining = max_bytes.saturating_sub(buffer.len());
        if chunk.len() <= remaining {
            buffer.extend_from_slice(&chunk);
        } else {
            buffer.extend_from_slice(&chunk[..remaining]);
            truncated = true;
            break;
        }
    }
    Ok(BodyCapture { buffer, truncated })
}

/// Drops a multi-byte character left incomplete by the capture cut. Bytes
/// that are invalid for other reasons are kept as they are.
fn trim_partial_utf8(mut bytes: Vec<u8>) -> Vec<u8> {
    if let Err(err) = std::str::from_utf8(&bytes) {
        if err.error_len().is_none() {
            bytes.truncate(err.valid_up_to());
        }
    }
    bytes
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> ToolError {
    if err.is_timeout() {
        return ToolError::timeout("HTTP request timed out");
    }
    ToolError::http(err.status().map(|s| s.as_u16()), err.to_string())
}
