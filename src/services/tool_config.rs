//! Declarative configuration of HTTP tools, read from JSON.
//!
//! Field names follow the node configuration (`toolDescription`, `sendQuery`,
//! `parametersQuery`, `placeholderDefinitions`, ...). Parameter lists accept
//! either a bare array or the `{ "values": [...] }` wrapper.

use crate::constants::{batching, network, optimize, pagination};
use crate::errors::ToolError;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read tool config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tool config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("tool config {0} defines no tools")]
    Empty(PathBuf),
}

impl From<ConfigLoadError> for ToolError {
    fn from(err: ConfigLoadError) -> Self {
        let hint = match &err {
            ConfigLoadError::Io { .. } => "Check --config or HTTP_TOOL_CONFIG",
            ConfigLoadError::Parse { .. } => "The file must hold one tool object or an array of them",
            ConfigLoadError::Empty(_) => "Add at least one tool definition",
        };
        ToolError::configuration(err.to_string()).with_hint(hint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AuthenticationMode {
    #[default]
    None,
    PredefinedCredentialType,
    GenericCredentialType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SpecifyMode {
    #[default]
    Keypair,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueProvider {
    ModelRequired,
    ModelOptional,
    #[serde(rename = "fieldValue", alias = "fixedValue")]
    FieldValue,
}

impl ValueProvider {
    pub fn is_model_facing(self) -> bool {
        !matches!(self, ValueProvider::FieldValue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDecl {
    pub name: String,
    pub value_provider: ValueProvider,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PlaceholderType {
    #[default]
    String,
    Number,
    Boolean,
    Json,
}

impl PlaceholderType {
    pub fn schema_type(self) -> &'static str {
        match self {
            PlaceholderType::String => "string",
            PlaceholderType::Number => "number",
            PlaceholderType::Boolean => "boolean",
            PlaceholderType::Json => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: PlaceholderType,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ArrayFormat {
    Repeat,
    #[default]
    Brackets,
    Indices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BodyContentType {
    #[default]
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "form-urlencoded", alias = "formUrlencoded")]
    FormUrlencoded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ResponseType {
    #[default]
    Json,
    Html,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FieldsToInclude {
    #[default]
    All,
    Selected,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ResponseFormat {
    #[default]
    Autodetect,
    Json,
    Text,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum OnError {
    #[default]
    Error,
    CustomJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PaginationMode {
    #[default]
    Off,
    UpdateAParameterInEachRequest,
    #[serde(rename = "responseContainsNextURL", alias = "responseContainsNextUrl")]
    ResponseContainsNextUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CompleteWhen {
    #[default]
    ResponseIsEmpty,
    ReceiveSpecificStatusCodes,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UpdateTarget {
    #[default]
    #[serde(rename = "qs", alias = "query")]
    Query,
    #[serde(rename = "headers", alias = "header")]
    Headers,
    #[serde(rename = "body")]
    Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParameter {
    #[serde(default, rename = "type")]
    pub target: UpdateTarget,
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaginationOptions {
    pub pagination_mode: PaginationMode,
    #[serde(rename = "nextURL", alias = "nextUrl")]
    pub next_url: String,
    #[serde(deserialize_with = "deserialize_list")]
    pub parameters: Vec<PaginationParameter>,
    pub pagination_complete_when: CompleteWhen,
    pub status_codes_when_complete: String,
    pub complete_expression: String,
    pub limit_pages_fetched: bool,
    pub max_requests: usize,
    pub request_interval: u64,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            pagination_mode: PaginationMode::Off,
            next_url: String::new(),
            parameters: Vec::new(),
            pagination_complete_when: CompleteWhen::ResponseIsEmpty,
            status_codes_when_complete: String::new(),
            complete_expression: String::new(),
            limit_pages_fetched: false,
            max_requests: pagination::MAX_REQUESTS,
            request_interval: pagination::REQUEST_INTERVAL_MS,
        }
    }
}

impl PaginationOptions {
    pub fn completion_status_codes(&self) -> Vec<u16> {
        self.status_codes_when_complete
            .split(',')
            .filter_map(|code| code.trim().parse::<u16>().ok())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchingOptions {
    pub batch_size: i64,
    pub batch_interval: u64,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            batch_size: batching::BATCH_SIZE,
            batch_interval: batching::BATCH_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedirectOptions {
    pub follow_redirects: bool,
    pub max_redirects: usize,
}

impl Default for RedirectOptions {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            max_redirects: network::MAX_REDIRECTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseOptions {
    pub full_response: bool,
    pub never_error: bool,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    pub query_parameter_arrays: ArrayFormat,
    pub batching: Option<BatchingOptions>,
    pub custom_error_json: Value,
    pub allow_unauthorized_certs: bool,
    pub lowercase_headers: bool,
    pub on_error: OnError,
    pub pagination: Option<PaginationOptions>,
    pub proxy: Option<String>,
    pub redirect: RedirectOptions,
    pub response: ResponseOptions,
    pub timeout: u64,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            query_parameter_arrays: ArrayFormat::Brackets,
            batching: None,
            custom_error_json: Value::Object(Default::default()),
            allow_unauthorized_certs: false,
            lowercase_headers: true,
            on_error: OnError::Error,
            pagination: None,
            proxy: None,
            redirect: RedirectOptions::default(),
            response: ResponseOptions::default(),
            timeout: network::TIMEOUT_REQUEST_MS,
        }
    }
}

impl RequestOptions {
    /// `customErrorJson` may be an object or a string holding JSON.
    pub fn custom_error_value(&self) -> Value {
        match &self.custom_error_json {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizeOptions {
    pub optimize_response: bool,
    pub response_type: ResponseType,
    pub data_field: String,
    pub fields_to_include: FieldsToInclude,
    pub fields: String,
    pub css_selector: String,
    pub only_content: bool,
    pub elements_to_omit: String,
    pub truncate_response: bool,
    pub max_length: usize,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            optimize_response: false,
            response_type: ResponseType::Json,
            data_field: String::new(),
            fields_to_include: FieldsToInclude::All,
            fields: String::new(),
            css_selector: optimize::DEFAULT_CSS_SELECTOR.to_string(),
            only_content: false,
            elements_to_omit: String::new(),
            truncate_response: false,
            max_length: optimize::MAX_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolConfig {
    pub name: String,
    pub tool_description: String,
    pub method: String,
    pub url: String,
    pub authentication: AuthenticationMode,
    pub node_credential_type: Option<String>,
    pub generic_auth_type: Option<String>,
    pub send_query: bool,
    pub specify_query: SpecifyMode,
    #[serde(deserialize_with = "deserialize_list")]
    pub parameters_query: Vec<ParameterDecl>,
    pub json_query: String,
    pub send_headers: bool,
    pub specify_headers: SpecifyMode,
    #[serde(deserialize_with = "deserialize_list")]
    pub parameters_headers: Vec<ParameterDecl>,
    pub json_headers: String,
    pub send_body: bool,
    pub specify_body: SpecifyMode,
    pub content_type: BodyContentType,
    #[serde(deserialize_with = "deserialize_list")]
    pub parameters_body: Vec<ParameterDecl>,
    pub json_body: String,
    #[serde(deserialize_with = "deserialize_list")]
    pub placeholder_definitions: Vec<PlaceholderSpec>,
    #[serde(flatten)]
    pub optimize: OptimizeOptions,
    pub options: RequestOptions,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            tool_description: String::new(),
            method: "GET".to_string(),
            url: String::new(),
            authentication: AuthenticationMode::None,
            node_credential_type: None,
            generic_auth_type: None,
            send_query: false,
            specify_query: SpecifyMode::Keypair,
            parameters_query: Vec::new(),
            json_query: String::new(),
            send_headers: false,
            specify_headers: SpecifyMode::Keypair,
            parameters_headers: Vec::new(),
            json_headers: String::new(),
            send_body: false,
            specify_body: SpecifyMode::Keypair,
            content_type: BodyContentType::Json,
            parameters_body: Vec::new(),
            json_body: String::new(),
            placeholder_definitions: Vec::new(),
            optimize: OptimizeOptions::default(),
            options: RequestOptions::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListShape<T> {
    Plain(Vec<T>),
    Wrapped(std::collections::BTreeMap<String, Vec<T>>),
    Missing(()),
}

fn deserialize_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match ListShape::<T>::deserialize(deserializer)? {
        ListShape::Plain(items) => items,
        ListShape::Wrapped(map) => map.into_values().flatten().collect(),
        ListShape::Missing(()) => Vec::new(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigFile {
    Many(Vec<ToolConfig>),
    One(Box<ToolConfig>),
}

pub fn parse_tool_configs(raw: &str) -> Result<Vec<ToolConfig>, serde_json::Error> {
    Ok(match serde_json::from_str::<ConfigFile>(raw)? {
        ConfigFile::Many(items) => items,
        ConfigFile::One(item) => vec![*item],
    })
}

pub fn load_tool_configs(path: &Path) -> Result<Vec<ToolConfig>, ConfigLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let configs = parse_tool_configs(&raw).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if configs.is_empty() {
        return Err(ConfigLoadError::Empty(path.to_path_buf()));
    }
    Ok(configs)
}
