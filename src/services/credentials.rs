use crate::constants::env::CREDENTIAL_PREFIX;
use crate::errors::ToolError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Read-only source of credential material, keyed by credential type name
/// (`httpBasicAuth`, `httpHeaderAuth`, an API-specific name, ...).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self, name: &str) -> Result<Value, ToolError>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    entries: HashMap<String, Value>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.entries.insert(name.to_string(), value);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credentials(&self, name: &str) -> Result<Value, ToolError> {
        self.entries.get(name).cloned().ok_or_else(|| {
            ToolError::configuration(format!("No credentials configured for '{}'", name))
        })
    }
}

/// Reads `HTTP_TOOL_CREDENTIAL_<NAME>` where `<NAME>` is the credential name
/// upper-cased with non-alphanumerics mapped to `_`; the value holds JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    pub fn variable_name(name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", CREDENTIAL_PREFIX, suffix)
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn get_credentials(&self, name: &str) -> Result<Value, ToolError> {
        let var = Self::variable_name(name);
        let raw = std::env::var(&var).map_err(|_| {
            ToolError::configuration(format!("No credentials configured for '{}'", name))
                .with_hint(format!("Set {} to a JSON object", var))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            ToolError::configuration(format!("{} does not hold valid JSON: {}", var, err))
        })
    }
}
