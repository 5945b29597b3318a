use crate::errors::{McpError, ToolError};
use crate::managers::http_tool::HttpTool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Function-calling clients reject an object schema without `properties`
/// and a `required` list naming nothing; both are made explicit here.
pub fn normalize_input_schema(schema: &Value) -> Value {
    let Value::Object(map) = schema else {
        return schema.clone();
    };
    let mut out = map.clone();
    if out.get("type").and_then(|v| v.as_str()) == Some("object") {
        out.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
        let empty_required = out
            .get("required")
            .and_then(|v| v.as_array())
            .map(|items| items.is_empty())
            .unwrap_or(false);
        if empty_required {
            out.remove("required");
        }
    }
    if let Some(Value::Object(props)) = out.get("properties").cloned() {
        let normalized = props
            .iter()
            .map(|(key, value)| (key.clone(), normalize_input_schema(value)))
            .collect();
        out.insert("properties".to_string(), Value::Object(normalized));
    }
    Value::Object(out)
}

/// The configured tools, addressable by name.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<Arc<HttpTool>>,
    by_name: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<HttpTool>) -> Result<Self, ToolError> {
        let mut catalog = Self::default();
        for tool in tools {
            if catalog.by_name.contains_key(tool.name()) {
                return Err(ToolError::configuration(format!(
                    "Tool '{}' is configured more than once",
                    tool.name()
                )));
            }
            catalog
                .by_name
                .insert(tool.name().to_string(), catalog.tools.len());
            catalog.tools.push(Arc::new(tool));
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools
            .iter()
            .map(|tool| {
                let mut def = tool.definition();
                def.input_schema = normalize_input_schema(&def.input_schema);
                def
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<HttpTool>, McpError> {
        self.by_name
            .get(name)
            .and_then(|idx| self.tools.get(*idx))
            .cloned()
            .ok_or_else(|| McpError::unknown_tool(name, &self.names()))
    }
}
