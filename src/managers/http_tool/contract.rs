//! Parameter contract: every value the caller may or must supply, derived
//! once from the tool configuration.

use crate::errors::ToolError;
use crate::services::tool_config::{
    AuthenticationMode, ParameterDecl, PlaceholderSpec, PlaceholderType, SpecifyMode, ToolConfig,
    ValueProvider,
};
use crate::services::validation::SchemaValidator;
use crate::utils::placeholders::{
    extract_tokens, extract_tokens_from_value, is_token_safe, url_authority_tokens,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    ModelRequired,
    ModelOptional,
    Fixed,
    /// Referenced by a `{token}` in a template and not declared anywhere.
    Placeholder,
}

impl FieldSource {
    pub fn is_caller_facing(self) -> bool {
        !matches!(self, FieldSource::Fixed)
    }

    pub fn is_required(self) -> bool {
        matches!(self, FieldSource::ModelRequired | FieldSource::Placeholder)
    }

    fn rank(self) -> u8 {
        match self {
            FieldSource::Fixed => 0,
            FieldSource::ModelOptional => 1,
            FieldSource::ModelRequired => 2,
            FieldSource::Placeholder => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Url,
    Query,
    Headers,
    Body,
}

impl Section {
    fn label(self) -> &'static str {
        match self {
            Section::Url => "URL",
            Section::Query => "query",
            Section::Headers => "header",
            Section::Body => "body",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractField {
    pub name: String,
    pub source: FieldSource,
    pub kind: PlaceholderType,
    pub description: String,
    pub fixed_value: Option<Value>,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone)]
pub struct ParameterContract {
    fields: Vec<ContractField>,
    validator: SchemaValidator,
}

impl ParameterContract {
    pub fn fields(&self) -> &[ContractField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ContractField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn caller_fields(&self) -> impl Iterator<Item = &ContractField> {
        self.fields.iter().filter(|field| field.source.is_caller_facing())
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Caller-facing JSON schema; fixed fields never appear.
    pub fn input_schema(&self) -> &Value {
        self.validator.schema()
    }

    /// Human-readable rendering of the same information as the schema.
    pub fn describe(&self) -> String {
        let fields: Vec<&ContractField> = self.caller_fields().collect();
        if fields.is_empty() {
            return "Call this tool without parameters.".to_string();
        }
        let mut lines = vec![format!(
            "Call this tool with a JSON object holding {} parameter{}:",
            fields.len(),
            if fields.len() == 1 { "" } else { "s" }
        )];
        for field in fields {
            lines.push(format!(
                "- \"{}\" ({}, {}): {}",
                field.name,
                field.kind.schema_type(),
                if field.source.is_required() {
                    "required"
                } else {
                    "optional"
                },
                field.description
            ));
        }
        lines.join("\n")
    }
}

pub fn validate_tool_name(name: &str) -> Result<(), ToolError> {
    if name.is_empty() || !is_token_safe(name) {
        return Err(ToolError::configuration(format!(
            "Tool name '{}' is invalid: use only letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}

fn merge_placeholder_specs(
    specs: &[PlaceholderSpec],
) -> Result<BTreeMap<String, PlaceholderSpec>, ToolError> {
    let mut merged: BTreeMap<String, PlaceholderSpec> = BTreeMap::new();
    for spec in specs {
        let name = spec.name.trim();
        if name.is_empty() {
            continue;
        }
        if !is_token_safe(name) {
            return Err(ToolError::configuration(format!(
                "Misconfigured placeholder '{}': names may only contain letters, digits, '_' and '-'",
                name
            )));
        }
        match merged.get_mut(name) {
            Some(existing) if existing.kind != spec.kind => {
                return Err(ToolError::configuration(format!(
                    "Misconfigured placeholder '{}': defined as both {} and {}",
                    name,
                    existing.kind.schema_type(),
                    spec.kind.schema_type()
                )));
            }
            Some(existing) => {
                if existing.description.trim().is_empty() {
                    existing.description = spec.description.clone();
                }
            }
            None => {
                let mut spec = spec.clone();
                spec.name = name.to_string();
                merged.insert(name.to_string(), spec);
            }
        }
    }
    Ok(merged)
}

struct SectionSource<'a> {
    section: Section,
    decls: &'a [ParameterDecl],
    json_template: Option<&'a str>,
}

fn active_sections(config: &ToolConfig) -> Vec<SectionSource<'_>> {
    let mut out = Vec::new();
    for (enabled, section, mode, decls, json) in [
        (
            config.send_query,
            Section::Query,
            config.specify_query,
            &config.parameters_query,
            &config.json_query,
        ),
        (
            config.send_headers,
            Section::Headers,
            config.specify_headers,
            &config.parameters_headers,
            &config.json_headers,
        ),
        (
            config.send_body,
            Section::Body,
            config.specify_body,
            &config.parameters_body,
            &config.json_body,
        ),
    ] {
        if !enabled {
            continue;
        }
        match mode {
            SpecifyMode::Keypair => out.push(SectionSource {
                section,
                decls: decls.as_slice(),
                json_template: None,
            }),
            SpecifyMode::Json => out.push(SectionSource {
                section,
                decls: &[],
                json_template: Some(json.as_str()),
            }),
        }
    }
    out
}

fn generated_description(name: &str, sections: &[Section]) -> String {
    let labels: Vec<&str> = sections.iter().map(|s| s.label()).collect();
    if labels.is_empty() {
        return format!("Value for '{}'", name);
    }
    format!("Value for the '{}' {} parameter", name, labels.join("/"))
}

fn upsert_field(
    fields: &mut Vec<ContractField>,
    name: &str,
    source: FieldSource,
    section: Section,
    fixed_value: Option<Value>,
) {
    if let Some(existing) = fields.iter_mut().find(|f| f.name == name) {
        if source.rank() > existing.source.rank() {
            existing.source = source;
        }
        if existing.fixed_value.is_none() {
            existing.fixed_value = fixed_value;
        }
        if !existing.sections.contains(&section) {
            existing.sections.push(section);
        }
        return;
    }
    fields.push(ContractField {
        name: name.to_string(),
        source,
        kind: PlaceholderType::String,
        description: String::new(),
        fixed_value,
        sections: vec![section],
    });
}

/// Builds the contract and checks placeholder consistency: every template
/// token must be defined, every definition must be used, and no token may
/// sit in the URL authority when authentication is configured.
pub fn build_contract(config: &ToolConfig) -> Result<ParameterContract, ToolError> {
    validate_tool_name(&config.name)?;
    let specs = merge_placeholder_specs(&config.placeholder_definitions)?;
    let sections = active_sections(config);

    let mut tokens: Vec<(String, Section)> = extract_tokens(&config.url)
        .into_iter()
        .map(|name| (name, Section::Url))
        .collect();
    let mut model_names: Vec<String> = Vec::new();
    for source in sections.iter() {
        if let Some(template) = source.json_template {
            for name in extract_tokens(template) {
                tokens.push((name, source.section));
            }
        }
        for decl in source.decls {
            if decl.value_provider.is_model_facing() {
                model_names.push(decl.name.clone());
            } else {
                for name in extract_tokens_from_value(&decl.value) {
                    tokens.push((name, source.section));
                }
            }
        }
    }

    for (name, section) in tokens.iter() {
        if !specs.contains_key(name) && !model_names.contains(name) {
            return Err(ToolError::configuration(format!(
                "Misconfigured placeholder '{}': it is used in the {} but has no placeholder definition",
                name,
                section.label()
            ))
            .with_hint("Add a placeholder definition with this name or remove the token"));
        }
    }
    for name in specs.keys() {
        let used = tokens.iter().any(|(token, _)| token == name) || model_names.contains(name);
        if !used {
            return Err(ToolError::configuration(format!(
                "Misconfigured placeholder '{}': it is defined but not used in the URL, query, headers or body",
                name
            )));
        }
    }

    if config.authentication != AuthenticationMode::None {
        if let Some(name) = url_authority_tokens(&config.url).into_iter().next() {
            return Err(ToolError::configuration(
                "Placeholders in domain are not allowed with authentication",
            )
            .with_details(json!({"placeholder": name})));
        }
    }

    let mut fields: Vec<ContractField> = Vec::new();
    for (name, section) in tokens.iter() {
        if !model_names.contains(name) {
            upsert_field(&mut fields, name, FieldSource::Placeholder, *section, None);
        }
    }
    for source in sections.iter() {
        for decl in source.decls {
            let name = decl.name.trim();
            if name.is_empty() {
                continue;
            }
            let (field_source, fixed) = match decl.value_provider {
                ValueProvider::ModelRequired => (FieldSource::ModelRequired, None),
                ValueProvider::ModelOptional => (FieldSource::ModelOptional, None),
                ValueProvider::FieldValue => (FieldSource::Fixed, Some(decl.value.clone())),
            };
            upsert_field(&mut fields, name, field_source, source.section, fixed);
        }
    }
    for field in fields.iter_mut() {
        let spec = specs.get(&field.name);
        field.kind = spec.map(|s| s.kind).unwrap_or_default();
        field.description = spec
            .map(|s| s.description.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| generated_description(&field.name, &field.sections));
    }

    let validator = SchemaValidator::compile(&schema_for(&fields))?;
    Ok(ParameterContract { fields, validator })
}

fn schema_for(fields: &[ContractField]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in fields.iter().filter(|f| f.source.is_caller_facing()) {
        properties.insert(
            field.name.clone(),
            json!({"type": field.kind.schema_type(), "description": field.description}),
        );
        if field.source.is_required() {
            required.push(Value::String(field.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tool_config::parse_tool_configs;

    fn config(raw: Value) -> ToolConfig {
        parse_tool_configs(&raw.to_string()).unwrap().remove(0)
    }

    #[test]
    fn url_placeholders_become_required_fields() {
        let contract = build_contract(&config(json!({
            "name": "users",
            "url": "https://api.example.com/{version}/users/{userId}",
            "placeholderDefinitions": [
                {"name": "version", "description": "API version"},
                {"name": "userId", "type": "string", "description": "User ID"}
            ]
        })))
        .unwrap();
        let schema = contract.input_schema();
        assert_eq!(schema["required"], json!(["version", "userId"]));
        assert_eq!(schema["properties"]["userId"]["description"], "User ID");
    }

    #[test]
    fn fixed_declarations_stay_out_of_the_schema() {
        let contract = build_contract(&config(json!({
            "name": "create",
            "method": "POST",
            "url": "https://api.example.com/resources",
            "sendBody": true,
            "parametersBody": [
                {"name": "name", "valueProvider": "modelRequired"},
                {"name": "Type", "valueProvider": "fieldValue", "value": "default"}
            ],
            "sendQuery": true,
            "parametersQuery": [{"name": "verbose", "valueProvider": "modelOptional"}],
            "placeholderDefinitions": [{"name": "name", "description": "Resource name"}]
        })))
        .unwrap();
        let schema = contract.input_schema();
        assert!(schema["properties"].get("Type").is_none());
        assert_eq!(schema["required"], json!(["name"]));
        assert_eq!(
            schema["properties"]["verbose"]["description"],
            "Value for the 'verbose' query parameter"
        );
        assert_eq!(contract.field("Type").unwrap().source, FieldSource::Fixed);
        assert!(contract.describe().contains("\"name\" (string, required): Resource name"));
    }

    #[test]
    fn unused_placeholder_is_rejected() {
        let err = build_contract(&config(json!({
            "name": "t",
            "url": "https://api.example.com",
            "placeholderDefinitions": [{"name": "unusedPlaceholder"}]
        })))
        .unwrap_err();
        assert!(err.message.contains("Misconfigured placeholder"));
    }

    #[test]
    fn undefined_token_is_rejected() {
        let err = build_contract(&config(json!({
            "name": "t",
            "url": "https://api.example.com/{id}"
        })))
        .unwrap_err();
        assert!(err.message.contains("Misconfigured placeholder 'id'"));
    }

    #[test]
    fn domain_placeholder_with_auth_is_rejected() {
        let err = build_contract(&config(json!({
            "name": "t",
            "url": "https://{domain}.example.com/api",
            "authentication": "predefinedCredentialType",
            "nodeCredentialType": "linearApi",
            "placeholderDefinitions": [{"name": "domain"}]
        })))
        .unwrap_err();
        assert_eq!(err.message, "Placeholders in domain are not allowed with authentication");
    }

    #[test]
    fn conflicting_placeholder_types_are_rejected() {
        let err = build_contract(&config(json!({
            "name": "t",
            "url": "https://api.example.com/{n}",
            "placeholderDefinitions": [{"name": "n", "type": "number"}, {"name": "n", "type": "string"}]
        })))
        .unwrap_err();
        assert!(err.message.contains("defined as both"));
    }

    #[test]
    fn invalid_tool_name_is_rejected() {
        assert!(validate_tool_name("Invalid-Node-Name!").is_err());
        assert!(validate_tool_name("HTTP_Request_Tool").is_ok());
    }

    #[test]
    fn json_body_tokens_are_fields() {
        let contract = build_contract(&config(json!({
            "name": "t",
            "method": "POST",
            "url": "https://api.example.com/resources",
            "sendBody": true,
            "specifyBody": "json",
            "jsonBody": "{\"name\": \"{resourceName}\", \"type\": \"custom\"}",
            "placeholderDefinitions": [{"name": "resourceName", "description": "Name"}]
        })))
        .unwrap();
        let field = contract.field("resourceName").unwrap();
        assert_eq!(field.source, FieldSource::Placeholder);
        assert_eq!(field.sections, vec![Section::Body]);
    }
}
