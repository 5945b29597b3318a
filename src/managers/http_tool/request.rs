use super::contract::ParameterContract;
use super::resolver::ResolvedInvocation;
use crate::errors::ToolError;
use crate::services::tool_config::{BodyContentType, ParameterDecl, SpecifyMode, ToolConfig, ValueProvider};
use crate::services::transport::{AuthRef, RequestBody, RequestDescriptor};
use crate::utils::expression::to_text;
use crate::utils::placeholders::{extract_tokens, replace_literal, substitute_json_template};
use crate::utils::relaxed_json::parse_relaxed;
use serde_json::{Map, Value};

/// Values visible to templates: every caller field, absent optional ones as
/// `null` so their tokens render empty instead of leaking into the request.
fn substitution_values(resolved: &ResolvedInvocation, contract: &ParameterContract) -> Map<String, Value> {
    let mut values = resolved.values().clone();
    for field in contract.caller_fields() {
        values.entry(field.name.clone()).or_insert(Value::Null);
    }
    values
}

fn substitute_value(value: &Value, values: &Map<String, Value>) -> Value {
    match value {
        Value::String(text) => Value::String(replace_literal(text, values)),
        Value::Array(items) => Value::Array(items.iter().map(|item| substitute_value(item, values)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, entry)| (replace_literal(key, values), substitute_value(entry, values)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn keypair_section(
    decls: &[ParameterDecl],
    resolved: &ResolvedInvocation,
    values: &Map<String, Value>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for decl in decls.iter().filter(|decl| decl.value_provider == ValueProvider::FieldValue) {
        let name = decl.name.trim();
        if !name.is_empty() {
            out.insert(name.to_string(), substitute_value(&decl.value, values));
        }
    }
    for decl in decls {
        let name = decl.name.trim();
        if name.is_empty() {
            continue;
        }
        if let Some(value) = resolved.get(name) {
            out.insert(name.to_string(), value.clone());
        }
    }
    out
}

fn json_section(label: &str, template: &str, values: &Map<String, Value>) -> Result<Option<Value>, ToolError> {
    if template.trim().is_empty() {
        return Ok(None);
    }
    let rendered = substitute_json_template(template, values);
    let parsed = match serde_json::from_str::<Value>(&rendered) {
        Ok(value) => value,
        Err(_) => parse_relaxed(&rendered).map_err(|err| {
            ToolError::configuration(format!("JSON {} template is not valid JSON: {}", label, err.message))
        })?,
    };
    Ok(Some(parsed))
}

fn json_object_section(
    label: &str,
    template: &str,
    values: &Map<String, Value>,
) -> Result<Map<String, Value>, ToolError> {
    match json_section(label, template, values)? {
        None => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(ToolError::configuration(format!(
            "JSON {} template must produce an object",
            label
        ))),
    }
}

fn header_text(value: &Value) -> String {
    match value {
        Value::Object(_) | Value::Array(_) => value.to_string(),
        other => to_text(other),
    }
}

/// Builds one request from resolved caller values. Called per item and never
/// mutates shared state.
pub fn build(
    resolved: &ResolvedInvocation,
    config: &ToolConfig,
    contract: &ParameterContract,
    auth: &AuthRef,
) -> Result<RequestDescriptor, ToolError> {
    let values = substitution_values(resolved, contract);

    if let Some(missing) = extract_tokens(&config.url)
        .into_iter()
        .find(|token| !values.contains_key(token))
    {
        return Err(ToolError::configuration(format!(
            "URL placeholder '{}' has no value",
            missing
        )));
    }
    let url = replace_literal(&config.url, &values);

    let mut request = RequestDescriptor::new(&config.method, &url);
    let options = &config.options;
    request.auth = auth.clone();
    request.timeout_ms = options.timeout;
    request.allow_unauthorized_certs = options.allow_unauthorized_certs;
    request.follow_redirects = options.redirect.follow_redirects;
    request.max_redirects = options.redirect.max_redirects;
    request.proxy = options.proxy.clone().filter(|proxy| !proxy.trim().is_empty());
    request.array_format = options.query_parameter_arrays;
    request.lowercase_headers = options.lowercase_headers;
    request.response_format = options.response.response_format;

    if config.send_query {
        request.query = match config.specify_query {
            SpecifyMode::Keypair => keypair_section(&config.parameters_query, resolved, &values),
            SpecifyMode::Json => json_object_section("query", &config.json_query, &values)?,
        };
    }

    if config.send_headers {
        let headers = match config.specify_headers {
            SpecifyMode::Keypair => keypair_section(&config.parameters_headers, resolved, &values),
            SpecifyMode::Json => json_object_section("headers", &config.json_headers, &values)?,
        };
        for (name, value) in headers.iter() {
            if value.is_null() {
                continue;
            }
            let name = if options.lowercase_headers {
                name.to_lowercase()
            } else {
                name.clone()
            };
            request.headers.insert(name, header_text(value));
        }
    }

    if config.send_body {
        let body = match config.specify_body {
            SpecifyMode::Keypair => Some(Value::Object(keypair_section(&config.parameters_body, resolved, &values))),
            SpecifyMode::Json => json_section("body", &config.json_body, &values)?,
        };
        request.body = match (body, config.content_type) {
            (None, _) => RequestBody::None,
            (Some(Value::Object(map)), BodyContentType::FormUrlencoded) => RequestBody::Form(map),
            (Some(_), BodyContentType::FormUrlencoded) => {
                return Err(ToolError::configuration(
                    "Form-urlencoded body must be an object of fields",
                ))
            }
            (Some(value), BodyContentType::Json) => RequestBody::Json(value),
        };
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::http_tool::contract::build_contract;
    use crate::managers::http_tool::resolver::resolve;
    use crate::services::tool_config::parse_tool_configs;
    use serde_json::json;

    fn build_from(raw: Value, input: Value) -> Result<RequestDescriptor, ToolError> {
        let config = parse_tool_configs(&raw.to_string()).unwrap().remove(0);
        let contract = build_contract(&config)?;
        let resolved = resolve(&input, &contract)?;
        build(&resolved, &config, &contract, &AuthRef::None)
    }

    #[test]
    fn url_placeholders_are_replaced() {
        let request = build_from(
            json!({
                "name": "users",
                "url": "https://api.example.com/{version}/users/{userId}",
                "placeholderDefinitions": [{"name": "version"}, {"name": "userId"}]
            }),
            json!({"version": "v1", "userId": "123"}),
        )
        .unwrap();
        assert_eq!(request.url, "https://api.example.com/v1/users/123");
        assert_eq!(request.method, "GET");
    }

    #[test]
    fn keypair_sections_merge_fixed_and_caller_values() {
        let request = build_from(
            json!({
                "name": "search",
                "url": "https://api.example.com/search",
                "sendQuery": true,
                "parametersQuery": [
                    {"name": "q", "valueProvider": "modelRequired"},
                    {"name": "page", "valueProvider": "modelOptional"},
                    {"name": "source", "valueProvider": "fieldValue", "value": "agent-{q}"}
                ],
                "sendHeaders": true,
                "parametersHeaders": [
                    {"name": "X-API-Key", "valueProvider": "fieldValue", "value": "secret-key"}
                ],
                "placeholderDefinitions": [{"name": "q"}]
            }),
            json!({"q": "test"}),
        )
        .unwrap();
        assert_eq!(request.query, json!({"q": "test", "source": "agent-test"}).as_object().cloned().unwrap());
        assert_eq!(request.header("X-API-Key"), Some("secret-key"));
        assert!(request.headers.contains_key("x-api-key"));
    }

    #[test]
    fn json_body_template_keeps_types() {
        let request = build_from(
            json!({
                "name": "create",
                "method": "POST",
                "url": "https://api.example.com/resources",
                "sendBody": true,
                "specifyBody": "json",
                "jsonBody": "{\"name\": \"{resourceName}\", \"count\": {count}, \"note\": \"for {resourceName}\"}",
                "placeholderDefinitions": [
                    {"name": "resourceName"},
                    {"name": "count", "type": "number"}
                ]
            }),
            json!({"resourceName": "db \"main\"", "count": "2"}),
        )
        .unwrap();
        assert_eq!(
            request.body,
            RequestBody::Json(json!({"name": "db \"main\"", "count": 2, "note": "for db \"main\""}))
        );
    }

    #[test]
    fn form_body_uses_form_encoding() {
        let request = build_from(
            json!({
                "name": "login",
                "method": "POST",
                "url": "https://api.example.com/login",
                "sendBody": true,
                "contentType": "form-urlencoded",
                "parametersBody": [{"name": "user", "valueProvider": "modelRequired"}]
            }),
            json!({"user": "ada"}),
        )
        .unwrap();
        assert!(matches!(request.body, RequestBody::Form(ref map) if map["user"] == "ada"));
    }

    #[test]
    fn json_query_template_must_be_an_object() {
        let err = build_from(
            json!({
                "name": "bad",
                "url": "https://api.example.com",
                "sendQuery": true,
                "specifyQuery": "json",
                "jsonQuery": "[1, 2]"
            }),
            json!({}),
        )
        .unwrap_err();
        assert!(err.message.contains("must produce an object"));
    }

    #[test]
    fn options_are_copied_onto_the_descriptor() {
        let request = build_from(
            json!({
                "name": "opts",
                "url": "https://api.example.com",
                "options": {
                    "timeout": 2500,
                    "allowUnauthorizedCerts": true,
                    "redirect": {"followRedirects": false, "maxRedirects": 3},
                    "queryParameterArrays": "repeat"
                }
            }),
            json!({}),
        )
        .unwrap();
        assert_eq!(request.timeout_ms, 2500);
        assert!(request.allow_unauthorized_certs);
        assert!(!request.follow_redirects);
        assert_eq!(request.max_redirects, 3);
    }
}
