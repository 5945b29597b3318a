//! Turns a raw response into compact text for the agent.

use crate::constants::optimize::{BINARY_CONTENT_TYPES, BINARY_NOT_SUPPORTED, DEFAULT_CSS_SELECTOR, TRUNCATION_MARKER};
use crate::errors::ToolError;
use crate::services::tool_config::{FieldsToInclude, OptimizeOptions, ResponseType};
use crate::services::transport::{RawResponse, ResponseBody};
use crate::utils::data_path::lookup_path;
use crate::utils::output::{parse_field_list, shape_fields};
use crate::utils::text::{collapse_whitespace, truncate_chars_with_marker};
use scraper::{Html, Selector};
use serde_json::{json, Value};

pub fn is_binary_content_type(content_type: &str) -> bool {
    let lowered = content_type.trim().to_lowercase();
    BINARY_CONTENT_TYPES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

/// The decoded body, or `None` when the response must be treated as binary.
fn text_body(response: &RawResponse) -> Option<&str> {
    if is_binary_content_type(response.content_type()) {
        return None;
    }
    match &response.body {
        ResponseBody::Binary(_) => None,
        ResponseBody::Text(text) if text.contains('\0') => None,
        ResponseBody::Text(text) => Some(text),
    }
}

/// Infallible: binary content becomes an error object in text form, and
/// shaping that fails leaves the body as it was.
pub fn optimize(response: &RawResponse, options: &OptimizeOptions, full_response: bool) -> String {
    let Some(text) = text_body(response) else {
        return ToolError::unsupported_content(BINARY_NOT_SUPPORTED).to_agent_text();
    };

    let body = if options.optimize_response {
        match options.response_type {
            ResponseType::Json => shape_json(text, options),
            ResponseType::Html => Body::Text(extract_html(text, options)),
            ResponseType::Text => Body::Text(text.to_string()),
        }
    } else {
        Body::Text(text.to_string())
    };

    let rendered = if full_response {
        let body = match body {
            Body::Json(value) => value,
            Body::Text(text) => Value::String(text),
        };
        pretty(&json!({
            "statusCode": response.status_code,
            "headers": response.headers_value(),
            "body": body,
        }))
    } else {
        match body {
            Body::Json(value) => pretty(&value),
            Body::Text(text) => text,
        }
    };

    let mut out = if options.optimize_response && options.truncate_response {
        truncate_chars_with_marker(&rendered, options.max_length, TRUNCATION_MARKER)
    } else {
        rendered
    };
    if response.truncated && !out.ends_with(TRUNCATION_MARKER) {
        out.push_str(TRUNCATION_MARKER);
    }
    out
}

enum Body {
    Json(Value),
    Text(String),
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn shape_json(text: &str, options: &OptimizeOptions) -> Body {
    let Ok(mut value) = serde_json::from_str::<Value>(text) else {
        return Body::Text(text.to_string());
    };
    let data_field = options.data_field.trim();
    if !data_field.is_empty() {
        if let Ok(Some(inner)) = lookup_path(&value, data_field) {
            value = inner;
        }
    }
    let mode = match options.fields_to_include {
        FieldsToInclude::All => return Body::Json(value),
        FieldsToInclude::Selected => "selected",
        FieldsToInclude::Except => "except",
    };
    let fields = parse_field_list(&options.fields);
    match shape_fields(&value, mode, &fields) {
        Ok(shaped) => Body::Json(shaped),
        Err(_) => Body::Json(value),
    }
}

fn parse_selector(raw: &str) -> Option<Selector> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Selector::parse(raw).ok()
}

/// One string per node matched by `cssSelector` (falling back to `body`),
/// with `elementsToOmit` removed first.
fn extract_html(text: &str, options: &OptimizeOptions) -> String {
    let mut document = Html::parse_document(text);

    for raw in options.elements_to_omit.split(',') {
        let Some(selector) = parse_selector(raw) else {
            continue;
        };
        let ids: Vec<_> = document.select(&selector).map(|element| element.id()).collect();
        for id in ids {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    let selector = parse_selector(&options.css_selector)
        .or_else(|| parse_selector(DEFAULT_CSS_SELECTOR));
    let Some(selector) = selector else {
        return pretty(&Value::Array(Vec::new()));
    };
    let parts: Vec<Value> = document
        .select(&selector)
        .map(|element| {
            let raw = if options.only_content {
                element.text().collect::<Vec<_>>().join(" ")
            } else {
                element.inner_html()
            };
            Value::String(collapse_whitespace(&raw))
        })
        .collect();
    pretty(&Value::Array(parts))
}
