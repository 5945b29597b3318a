use crate::utils::text::truncate_utf8_prefix;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_REDACTION: &str = "[REDACTED]";
const INLINE_REDACTION: &str = "***REDACTED***";

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password",
        "passphrase",
        "secret",
        "token",
        "api_key",
        "apikey",
        "access_token",
        "client_secret",
        "refresh_token",
        "authorization",
    ]
    .into_iter()
    .collect()
});

static SENSITIVE_HEADER_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "authorization",
        "proxy-authorization",
        "cookie",
        "set-cookie",
        "x-api-key",
        "x-auth-token",
        "x-access-token",
    ]
    .into_iter()
    .collect()
});

static INLINE_REDACTION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\b(Bearer|Basic)\s+([A-Za-z0-9._~+/=-]{8,})").expect("inline redaction regex"),
            "$1 ***REDACTED***",
        ),
        (
            Regex::new(r"\beyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\b")
                .expect("inline redaction regex"),
            INLINE_REDACTION,
        ),
        (
            Regex::new(r"(?i)\b(api[_-]?key|access[_-]?token|token|secret|password)=([^&\s]+)")
                .expect("inline redaction regex"),
            "$1=***REDACTED***",
        ),
    ]
});

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    SENSITIVE_KEYS.contains(normalized.as_str())
        || normalized.contains("secret")
        || normalized.contains("token")
        || normalized.contains("password")
}

/// Masks credentials embedded in free text (URLs, header values, error
/// messages) and caps the result at `max_bytes`.
pub fn redact_text(value: &str, max_bytes: usize) -> String {
    let mut out = value.to_string();
    for (re, replacement) in INLINE_REDACTION_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).to_string();
        }
    }
    if out.len() <= max_bytes {
        return out;
    }
    format!("{}...", truncate_utf8_prefix(&out, max_bytes))
}

pub fn redact_headers(value: &Value) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(map) = value.as_object() {
        for (key, entry) in map.iter() {
            let normalized = key.trim().to_lowercase();
            if SENSITIVE_HEADER_KEYS.contains(normalized.as_str()) || is_sensitive_key(key) {
                out.insert(key.clone(), Value::String(DEFAULT_REDACTION.to_string()));
            } else if let Some(text) = entry.as_str() {
                out.insert(key.clone(), Value::String(redact_text(text, usize::MAX)));
            } else {
                out.insert(key.clone(), entry.clone());
            }
        }
    }
    Value::Object(out)
}

/// Recursively redacts a loggable value: `headers` objects get header rules,
/// sensitive keys are masked, strings are scrubbed and capped.
pub fn redact_object(value: &Value, max_string: usize) -> Value {
    match value {
        Value::String(text) => Value::String(redact_text(text, max_string)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_object(item, max_string))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in map.iter() {
                if key == "headers" && entry.is_object() {
                    out.insert(key.clone(), redact_headers(entry));
                } else if is_sensitive_key(key) && !entry.is_object() {
                    out.insert(key.clone(), Value::String(DEFAULT_REDACTION.to_string()));
                } else {
                    out.insert(key.clone(), redact_object(entry, max_string));
                }
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}
