//! Lenient JSON reading for text written by language models: code fences,
//! surrounding prose, single quotes, unquoted keys and values, trailing
//! commas, Python-style literals.

use crate::errors::ToolError;
use serde_json::Value;

pub fn parse_relaxed(raw: &str) -> Result<Value, ToolError> {
    let text = strip_code_fence(raw.trim());
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(unwrap_encoded(value));
    }
    let region = extract_json_region(text).unwrap_or(text);
    if let Ok(value) = serde_json::from_str::<Value>(region) {
        return Ok(unwrap_encoded(value));
    }
    let repaired = repair(region);
    serde_json::from_str::<Value>(&repaired)
        .map(unwrap_encoded)
        .map_err(|err| ToolError::input_recovery(format!("Unable to read input as JSON: {}", err)))
}

/// A JSON string whose content is itself an object or array is decoded once.
fn unwrap_encoded(value: Value) -> Value {
    if let Value::String(inner) = &value {
        let trimmed = inner.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(decoded) = serde_json::from_str::<Value>(trimmed) {
                return decoded;
            }
        }
    }
    value
}

fn strip_code_fence(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    let body_start = after.find('\n').map(|idx| idx + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// First balanced `{...}` or `[...]` region, quote-aware.
fn extract_json_region(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from..].iter().copied().find(|c| !c.is_whitespace())
}

fn repair(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '"' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                let end = (i + 1).min(chars.len());
                out.extend(&chars[start..end]);
                i = end;
            }
            '\'' => {
                let mut content = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    content.push(chars[i]);
                    i += 1;
                }
                out.push_str(&quote(&content));
                i += 1;
            }
            ',' => {
                if !matches!(next_significant(&chars, i + 1), Some('}') | Some(']') | None) {
                    out.push(',');
                }
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '-' | '.'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if next_significant(&chars, i) == Some(':') {
                    out.push_str(&quote(&word));
                    continue;
                }
                match word.as_str() {
                    "true" | "True" => out.push_str("true"),
                    "false" | "False" => out.push_str("false"),
                    "null" | "None" | "undefined" => out.push_str("null"),
                    _ => {
                        let mut value = word;
                        while i < chars.len() && !matches!(chars[i], ',' | '}' | ']' | '\n') {
                            value.push(chars[i]);
                            i += 1;
                        }
                        out.push_str(&quote(value.trim()));
                    }
                }
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}
