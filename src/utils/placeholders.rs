use crate::utils::expression::to_text;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_-]+)\}").expect("placeholder token regex"));

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("placeholder name regex"));

pub fn is_token_safe(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Token names in order of first appearance, deduplicated.
pub fn extract_tokens(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in TOKEN_RE.captures_iter(text) {
        let name = caps[1].to_string();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

pub fn extract_tokens_from_value(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_tokens(value, &mut out);
    out
}

fn collect_tokens(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for name in extract_tokens(text) {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_tokens(item, out)),
        Value::Object(map) => {
            for (key, entry) in map.iter() {
                collect_tokens(&Value::String(key.clone()), out);
                collect_tokens(entry, out);
            }
        }
        _ => {}
    }
}

/// Replaces each known `{name}` with the stringified value; unknown tokens
/// stay in place.
pub fn replace_literal(template: &str, values: &Map<String, Value>) -> String {
    TOKEN_RE
        .replace_all(template, |caps: &regex::Captures<'_>| match values.get(&caps[1]) {
            Some(value) => to_text(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Substitutes tokens into JSON template text. A token that is the whole
/// content of a string literal (`"{x}"`) is replaced, quotes included, by the
/// serialized value; a token inside a longer string literal gets the escaped
/// text; a bare token outside any string gets the serialized value.
pub fn substitute_json_template(template: &str, values: &Map<String, Value>) -> String {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < template.len() {
        let ch = bytes[i];
        if ch == b'{' {
            if let Some(caps) = TOKEN_RE.captures(&template[i..]) {
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                let starts_here = caps.get(0).map(|m| m.start() == 0).unwrap_or(false);
                if starts_here {
                    if let Some(value) = values.get(&caps[1]) {
                        let end = i + whole.len();
                        let quoted_whole = in_string
                            && out.ends_with('"')
                            && !ends_with_escape(&out[..out.len() - 1])
                            && bytes.get(end) == Some(&b'"')
                            && string_opened_at(&out);
                        if quoted_whole {
                            out.pop();
                            out.push_str(&serialize(value));
                            in_string = false;
                            i = end + 1;
                        } else if in_string {
                            let encoded = serialize(&Value::String(to_text(value)));
                            out.push_str(&encoded[1..encoded.len() - 1]);
                            i = end;
                        } else {
                            out.push_str(&serialize(value));
                            i = end;
                        }
                        continue;
                    }
                }
            }
        }
        let Some(ch) = template[i..].chars().next() else {
            break;
        };
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            in_string = true;
        }
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn serialize(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn ends_with_escape(text: &str) -> bool {
    text.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// True when the trailing `"` of `out` opened the string currently being
/// scanned, i.e. nothing has been written inside it yet.
fn string_opened_at(out: &str) -> bool {
    let mut in_string = false;
    let mut escaped = false;
    let mut last_open = None;
    for (idx, ch) in out.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            in_string = true;
            last_open = Some(idx);
        }
    }
    in_string && last_open == Some(out.len() - 1)
}

/// Tokens that appear in the scheme, host or port part of `url`.
pub fn url_authority_tokens(url: &str) -> Vec<String> {
    let trimmed = url.trim();
    let (scheme, rest) = match trimmed.find("://") {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 3..]),
        None => ("", trimmed),
    };
    let authority_end = rest
        .find(|c: char| c == '/' || c == '?' || c == '#')
        .unwrap_or(rest.len());
    let mut out = extract_tokens(scheme);
    for name in extract_tokens(&rest[..authority_end]) {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn extracts_unique_tokens_in_order() {
        assert_eq!(
            extract_tokens("https://api.example.com/{version}/users/{userId}/{version}"),
            vec!["version".to_string(), "userId".to_string()]
        );
        assert!(extract_tokens("{not valid}").is_empty());
    }

    #[test]
    fn literal_replacement_leaves_unknown_tokens() {
        let out = replace_literal("/{a}/{b}", &values(json!({"a": 12})));
        assert_eq!(out, "/12/{b}");
    }

    #[test]
    fn json_substitution_respects_string_context() {
        let vals = values(json!({"name": "say \"hi\"", "count": 3, "tags": ["x"]}));
        let out = substitute_json_template(
            r#"{"name": "{name}", "label": "n={name}", "count": {count}, "tags": "{tags}"}"#,
            &vals,
        );
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            parsed,
            json!({"name": "say \"hi\"", "label": "n=say \"hi\"", "count": 3, "tags": ["x"]})
        );
    }

    #[test]
    fn whole_string_number_becomes_json_number() {
        let out = substitute_json_template(r#"{"limit": "{limit}"}"#, &values(json!({"limit": 5})));
        assert_eq!(out, r#"{"limit": 5}"#);
    }

    #[test]
    fn authority_tokens_ignore_the_path() {
        assert_eq!(
            url_authority_tokens("https://{domain}.example.com:{port}/api/{id}"),
            vec!["domain".to_string(), "port".to_string()]
        );
        assert!(url_authority_tokens("https://api.example.com/{id}").is_empty());
    }
}
