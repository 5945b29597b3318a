//! Tiered recovery of caller input against a parameter contract.

use super::contract::{ContractField, ParameterContract};
use crate::errors::ToolError;
use crate::services::tool_config::PlaceholderType;
use crate::utils::expression::to_text;
use crate::utils::relaxed_json::parse_relaxed;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TierFailure {
    #[error("Model did not provide parameter '{0}'")]
    MissingRequired(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotApplicable(String),
}

/// Validated caller values keyed by contract field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedInvocation {
    values: Map<String, Value>,
}

impl ResolvedInvocation {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

type Tier = fn(&Value, &ParameterContract) -> Result<Map<String, Value>, TierFailure>;

const TIERS: &[(&str, Tier)] = &[
    ("structured", structured),
    ("relaxed_json", relaxed_json),
    ("single_field", single_field),
];

impl TierFailure {
    fn weight(&self) -> u8 {
        match self {
            TierFailure::MissingRequired(_) => 2,
            TierFailure::Invalid(_) => 1,
            TierFailure::NotApplicable(_) => 0,
        }
    }
}

/// First successful tier wins. When every tier fails, the earliest failure
/// of the highest weight is reported: a missing required parameter beats a
/// schema problem, which beats a tier that did not apply.
pub fn resolve(raw: &Value, contract: &ParameterContract) -> Result<ResolvedInvocation, ToolError> {
    let mut best: Option<(&str, TierFailure)> = None;
    for (name, tier) in TIERS {
        match tier(raw, contract) {
            Ok(values) => return Ok(ResolvedInvocation { values }),
            Err(failure) => {
                let better = best
                    .as_ref()
                    .map(|(_, current)| failure.weight() > current.weight())
                    .unwrap_or(true);
                if better {
                    best = Some((name, failure));
                }
            }
        }
    }
    let (tier, failure) = best.unwrap_or((
        "none",
        TierFailure::NotApplicable("no input".to_string()),
    ));
    Err(ToolError::input_recovery(failure.to_string())
        .with_details(serde_json::json!({ "tier": tier })))
}

fn structured(raw: &Value, contract: &ParameterContract) -> Result<Map<String, Value>, TierFailure> {
    if contract.caller_fields().next().is_none() {
        return Ok(Map::new());
    }
    match raw {
        Value::Null => finalize(&Map::new(), contract),
        Value::Object(map) => finalize(map, contract),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with('"') {
                return match serde_json::from_str::<Value>(trimmed) {
                    Ok(Value::Object(map)) => finalize(&map, contract),
                    _ => Err(TierFailure::NotApplicable(
                        "input is not a JSON object".to_string(),
                    )),
                };
            }
            let pairs = parse_key_values(trimmed, contract);
            if pairs.is_empty() {
                return Err(TierFailure::NotApplicable(
                    "no key/value pairs matched the declared parameters".to_string(),
                ));
            }
            finalize(&pairs, contract)
        }
        _ => Err(TierFailure::NotApplicable(
            "input is neither an object nor text".to_string(),
        )),
    }
}

fn relaxed_json(raw: &Value, contract: &ParameterContract) -> Result<Map<String, Value>, TierFailure> {
    let Value::String(text) = raw else {
        return Err(TierFailure::NotApplicable("input is not text".to_string()));
    };
    match parse_relaxed(text) {
        Ok(Value::Object(map)) => finalize(&map, contract),
        Ok(_) => Err(TierFailure::Invalid(
            "input parsed as JSON but is not an object".to_string(),
        )),
        Err(err) => Err(TierFailure::Invalid(err.message)),
    }
}

fn single_field(raw: &Value, contract: &ParameterContract) -> Result<Map<String, Value>, TierFailure> {
    let mut fields = contract.caller_fields();
    let (Some(field), None) = (fields.next(), fields.next()) else {
        return Err(TierFailure::NotApplicable(
            "input could not be matched to the declared parameters".to_string(),
        ));
    };
    let value = match raw {
        Value::Null => {
            return Err(TierFailure::MissingRequired(field.name.clone()));
        }
        Value::Object(_) => {
            return Err(TierFailure::NotApplicable(
                "object input does not name the declared parameter".to_string(),
            ))
        }
        other => other.clone(),
    };
    let mut map = Map::new();
    map.insert(field.name.clone(), value);
    finalize(&map, contract)
}

/// `key: value` / `key=value` pairs; keys match field names ignoring case.
/// A newline, comma or semicolon only ends a value when the text after it
/// opens another declared field, so values keep their own punctuation. With
/// a single caller field the value runs to the end of the text.
fn parse_key_values(text: &str, contract: &ParameterContract) -> Map<String, Value> {
    let fields: Vec<&ContractField> = contract.caller_fields().collect();
    let mut starts = vec![0];
    if fields.len() > 1 {
        for (idx, c) in text.char_indices() {
            if matches!(c, '\n' | ',' | ';') && leading_field(&text[idx + 1..], &fields).is_some() {
                starts.push(idx + 1);
            }
        }
    }
    starts.push(text.len() + 1);

    let mut out = Map::new();
    for window in starts.windows(2) {
        let segment = &text[window[0]..window[1] - 1];
        let Some((field, value_at)) = leading_field(segment, &fields) else {
            continue;
        };
        let value = strip_quotes(segment[value_at..].trim().trim_end_matches([',', ';']));
        out.insert(field.name.clone(), Value::String(value.to_string()));
    }
    out
}

/// Field named at the start of `segment`, with the byte offset just past its
/// `:` or `=` separator.
fn leading_field<'a>(segment: &str, fields: &[&'a ContractField]) -> Option<(&'a ContractField, usize)> {
    let body = segment.trim_start();
    let offset = segment.len() - body.len();
    let idx = body.find([':', '='])?;
    let key = strip_quotes(&body[..idx]);
    if key.is_empty() {
        return None;
    }
    fields
        .iter()
        .find(|field| field.name.eq_ignore_ascii_case(key))
        .map(|field| (*field, offset + idx + 1))
}

fn strip_quotes(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
}

fn coerce(value: &Value, field: &ContractField) -> Value {
    match (field.kind, value) {
        (PlaceholderType::Number, Value::String(text)) => {
            let trimmed = text.trim();
            if let Ok(int) = trimmed.parse::<i64>() {
                return Value::from(int);
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| value.clone())
        }
        (PlaceholderType::Boolean, Value::String(text)) => match text.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => value.clone(),
        },
        (PlaceholderType::Boolean, Value::Number(n)) => match n.as_i64() {
            Some(1) => Value::Bool(true),
            Some(0) => Value::Bool(false),
            _ => value.clone(),
        },
        (PlaceholderType::String, Value::String(_)) => value.clone(),
        (PlaceholderType::String, other) => Value::String(match other {
            Value::Object(_) | Value::Array(_) => other.to_string(),
            _ => to_text(other),
        }),
        (PlaceholderType::Json, Value::String(text)) => match parse_relaxed(text) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Drops unknown fields and optional nulls, coerces declared types, then
/// validates against the contract schema.
fn finalize(input: &Map<String, Value>, contract: &ParameterContract) -> Result<Map<String, Value>, TierFailure> {
    let mut out = Map::new();
    for field in contract.caller_fields() {
        match input.get(&field.name) {
            None | Some(Value::Null) => {
                if field.source.is_required() {
                    return Err(TierFailure::MissingRequired(field.name.clone()));
                }
            }
            Some(value) => {
                out.insert(field.name.clone(), coerce(value, field));
            }
        }
    }
    let instance = Value::Object(out);
    match contract.validator().validate(&instance) {
        Ok(()) => match instance {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        },
        Err(report) => match report.missing.first() {
            Some(name) => Err(TierFailure::MissingRequired(name.clone())),
            None => Err(TierFailure::Invalid(report.summary())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::http_tool::contract::build_contract;
    use crate::services::tool_config::parse_tool_configs;
    use serde_json::json;

    fn contract(raw: Value) -> ParameterContract {
        build_contract(&parse_tool_configs(&raw.to_string()).unwrap()[0]).unwrap()
    }

    fn weather() -> ParameterContract {
        contract(json!({
            "name": "weather",
            "url": "https://api.weather.com/{city}",
            "sendQuery": true,
            "parametersQuery": [
                {"name": "days", "valueProvider": "modelOptional"},
                {"name": "metric", "valueProvider": "modelOptional"}
            ],
            "placeholderDefinitions": [
                {"name": "city", "description": "City"},
                {"name": "days", "type": "number"},
                {"name": "metric", "type": "boolean"}
            ]
        }))
    }

    #[test]
    fn object_input_is_coerced_and_trimmed_to_the_contract() {
        let resolved = resolve(
            &json!({"city": "London", "days": "3", "metric": "true", "extra": 1}),
            &weather(),
        )
        .unwrap();
        assert_eq!(
            resolved.to_value(),
            json!({"city": "London", "days": 3, "metric": true})
        );
    }

    #[test]
    fn free_text_pairs_resolve_in_the_structured_tier() {
        let resolved = resolve(&json!("City: Paris; days=2"), &weather()).unwrap();
        assert_eq!(resolved.to_value(), json!({"city": "Paris", "days": 2}));
    }

    #[test]
    fn separators_inside_values_are_kept() {
        let resolved = resolve(
            &json!("city: Paris, Texas; days=2, metric: yes"),
            &weather(),
        )
        .unwrap();
        assert_eq!(
            resolved.to_value(),
            json!({"city": "Paris, Texas", "days": 2, "metric": true})
        );
    }

    #[test]
    fn single_field_pair_keeps_the_whole_remainder() {
        let c = contract(json!({
            "name": "search",
            "url": "https://search.example.com",
            "sendQuery": true,
            "parametersQuery": [{"name": "q", "valueProvider": "modelRequired"}]
        }));
        let resolved = resolve(&json!("q: rust, tokio and serde"), &c).unwrap();
        assert_eq!(resolved.to_value(), json!({"q": "rust, tokio and serde"}));

        let resolved = resolve(&json!("Q=a;b\nc"), &c).unwrap();
        assert_eq!(resolved.to_value(), json!({"q": "a;b\nc"}));
    }

    #[test]
    fn relaxed_json_recovers_sloppy_objects() {
        let resolved = resolve(&json!("```json\n{city: 'Rome', days: 5,}\n```"), &weather()).unwrap();
        assert_eq!(resolved.to_value(), json!({"city": "Rome", "days": 5}));
    }

    #[test]
    fn single_field_contract_takes_raw_text() {
        let c = contract(json!({
            "name": "city",
            "url": "https://api.weather.com/{city}",
            "placeholderDefinitions": [{"name": "city"}]
        }));
        let resolved = resolve(&json!("New York"), &c).unwrap();
        assert_eq!(resolved.to_value(), json!({"city": "New York"}));
    }

    #[test]
    fn missing_required_field_is_named() {
        let err = resolve(&json!({"days": 1}), &weather()).unwrap_err();
        assert_eq!(err.message, "Model did not provide parameter 'city'");
        assert_eq!(
            err.to_agent_text(),
            "Input provided by model is not valid: Model did not provide parameter 'city'"
        );
    }

    #[test]
    fn optional_nulls_are_dropped() {
        let resolved = resolve(&json!({"city": "Oslo", "days": null}), &weather()).unwrap();
        assert_eq!(resolved.to_value(), json!({"city": "Oslo"}));
    }

    #[test]
    fn type_mismatch_fails_every_tier() {
        let err = resolve(&json!({"city": "Oslo", "days": "many"}), &weather()).unwrap_err();
        assert!(err.message.contains("/days"));
    }

    #[test]
    fn empty_contract_accepts_anything() {
        let c = contract(json!({"name": "ping", "url": "https://example.com"}));
        assert_eq!(resolve(&json!("whatever"), &c).unwrap().to_value(), json!({}));
        assert_eq!(resolve(&Value::Null, &c).unwrap().to_value(), json!({}));
    }
}
