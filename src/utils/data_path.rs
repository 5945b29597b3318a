use crate::errors::ToolError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, ToolError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ToolError::internal("Path must be a non-empty string"));
    }
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;
    for ch in trimmed.chars() {
        match ch {
            '.' if !in_brackets => {
                if !current.trim().is_empty() {
                    segments.push(segment_from(&current));
                }
                current.clear();
            }
            '[' => {
                if !current.trim().is_empty() {
                    segments.push(segment_from(&current));
                    current.clear();
                }
                in_brackets = true;
            }
            ']' => {
                if !current.trim().is_empty() {
                    segments.push(segment_from(&current));
                }
                current.clear();
                in_brackets = false;
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        segments.push(segment_from(&current));
    }
    Ok(segments)
}

fn segment_from(raw: &str) -> PathSegment {
    let trimmed = raw.trim().trim_matches('"').trim_matches('\'').trim();
    if let Ok(index) = trimmed.parse::<usize>() {
        return PathSegment::Index(index);
    }
    PathSegment::Key(trimmed.to_string())
}

fn step(current: &Value, segment: &PathSegment) -> Option<Value> {
    match segment {
        PathSegment::Key(key) => match current {
            Value::Object(map) => match map.get(key) {
                Some(value) => Some(value.clone()),
                None if key == "length" => Some(Value::from(map.len())),
                None => None,
            },
            Value::Array(items) if key == "length" => Some(Value::from(items.len())),
            Value::String(text) if key == "length" => Some(Value::from(text.chars().count())),
            _ => None,
        },
        PathSegment::Index(index) => current.as_array().and_then(|arr| arr.get(*index)).cloned(),
    }
}

/// Walks `path` through `target`; `length` resolves on arrays, strings and
/// objects that have no such key.
pub fn lookup_path(target: &Value, path: &str) -> Result<Option<Value>, ToolError> {
    if path.trim().is_empty() {
        return Ok(Some(target.clone()));
    }
    let segments = parse_path(path)?;
    let mut current = target.clone();
    for segment in segments.iter() {
        match step(&current, segment) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Writes `value` at `path`, creating intermediate objects. Index segments
/// must point into existing arrays.
pub fn set_path_value(target: &mut Value, path: &str, value: Value) -> Result<(), ToolError> {
    let segments = parse_path(path)?;
    let mut current = target;
    for (idx, segment) in segments.iter().enumerate() {
        let last = idx + 1 == segments.len();
        match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Default::default());
                }
                let map = current
                    .as_object_mut()
                    .ok_or_else(|| ToolError::internal("Path target is not an object"))?;
                if last {
                    map.insert(key.clone(), value);
                    return Ok(());
                }
                current = map
                    .entry(key.clone())
                    .or_insert(Value::Object(Default::default()));
            }
            PathSegment::Index(index) => {
                let slot = current
                    .as_array_mut()
                    .and_then(|arr| arr.get_mut(*index))
                    .ok_or_else(|| {
                        ToolError::internal(format!("Path '{}' has no index {}", path, index))
                    })?;
                if last {
                    *slot = value;
                    return Ok(());
                }
                current = slot;
            }
        }
    }
    Ok(())
}
