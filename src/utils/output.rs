use crate::errors::ToolError;
use crate::utils::data_path::{lookup_path, parse_path, set_path_value, PathSegment};
use serde_json::Value;

/// Splits a comma-separated field list, dropping blanks.
pub fn parse_field_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|field| field.trim())
        .filter(|field| !field.is_empty())
        .map(|field| field.to_string())
        .collect()
}

fn pick_fields(value: &Value, fields: &[String]) -> Result<Value, ToolError> {
    let mut out = Value::Object(Default::default());
    for field in fields {
        if let Some(entry) = lookup_path(value, field)? {
            set_path_value(&mut out, field, entry)?;
        }
    }
    Ok(out)
}

fn remove_path(target: &mut Value, segments: &[PathSegment]) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = target;
    for segment in parents {
        let next = match segment {
            PathSegment::Key(key) => current.get_mut(key.as_str()),
            PathSegment::Index(idx) => current.get_mut(*idx),
        };
        match next {
            Some(next) => current = next,
            None => return,
        }
    }
    match (last, current) {
        (PathSegment::Key(key), Value::Object(map)) => {
            map.remove(key);
        }
        (PathSegment::Index(idx), Value::Array(items)) if *idx < items.len() => {
            items.remove(*idx);
        }
        _ => {}
    }
}

fn omit_fields(value: &Value, fields: &[String]) -> Result<Value, ToolError> {
    let mut out = value.clone();
    for field in fields {
        remove_path(&mut out, &parse_path(field)?);
    }
    Ok(out)
}

/// Keeps (`selected`) or drops (`except`) dotted field paths. Arrays are
/// shaped element by element; other modes return the value unchanged.
pub fn shape_fields(value: &Value, mode: &str, fields: &[String]) -> Result<Value, ToolError> {
    if fields.is_empty() {
        return Ok(value.clone());
    }
    if let Value::Array(items) = value {
        return items
            .iter()
            .map(|item| shape_fields(item, mode, fields))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if !value.is_object() {
        return Ok(value.clone());
    }
    match mode {
        "selected" => pick_fields(value, fields),
        "except" => omit_fields(value, fields),
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selected_keeps_nested_paths() {
        let data = json!({"id": 1, "user": {"name": "a", "email": "x"}, "noise": true});
        let fields = parse_field_list("id, user.name");
        assert_eq!(
            shape_fields(&data, "selected", &fields).unwrap(),
            json!({"id": 1, "user": {"name": "a"}})
        );
    }

    #[test]
    fn except_applies_to_every_array_item() {
        let data = json!([{"id": 1, "secret": "s"}, {"id": 2}]);
        let fields = parse_field_list("secret");
        assert_eq!(
            shape_fields(&data, "except", &fields).unwrap(),
            json!([{"id": 1}, {"id": 2}])
        );
    }

    #[test]
    fn all_mode_is_identity() {
        let data = json!({"a": 1});
        assert_eq!(shape_fields(&data, "all", &["a".into()]).unwrap(), data);
    }
}
