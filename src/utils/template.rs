use crate::errors::ToolError;
use crate::utils::expression::{is_truthy, to_text, ExpressionEvaluator};
use serde_json::Value;

fn strip_expression_marker(template: &str) -> &str {
    template.strip_prefix('=').unwrap_or(template)
}

/// Renders `{{ expr }}` segments of `template`. A template that is exactly one
/// expression yields the evaluated value untouched; anything else yields a
/// string with each segment stringified in place.
pub fn render_template(
    template: &str,
    context: &Value,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<Value, ToolError> {
    let raw = strip_expression_marker(template.trim());
    if let Some(inner) = raw.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        if !inner.contains("{{") && !inner.contains("}}") {
            return evaluator.evaluate(inner, context);
        }
    }

    let raw = strip_expression_marker(template);
    let mut out = String::new();
    let mut rest = raw;
    while let Some(start) = rest.find("{{") {
        let (prefix, tail) = rest.split_at(start);
        out.push_str(prefix);
        if let Some(end) = tail.find("}}") {
            let value = evaluator.evaluate(&tail[2..end], context)?;
            out.push_str(&to_text(&value));
            rest = &tail[end + 2..];
        } else {
            out.push_str(tail);
            rest = "";
        }
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// Renders a completion predicate; string results `"true"`/`"false"` are
/// read as booleans, anything else by truthiness.
pub fn render_condition(
    template: &str,
    context: &Value,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<bool, ToolError> {
    match render_template(template, context, evaluator)? {
        Value::String(text) => match text.trim() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => evaluator.evaluate_bool(other, context),
        },
        value => Ok(is_truthy(&value)),
    }
}
