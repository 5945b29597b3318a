use crate::errors::ToolError;
use jsonschema::error::{TypeKind, ValidationErrorKind};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::Arc;

/// Outcome of a failed schema check: missing required properties are kept
/// apart from every other violation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaReport {
    pub missing: Vec<String>,
    pub problems: Vec<String>,
}

impl SchemaReport {
    pub fn summary(&self) -> String {
        if let Some(name) = self.missing.first() {
            return format!("Model did not provide parameter '{}'", name);
        }
        self.problems.join("; ")
    }
}

#[derive(Clone)]
pub struct SchemaValidator {
    schema: Value,
    compiled: Arc<JSONSchema>,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("schema", &self.schema)
            .finish()
    }
}

impl SchemaValidator {
    pub fn compile(schema: &Value) -> Result<Self, ToolError> {
        let compiled = JSONSchema::compile(schema).map_err(|err| {
            ToolError::configuration(format!("Invalid parameter schema: {}", err))
        })?;
        Ok(Self {
            schema: schema.clone(),
            compiled: Arc::new(compiled),
        })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn validate(&self, instance: &Value) -> Result<(), SchemaReport> {
        let errors = match self.compiled.validate(instance) {
            Ok(()) => return Ok(()),
            Err(errors) => errors,
        };
        let mut report = SchemaReport::default();
        for err in errors.take(10) {
            let instance_path = if err.instance_path.to_string().is_empty() {
                "(root)".to_string()
            } else {
                err.instance_path.to_string()
            };
            match &err.kind {
                ValidationErrorKind::Required { property } => {
                    let prop = property
                        .as_str()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| property.to_string());
                    report.missing.push(prop);
                }
                ValidationErrorKind::Type { kind } => {
                    report
                        .problems
                        .push(format!("{}: expected {}", instance_path, format_type_kind(kind)));
                }
                _ => report.problems.push(format!("{}: {}", instance_path, err)),
            }
        }
        Err(report)
    }
}

fn format_type_kind(kind: &TypeKind) -> String {
    match kind {
        TypeKind::Single(primitive) => primitive.to_string(),
        TypeKind::Multiple(types) => {
            let list: Vec<String> = (*types).into_iter().map(|t| t.to_string()).collect();
            if list.is_empty() {
                "unknown".to_string()
            } else {
                list.join(" | ")
            }
        }
    }
}
