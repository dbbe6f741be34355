//! Template parsing and diagnostics helpers.

use actionflow_types::ExecutionContext;
use serde_json::Value;

use crate::resolve::lookup_path;

/// Structured unresolved template reference diagnostic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnresolvedTemplateRef {
    /// Source path where the template was found, for example `params.body.email`.
    pub source_path: String,
    /// Raw template expression without delimiters.
    pub expression: String,
}

/// Extracts template expressions from a string value.
///
/// Returned expressions do not include `{{` or `}}` delimiters.
pub fn extract_template_expressions(value: &str) -> Vec<String> {
    let mut expressions = Vec::new();
    let mut remainder = value;

    while let Some(start) = remainder.find("{{") {
        let after_start = &remainder[start + 2..];
        let Some(end) = after_start.find("}}") else {
            break;
        };
        let expression = after_start[..end].trim();
        if !expression.is_empty() {
            expressions.push(expression.to_string());
        }
        remainder = &after_start[end + 2..];
    }

    expressions
}

/// Collects every template expression found in an arbitrary JSON value tree.
pub fn collect_template_expressions(value: &Value) -> Vec<String> {
    let mut expressions = Vec::new();
    visit_strings(value, "", &mut |_, text| expressions.extend(extract_template_expressions(text)));
    expressions
}

/// Collects template references that do not resolve against the context.
pub fn collect_unresolved_templates(value: &Value, source_path: &str, context: &ExecutionContext) -> Vec<UnresolvedTemplateRef> {
    let mut unresolved = Vec::new();
    visit_strings(value, source_path, &mut |path, text| {
        for expression in extract_template_expressions(text) {
            if lookup_path(&expression, context).is_none() {
                unresolved.push(UnresolvedTemplateRef {
                    source_path: path.to_string(),
                    expression,
                });
            }
        }
    });
    unresolved
}

fn visit_strings(value: &Value, source_path: &str, visitor: &mut dyn FnMut(&str, &str)) {
    match value {
        Value::String(text) => visitor(source_path, text),
        Value::Array(values) => {
            for (index, nested) in values.iter().enumerate() {
                visit_strings(nested, &format!("{source_path}[{index}]"), visitor);
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                let nested_path = if source_path.is_empty() {
                    key.clone()
                } else {
                    format!("{source_path}.{key}")
                };
                visit_strings(nested, &nested_path, visitor);
            }
        }
        _ => {}
    }
}
