//! # Template Resolution and Condition Evaluation
//!
//! This module reads values out of an [`ExecutionContext`] using dotted path
//! expressions and substitutes them into strings or arbitrarily nested JSON values.
//! It also evaluates the boolean guard expressions attached to actions.
//!
//! ## Template Syntax
//!
//! Templates use the `{{ ... }}` syntax. The first path segment selects a context root:
//!
//! - `{{ pageState.* }}` (alias `state`) - page-level state, live when a state store is attached
//! - `{{ formData.* }}` (alias `form`) - form values
//! - `{{ widgetStates.* }}` (alias `widgets`) - per-widget state
//! - `{{ user.* }}`, `{{ permissions }}`, `{{ tenant.* }}`
//! - `{{ routeParams.* }}` (alias `params`), `{{ queryParams.* }}` (alias `query`)
//! - `{{ currentPath }}` (alias `path`), `{{ trigger.* }}` (alias `event`)
//!
//! Any other first segment resolves against the context's extra top-level entries, so
//! the context can grow without the resolver enumerating every field.
//!
//! ## Usage
//!
//! ```rust
//! use actionflow_engine::resolve::{resolve_template, resolve_templates_in_object, evaluate_condition};
//! use actionflow_types::ExecutionContext;
//! use serde_json::json;
//!
//! let context = ExecutionContext::default().with_route_param("userId", "42");
//!
//! let params = json!({ "url": "/api/users/{{routeParams.userId}}" });
//! let resolved = resolve_templates_in_object(&params, &context).expect("resolve");
//! assert_eq!(resolved["url"], "/api/users/42");
//!
//! assert_eq!(resolve_template("{{routeParams.userId}}", &context), json!("42"));
//! assert!(evaluate_condition("routeParams.userId == \"42\"", &context));
//! ```

use actionflow_types::ExecutionContext;
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;

/// Default depth guard for [`resolve_templates_in_object`].
pub const DEFAULT_MAX_TEMPLATE_DEPTH: usize = 64;

/// Errors raised while resolving templates in nested structures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The value nests deeper than the configured guard allows.
    #[error("template input nests deeper than {max_depth} levels at '{path}'")]
    DepthExceeded { max_depth: usize, path: String },
}

/// Walks a dotted path through nested objects and arrays.
///
/// Numeric segments index arrays; `items[0].id` is accepted as an alias for
/// `items.0.id`. Returns `None` when any segment is missing or the value at that
/// point cannot be indexed. An empty path returns the container itself.
pub fn get_nested_value<'a>(container: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = path_segments(path);
    walk_segments(container, &segments)
}

/// Writes `value` at a dotted path, creating intermediate objects as needed.
///
/// When `merge` is true and both the existing and the new value are objects, the new
/// entries are shallow-merged into the existing object. Arrays are always replaced.
/// Intermediate values that are not objects (and not arrays indexed in bounds) are
/// replaced by fresh objects.
pub fn set_nested_value(container: &mut Value, path: &str, value: Value, merge: bool) {
    let segments = path_segments(path);
    let mut current = container;

    for segment in &segments {
        let descend_into_array = matches!(
            current,
            Value::Array(items) if segment.parse::<usize>().is_ok_and(|index| index < items.len())
        );
        if descend_into_array {
            let index = segment.parse::<usize>().unwrap_or_default();
            current = &mut current[index];
            continue;
        }
        if !current.is_object() {
            *current = Value::Object(JsonMap::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map.entry(segment.clone()).or_insert(Value::Null);
    }

    match (current, value) {
        (Value::Object(existing), Value::Object(incoming)) if merge => {
            for (key, incoming_value) in incoming {
                existing.insert(key, incoming_value);
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Resolves a dotted path against the execution context.
///
/// Returns `None` when the root or any nested segment is absent.
pub fn lookup_path(path: &str, context: &ExecutionContext) -> Option<Value> {
    let segments = path_segments(path);
    let (root, rest) = segments.split_first()?;

    match root.as_str() {
        "pageState" | "state" => match &context.state {
            Some(store) if !rest.is_empty() => store.get(&rest.join(".")),
            _ => walk_segments(&context.page_state_value(), rest).cloned(),
        },
        "formData" | "form" => walk_map(&context.form_data, rest),
        "widgetStates" | "widgets" => walk_map(&context.widget_states, rest),
        "user" => walk_segments(&context.user, rest).cloned(),
        "permissions" => {
            let permissions = Value::Array(context.permissions.iter().cloned().map(Value::String).collect());
            walk_segments(&permissions, rest).cloned()
        }
        "tenant" => walk_segments(&context.tenant, rest).cloned(),
        "routeParams" | "params" => walk_map(&context.route_params, rest),
        "queryParams" | "query" => walk_map(&context.query_params, rest),
        "currentPath" | "path" if rest.is_empty() => Some(Value::String(context.current_path.clone())),
        "trigger" | "event" => {
            let trigger = serde_json::to_value(context.trigger.as_ref()?).ok()?;
            walk_segments(&trigger, rest).cloned()
        }
        _ => walk_map(&context.extra, &segments),
    }
}

/// Returns true when the path's first segment names something the context knows about.
pub fn is_known_root(path: &str, context: &ExecutionContext) -> bool {
    let segments = path_segments(path);
    let Some(root) = segments.first() else {
        return false;
    };
    matches!(
        root.as_str(),
        "pageState"
            | "state"
            | "formData"
            | "form"
            | "widgetStates"
            | "widgets"
            | "user"
            | "permissions"
            | "tenant"
            | "routeParams"
            | "params"
            | "queryParams"
            | "query"
            | "currentPath"
            | "path"
            | "trigger"
            | "event"
    ) || context.extra.contains_key(root)
}

/// Resolves `{{ ... }}` placeholders in a string.
///
/// When the whole string is exactly one placeholder, the resolved value is returned
/// with its native type (numbers stay numbers, booleans stay booleans); an absent
/// value resolves to `null`. When placeholders are mixed with literal text each one is
/// stringified and substituted, absent values becoming the empty string. Strings
/// without placeholders, or with an unterminated one, pass through unchanged.
pub fn resolve_template(template: &str, context: &ExecutionContext) -> Value {
    if let Some(expression) = whole_expression(template) {
        return lookup_path(expression, context).unwrap_or(Value::Null);
    }
    if !template.contains("{{") {
        return Value::String(template.to_string());
    }
    Value::String(interpolate_string(template, context))
}

/// Recursively resolves every string leaf of a nested value with the default depth guard.
pub fn resolve_templates_in_object(value: &Value, context: &ExecutionContext) -> Result<Value, TemplateError> {
    resolve_templates_with_depth(value, context, DEFAULT_MAX_TEMPLATE_DEPTH)
}

/// Recursively resolves every string leaf of a nested value.
///
/// Non-string leaves are left untouched. Nesting deeper than `max_depth` is rejected
/// with [`TemplateError::DepthExceeded`] rather than recursing without bound.
pub fn resolve_templates_with_depth(value: &Value, context: &ExecutionContext, max_depth: usize) -> Result<Value, TemplateError> {
    resolve_node(value, context, 0, max_depth, "params")
}

fn resolve_node(value: &Value, context: &ExecutionContext, depth: usize, max_depth: usize, source_path: &str) -> Result<Value, TemplateError> {
    if depth > max_depth {
        return Err(TemplateError::DepthExceeded {
            max_depth,
            path: source_path.to_string(),
        });
    }
    match value {
        Value::String(template) => Ok(resolve_template(template, context)),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| resolve_node(item, context, depth + 1, max_depth, &format!("{source_path}[{index}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = JsonMap::with_capacity(map.len());
            for (key, nested) in map {
                let nested_path = format!("{source_path}.{key}");
                resolved.insert(key.clone(), resolve_node(nested, context, depth + 1, max_depth, &nested_path)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Evaluates a guard expression against the context.
///
/// An empty expression is true. A `{{ ... }}` wrapper is optional. The resolved value
/// decides the outcome: booleans as-is, the strings `"true"`/`"false"` (any case)
/// parsed, everything else by truthiness (`null`, `0`, `""` are false). Expressions
/// may also combine operands with `!`, `==`, `!=`, `&&` and `||`; each operand is a
/// literal, a bare path or a `{{ ... }}` placeholder.
///
/// # Examples
///
/// ```rust
/// use actionflow_engine::resolve::evaluate_condition;
/// use actionflow_types::ExecutionContext;
/// use serde_json::json;
///
/// let context = ExecutionContext::default().with_user(json!({ "isAdmin": true, "role": "editor" }));
/// assert!(evaluate_condition("{{user.isAdmin}}", &context));
/// assert!(evaluate_condition("user.role == \"editor\" && !user.suspended", &context));
/// assert!(!evaluate_condition("{{user.missing}}", &context));
/// assert!(evaluate_condition("", &context));
/// ```
pub fn evaluate_condition(expression: &str, context: &ExecutionContext) -> bool {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return true;
    }
    if let Some(inner) = whole_expression(trimmed) {
        return evaluate_expression(inner, context);
    }
    if trimmed.contains("{{") && !has_operator(trimmed) {
        return is_truthy(&resolve_template(trimmed, context));
    }
    evaluate_expression(trimmed, context)
}

/// True when the expression combines operands at the top level.
fn has_operator(expression: &str) -> bool {
    expression.starts_with('!') || ["||", "&&", "!=", "=="].iter().any(|operator| split_top_level(expression, operator).is_some())
}

/// Truthiness of a resolved value, with `"true"`/`"false"` strings parsed case-insensitively.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => {
            if text.eq_ignore_ascii_case("true") {
                true
            } else if text.eq_ignore_ascii_case("false") {
                false
            } else {
                !text.is_empty()
            }
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn evaluate_expression(expression: &str, context: &ExecutionContext) -> bool {
    let expression = expression.trim();
    if let Some(parts) = split_top_level(expression, "||") {
        return parts.iter().any(|part| evaluate_expression(part, context));
    }
    if let Some(parts) = split_top_level(expression, "&&") {
        return parts.iter().all(|part| evaluate_expression(part, context));
    }
    if let Some(parts) = split_top_level(expression, "!=") {
        return compare_operands(&parts, context).is_some_and(|equal| !equal);
    }
    if let Some(parts) = split_top_level(expression, "==") {
        return compare_operands(&parts, context).unwrap_or(false);
    }
    if let Some(negated) = expression.strip_prefix('!') {
        return !evaluate_expression(negated, context);
    }
    is_truthy(&resolve_operand(expression, context))
}

fn compare_operands(parts: &[&str], context: &ExecutionContext) -> Option<bool> {
    let [left, right] = parts else {
        return None;
    };
    let left_value = resolve_operand(left, context);
    let right_value = resolve_operand(right, context);
    Some(left_value == right_value || format_value(&left_value) == format_value(&right_value))
}

/// Resolves one side of a guard expression: a JSON literal, a context path, or
/// otherwise the raw text as a string.
fn resolve_operand(operand: &str, context: &ExecutionContext) -> Value {
    let trimmed = operand.trim();
    if let Some(inner) = whole_expression(trimmed) {
        return lookup_path(inner, context).unwrap_or(Value::Null);
    }
    if (trimmed.starts_with('"')
        || trimmed.starts_with('[')
        || trimmed.starts_with('{')
        || matches!(trimmed, "true" | "false" | "null")
        || trimmed.parse::<f64>().is_ok())
        && let Ok(literal) = serde_json::from_str::<Value>(trimmed)
    {
        return literal;
    }
    if let Some(quoted) = trimmed.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')) {
        return Value::String(quoted.to_string());
    }
    if is_known_root(trimmed, context) {
        return lookup_path(trimmed, context).unwrap_or(Value::Null);
    }
    Value::String(trimmed.to_string())
}

/// Splits on a top-level operator, ignoring occurrences inside quotes.
/// Returns `None` when the operator does not appear.
fn split_top_level<'a>(expression: &'a str, operator: &str) -> Option<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    let mut index = 0usize;
    let bytes = expression.as_bytes();

    while index < bytes.len() {
        let character = bytes[index] as char;
        match quote {
            Some(open) if character == open => quote = None,
            Some(_) => {}
            None if character == '"' || character == '\'' => quote = Some(character),
            None if bytes[index..].starts_with(operator.as_bytes()) => {
                parts.push(expression[start..index].trim());
                index += operator.len();
                start = index;
                continue;
            }
            None => {}
        }
        index += 1;
    }

    if parts.is_empty() {
        return None;
    }
    parts.push(expression[start..].trim());
    Some(parts)
}

/// Returns the inner expression when `text` is exactly one `{{ ... }}` placeholder.
pub(crate) fn whole_expression(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn interpolate_string(input: &str, context: &ExecutionContext) -> String {
    let mut output = String::with_capacity(input.len());
    let mut remaining = input;

    while let Some(start) = remaining.find("{{") {
        let (before, after) = remaining.split_at(start);
        output.push_str(before);

        let Some(end) = after.find("}}") else {
            output.push_str(after);
            return output;
        };
        let expression = after[2..end].trim();
        if let Some(value) = lookup_path(expression, context) {
            output.push_str(&format_value(&value));
        }
        remaining = &after[end + 2..];
    }

    output.push_str(remaining);
    output
}

/// Splits a path into segments, expanding bracket indices (`a[0].b` becomes `a`, `0`, `b`).
pub(crate) fn path_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut characters = path.trim().chars().peekable();

    while let Some(character) = characters.next() {
        match character {
            '.' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                let mut inner = String::new();
                for next in characters.by_ref() {
                    if next == ']' {
                        break;
                    }
                    inner.push(next);
                }
                let inner = inner.trim().trim_matches(|c| c == '"' || c == '\'');
                if !inner.is_empty() {
                    segments.push(inner.to_string());
                }
            }
            _ => current.push(character),
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn walk_segments<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn walk_map(map: &JsonMap<String, Value>, segments: &[String]) -> Option<Value> {
    match segments.split_first() {
        None => Some(Value::Object(map.clone())),
        Some((first, rest)) => walk_segments(map.get(first)?, rest).cloned(),
    }
}

/// Formats a resolved value for substitution into a larger string.
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
