//! Declarative action descriptions.
//!
//! An [`ActionDescription`] is the wire/storage unit interpreted by the engine. It is
//! JSON/YAML compatible and deliberately immutable: templates inside `params` stay
//! unresolved until the executor runs the action against a live context.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value};

/// A single declarative unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescription {
    /// Identifier used for logging and tracing. Not guaranteed unique at runtime.
    #[serde(default)]
    pub id: String,
    /// Key into the action registry.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Arbitrary nested parameters which may contain `{{path}}` placeholders.
    #[serde(default = "empty_params")]
    pub params: Value,
    /// Optional guard; a falsy evaluation skips the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Guard>,
    /// Continuations executed as a sequence after a successful run.
    #[serde(default, skip_serializing_if = "ActionList::is_empty")]
    pub on_success: ActionList,
    /// Continuations executed as a sequence after a failed run.
    #[serde(default, skip_serializing_if = "ActionList::is_empty")]
    pub on_error: ActionList,
    /// Optional retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Optional timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn empty_params() -> Value {
    Value::Object(JsonMap::new())
}

impl ActionDescription {
    /// Creates a description of the given type with empty params.
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            action_type: action_type.into(),
            params: empty_params(),
            when: None,
            on_success: ActionList::default(),
            on_error: ActionList::default(),
            retry: None,
            timeout: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_when(mut self, guard: impl Into<Guard>) -> Self {
        self.when = Some(guard.into());
        self
    }

    pub fn with_on_success(mut self, actions: impl Into<ActionList>) -> Self {
        self.on_success = actions.into();
        self
    }

    pub fn with_on_error(mut self, actions: impl Into<ActionList>) -> Self {
        self.on_error = actions.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Label used in logs: the id when present, otherwise the type.
    pub fn label(&self) -> &str {
        if self.id.is_empty() { &self.action_type } else { &self.id }
    }
}

/// Guard expression controlling whether an action runs at all.
///
/// Authors may write either a JSON boolean or a template/boolean expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Guard {
    Literal(bool),
    Expression(String),
}

impl From<bool> for Guard {
    fn from(value: bool) -> Self {
        Guard::Literal(value)
    }
}

impl From<&str> for Guard {
    fn from(value: &str) -> Self {
        Guard::Expression(value.to_string())
    }
}

impl From<String> for Guard {
    fn from(value: String) -> Self {
        Guard::Expression(value)
    }
}

/// Continuation list. Accepts a single description or an array on the wire and is
/// always normalized to a list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionList(pub Vec<ActionDescription>);

impl ActionList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[ActionDescription] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ActionDescription> {
        self.0.iter()
    }
}

impl From<ActionDescription> for ActionList {
    fn from(action: ActionDescription) -> Self {
        ActionList(vec![action])
    }
}

impl From<Vec<ActionDescription>> for ActionList {
    fn from(actions: Vec<ActionDescription>) -> Self {
        ActionList(actions)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ActionDescription>),
    One(Box<ActionDescription>),
}

impl<'de> Deserialize<'de> for ActionList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = match Option::<OneOrMany>::deserialize(deserializer)? {
            None => Vec::new(),
            Some(OneOrMany::Many(actions)) => actions,
            Some(OneOrMany::One(action)) => vec![*action],
        };
        Ok(ActionList(list))
    }
}

impl Serialize for ActionList {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// Retry policy for an action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one (>= 1).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Base delay between attempts, in milliseconds.
    #[serde(default)]
    pub delay: u64,
    /// How the delay grows between attempts.
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay: 0,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay_ms: u64, backoff: Backoff) -> Self {
        Self {
            attempts,
            delay: delay_ms,
            backoff,
        }
    }

    /// Delay to wait after the failed attempt with the given zero-based index.
    ///
    /// Linear backoff keeps the base delay; exponential backoff doubles it per attempt
    /// (`delay * 2^attempt`), saturating instead of overflowing.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let millis = match self.backoff {
            Backoff::Linear => self.delay,
            Backoff::Exponential => self.delay.saturating_mul(2u64.saturating_pow(attempt_index)),
        };
        Duration::from_millis(millis)
    }
}

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Linear,
    Exponential,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn continuations_accept_single_or_list() {
        let action: ActionDescription = serde_json::from_value(json!({
            "id": "save",
            "type": "apiCall",
            "params": { "url": "/api/users/{{routeParams.userId}}" },
            "onSuccess": { "type": "showToast", "params": { "message": "Saved" } },
            "onError": [
                { "type": "showToast", "params": { "message": "Failed" } },
                { "type": "log" }
            ]
        }))
        .expect("parse action");

        assert_eq!(action.action_type, "apiCall");
        assert_eq!(action.on_success.len(), 1);
        assert_eq!(action.on_success.as_slice()[0].action_type, "showToast");
        assert_eq!(action.on_error.len(), 2);
        assert_eq!(action.on_error.as_slice()[1].params, json!({}));
    }

    #[test]
    fn guard_accepts_boolean_and_expression() {
        let literal: ActionDescription = serde_json::from_value(json!({"type": "x", "when": false})).unwrap();
        assert_eq!(literal.when, Some(Guard::Literal(false)));

        let expression: ActionDescription = serde_json::from_value(json!({"type": "x", "when": "{{user.isAdmin}}"})).unwrap();
        assert_eq!(expression.when, Some(Guard::Expression("{{user.isAdmin}}".into())));
    }

    #[test]
    fn retry_policy_parses_from_yaml_with_defaults() {
        let action: ActionDescription = serde_yaml::from_str(
            r#"
type: apiCall
retry:
  attempts: 3
  backoff: exponential
timeout: 500
"#,
        )
        .expect("parse yaml");

        let retry = action.retry.expect("retry policy");
        assert_eq!(retry.attempts, 3);
        assert_eq!(retry.delay, 0);
        assert_eq!(retry.backoff, Backoff::Exponential);
        assert_eq!(action.timeout, Some(500));
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let retry = RetryPolicy::new(4, 100, Backoff::Exponential);
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(800));

        let linear = RetryPolicy::new(4, 100, Backoff::Linear);
        assert_eq!(linear.delay_for(3), Duration::from_millis(100));
    }

    #[test]
    fn exponential_backoff_saturates() {
        let retry = RetryPolicy::new(100, u64::MAX / 2, Backoff::Exponential);
        assert_eq!(retry.delay_for(90), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn empty_continuations_are_not_serialized() {
        let value = serde_json::to_value(ActionDescription::new("noop")).unwrap();
        assert_eq!(value, json!({"id": "", "type": "noop", "params": {}}));
    }
}
