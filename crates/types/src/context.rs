//! Per-interaction execution context.
//!
//! The context is created by the caller for one logical interaction and discarded when
//! the interaction ends. The engine only reads it; mutation happens exclusively through
//! capabilities such as [`StateStore`] that the context hands to handlers.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

/// Capability used by handlers to mutate page-level state.
///
/// Implementations own their own synchronization; the executor never locks on behalf of
/// handlers running in parallel.
pub trait StateStore: Send + Sync {
    /// Reads the value stored at a dotted path.
    fn get(&self, path: &str) -> Option<Value>;
    /// Writes a value at a dotted path, shallow-merging objects when `merge` is true.
    fn set(&self, path: &str, value: Value, merge: bool);
    /// Returns a copy of the entire state tree.
    fn snapshot(&self) -> Value;
}

/// Information about the event that triggered the interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    /// Event name, for example `click` or `submit`.
    #[serde(default)]
    pub event: String,
    /// Identifier of the widget that raised the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Event payload.
    #[serde(default)]
    pub payload: Value,
}

/// Read-mostly bag of runtime state templates resolve against.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(default)]
    pub page_state: JsonMap<String, Value>,
    #[serde(default)]
    pub form_data: JsonMap<String, Value>,
    #[serde(default)]
    pub widget_states: JsonMap<String, Value>,
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub tenant: Value,
    #[serde(default)]
    pub route_params: JsonMap<String, Value>,
    #[serde(default)]
    pub query_params: JsonMap<String, Value>,
    #[serde(default)]
    pub current_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerInfo>,
    /// Any other top-level entries; templates whose first segment is not part of the
    /// known vocabulary resolve against these.
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
    /// State mutation capability handed to handlers.
    #[serde(skip)]
    pub state: Option<Arc<dyn StateStore>>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("current_path", &self.current_path)
            .field("route_params", &self.route_params)
            .field("query_params", &self.query_params)
            .field("has_state", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn with_state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_route_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.route_params.insert(name.into(), value.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn with_user(mut self, user: Value) -> Self {
        self.user = user;
        self
    }

    /// True when the user holds the given permission.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|granted| granted == permission)
    }

    /// Page state as seen by templates: the live state store when one is attached,
    /// otherwise the static snapshot supplied by the caller.
    pub fn page_state_value(&self) -> Value {
        match &self.state {
            Some(store) => store.snapshot(),
            None => Value::Object(self.page_state.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_top_level_keys_land_in_extra() {
        let context: ExecutionContext = serde_json::from_value(json!({
            "routeParams": { "userId": "42" },
            "currentPath": "/users/42",
            "permissions": ["users:write"],
            "featureFlags": { "beta": true }
        }))
        .expect("parse context");

        assert_eq!(context.route_params["userId"], json!("42"));
        assert_eq!(context.current_path, "/users/42");
        assert!(context.has_permission("users:write"));
        assert_eq!(context.extra["featureFlags"], json!({ "beta": true }));
    }
}
