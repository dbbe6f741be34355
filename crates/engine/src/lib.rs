//! # Actionflow Engine
//!
//! The Actionflow Engine interprets declarative action descriptions against a live
//! execution context. An action names a handler type, carries templated params and may
//! declare a guard, a retry policy, a timeout and success/error continuations. The
//! engine resolves the templates, runs the handler under a cancellable
//! retry/timeout envelope and returns a typed [`ActionResult`].
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use actionflow_engine::{ActionExecutor, ActionRegistry, handler_fn};
//! use actionflow_types::{ActionDescription, ExecutionContext};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = Arc::new(ActionRegistry::new());
//! registry
//!     .register("echo", handler_fn(|params, _context, _signal| async move { Ok(params) }), None)
//!     .expect("register echo");
//!
//! let executor = ActionExecutor::new(registry);
//! let context = Arc::new(ExecutionContext::default().with_route_param("id", "42"));
//! let action = ActionDescription::new("echo").with_params(json!({ "url": "/api/users/{{routeParams.id}}" }));
//!
//! let result = executor.execute(&action, context, None).await;
//! assert_eq!(result.data, Some(json!({ "url": "/api/users/42" })));
//! # });
//! ```
//!
//! ## Architecture
//!
//! - **`resolve`**: `{{path}}` template resolution and guard evaluation
//! - **`templates`**: diagnostics for unresolved template references
//! - **`registry`**: action type to handler mapping
//! - **`cancel`**: cancellation scopes and timeouts
//! - **`executor`**: the orchestration core, sequences and parallel groups
//! - **`composite`**: `sequence`, `parallel` and `conditional` handlers
//! - **`observer`**: lifecycle events
//! - **`state`**: in-memory page state capability
//! - **`config`**: engine tunables

use std::{fs, path::Path};

use actionflow_types::{ActionList, ExecutionContext};
use anyhow::{Context, Result, bail};

pub mod cancel;
pub mod composite;
pub mod config;
pub mod executor;
pub mod observer;
pub mod registry;
pub mod resolve;
pub mod state;
pub mod templates;

pub use actionflow_types::{ActionDescription, ActionError, ActionResult, CancelReason};
pub use cancel::CancelSignal;
pub use config::EngineConfig;
pub use executor::ActionExecutor;
pub use observer::{ExecutionEvent, ExecutionEventKind, ExecutionObserver, FanoutObserver, NoopObserver, TracingObserver};
pub use registry::{ActionHandler, ActionRegistry, HandlerMetadata, HandlerOutcome, handler_fn};
pub use resolve::{evaluate_condition, resolve_template, resolve_templates_in_object};
pub use state::InMemoryStateStore;

/// Loads action descriptions from a YAML or JSON file.
///
/// Accepted shapes: a single action, a list of actions, or a document with the
/// actions under an `actions` key.
///
/// # Errors
///
/// Fails when the file cannot be read or matches none of the accepted shapes.
pub fn parse_action_file(file_path: impl AsRef<Path>) -> Result<ActionList> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("failed to read action file: {}", file_path.display()))?;

    let mut document: serde_yaml::Value =
        serde_yaml::from_str(&content).with_context(|| format!("invalid YAML/JSON in {}", file_path.display()))?;

    // A mapping with `actions` and no `type` wraps the list; anything else is the list itself.
    if let serde_yaml::Value::Mapping(mapping) = &mut document
        && !mapping.contains_key("type")
        && let Some(actions) = mapping.remove("actions")
    {
        document = actions;
    }
    if document.is_null() {
        bail!("no actions found in {}", file_path.display());
    }
    serde_yaml::from_value::<ActionList>(document)
        .with_context(|| format!("unsupported action document format in {}", file_path.display()))
}

/// Loads an execution context from a YAML or JSON file. Unknown top-level keys are
/// kept as extra context roots.
pub fn parse_context_file(file_path: impl AsRef<Path>) -> Result<ExecutionContext> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("failed to read context file: {}", file_path.display()))?;
    if content.trim().is_empty() {
        return Ok(ExecutionContext::default());
    }
    serde_yaml::from_str(&content).with_context(|| format!("invalid context document: {}", file_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_action_file_single_action() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("action.yaml");
        fs::write(
            &path,
            r#"
id: load-user
type: apiCall
params:
  url: "/api/users/{{routeParams.id}}"
onSuccess:
  type: showToast
"#,
        )
        .unwrap();

        let actions = parse_action_file(&path).expect("parse single action");
        assert_eq!(actions.len(), 1);
        let action = &actions.as_slice()[0];
        assert_eq!(action.action_type, "apiCall");
        assert_eq!(action.on_success.len(), 1);
    }

    #[test]
    fn parse_action_file_single_action_without_continuations() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("action.yaml");
        fs::write(&path, "type: apiCall\nparams:\n  url: /x\n").unwrap();

        let actions = parse_action_file(&path).expect("parse single action");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions.as_slice()[0].params["url"], serde_json::json!("/x"));
    }

    #[test]
    fn parse_action_file_keeps_sequence_actions_in_params() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("sequence.yaml");
        fs::write(&path, "type: sequence\nparams:\n  actions:\n    - type: log\n").unwrap();

        let actions = parse_action_file(&path).expect("parse composite action");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions.as_slice()[0].action_type, "sequence");
    }

    #[test]
    fn parse_action_file_rejects_empty_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("empty.yaml");
        fs::write(&path, "").unwrap();

        assert!(parse_action_file(&path).is_err());
    }

    #[test]
    fn parse_action_file_actions_document() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("actions.json");
        fs::write(&path, r#"{ "actions": [{ "type": "log" }, { "type": "echo", "when": false }] }"#).unwrap();

        let actions = parse_action_file(&path).expect("parse actions document");
        let types: Vec<&str> = actions.iter().map(|action| action.action_type.as_str()).collect();
        assert_eq!(types, vec!["log", "echo"]);
    }

    #[test]
    fn parse_action_file_rejects_unknown_shapes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "just a string").unwrap();

        assert!(parse_action_file(&path).is_err());
    }

    #[test]
    fn parse_context_file_keeps_extra_roots() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("context.yaml");
        fs::write(&path, "routeParams:\n  id: 42\nfeatureFlags:\n  beta: true\n").unwrap();

        let context = parse_context_file(&path).expect("parse context");
        assert_eq!(resolve_template("{{params.id}}", &context), serde_json::json!(42));
        assert!(evaluate_condition("featureFlags.beta", &context));
    }
}
