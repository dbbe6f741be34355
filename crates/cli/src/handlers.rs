//! Demo handlers registered by the `actionflow` binary.

use std::{sync::Arc, time::Duration};

use actionflow_engine::{ActionRegistry, HandlerMetadata, handler_fn, registry::RegistryError};
use actionflow_types::{ActionError, codes};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct LogParams {
    #[serde(default)]
    message: Value,
    #[serde(default)]
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DelayParams {
    ms: u64,
}

#[derive(Debug, Deserialize)]
struct FailParams {
    #[serde(default = "default_failure_message")]
    message: String,
    code: Option<String>,
}

fn default_failure_message() -> String {
    "action failed".to_string()
}

#[derive(Debug, Deserialize)]
struct SetStateParams {
    path: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    merge: bool,
}

pub fn register_demo_handlers(registry: &ActionRegistry) -> Result<(), RegistryError> {
    registry.register(
        "log",
        handler_fn(|params, _context, _signal| async move {
            let params: LogParams = serde_json::from_value(params)?;
            let message = match &params.message {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            match params.level.as_deref() {
                Some("warn") => warn!(message = %message, "log action"),
                _ => info!(message = %message, "log action"),
            }
            Ok(json!({ "message": message }))
        }),
        Some(HandlerMetadata::default().with_description("Writes params.message to the log")),
    )?;

    registry.register(
        "echo",
        handler_fn(|params, _context, _signal| async move { Ok(params) }),
        Some(HandlerMetadata::default().with_description("Returns its resolved params")),
    )?;

    registry.register(
        "delay",
        handler_fn(|params, _context, signal| async move {
            let params: DelayParams = serde_json::from_value(params)?;
            signal
                .sleep(Duration::from_millis(params.ms))
                .await
                .map_err(ActionError::cancelled)?;
            Ok(json!({ "waitedMs": params.ms }))
        }),
        Some(HandlerMetadata::default().with_description("Waits params.ms milliseconds")),
    )?;

    registry.register(
        "fail",
        handler_fn(|params, _context, _signal| async move {
            let params: FailParams = serde_json::from_value(params)?;
            let mut error = ActionError::new(params.message);
            if let Some(code) = params.code {
                error = error.with_code(code);
            }
            Err(error)
        }),
        Some(HandlerMetadata::default().with_description("Always fails with params.message")),
    )?;

    registry.register(
        "setState",
        handler_fn(|params, context, _signal| async move {
            let params: SetStateParams = serde_json::from_value(params)?;
            let Some(state) = context.state.as_ref() else {
                return Err(ActionError::new("no state store attached to the context").with_code(codes::INVALID_PARAMS));
            };
            state.set(&params.path, params.value, params.merge);
            Ok(state.get(&params.path).unwrap_or(Value::Null))
        }),
        Some(
            HandlerMetadata::default()
                .with_description("Writes params.value into page state at params.path")
                .with_retriable(false),
        ),
    )?;

    Ok(())
}

/// Registry with the demo handlers installed.
pub fn demo_registry() -> Result<Arc<ActionRegistry>, RegistryError> {
    let registry = Arc::new(ActionRegistry::new());
    register_demo_handlers(&registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionflow_engine::{ActionExecutor, InMemoryStateStore, NoopObserver};
    use actionflow_types::{ActionDescription, ExecutionContext, StateStore};

    #[tokio::test]
    async fn set_state_writes_through_the_store() {
        let executor = ActionExecutor::new(demo_registry().unwrap()).with_observer(Arc::new(NoopObserver));
        let store = Arc::new(InMemoryStateStore::default());
        let context = Arc::new(ExecutionContext::default().with_state(store.clone()).with_user(json!({ "id": 7 })));
        let action = ActionDescription::new("setState").with_params(json!({ "path": "selection.user", "value": "{{user.id}}" }));

        let result = executor.execute(&action, context, None).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(store.get("selection.user"), Some(json!(7)));
    }

    #[tokio::test]
    async fn set_state_without_store_is_invalid() {
        let executor = ActionExecutor::new(demo_registry().unwrap()).with_observer(Arc::new(NoopObserver));
        let action = ActionDescription::new("setState").with_params(json!({ "path": "a", "value": 1 }));

        let result = executor.execute(&action, Arc::new(ExecutionContext::default()), None).await;

        assert_eq!(result.error_code(), Some(codes::INVALID_PARAMS));
    }

    #[tokio::test]
    async fn fail_uses_supplied_code() {
        let executor = ActionExecutor::new(demo_registry().unwrap()).with_observer(Arc::new(NoopObserver));
        let action = ActionDescription::new("fail").with_params(json!({ "message": "quota exceeded", "code": "QUOTA" }));

        let result = executor.execute(&action, Arc::new(ExecutionContext::default()), None).await;

        let error = result.error.expect("error");
        assert_eq!(error.message, "quota exceeded");
        assert_eq!(error.code.as_deref(), Some("QUOTA"));
    }
}
