//! Handlers that compose other actions.
//!
//! `sequence`, `parallel` and `conditional` are ordinary registry entries whose
//! params carry nested action descriptions. They are registered with deferred
//! templates so each nested action resolves its own params when it runs, and they
//! run their children under the composite's cancellation scope.

use std::sync::{Arc, Weak};

use actionflow_types::{ActionError, ActionList, ActionResult, ExecutionContext, Guard};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    cancel::CancelSignal,
    executor::ActionExecutor,
    registry::{ActionHandler, HandlerMetadata, HandlerOutcome, RegistryError},
    resolve::evaluate_condition,
};

pub const SEQUENCE: &str = "sequence";
pub const PARALLEL: &str = "parallel";
pub const CONDITIONAL: &str = "conditional";

/// Registers the composite handlers on the executor's registry.
///
/// Handlers keep a weak reference so the executor and its registry do not keep each
/// other alive.
pub fn install(executor: &Arc<ActionExecutor>) -> Result<(), RegistryError> {
    let registry = executor.registry();
    let weak = Arc::downgrade(executor);

    registry.register(
        SEQUENCE,
        Arc::new(SequenceHandler { executor: weak.clone() }),
        Some(
            HandlerMetadata::default()
                .with_description("Runs params.actions in order, stopping at the first failure")
                .with_deferred_templates(),
        ),
    )?;
    registry.register(
        PARALLEL,
        Arc::new(ParallelHandler { executor: weak.clone() }),
        Some(
            HandlerMetadata::default()
                .with_description("Runs params.actions concurrently and waits for all of them")
                .with_deferred_templates(),
        ),
    )?;
    registry.register(
        CONDITIONAL,
        Arc::new(ConditionalHandler { executor: weak }),
        Some(
            HandlerMetadata::default()
                .with_description("Runs params.then when params.condition holds, params.else otherwise")
                .with_deferred_templates(),
        ),
    )?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct GroupParams {
    #[serde(default)]
    actions: ActionList,
}

#[derive(Debug, Deserialize)]
struct ConditionalParams {
    condition: Guard,
    #[serde(default)]
    then: ActionList,
    #[serde(default, rename = "else")]
    otherwise: ActionList,
}

struct SequenceHandler {
    executor: Weak<ActionExecutor>,
}

#[async_trait]
impl ActionHandler for SequenceHandler {
    async fn handle(&self, params: Value, context: Arc<ExecutionContext>, signal: CancelSignal) -> HandlerOutcome {
        let executor = upgrade(&self.executor)?;
        let params: GroupParams = serde_json::from_value(params)?;
        let results = executor.execute_sequence(params.actions.as_slice(), context, Some(&signal)).await;
        settle_group(SEQUENCE, results)
    }
}

struct ParallelHandler {
    executor: Weak<ActionExecutor>,
}

#[async_trait]
impl ActionHandler for ParallelHandler {
    async fn handle(&self, params: Value, context: Arc<ExecutionContext>, signal: CancelSignal) -> HandlerOutcome {
        let executor = upgrade(&self.executor)?;
        let params: GroupParams = serde_json::from_value(params)?;
        let results = executor.execute_parallel(params.actions.as_slice(), context, Some(&signal)).await;
        settle_group(PARALLEL, results)
    }
}

struct ConditionalHandler {
    executor: Weak<ActionExecutor>,
}

#[async_trait]
impl ActionHandler for ConditionalHandler {
    async fn handle(&self, params: Value, context: Arc<ExecutionContext>, signal: CancelSignal) -> HandlerOutcome {
        let executor = upgrade(&self.executor)?;
        let params: ConditionalParams = serde_json::from_value(params)?;
        let holds = match &params.condition {
            Guard::Literal(flag) => *flag,
            Guard::Expression(expression) => evaluate_condition(expression, &context),
        };
        let (branch, actions) = if holds { ("then", params.then) } else { ("else", params.otherwise) };
        debug!(branch, actions = actions.len(), "conditional branch selected");

        let results = executor.execute_sequence(actions.as_slice(), context, Some(&signal)).await;
        let results = settle_group(CONDITIONAL, results)?;
        Ok(json!({ "branch": branch, "results": results }))
    }
}

fn upgrade(executor: &Weak<ActionExecutor>) -> Result<Arc<ActionExecutor>, ActionError> {
    executor
        .upgrade()
        .ok_or_else(|| ActionError::new("composite handler outlived its executor"))
}

/// Succeeds with every member result when all members succeeded; otherwise fails
/// with the first member error as the cause.
fn settle_group(kind: &str, results: Vec<ActionResult>) -> HandlerOutcome {
    let failed: Vec<(usize, &ActionResult)> = results.iter().enumerate().filter(|(_, result)| !result.success).collect();
    let Some((index, first)) = failed.first() else {
        return Ok(serde_json::to_value(&results)?);
    };

    let mut error = ActionError::new(format!("{kind}: {} of {} actions failed (first at index {index})", failed.len(), results.len()));
    if let Some(code) = first.error_code() {
        error = error.with_code(code);
    }
    if let Some(cause) = &first.error {
        error = error.with_cause(cause.clone());
    }
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ActionRegistry, handler_fn};
    use actionflow_types::{ActionDescription, codes};
    use std::sync::Mutex;

    fn executor_with_log() -> (Arc<ActionExecutor>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ActionRegistry::new();
        let sink = log.clone();
        registry
            .register(
                "log",
                handler_fn(move |params, _context, _signal| {
                    let sink = sink.clone();
                    async move {
                        let message = params["message"].as_str().unwrap_or_default().to_string();
                        sink.lock().unwrap().push(message.clone());
                        Ok(Value::String(message))
                    }
                }),
                None,
            )
            .unwrap();
        registry
            .register(
                "fail",
                handler_fn(|_params, _context, _signal| async move { Err(ActionError::new("nope").with_code("DENIED")) }),
                None,
            )
            .unwrap();
        let executor = Arc::new(ActionExecutor::new(Arc::new(registry)));
        install(&executor).unwrap();
        (executor, log)
    }

    #[tokio::test]
    async fn nested_templates_resolve_when_children_run() {
        let (executor, log) = executor_with_log();
        let context = Arc::new(ExecutionContext::default().with_user(json!({ "name": "ada" })));
        let action = ActionDescription::new(SEQUENCE).with_params(json!({
            "actions": [
                { "type": "log", "params": { "message": "hello {{user.name}}" } },
                { "type": "log", "when": "{{user.missing}}", "params": { "message": "never" } }
            ]
        }));

        let result = executor.execute(&action, context, None).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(*log.lock().unwrap(), vec!["hello ada".to_string()]);
        assert_eq!(result.data.as_ref().and_then(Value::as_array).map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn parallel_failure_keeps_first_member_error() {
        let (executor, log) = executor_with_log();
        let action = ActionDescription::new(PARALLEL).with_params(json!({
            "actions": [
                { "type": "log", "params": { "message": "a" } },
                { "type": "fail" },
                { "type": "log", "params": { "message": "b" } }
            ]
        }));

        let result = executor.execute(&action, Arc::new(ExecutionContext::default()), None).await;

        assert!(!result.success);
        let error = result.error.expect("error");
        assert_eq!(error.code.as_deref(), Some("DENIED"));
        assert_eq!(error.cause.as_ref().map(|cause| cause.message.as_str()), Some("nope"));
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn conditional_picks_else_branch() {
        let (executor, log) = executor_with_log();
        let context = Arc::new(ExecutionContext::default().with_user(json!({ "role": "viewer" })));
        let action = ActionDescription::new(CONDITIONAL).with_params(json!({
            "condition": "user.role == \"admin\"",
            "then": { "type": "log", "params": { "message": "admin" } },
            "else": [{ "type": "log", "params": { "message": "viewer {{user.role}}" } }]
        }));

        let result = executor.execute(&action, context, None).await;

        assert!(result.success);
        assert_eq!(result.data.as_ref().map(|data| data["branch"].clone()), Some(json!("else")));
        assert_eq!(*log.lock().unwrap(), vec!["viewer viewer".to_string()]);
    }

    #[tokio::test]
    async fn malformed_params_are_invalid() {
        let (executor, _) = executor_with_log();
        let action = ActionDescription::new(CONDITIONAL).with_params(json!({ "then": [] }));

        let result = executor.execute(&action, Arc::new(ExecutionContext::default()), None).await;

        assert_eq!(result.error_code(), Some(codes::INVALID_PARAMS));
    }
}
