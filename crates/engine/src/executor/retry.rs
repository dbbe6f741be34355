//! Attempt loop for a single action.
//!
//! This module owns the retry envelope so `executor::mod` stays focused on guards,
//! scopes and continuations. The handler is looked up on every attempt; a missing
//! handler is fatal and never retried.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use actionflow_types::{ActionDescription, ActionError, CancelReason, ExecutionContext, codes};
use futures_util::FutureExt;
use serde_json::Value;
use tracing::warn;

use super::ActionExecutor;
use crate::{
    cancel::CancelSignal,
    observer::ExecutionEventKind,
    registry::{ActionHandler, HandlerMetadata, HandlerOutcome},
};

/// Terminal outcome of the attempt loop, before it becomes an `ActionResult`.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Succeeded {
        data: Value,
        attempts: u32,
    },
    Failed {
        error: ActionError,
        attempts: u32,
    },
    /// The scope fired. `cause` carries the last handler error, if one was observed.
    Cancelled {
        reason: CancelReason,
        attempts: u32,
        cause: Option<ActionError>,
    },
}

enum Invocation {
    Settled(HandlerOutcome),
    Aborted(CancelReason),
}

/// Runs the handler until it succeeds, the attempt budget is spent or the scope fires.
pub(super) async fn run_attempts(
    executor: &ActionExecutor,
    action: &ActionDescription,
    metadata: &HandlerMetadata,
    params: Value,
    context: &Arc<ExecutionContext>,
    scope: &CancelSignal,
) -> AttemptOutcome {
    let policy = action.retry.unwrap_or_default();
    let max_attempts = if metadata.retriable {
        policy.attempts.clamp(1, executor.config().max_retry_attempts.max(1))
    } else {
        1
    };

    let mut attempts = 0u32;
    loop {
        if let Some(reason) = scope.reason() {
            return AttemptOutcome::Cancelled {
                reason,
                attempts,
                cause: None,
            };
        }
        let Some(handler) = executor.registry().get(&action.action_type) else {
            return AttemptOutcome::Failed {
                error: ActionError::handler_not_found(&action.action_type),
                attempts,
            };
        };

        attempts += 1;
        let error = match invoke(handler, params.clone(), context, scope, metadata.cancellable).await {
            Invocation::Settled(Ok(data)) => return AttemptOutcome::Succeeded { data, attempts },
            Invocation::Settled(Err(error)) => error,
            Invocation::Aborted(reason) => {
                return AttemptOutcome::Cancelled {
                    reason,
                    attempts,
                    cause: None,
                };
            }
        };

        if let Some(reason) = scope.reason() {
            return AttemptOutcome::Cancelled {
                reason,
                attempts,
                cause: Some(error),
            };
        }
        if attempts >= max_attempts {
            return AttemptOutcome::Failed { error, attempts };
        }

        let delay = policy.delay_for(attempts - 1).min(executor.config().max_retry_delay());
        executor.emit(action, ExecutionEventKind::RetryScheduled {
            attempt: attempts,
            delay,
            error: error.clone(),
        });
        if let Err(reason) = scope.sleep(delay).await {
            return AttemptOutcome::Cancelled {
                reason,
                attempts,
                cause: Some(error),
            };
        }
    }
}

/// Runs one handler call, converting panics into `HANDLER_PANICKED` failures.
///
/// Cancellable handlers race the scope and are dropped as soon as it fires; the rest
/// are awaited to completion.
async fn invoke(
    handler: Arc<dyn ActionHandler>,
    params: Value,
    context: &Arc<ExecutionContext>,
    scope: &CancelSignal,
    cancellable: bool,
) -> Invocation {
    let call = AssertUnwindSafe(handler.handle(params, Arc::clone(context), scope.clone())).catch_unwind();
    if !cancellable {
        return Invocation::Settled(call.await.unwrap_or_else(|payload| Err(panic_error(payload))));
    }

    tokio::select! {
        biased;
        _ = scope.cancelled() => Invocation::Aborted(scope.reason().unwrap_or(CancelReason::Parent)),
        outcome = call => Invocation::Settled(outcome.unwrap_or_else(|payload| Err(panic_error(payload)))),
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> ActionError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    warn!(panic = %message, "action handler panicked");
    ActionError::new(message).with_code(codes::HANDLER_PANICKED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ActionRegistry;

    #[tokio::test]
    async fn fired_scope_wins_over_missing_handler() {
        let executor = ActionExecutor::new(Arc::new(ActionRegistry::new()));
        let action = ActionDescription::new("unregistered");
        let scope = CancelSignal::new();
        scope.cancel(CancelReason::Parent);

        let outcome = run_attempts(
            &executor,
            &action,
            &HandlerMetadata::default(),
            Value::Null,
            &Arc::new(ExecutionContext::default()),
            &scope,
        )
        .await;

        assert!(
            matches!(
                outcome,
                AttemptOutcome::Cancelled {
                    reason: CancelReason::Parent,
                    attempts: 0,
                    cause: None
                }
            ),
            "{outcome:?}"
        );
    }

    #[tokio::test]
    async fn missing_handler_fails_without_attempts() {
        let executor = ActionExecutor::new(Arc::new(ActionRegistry::new()));
        let action = ActionDescription::new("unregistered");

        let outcome = run_attempts(
            &executor,
            &action,
            &HandlerMetadata::default(),
            Value::Null,
            &Arc::new(ExecutionContext::default()),
            &CancelSignal::new(),
        )
        .await;

        let AttemptOutcome::Failed { error, attempts } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(error.code.as_deref(), Some(codes::HANDLER_NOT_FOUND));
        assert_eq!(attempts, 0);
    }
}
