//! Execution engine: interprets declarative actions against a live context.
//!
//! For a single [`ActionExecutor::execute`] call the executor
//! - returns a cancelled result when the caller's signal already fired
//! - evaluates the `when` guard and skips (successfully) when it is falsy
//! - resolves templated params against the context
//! - opens a child cancellation scope, arming the timeout when one applies
//! - runs the handler under the retry envelope (`retry` module)
//! - dispatches `onSuccess`/`onError` continuations as a sequence
//!
//! Sequences and parallel groups are built on top of `execute`. Every in-flight action
//! scope is tracked so [`ActionExecutor::cancel_all`] can abort them.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use actionflow_types::{ActionDescription, ActionError, ActionResult, CancelReason, ExecutionContext, Guard, codes};
use chrono::Utc;
use futures_util::future::{BoxFuture, join_all};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    cancel::CancelSignal,
    config::EngineConfig,
    observer::{ExecutionEvent, ExecutionEventKind, ExecutionObserver, TracingObserver},
    registry::{ActionRegistry, HandlerMetadata},
    resolve::{evaluate_condition, lookup_path, resolve_templates_with_depth},
    templates::{collect_unresolved_templates, extract_template_expressions},
};

mod retry;

use retry::AttemptOutcome;

/// Orchestrates guard evaluation, template resolution, handler dispatch, retries,
/// cancellation and continuations.
///
/// The executor holds no global lock while actions run; each invocation owns its
/// cancellation scope and attempt counter. Many top-level invocations may be in flight
/// at once.
pub struct ActionExecutor {
    registry: Arc<ActionRegistry>,
    observer: Arc<dyn ExecutionObserver>,
    config: EngineConfig,
    in_flight: Mutex<HashMap<u64, CancelSignal>>,
    next_invocation: AtomicU64,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new(ActionRegistry::global())
    }
}

impl ActionExecutor {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            observer: Arc::new(TracingObserver),
            config: EngineConfig::default(),
            in_flight: Mutex::new(HashMap::new()),
            next_invocation: AtomicU64::new(0),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of action scopes currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.lock_in_flight().len()
    }

    /// Executes one action and returns the result of the primary action.
    ///
    /// Continuation results are not merged into the returned result, and continuation
    /// failures never override it.
    pub fn execute<'a>(
        &'a self,
        action: &'a ActionDescription,
        context: Arc<ExecutionContext>,
        signal: Option<&'a CancelSignal>,
    ) -> BoxFuture<'a, ActionResult> {
        Box::pin(self.run_action(action, context, signal))
    }

    /// Runs actions strictly in order, each fully settling (continuations included)
    /// before the next starts. Stops after the first failure, so the returned list is
    /// shorter than the input when a member fails.
    pub async fn execute_sequence(
        &self,
        actions: &[ActionDescription],
        context: Arc<ExecutionContext>,
        signal: Option<&CancelSignal>,
    ) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let result = self.execute(action, Arc::clone(&context), signal).await;
            let failed = !result.success;
            results.push(result);
            if failed {
                debug!(action_id = %action.id, action_type = %action.action_type, "sequence stopped at failed action");
                break;
            }
        }
        results
    }

    /// Starts every action concurrently and waits for all of them to settle.
    ///
    /// Returns one result per input action, index for index, regardless of
    /// completion order or individual failures.
    pub async fn execute_parallel(
        &self,
        actions: &[ActionDescription],
        context: Arc<ExecutionContext>,
        signal: Option<&CancelSignal>,
    ) -> Vec<ActionResult> {
        join_all(actions.iter().map(|action| self.execute(action, Arc::clone(&context), signal))).await
    }

    /// Cancels every in-flight action and clears the bookkeeping.
    pub fn cancel_all(&self) {
        let scopes: Vec<CancelSignal> = self.lock_in_flight().drain().map(|(_, scope)| scope).collect();
        info!(count = scopes.len(), "cancelling in-flight actions");
        for scope in scopes {
            scope.cancel(CancelReason::Explicit);
        }
    }

    async fn run_action(&self, action: &ActionDescription, context: Arc<ExecutionContext>, parent: Option<&CancelSignal>) -> ActionResult {
        let started = Instant::now();
        let started_at = Utc::now();

        if parent.is_some_and(CancelSignal::is_cancelled) {
            let duration = started.elapsed();
            self.emit(action, ExecutionEventKind::Cancelled {
                duration,
                reason: CancelReason::Parent,
            });
            return ActionResult::cancelled(CancelReason::Parent, duration).with_started_at(started_at);
        }

        if let Some(guard) = &action.when
            && !guard_passes(guard, &context)
        {
            self.emit(action, ExecutionEventKind::Skipped {
                unresolved: unresolved_guard_references(guard, &context),
            });
            return ActionResult::skipped(started.elapsed()).with_started_at(started_at);
        }

        let metadata = self.registry.metadata(&action.action_type).unwrap_or_default();
        let outcome = match self.resolve_params(action, &metadata, &context) {
            Ok(params) => self.invoke_in_scope(action, &metadata, params, &context, parent).await,
            Err(error) => AttemptOutcome::Failed { error, attempts: 0 },
        };

        let result = self.finish(action, outcome, started.elapsed()).with_started_at(started_at);
        self.dispatch_continuations(action, &result, context, parent).await;
        result
    }

    fn resolve_params(&self, action: &ActionDescription, metadata: &HandlerMetadata, context: &ExecutionContext) -> Result<Value, ActionError> {
        if metadata.defer_templates {
            return Ok(action.params.clone());
        }
        let unresolved = collect_unresolved_templates(&action.params, "params", context);
        if !unresolved.is_empty() {
            let references: Vec<String> = unresolved
                .iter()
                .map(|reference| format!("{} ({})", reference.expression, reference.source_path))
                .collect();
            debug!(
                action_id = %action.id,
                action_type = %action.action_type,
                unresolved = %references.join(", "),
                "action params reference absent context values"
            );
        }
        resolve_templates_with_depth(&action.params, context, self.config.max_template_depth)
            .map_err(|error| ActionError::new(error.to_string()).with_code(codes::TEMPLATE_ERROR))
    }

    /// Opens the action's cancellation scope, runs the attempts, then cleans up the
    /// timer and the in-flight entry.
    async fn invoke_in_scope(
        &self,
        action: &ActionDescription,
        metadata: &HandlerMetadata,
        params: Value,
        context: &Arc<ExecutionContext>,
        parent: Option<&CancelSignal>,
    ) -> AttemptOutcome {
        let scope = parent.map(CancelSignal::child).unwrap_or_default();
        let _in_flight = self.track(&scope);
        let _timer = action
            .timeout
            .or(self.config.default_timeout_ms)
            .map(|timeout_ms| scope.arm_timeout(Duration::from_millis(timeout_ms)));

        self.emit(action, ExecutionEventKind::Started);
        retry::run_attempts(self, action, metadata, params, context, &scope).await
    }

    fn finish(&self, action: &ActionDescription, outcome: AttemptOutcome, duration: Duration) -> ActionResult {
        match outcome {
            AttemptOutcome::Succeeded { data, attempts } => {
                self.emit(action, ExecutionEventKind::Succeeded { duration, attempts });
                let mut result = ActionResult::success(data, duration);
                result.metadata.attempts = attempts;
                result
            }
            AttemptOutcome::Failed { error, attempts } => {
                self.emit(action, ExecutionEventKind::Failed {
                    duration,
                    attempts,
                    error: error.clone(),
                });
                let mut result = ActionResult::failure(error, duration);
                result.metadata.attempts = attempts;
                if action.retry.is_some() && attempts > 0 {
                    result.metadata.retries = Some(attempts - 1);
                }
                result
            }
            AttemptOutcome::Cancelled { reason, attempts, cause } => {
                self.emit(action, ExecutionEventKind::Cancelled { duration, reason });
                let mut result = ActionResult::cancelled(reason, duration);
                result.metadata.attempts = attempts;
                if let (Some(error), Some(cause)) = (result.error.as_mut(), cause) {
                    error.cause = Some(Box::new(cause));
                }
                result
            }
        }
    }

    /// Runs `onSuccess`/`onError` under the caller's scope. Explicit and parent
    /// cancellations never dispatch continuations; a timeout counts as a failure.
    async fn dispatch_continuations(
        &self,
        action: &ActionDescription,
        result: &ActionResult,
        context: Arc<ExecutionContext>,
        parent: Option<&CancelSignal>,
    ) {
        if result.is_cancelled() && result.metadata.cancel_reason != Some(CancelReason::Timeout) {
            return;
        }
        let continuations = if result.success { &action.on_success } else { &action.on_error };
        if continuations.is_empty() {
            return;
        }

        let outcomes = self.execute_sequence(continuations.as_slice(), context, parent).await;
        for (continuation, outcome) in continuations.iter().zip(&outcomes) {
            if let Some(error) = outcome.error.as_ref().filter(|_| !outcome.success) {
                self.emit(action, ExecutionEventKind::ContinuationFailed {
                    continuation: continuation.label().to_string(),
                    error: error.clone(),
                });
            }
        }
    }

    pub(crate) fn emit(&self, action: &ActionDescription, kind: ExecutionEventKind) {
        self.observer.on_event(&ExecutionEvent::new(action, kind));
    }

    fn track(&self, scope: &CancelSignal) -> InFlightEntry<'_> {
        let id = self.next_invocation.fetch_add(1, Ordering::Relaxed);
        self.lock_in_flight().insert(id, scope.clone());
        InFlightEntry { executor: self, id }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<u64, CancelSignal>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes an action scope from the in-flight table when the invocation ends,
/// including when its future is dropped early.
struct InFlightEntry<'a> {
    executor: &'a ActionExecutor,
    id: u64,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        self.executor.lock_in_flight().remove(&self.id);
    }
}

fn guard_passes(guard: &Guard, context: &ExecutionContext) -> bool {
    match guard {
        Guard::Literal(flag) => *flag,
        Guard::Expression(expression) => evaluate_condition(expression, context),
    }
}

fn unresolved_guard_references(guard: &Guard, context: &ExecutionContext) -> Vec<String> {
    match guard {
        Guard::Literal(_) => Vec::new(),
        Guard::Expression(expression) => extract_template_expressions(expression)
            .into_iter()
            .filter(|reference| lookup_path(reference, context).is_none())
            .collect(),
    }
}
