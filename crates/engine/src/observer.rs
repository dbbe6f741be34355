//! Execution lifecycle events and observers.
//!
//! The executor never logs directly from its control flow; it emits
//! [`ExecutionEvent`]s to an injected [`ExecutionObserver`]. [`TracingObserver`] is the
//! default and forwards events to `tracing`, so embedding environments that want a
//! different sink only have to swap the observer.

use std::{sync::Arc, time::Duration};

use actionflow_types::{ActionDescription, ActionError, CancelReason};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// What happened to an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEventKind {
    /// The handler is about to run its first attempt.
    Started,
    /// The guard evaluated false. Lists guard references that did not resolve.
    Skipped { unresolved: Vec<String> },
    /// An attempt failed and another one is scheduled after `delay`.
    RetryScheduled { attempt: u32, delay: Duration, error: ActionError },
    Succeeded { duration: Duration, attempts: u32 },
    Failed { duration: Duration, attempts: u32, error: ActionError },
    Cancelled { duration: Duration, reason: CancelReason },
    /// A continuation action failed; the primary result is unaffected.
    ContinuationFailed { continuation: String, error: ActionError },
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionEvent {
    pub action_id: String,
    pub action_type: String,
    pub at: DateTime<Utc>,
    pub kind: ExecutionEventKind,
}

impl ExecutionEvent {
    pub fn new(action: &ActionDescription, kind: ExecutionEventKind) -> Self {
        Self {
            action_id: action.id.clone(),
            action_type: action.action_type.clone(),
            at: Utc::now(),
            kind,
        }
    }
}

/// Receives lifecycle events. Implementations must be cheap and must not block.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        let action_id = event.action_id.as_str();
        let action_type = event.action_type.as_str();
        match &event.kind {
            ExecutionEventKind::Started => debug!(action_id, action_type, "action started"),
            ExecutionEventKind::Skipped { unresolved } if unresolved.is_empty() => {
                info!(action_id, action_type, "action skipped by guard")
            }
            ExecutionEventKind::Skipped { unresolved } => info!(
                action_id,
                action_type,
                unresolved = %unresolved.join(", "),
                "action skipped by unresolved guard references"
            ),
            ExecutionEventKind::RetryScheduled { attempt, delay, error } => warn!(
                action_id,
                action_type,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "action attempt failed; retry scheduled"
            ),
            ExecutionEventKind::Succeeded { duration, attempts } => info!(
                action_id,
                action_type,
                attempts,
                duration_ms = duration.as_millis() as u64,
                "action succeeded"
            ),
            ExecutionEventKind::Failed { duration, attempts, error } => warn!(
                action_id,
                action_type,
                attempts,
                duration_ms = duration.as_millis() as u64,
                code = error.code.as_deref().unwrap_or_default(),
                error = %error,
                "action failed"
            ),
            ExecutionEventKind::Cancelled { duration, reason } => info!(
                action_id,
                action_type,
                reason = ?reason,
                duration_ms = duration.as_millis() as u64,
                "action cancelled"
            ),
            ExecutionEventKind::ContinuationFailed { continuation, error } => warn!(
                action_id,
                action_type,
                continuation = %continuation,
                error = %error,
                "continuation failed"
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {
    fn on_event(&self, _event: &ExecutionEvent) {}
}

/// Broadcasts events to several observers in order.
#[derive(Default, Clone)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn ExecutionObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<Arc<dyn ExecutionObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }
}

impl ExecutionObserver for FanoutObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
