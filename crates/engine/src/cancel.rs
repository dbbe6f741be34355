//! Structured cancellation scopes.
//!
//! A [`CancelSignal`] wraps a `tokio_util` [`CancellationToken`] and records why it
//! fired. Children created with [`CancelSignal::child`] are cancelled whenever their
//! parent is, and report [`CancelReason::Parent`] unless they were cancelled directly
//! first. Timeouts are a derived cancellation armed with [`CancelSignal::arm_timeout`].

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use actionflow_types::CancelReason;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation handle shared between the executor and a running handler.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelSignal {
    /// Creates a root scope with no parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a child scope linked to this one.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Cancels this scope and every descendant. The first reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        if !self.token.is_cancelled() {
            let _ = self.reason.set(reason);
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why the scope fired, or `None` while it is still live.
    pub fn reason(&self) -> Option<CancelReason> {
        if !self.token.is_cancelled() {
            return None;
        }
        Some(self.reason.get().copied().unwrap_or(CancelReason::Parent))
    }

    /// Completes once the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Underlying token, for handlers that integrate with other tokio-util APIs.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels this scope with [`CancelReason::Timeout`] once `timeout` elapses.
    ///
    /// The timer is disarmed when the returned guard is dropped.
    pub fn arm_timeout(&self, timeout: Duration) -> TimeoutGuard {
        let scope = self.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "cancellation scope timed out");
                    scope.cancel(CancelReason::Timeout);
                }
                _ = scope.cancelled() => {}
            }
        });
        TimeoutGuard { handle }
    }

    /// Sleeps for `duration` unless the scope is cancelled first.
    ///
    /// Returns the cancellation reason when the wait was interrupted.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CancelReason> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.reason().unwrap_or(CancelReason::Parent)),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Disarms a timeout timer on drop.
#[derive(Debug)]
pub struct TimeoutGuard {
    handle: JoinHandle<()>,
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
