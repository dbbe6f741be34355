//! Execution results and the normalized error shape.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable error codes attached to engine-produced failures.
pub mod codes {
    /// The action type has no registered handler.
    pub const HANDLER_NOT_FOUND: &str = "HANDLER_NOT_FOUND";
    /// An explicit or parent cancellation aborted the action.
    pub const ACTION_CANCELLED: &str = "ACTION_CANCELLED";
    /// The action exceeded its timeout.
    pub const ACTION_TIMEOUT: &str = "ACTION_TIMEOUT";
    /// The handler panicked while running.
    pub const HANDLER_PANICKED: &str = "HANDLER_PANICKED";
    /// Parameters could not be resolved against the context.
    pub const TEMPLATE_ERROR: &str = "TEMPLATE_ERROR";
    /// Parameters did not match what the handler expects.
    pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
}

/// Why a cancellation scope was triggered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CancelReason {
    /// The action's own timeout elapsed.
    Timeout,
    /// Cancelled directly (for example through `cancel_all`).
    Explicit,
    /// An ancestor scope was cancelled.
    Parent,
}

impl CancelReason {
    /// Stable error code for failures caused by this reason.
    pub fn code(self) -> &'static str {
        match self {
            CancelReason::Timeout => codes::ACTION_TIMEOUT,
            CancelReason::Explicit | CancelReason::Parent => codes::ACTION_CANCELLED,
        }
    }
}

/// Normalized error shape, regardless of what the failing handler produced.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[source]
    pub cause: Option<Box<ActionError>>,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_field_error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.field_errors.get_or_insert_with(IndexMap::new).insert(field.into(), message.into());
        self
    }

    pub fn with_cause(mut self, cause: ActionError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns true when the error carries the given code.
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    /// Error produced when an action type is not registered.
    pub fn handler_not_found(action_type: &str) -> Self {
        Self::new(format!("no handler registered for action type '{action_type}'")).with_code(codes::HANDLER_NOT_FOUND)
    }

    /// Error produced when a cancellation scope fires before the action settles.
    pub fn cancelled(reason: CancelReason) -> Self {
        let message = match reason {
            CancelReason::Timeout => "action timed out",
            CancelReason::Explicit => "action was cancelled",
            CancelReason::Parent => "action was cancelled by its parent scope",
        };
        Self::new(message).with_code(reason.code())
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(error: anyhow::Error) -> Self {
        let cause = error.chain().nth(1).map(|source| ActionError::new(source.to_string()));
        ActionError {
            message: error.to_string(),
            cause: cause.map(Box::new),
            ..Default::default()
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(error: serde_json::Error) -> Self {
        ActionError::new(format!("invalid params: {error}")).with_code(codes::INVALID_PARAMS)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        ActionError::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        ActionError::new(message)
    }
}

/// Metadata attached to every result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// Wall-clock duration of the primary action in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    /// Retries used (`attempts - 1`); only present when a retry policy applied to a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Number of handler attempts actually made.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// Terminal outcome of an action. Exactly one of `data`/`error` is meaningful
/// depending on `success`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    pub metadata: ResultMetadata,
}

impl ActionResult {
    pub fn success(data: Value, duration: Duration) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ResultMetadata {
                duration_ms: duration_millis(duration),
                ..Default::default()
            },
        }
    }

    pub fn failure(error: ActionError, duration: Duration) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            metadata: ResultMetadata {
                duration_ms: duration_millis(duration),
                ..Default::default()
            },
        }
    }

    /// Success result for an action whose guard evaluated false.
    pub fn skipped(duration: Duration) -> Self {
        let mut result = Self::success(Value::Null, duration);
        result.data = None;
        result.metadata.skipped = true;
        result
    }

    /// Failure result for an action aborted by a cancellation scope.
    pub fn cancelled(reason: CancelReason, duration: Duration) -> Self {
        let mut result = Self::failure(ActionError::cancelled(reason), duration);
        result.metadata.cancelled = true;
        result.metadata.cancel_reason = Some(reason);
        result
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.metadata.started_at = Some(started_at);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.metadata.cancelled
    }

    pub fn is_skipped(&self) -> bool {
        self.metadata.skipped
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().and_then(|error| error.code.as_deref())
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cancelled_result_carries_marker_and_code() {
        let result = ActionResult::cancelled(CancelReason::Timeout, Duration::from_millis(12));
        assert!(!result.success);
        assert!(result.is_cancelled());
        assert_eq!(result.error_code(), Some(codes::ACTION_TIMEOUT));
        assert_eq!(result.metadata.duration_ms, 12);

        let explicit = ActionResult::cancelled(CancelReason::Explicit, Duration::ZERO);
        assert_eq!(explicit.error_code(), Some(codes::ACTION_CANCELLED));
    }

    #[test]
    fn skipped_result_is_success_without_data() {
        let result = ActionResult::skipped(Duration::ZERO);
        assert!(result.success);
        assert!(result.is_skipped());
        assert!(result.data.is_none());
        assert!(result.error.is_none());
    }

    #[test]
    fn serialized_shape_uses_camel_case_and_omits_defaults() {
        let error = ActionError::new("validation failed")
            .with_code("VALIDATION")
            .with_status(422)
            .with_field_error("email", "is required");
        let value = serde_json::to_value(ActionResult::failure(error, Duration::from_millis(3))).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "error": {
                    "message": "validation failed",
                    "code": "VALIDATION",
                    "status": 422,
                    "fieldErrors": { "email": "is required" }
                },
                "metadata": { "duration": 3 }
            })
        );
    }

    #[test]
    fn anyhow_errors_keep_their_first_cause() {
        let error = anyhow::anyhow!("connection refused").context("request to /api/users failed");
        let normalized = ActionError::from(error);
        assert_eq!(normalized.message, "request to /api/users failed");
        assert_eq!(normalized.cause.as_deref().map(|cause| cause.message.as_str()), Some("connection refused"));
    }
}
