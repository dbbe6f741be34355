//! Shared data model for the actionflow engine: declarative action descriptions,
//! execution results, and the per-interaction execution context.

pub mod action;
pub mod context;
pub mod result;

pub use action::{ActionDescription, ActionList, Backoff, Guard, RetryPolicy};
pub use context::{ExecutionContext, StateStore, TriggerInfo};
pub use result::{ActionError, ActionResult, CancelReason, ResultMetadata, codes};
