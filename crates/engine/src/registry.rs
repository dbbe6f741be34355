//! Action handler registry.
//!
//! The registry maps an action type string to a handler plus metadata. It decouples
//! the executor from concrete effects: handlers are data registered at startup, never
//! subclasses. Registries are explicitly constructed and injected; a lazily created
//! process-wide instance is available through [`ActionRegistry::global`] for
//! convenience, while tests build isolated instances with [`ActionRegistry::new`].

use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use actionflow_types::{ActionError, ExecutionContext};
use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::CancelSignal;

/// Outcome reported by a handler: the success payload or a normalized error.
pub type HandlerOutcome = Result<Value, ActionError>;

/// A concrete effect registered under an action type.
///
/// Handlers receive the already resolved params, the shared context and the
/// cancellation signal of the current action scope. Long-running handlers should
/// observe the signal; the executor also aborts cancellable handlers on cancellation.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, params: Value, context: Arc<ExecutionContext>, signal: CancelSignal) -> HandlerOutcome;
}

/// Adapter turning an async closure into an [`ActionHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Value, Arc<ExecutionContext>, CancelSignal) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send,
{
    async fn handle(&self, params: Value, context: Arc<ExecutionContext>, signal: CancelSignal) -> HandlerOutcome {
        (self.0)(params, context, signal).await
    }
}

/// Wraps an async closure as a shareable handler.
///
/// ```rust
/// use actionflow_engine::registry::{ActionRegistry, handler_fn};
/// use serde_json::json;
///
/// let registry = ActionRegistry::new();
/// registry
///     .register("echo", handler_fn(|params, _context, _signal| async move { Ok(params) }), None)
///     .expect("register echo");
/// assert!(registry.has("echo"));
/// ```
pub fn handler_fn<F, Fut>(function: F) -> Arc<dyn ActionHandler>
where
    F: Fn(Value, Arc<ExecutionContext>, CancelSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    Arc::new(FnHandler(function))
}

/// Descriptive and behavioral metadata attached to a registered handler.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerMetadata {
    /// Human-readable name; defaults to the action type.
    pub display_name: String,
    pub description: Option<String>,
    /// When false the executor lets the handler settle instead of aborting it on cancellation.
    pub cancellable: bool,
    /// When false the action runs a single attempt regardless of its retry policy.
    pub retriable: bool,
    /// Optional JSON schema describing the expected params.
    pub schema: Option<Value>,
    /// When true the executor passes params through unresolved; the handler resolves
    /// nested templates itself (used by composite handlers).
    pub defer_templates: bool,
}

impl Default for HandlerMetadata {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            description: None,
            cancellable: true,
            retriable: true,
            schema: None,
            defer_templates: false,
        }
    }
}

impl HandlerMetadata {
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    pub fn with_retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_deferred_templates(mut self) -> Self {
        self.defer_templates = true;
        self
    }
}

/// Registry entry.
#[derive(Clone)]
pub struct HandlerDefinition {
    pub action_type: String,
    pub handler: Arc<dyn ActionHandler>,
    pub metadata: HandlerMetadata,
}

impl fmt::Debug for HandlerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDefinition")
            .field("action_type", &self.action_type)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Errors emitted by registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The action type was empty or whitespace.
    #[error("action type must not be empty")]
    EmptyType,
}

static GLOBAL_REGISTRY: Lazy<Arc<ActionRegistry>> = Lazy::new(|| Arc::new(ActionRegistry::new()));

/// Mapping from action type to handler definition.
///
/// A type maps to at most one definition at any instant: registering an existing type
/// replaces the previous definition and logs a warning.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<IndexMap<String, HandlerDefinition>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry").field("types", &self.types()).finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide default registry.
    pub fn global() -> Arc<ActionRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Registers a handler under `action_type`.
    ///
    /// Missing metadata defaults to `cancellable = true`, `retriable = true` and a
    /// display name equal to the type. Handlers are typed trait objects, so the only
    /// input that can be rejected is an empty type.
    pub fn register(
        &self,
        action_type: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
        metadata: Option<HandlerMetadata>,
    ) -> Result<(), RegistryError> {
        let action_type = action_type.into();
        if action_type.trim().is_empty() {
            return Err(RegistryError::EmptyType);
        }

        let mut metadata = metadata.unwrap_or_default();
        if metadata.display_name.is_empty() {
            metadata.display_name = action_type.clone();
        }

        let definition = HandlerDefinition {
            action_type: action_type.clone(),
            handler,
            metadata,
        };
        if self.write().insert(action_type.clone(), definition).is_some() {
            warn!(action_type = %action_type, "action handler re-registered; previous handler replaced");
        } else {
            debug!(action_type = %action_type, "action handler registered");
        }
        Ok(())
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.read().get(action_type).map(|definition| Arc::clone(&definition.handler))
    }

    pub fn definition(&self, action_type: &str) -> Option<HandlerDefinition> {
        self.read().get(action_type).cloned()
    }

    pub fn has(&self, action_type: &str) -> bool {
        self.read().contains_key(action_type)
    }

    /// Registered types in registration order.
    pub fn types(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn metadata(&self, action_type: &str) -> Option<HandlerMetadata> {
        self.read().get(action_type).map(|definition| definition.metadata.clone())
    }

    /// Removes a registration. Returns true when something was removed.
    pub fn unregister(&self, action_type: &str) -> bool {
        let removed = self.write().shift_remove(action_type).is_some();
        if removed {
            debug!(action_type = %action_type, "action handler unregistered");
        }
        removed
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Snapshot of every definition; later registry changes do not affect it.
    pub fn all(&self) -> IndexMap<String, HandlerDefinition> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, HandlerDefinition>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, HandlerDefinition>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
