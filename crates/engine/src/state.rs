//! In-memory page state capability.

use std::sync::{Mutex, PoisonError};

use actionflow_types::StateStore;
use serde_json::{Map as JsonMap, Value};

use crate::resolve::{get_nested_value, set_nested_value};

/// Thread-safe [`StateStore`] backed by a JSON tree.
///
/// Writes are serialized by an internal mutex, so handlers running in a parallel group
/// can call [`StateStore::set`] concurrently.
#[derive(Debug)]
pub struct InMemoryStateStore {
    state: Mutex<Value>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(JsonMap::new())
    }
}

impl InMemoryStateStore {
    pub fn new(initial: JsonMap<String, Value>) -> Self {
        Self {
            state: Mutex::new(Value::Object(initial)),
        }
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, path: &str) -> Option<Value> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        get_nested_value(&state, path).cloned()
    }

    fn set(&self, path: &str, value: Value, merge: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        set_nested_value(&mut state, path, value, merge);
    }

    fn snapshot(&self) -> Value {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionflow_types::ExecutionContext;
    use serde_json::json;
    use std::sync::Arc;

    use crate::resolve::lookup_path;

    #[test]
    fn writes_are_visible_through_context_templates() {
        let store = Arc::new(InMemoryStateStore::default());
        let context = ExecutionContext::default().with_state(store.clone());

        store.set("filters", json!({ "status": "open" }), false);
        store.set("filters", json!({ "owner": "me" }), true);

        assert_eq!(store.get("filters.status"), Some(json!("open")));
        assert_eq!(lookup_path("pageState.filters.owner", &context), Some(json!("me")));
        assert_eq!(store.snapshot(), json!({ "filters": { "status": "open", "owner": "me" } }));
    }

    struct CountingStore {
        inner: InMemoryStateStore,
        snapshots: std::sync::atomic::AtomicUsize,
    }

    impl StateStore for CountingStore {
        fn get(&self, path: &str) -> Option<Value> {
            self.inner.get(path)
        }

        fn set(&self, path: &str, value: Value, merge: bool) {
            self.inner.set(path, value, merge);
        }

        fn snapshot(&self) -> Value {
            self.snapshots.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.snapshot()
        }
    }

    #[test]
    fn leaf_lookups_read_through_the_store_without_snapshots() {
        let store = Arc::new(CountingStore {
            inner: InMemoryStateStore::default(),
            snapshots: Default::default(),
        });
        store.set("rows", json!([{ "id": 7 }]), false);
        let context = ExecutionContext::default().with_state(store.clone());

        assert_eq!(lookup_path("pageState.rows[0].id", &context), Some(json!(7)));
        assert_eq!(lookup_path("state.rows.0.missing", &context), None);
        assert_eq!(store.snapshots.load(std::sync::atomic::Ordering::SeqCst), 0);

        assert_eq!(lookup_path("pageState", &context), Some(json!({ "rows": [{ "id": 7 }] })));
        assert_eq!(store.snapshots.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
