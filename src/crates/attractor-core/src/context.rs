//! The shared run context: a thread-safe, dotted-path key/value store that
//! edge conditions read and node outcomes write via `context_updates`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Cheaply cloneable handle to the mutable context shared across a run's
/// attempt loop, condition evaluator, and progress events.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.write().insert(key.into(), value);
    }

    /// Merges `updates` into the context, overwriting existing keys.
    pub fn merge(&self, updates: HashMap<String, Value>) {
        let mut guard = self.inner.write();
        for (k, v) in updates {
            guard.insert(k, v);
        }
    }

    /// Returns a point-in-time snapshot suitable for serialization (e.g. the
    /// server's `GET /pipelines/{id}/context` endpoint).
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.read().clone()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("keys", &self.inner.read().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_existing_keys() {
        let ctx = Context::new();
        ctx.set("a", Value::from(1));
        ctx.merge(HashMap::from([("a".to_string(), Value::from(2))]));
        assert_eq!(ctx.get("a"), Some(Value::from(2)));
    }

    #[test]
    fn clone_shares_the_same_backing_store() {
        let ctx = Context::new();
        let clone = ctx.clone();
        ctx.set("shared", Value::from(true));
        assert_eq!(clone.get("shared"), Some(Value::from(true)));
    }
}
