//! Per-instance server-side state
//!
//! State is never sent to the UI and is opaque to the framework. Nothing here
//! is durable: a process restart loses every instance.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::types::InstanceId;

/// Passed to destroy callbacks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyEvent {
    pub instance_id: InstanceId,
    /// State snapshot taken before deletion
    pub state: Option<Value>,
}

/// Callback run when an instance is destroyed
pub type DestroyCallback = Arc<dyn Fn(&DestroyEvent) -> anyhow::Result<()> + Send + Sync>;

/// Keyed map from instance id to state, with destroy notification
#[derive(Default)]
pub struct StateStore {
    states: DashMap<InstanceId, Value>,
    callbacks: RwLock<Vec<DestroyCallback>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instance_id: &str) -> Option<Value> {
        self.states.get(instance_id).map(|v| v.clone())
    }

    /// Replace the state of an instance (last write wins)
    pub fn set(&self, instance_id: &str, value: Value) {
        self.states.insert(instance_id.to_string(), value);
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.states.contains_key(instance_id)
    }

    pub fn remove(&self, instance_id: &str) -> Option<Value> {
        self.states.remove(instance_id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&self) {
        self.states.clear();
    }

    /// Register a destroy callback; callbacks accumulate
    pub fn on_destroy(&self, callback: DestroyCallback) {
        self.callbacks.write().push(callback);
    }

    /// Run every callback in registration order
    ///
    /// Returns the number of callbacks that failed. A failing or panicking
    /// callback is logged and does not stop the others.
    pub fn notify_destroy(&self, event: &DestroyEvent) -> usize {
        let callbacks: Vec<DestroyCallback> = self.callbacks.read().clone();
        let mut failures = 0;

        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!(
                        instance_id = %event.instance_id,
                        callback = index,
                        "Destroy callback failed: {}",
                        e
                    );
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!(
                        instance_id = %event.instance_id,
                        callback = index,
                        "Destroy callback panicked"
                    );
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_state_roundtrip() {
        let store = StateStore::new();
        assert!(store.get("inst_1").is_none());
        assert!(!store.contains("inst_1"));

        store.set("inst_1", json!({"count": 1}));
        store.set("inst_1", json!({"count": 2}));
        assert_eq!(store.get("inst_1"), Some(json!({"count": 2})));
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove("inst_1"), Some(json!({"count": 2})));
        assert!(store.is_empty());
    }

    #[test]
    fn test_callbacks_run_in_order_and_survive_failures() {
        let store = StateStore::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = calls.clone();
        store.on_destroy(Arc::new(move |_| {
            c.lock().push("first");
            Ok(())
        }));
        store.on_destroy(Arc::new(|_| Err(anyhow::anyhow!("cleanup failed"))));
        store.on_destroy(Arc::new(|_| panic!("callback bug")));
        let c = calls.clone();
        store.on_destroy(Arc::new(move |event| {
            assert_eq!(event.state, Some(json!(7)));
            c.lock().push("last");
            Ok(())
        }));

        let failures = store.notify_destroy(&DestroyEvent {
            instance_id: "inst_1".to_string(),
            state: Some(json!(7)),
        });

        assert_eq!(failures, 2);
        assert_eq!(*calls.lock(), vec!["first", "last"]);
    }
}
