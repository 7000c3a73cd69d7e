//! Instance lifecycle
//!
//! Provides:
//! - Instance id resolution (singleton vs multi-instance)
//! - Per-instance server-side state
//! - Destroy notification and teardown
//!
//! Bookkeeping across the state map, the singleton map and the websocket
//! registry is advisory, not transactional: each map operation is atomic on
//! its own, but an observer may see state before a websocket attaches or the
//! other way around.

mod resolver;
mod state;

pub use resolver::{
    generate_instance_id, host_supports_multi_instance, IdentityResolver, INSTANCE_ID_PREFIX,
    INSTANCE_ID_SUFFIX_LEN,
};
pub use state::{DestroyCallback, DestroyEvent, StateStore};

use std::sync::Arc;

use serde_json::Value;

use crate::realtime::WebSocketRegistry;
use crate::types::InstanceId;

/// Owns instance identity, state and teardown
pub struct InstanceManager {
    resolver: IdentityResolver,
    states: StateStore,
    websockets: Arc<WebSocketRegistry>,
}

impl InstanceManager {
    pub fn new(websockets: Arc<WebSocketRegistry>) -> Self {
        Self {
            resolver: IdentityResolver::new(),
            states: StateStore::new(),
            websockets,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    pub fn websockets(&self) -> &Arc<WebSocketRegistry> {
        &self.websockets
    }

    pub fn get_state(&self, instance_id: &str) -> Option<Value> {
        self.states.get(instance_id)
    }

    pub fn set_state(&self, instance_id: &str, value: Value) {
        self.states.set(instance_id, value);
    }

    /// True if the instance has state or a websocket
    pub fn has_instance(&self, instance_id: &str) -> bool {
        self.states.contains(instance_id) || self.websockets.contains(instance_id)
    }

    pub fn on_destroy(&self, callback: DestroyCallback) {
        self.states.on_destroy(callback);
    }

    /// Destroy an instance
    ///
    /// Callbacks see the state snapshot taken before deletion. Afterwards the
    /// websocket is closed and removed, the state deleted, and any singleton
    /// mapping to this id cleared so the next call mints a fresh id. Returns
    /// whether state or a websocket existed.
    pub fn destroy(&self, instance_id: &str) -> bool {
        let had_state = self.states.contains(instance_id);
        let had_websocket = self.websockets.contains(instance_id);

        if had_state || had_websocket {
            let event = DestroyEvent {
                instance_id: instance_id.to_string(),
                state: self.states.get(instance_id),
            };
            let failures = self.states.notify_destroy(&event);
            if failures > 0 {
                tracing::warn!(instance_id, failures, "Some destroy callbacks failed");
            }

            self.websockets.close(instance_id);
            self.states.remove(instance_id);
        }

        if self.resolver.forget_instance(instance_id) {
            tracing::debug!(instance_id, "Cleared singleton mapping");
        }

        if had_state || had_websocket {
            tracing::info!(instance_id, "Instance destroyed");
        }
        had_state || had_websocket
    }

    /// Create an instance outside a tool call
    pub fn create(&self, websocket: bool) -> InstanceId {
        let instance_id = generate_instance_id();
        if websocket {
            self.websockets.create(&instance_id, None);
        }
        instance_id
    }

    /// Destroy every instance (shutdown)
    pub fn destroy_all(&self) {
        self.websockets.close_all();
        self.states.clear();
        self.resolver.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn manager() -> InstanceManager {
        InstanceManager::new(Arc::new(WebSocketRegistry::new("ws://localhost:3000")))
    }

    #[test]
    fn test_destroy_completeness() {
        let manager = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        manager.on_destroy(Arc::new(move |event| {
            s.lock().push(event.clone());
            Ok(())
        }));

        manager.set_state("inst_1", json!({"notes": ["a"]}));
        assert!(manager.has_instance("inst_1"));

        assert!(manager.destroy("inst_1"));
        assert!(manager.get_state("inst_1").is_none());
        assert!(!manager.has_instance("inst_1"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].instance_id, "inst_1");
        assert_eq!(seen[0].state, Some(json!({"notes": ["a"]})));
    }

    #[test]
    fn test_destroy_unknown_instance() {
        let manager = manager();
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        manager.on_destroy(Arc::new(move |_| {
            *c.lock() += 1;
            Ok(())
        }));
        assert!(!manager.destroy("inst_missing"));
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn test_websocket_only_instance() {
        let manager = manager();
        let id = manager.create(true);
        assert!(manager.has_instance(&id));
        assert!(manager.get_state(&id).is_none());

        assert!(manager.destroy(&id));
        assert!(!manager.websockets().contains(&id));
    }

    #[test]
    fn test_destroy_clears_singleton() {
        let manager = manager();
        let id = manager.resolver().resolve("ui://notes/panel", None, false, false);
        manager.set_state(&id, json!(1));
        manager.destroy(&id);
        let next = manager.resolver().resolve("ui://notes/panel", None, false, false);
        assert_ne!(id, next);
    }
}
