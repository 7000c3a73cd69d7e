//! Pluggable state and realtime backends for serverless invocations
//!
//! A serverless invocation cannot rely on process memory surviving between
//! requests, so state and realtime go through these traits. Deployments plug
//! in Redis, KV stores, hosted pub/sub and so on; the in-memory versions here
//! are the fallback for local runs.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::Result;
use crate::realtime::MessageHandler;

/// Per-instance state storage
#[async_trait]
pub trait StateAdapter: Send + Sync {
    async fn get(&self, instance_id: &str) -> Result<Option<Value>>;
    async fn set(&self, instance_id: &str, value: Value) -> Result<()>;
    async fn delete(&self, instance_id: &str) -> Result<()>;
}

/// Per-instance realtime messaging
#[async_trait]
pub trait RealtimeAdapter: Send + Sync {
    /// Push a message to every client of an instance
    async fn send(&self, instance_id: &str, message: Value) -> Result<()>;
    /// Register the handler for client messages of an instance
    fn subscribe(&self, instance_id: &str, handler: MessageHandler);
    /// URL clients connect to, if the backend exposes one
    fn websocket_url(&self, instance_id: &str) -> Option<String>;
}

/// In-process state adapter
#[derive(Default)]
pub struct MemoryStateAdapter {
    states: DashMap<String, Value>,
}

impl MemoryStateAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateAdapter for MemoryStateAdapter {
    async fn get(&self, instance_id: &str) -> Result<Option<Value>> {
        Ok(self.states.get(instance_id).map(|v| v.clone()))
    }

    async fn set(&self, instance_id: &str, value: Value) -> Result<()> {
        self.states.insert(instance_id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        self.states.remove(instance_id);
        Ok(())
    }
}

/// Messages kept per instance by [`MemoryRealtimeAdapter`]
const OUTBOX_CAPACITY: usize = 100;

/// In-process realtime adapter
///
/// Sent messages are kept in a bounded per-instance outbox; inbound messages
/// can be injected with [`MemoryRealtimeAdapter::deliver`].
#[derive(Default)]
pub struct MemoryRealtimeAdapter {
    handlers: DashMap<String, MessageHandler>,
    outbox: DashMap<String, VecDeque<Value>>,
}

impl MemoryRealtimeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent to an instance, oldest first
    pub fn sent(&self, instance_id: &str) -> Vec<Value> {
        self.outbox
            .get(instance_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Hand a client message to the subscribed handler
    pub fn deliver(&self, instance_id: &str, message: Value) -> bool {
        let handler = self.handlers.get(instance_id).map(|h| h.clone());
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl RealtimeAdapter for MemoryRealtimeAdapter {
    async fn send(&self, instance_id: &str, message: Value) -> Result<()> {
        let mut queue = self.outbox.entry(instance_id.to_string()).or_default();
        if queue.len() == OUTBOX_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(message);
        Ok(())
    }

    fn subscribe(&self, instance_id: &str, handler: MessageHandler) {
        self.handlers.insert(instance_id.to_string(), handler);
    }

    fn websocket_url(&self, _instance_id: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_state_adapter() {
        let adapter = MemoryStateAdapter::new();
        assert_eq!(adapter.get("inst_1").await.unwrap(), None);
        adapter.set("inst_1", json!({"n": 1})).await.unwrap();
        assert_eq!(adapter.get("inst_1").await.unwrap(), Some(json!({"n": 1})));
        adapter.delete("inst_1").await.unwrap();
        assert_eq!(adapter.get("inst_1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_realtime_outbox_is_bounded() {
        let adapter = MemoryRealtimeAdapter::new();
        for i in 0..(OUTBOX_CAPACITY + 5) {
            adapter.send("inst_1", json!(i)).await.unwrap();
        }
        let sent = adapter.sent("inst_1");
        assert_eq!(sent.len(), OUTBOX_CAPACITY);
        assert_eq!(sent[0], json!(5));
        assert!(adapter.websocket_url("inst_1").is_none());
    }

    #[test]
    fn test_memory_realtime_deliver() {
        let adapter = MemoryRealtimeAdapter::new();
        assert!(!adapter.deliver("inst_1", json!({})));

        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        adapter.subscribe("inst_1", Arc::new(move |v| *s.lock() = Some(v)));
        assert!(adapter.deliver("inst_1", json!({"action": "inc"})));
        assert_eq!(*seen.lock(), Some(json!({"action": "inc"})));
    }
}
