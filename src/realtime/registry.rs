//! Registry of per-instance WebSocket connections

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::connection::{MessageValidator, WebSocketConnection};
use crate::types::InstanceId;

/// Owns every live WebSocket connection, keyed by instance id
///
/// The upgrade route stays disarmed until the first connection is created, so
/// apps that never use realtime never accept an upgrade.
pub struct WebSocketRegistry {
    connections: DashMap<InstanceId, Arc<WebSocketConnection>>,
    armed: AtomicBool,
    base_url: RwLock<String>,
}

impl WebSocketRegistry {
    /// `base_url` is the `ws://host:port` prefix used to build client URLs
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            connections: DashMap::new(),
            armed: AtomicBool::new(false),
            base_url: RwLock::new(base_url.into()),
        }
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        *self.base_url.write() = base_url.into();
    }

    /// URL clients use to attach to an instance
    pub fn url_for(&self, instance_id: &str) -> String {
        format!(
            "{}/ws/{}",
            self.base_url.read().trim_end_matches('/'),
            instance_id
        )
    }

    /// Whether upgrade requests are accepted at all
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn arm(&self) {
        if !self.armed.swap(true, Ordering::AcqRel) {
            tracing::info!("Attaching websocket upgrade listener on /ws/:instance_id");
        }
    }

    /// Create a connection, fully closing any existing one for the id first
    pub fn create(
        &self,
        instance_id: &str,
        validator: Option<MessageValidator>,
    ) -> Arc<WebSocketConnection> {
        self.arm();

        if let Some((_, previous)) = self.connections.remove(instance_id) {
            tracing::debug!(instance_id, "Replacing existing websocket connection");
            previous.close_all();
        }

        let connection = Arc::new(WebSocketConnection::new(
            instance_id,
            self.url_for(instance_id),
            validator,
        ));
        self.connections
            .insert(instance_id.to_string(), connection.clone());
        tracing::debug!(instance_id, "Created websocket connection");
        connection
    }

    /// Existing connection for the id, or a new one
    pub fn get_or_create(&self, instance_id: &str) -> Arc<WebSocketConnection> {
        self.arm();
        let url = self.url_for(instance_id);
        self.connections
            .entry(instance_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(instance_id, "Created websocket connection");
                Arc::new(WebSocketConnection::new(instance_id, url, None))
            })
            .clone()
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<WebSocketConnection>> {
        self.connections.get(instance_id).map(|c| c.clone())
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.connections.contains_key(instance_id)
    }

    /// Close and remove one connection
    pub fn close(&self, instance_id: &str) -> bool {
        match self.connections.remove(instance_id) {
            Some((_, connection)) => {
                connection.close_all();
                true
            }
            None => false,
        }
    }

    /// Close and remove every connection
    pub fn close_all(&self) {
        let ids: Vec<InstanceId> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id);
        }
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of attached clients across all connections
    pub fn client_count(&self) -> usize {
        self.connections.iter().map(|c| c.client_count()).sum()
    }
}
