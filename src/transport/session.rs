//! Stateful MCP sessions keyed by `Mcp-Session-Id`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::instance::host_supports_multi_instance;
use crate::mcp::protocol::ClientInfo;

/// Buffered server-to-client messages per session
const SESSION_CHANNEL_CAPACITY: usize = 64;

/// One initialized client
pub struct McpSession {
    id: String,
    client: RwLock<Option<ClientInfo>>,
    /// Whether this client renders several widgets per resource
    host_multi_instance: AtomicBool,
    events: broadcast::Sender<Value>,
    created_at: DateTime<Utc>,
}

impl McpSession {
    fn new() -> Self {
        let (events, _) = broadcast::channel(SESSION_CHANNEL_CAPACITY);
        Self {
            id: Uuid::new_v4().to_string(),
            client: RwLock::new(None),
            host_multi_instance: AtomicBool::new(false),
            events,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn client_info(&self) -> Option<ClientInfo> {
        self.client.read().clone()
    }

    /// Multi-instance support detected at `initialize`
    pub fn host_multi_instance(&self) -> bool {
        self.host_multi_instance.load(Ordering::Relaxed)
    }

    /// Record the client from its `initialize` request
    ///
    /// Returns whether the client supports multi-instance widgets.
    pub(crate) fn initialize(&self, info: Option<ClientInfo>, capabilities: &Value) -> bool {
        let client_name = info.as_ref().map(|c| c.name.as_str());
        let multi_instance = host_supports_multi_instance(client_name, capabilities);
        self.host_multi_instance
            .store(multi_instance, Ordering::Relaxed);
        *self.client.write() = info;
        multi_instance
    }

    /// Receiver for the session's SSE stream
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.events.subscribe()
    }

    /// Push a JSON-RPC notification to the session's SSE listeners
    ///
    /// Returns the number of listeners reached.
    pub fn notify(&self, method: &str, params: Value) -> usize {
        let message = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.events.send(message).unwrap_or(0)
    }
}

/// All live sessions
#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<McpSession>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session with a fresh id
    pub fn create(&self) -> Arc<McpSession> {
        let session = Arc::new(McpSession::new());
        self.sessions
            .insert(session.id().to_string(), session.clone());
        tracing::debug!(session_id = %session.id(), "Session created");
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<McpSession>> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            tracing::debug!(session_id, "Session terminated");
        }
        removed
    }

    /// Notify every session; returns the number of listeners reached
    pub fn notify_all(&self, method: &str, params: Value) -> usize {
        self.sessions
            .iter()
            .map(|s| s.notify(method, params.clone()))
            .sum()
    }

    /// Drop every session, ending their SSE streams
    pub fn close_all(&self) {
        let count = self.sessions.len();
        self.sessions.clear();
        if count > 0 {
            tracing::info!(count, "Closed transport sessions");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let manager = SessionManager::new();
        let session = manager.create();
        assert_eq!(manager.len(), 1);
        assert!(manager.get(session.id()).is_some());
        assert!(manager.remove(session.id()));
        assert!(!manager.remove(session.id()));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_host_support_is_per_session() {
        let manager = SessionManager::new();
        let claude = manager.create();
        let chatgpt = manager.create();

        let claude_info = ClientInfo {
            name: "claude-ai".to_string(),
            version: Some("1.0".to_string()),
        };
        let chatgpt_info = ClientInfo {
            name: "chatgpt".to_string(),
            version: Some("1.0".to_string()),
        };
        assert!(!claude.initialize(Some(claude_info), &json!({})));
        assert!(chatgpt.initialize(Some(chatgpt_info), &json!({})));

        assert!(!claude.host_multi_instance());
        assert!(chatgpt.host_multi_instance());
        assert_eq!(claude.client_info().unwrap().name, "claude-ai");
    }

    #[tokio::test]
    async fn test_notify_reaches_subscribers() {
        let manager = SessionManager::new();
        let session = manager.create();
        assert_eq!(session.notify("notifications/message", json!({})), 0);

        let mut rx = session.subscribe();
        assert_eq!(
            manager.notify_all("notifications/message", json!({"level": "info"})),
            1
        );
        let message = rx.recv().await.unwrap();
        assert_eq!(message["method"], "notifications/message");
        assert_eq!(message["params"]["level"], "info");
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let manager = SessionManager::new();
        let session = manager.create();
        let mut rx = session.subscribe();
        drop(session);
        manager.close_all();
        assert!(rx.recv().await.is_err());
    }
}
