//! Per-instance WebSocket connection
//!
//! A connection belongs to exactly one instance and fans messages out to any
//! number of browser clients attached to it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::InstanceId;

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// Upgrade for an instance that does not exist
pub const CLOSE_INSTANCE_NOT_FOUND: u16 = 4004;

/// Client id
pub type ClientId = String;

/// Client socket ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Handle to one attached client socket
///
/// Outgoing frames are queued on a channel drained by the socket task.
#[derive(Debug, Clone)]
pub struct WsClient {
    id: ClientId,
    tx: mpsc::UnboundedSender<Message>,
    state: Arc<AtomicU8>,
}

impl WsClient {
    /// Create an open client and the receiving end of its outgoing queue
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            id: Uuid::new_v4().to_string(),
            tx,
            state: Arc::new(AtomicU8::new(ReadyState::Open as u8)),
        };
        (client, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_ready_state(&self, state: ReadyState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Queue a text frame; returns false if the client is not open
    pub fn send_text(&self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.tx.send(Message::Text(text)).is_err() {
            self.set_ready_state(ReadyState::Closed);
            return false;
        }
        true
    }

    /// Serialize and queue a message for this client only
    pub fn send_json<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                tracing::error!(client = %self.id, "Failed to serialize message: {}", e);
                false
            }
        }
    }

    /// Send a close frame and mark the client closing
    pub fn close(&self, code: u16, reason: &'static str) {
        match self.ready_state() {
            ReadyState::Closing | ReadyState::Closed => return,
            _ => {}
        }
        self.set_ready_state(ReadyState::Closing);
        let _ = self.tx.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
    }
}

/// Handler for parsed inbound client messages
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Handler fired once per newly attached client
pub type ConnectHandler = Arc<dyn Fn(&WsClient) + Send + Sync>;

/// Validates inbound client messages before they reach the handler
#[derive(Clone)]
pub struct MessageValidator(Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>);

impl MessageValidator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Accept only messages that deserialize into `T`
    pub fn for_type<T: DeserializeOwned + 'static>() -> Self {
        Self::new(|value| {
            serde_json::from_value::<T>(value.clone())
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }

    pub fn validate(&self, value: &Value) -> Result<(), String> {
        (self.0)(value)
    }
}

impl std::fmt::Debug for MessageValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageValidator")
    }
}

/// WebSocket channel bound to one instance
pub struct WebSocketConnection {
    instance_id: InstanceId,
    url: String,
    clients: RwLock<HashMap<ClientId, WsClient>>,
    /// One handler per connection; the last registration wins
    message_handler: RwLock<Option<MessageHandler>>,
    connect_handler: RwLock<Option<ConnectHandler>>,
    validator: Option<MessageValidator>,
}

impl WebSocketConnection {
    pub fn new(
        instance_id: impl Into<InstanceId>,
        url: impl Into<String>,
        validator: Option<MessageValidator>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            url: url.into(),
            clients: RwLock::new(HashMap::new()),
            message_handler: RwLock::new(None),
            connect_handler: RwLock::new(None),
            validator,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// URL browser clients connect to
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Attach a client and fire the connect handler for it
    pub fn add_client(&self, client: WsClient) {
        self.clients
            .write()
            .insert(client.id().to_string(), client.clone());
        tracing::debug!(instance_id = %self.instance_id, client = client.id(), "Client attached");

        let handler = self.connect_handler.read().clone();
        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(&client))).is_err() {
                tracing::error!(instance_id = %self.instance_id, "Connect handler panicked");
            }
        }
    }

    pub fn remove_client(&self, client_id: &str) -> bool {
        let removed = self.clients.write().remove(client_id).is_some();
        if removed {
            tracing::debug!(instance_id = %self.instance_id, client = client_id, "Client detached");
        }
        removed
    }

    /// Serialize once and send to every open client
    ///
    /// Clients that are closing or closed are skipped. Returns the number of
    /// clients the message was queued for; zero clients is not an error.
    pub fn broadcast<T: Serialize + ?Sized>(&self, message: &T) -> usize {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(instance_id = %self.instance_id, "Failed to serialize broadcast: {}", e);
                return 0;
            }
        };

        let clients: Vec<WsClient> = self.clients.read().values().cloned().collect();
        clients
            .iter()
            .filter(|client| client.send_text(text.clone()))
            .count()
    }

    pub fn set_message_handler(&self, handler: MessageHandler) {
        *self.message_handler.write() = Some(handler);
    }

    pub fn set_connect_handler(&self, handler: ConnectHandler) {
        *self.connect_handler.write() = Some(handler);
    }

    pub fn has_message_handler(&self) -> bool {
        self.message_handler.read().is_some()
    }

    /// Parse, validate and dispatch one inbound text frame
    ///
    /// Returns whether the message reached a handler. Invalid messages are
    /// logged and dropped; they never close the connection.
    pub fn handle_incoming(&self, raw: &str) -> bool {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(instance_id = %self.instance_id, "Dropping unparseable client message: {}", e);
                return false;
            }
        };

        if let Some(ref validator) = self.validator {
            if let Err(e) = validator.validate(&value) {
                tracing::warn!(instance_id = %self.instance_id, "Dropping invalid client message: {}", e);
                return false;
            }
        }

        let handler = self.message_handler.read().clone();
        let Some(handler) = handler else {
            tracing::debug!(instance_id = %self.instance_id, "No message handler registered");
            return false;
        };

        if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
            tracing::error!(instance_id = %self.instance_id, "Message handler panicked");
            return false;
        }
        true
    }

    /// Close every client with a normal closure and clear membership
    ///
    /// Handlers are dropped as well; they may hold references back to this
    /// connection.
    pub fn close_all(&self) {
        self.message_handler.write().take();
        self.connect_handler.write().take();
        let clients: Vec<WsClient> = self.clients.write().drain().map(|(_, c)| c).collect();
        for client in &clients {
            client.close(CLOSE_NORMAL, "Connection closed");
        }
        if !clients.is_empty() {
            tracing::info!(
                instance_id = %self.instance_id,
                clients = clients.len(),
                "Closed websocket clients"
            );
        }
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("instance_id", &self.instance_id)
            .field("clients", &self.client_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;

    fn connection() -> WebSocketConnection {
        WebSocketConnection::new("inst_1", "ws://localhost:3000/ws/inst_1", None)
    }

    #[test]
    fn test_broadcast_skips_closed_clients() {
        let conn = connection();
        let (a, mut rx_a) = WsClient::channel();
        let (b, mut rx_b) = WsClient::channel();
        b.set_ready_state(ReadyState::Closed);
        conn.add_client(a);
        conn.add_client(b);

        let delivered = conn.broadcast(&json!({"type": "tick"}));
        assert_eq!(delivered, 1);
        match rx_a.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(text, r#"{"type":"tick"}"#),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_clients_is_noop() {
        let conn = connection();
        assert_eq!(conn.broadcast(&json!({"x": 1})), 0);
    }

    #[test]
    fn test_dropped_receiver_marks_client_closed() {
        let conn = connection();
        let (a, rx_a) = WsClient::channel();
        let handle = a.clone();
        conn.add_client(a);
        drop(rx_a);

        assert_eq!(conn.broadcast(&json!({})), 0);
        assert_eq!(handle.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn test_single_message_handler_last_wins() {
        let conn = connection();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        conn.set_message_handler(Arc::new(move |v| s.lock().push(("first", v))));
        let s = seen.clone();
        conn.set_message_handler(Arc::new(move |v| s.lock().push(("second", v))));

        assert!(conn.handle_incoming(r#"{"action":"inc"}"#));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "second");
        assert_eq!(seen[0].1, json!({"action": "inc"}));
    }

    #[test]
    fn test_invalid_messages_are_dropped() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct ClientMessage {
            action: String,
        }

        let conn = WebSocketConnection::new(
            "inst_1",
            "ws://x",
            Some(MessageValidator::for_type::<ClientMessage>()),
        );
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        conn.set_message_handler(Arc::new(move |_| *c.lock() += 1));

        assert!(!conn.handle_incoming("not json"));
        assert!(!conn.handle_incoming(r#"{"other": 1}"#));
        assert!(conn.handle_incoming(r#"{"action": "inc"}"#));
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_connect_handler_fires_per_client() {
        let conn = connection();
        conn.set_connect_handler(Arc::new(|client| {
            client.send_json(&json!({"type": "snapshot"}));
        }));

        let (a, mut rx_a) = WsClient::channel();
        let (b, mut rx_b) = WsClient::channel();
        conn.add_client(a);
        conn.add_client(b);

        assert!(matches!(rx_a.try_recv(), Ok(Message::Text(_))));
        assert!(matches!(rx_b.try_recv(), Ok(Message::Text(_))));
        assert_eq!(conn.client_count(), 2);
    }

    #[test]
    fn test_close_all_sends_normal_closure() {
        let conn = connection();
        let (a, mut rx_a) = WsClient::channel();
        let handle = a.clone();
        conn.add_client(a);

        conn.close_all();
        assert_eq!(conn.client_count(), 0);
        assert_eq!(handle.ready_state(), ReadyState::Closing);
        match rx_a.try_recv().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CLOSE_NORMAL),
            other => panic!("expected close frame, got {:?}", other),
        }
    }
}
