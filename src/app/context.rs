//! Per-call context handed to tool handlers

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::instance::InstanceManager;
use crate::realtime::{WebSocketConnection, WsClient};
use crate::serverless::{RealtimeAdapter, StateAdapter};
use crate::types::InstanceId;

/// Argument carrying the caller's auth token; never reaches the tool schema
pub const AUTH_TOKEN_FIELD: &str = "_authToken";

/// Argument selecting an explicit instance
pub const INSTANCE_ID_FIELD: &str = "instanceId";

/// Raw tool arguments split into their parts
///
/// `instanceId` stays in `tool_args` so input types may declare it. Tools
/// whose schema forbids unknown fields (`#[serde(deny_unknown_fields)]`)
/// without declaring it get it removed before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEnvelope {
    /// Arguments for the tool, auth token removed
    pub tool_args: Value,
    pub auth_token: Option<String>,
    /// Explicit instance id, left in `tool_args` as well
    pub instance_id: Option<InstanceId>,
}

impl ToolCallEnvelope {
    /// Split raw `tools/call` arguments
    ///
    /// Missing arguments become an empty object; anything other than an object
    /// is rejected.
    pub fn parse(arguments: Option<Value>) -> Result<Self> {
        let mut map = match arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(AppError::InvalidParams(format!(
                    "Tool arguments must be an object, got {}",
                    json_type(&other)
                )))
            }
        };

        let auth_token = match map.remove(AUTH_TOKEN_FIELD) {
            Some(Value::String(token)) => Some(token),
            _ => None,
        };
        let instance_id = map
            .get(INSTANCE_ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            tool_args: Value::Object(map),
            auth_token,
            instance_id,
        })
    }

    /// Remove `instanceId` from the tool arguments, keeping `instance_id`
    pub fn strip_instance_id(&mut self) {
        if let Some(map) = self.tool_args.as_object_mut() {
            map.remove(INSTANCE_ID_FIELD);
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Where instance state lives for a call
#[derive(Clone)]
pub(crate) enum StateBackend {
    Local(Arc<InstanceManager>),
    Adapter(Arc<dyn StateAdapter>),
    Detached,
}

/// Where realtime messages go for a call
#[derive(Clone)]
pub(crate) enum RealtimeBackend {
    Local(Arc<WebSocketConnection>),
    Adapter(Arc<dyn RealtimeAdapter>),
    Detached,
}

/// Context for one tool invocation
///
/// State and websocket accessors are bound to the resolved instance. Without
/// an instance, or without a websocket, they are no-ops.
#[derive(Clone)]
pub struct ToolContext {
    instance_id: Option<InstanceId>,
    auth_token: Option<String>,
    websocket_url: Option<String>,
    state: StateBackend,
    realtime: RealtimeBackend,
}

impl ToolContext {
    pub(crate) fn new(
        instance_id: Option<InstanceId>,
        auth_token: Option<String>,
        websocket_url: Option<String>,
        state: StateBackend,
        realtime: RealtimeBackend,
    ) -> Self {
        Self {
            instance_id,
            auth_token,
            websocket_url,
            state,
            realtime,
        }
    }

    /// Context with no instance, state or websocket (for handler unit tests)
    pub fn detached() -> Self {
        Self::new(
            None,
            None,
            None,
            StateBackend::Detached,
            RealtimeBackend::Detached,
        )
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn websocket_url(&self) -> Option<&str> {
        self.websocket_url.as_deref()
    }

    /// Local websocket connection, if one is attached
    pub fn connection(&self) -> Option<&Arc<WebSocketConnection>> {
        match self.realtime {
            RealtimeBackend::Local(ref conn) => Some(conn),
            _ => None,
        }
    }

    /// Raw instance state
    pub async fn get_state_value(&self) -> Option<Value> {
        let id = self.instance_id.as_deref()?;
        match self.state {
            StateBackend::Local(ref manager) => manager.get_state(id),
            StateBackend::Adapter(ref adapter) => match adapter.get(id).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(instance_id = id, "State adapter get failed: {}", e);
                    None
                }
            },
            StateBackend::Detached => None,
        }
    }

    /// Instance state deserialized into `T`
    pub async fn get_state<T: DeserializeOwned>(&self) -> Option<T> {
        let value = self.get_state_value().await?;
        match serde_json::from_value(value) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::debug!(instance_id = ?self.instance_id, "State has unexpected shape: {}", e);
                None
            }
        }
    }

    /// Replace the instance state (last write wins)
    pub async fn set_state<T: Serialize + ?Sized>(&self, state: &T) -> Result<()> {
        let Some(id) = self.instance_id.as_deref() else {
            tracing::debug!("set_state called without an instance");
            return Ok(());
        };
        let value = serde_json::to_value(state)?;
        match self.state {
            StateBackend::Local(ref manager) => {
                manager.set_state(id, value);
                Ok(())
            }
            StateBackend::Adapter(ref adapter) => adapter.set(id, value).await,
            StateBackend::Detached => Ok(()),
        }
    }

    /// Push a message to every client of this instance
    ///
    /// Delivery failures are logged, never returned.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) {
        match self.realtime {
            RealtimeBackend::Local(ref conn) => {
                conn.broadcast(message);
            }
            RealtimeBackend::Adapter(ref adapter) => {
                let Some(id) = self.instance_id.as_deref() else {
                    return;
                };
                let value = match serde_json::to_value(message) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::error!(instance_id = id, "Failed to serialize message: {}", e);
                        return;
                    }
                };
                if let Err(e) = adapter.send(id, value).await {
                    tracing::error!(instance_id = id, "Realtime send failed: {}", e);
                }
            }
            RealtimeBackend::Detached => {}
        }
    }

    /// Set the handler for client messages (replaces any previous handler)
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        match self.realtime {
            RealtimeBackend::Local(ref conn) => conn.set_message_handler(Arc::new(handler)),
            RealtimeBackend::Adapter(ref adapter) => {
                if let Some(id) = self.instance_id.as_deref() {
                    adapter.subscribe(id, Arc::new(handler));
                }
            }
            RealtimeBackend::Detached => {}
        }
    }

    /// Set the handler fired for each newly attached client
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&WsClient) + Send + Sync + 'static,
    {
        if let RealtimeBackend::Local(ref conn) = self.realtime {
            conn.set_connect_handler(Arc::new(handler));
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("instance_id", &self.instance_id)
            .field("has_auth_token", &self.auth_token.is_some())
            .field("websocket_url", &self.websocket_url)
            .finish()
    }
}
