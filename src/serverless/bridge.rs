//! One-shot JSON-RPC handling for serverless platforms

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::adapters::{MemoryRealtimeAdapter, MemoryStateAdapter, RealtimeAdapter, StateAdapter};
use crate::app::{ExecutionMode, McpApp};
use crate::error::{AppError, Result};
use crate::mcp::protocol::{methods, McpRequest, McpResponse};

/// Handles single requests against an [`McpApp`] without a session
///
/// Tool calls read and write state through a [`StateAdapter`] and push
/// realtime messages through a [`RealtimeAdapter`]. Missing adapters fall back
/// to in-memory ones, which do not survive between invocations.
pub struct ServerlessBridge {
    app: Arc<McpApp>,
    state: Arc<dyn StateAdapter>,
    realtime: Arc<dyn RealtimeAdapter>,
    state_fallback: bool,
    realtime_fallback: bool,
    warned: AtomicBool,
}

impl ServerlessBridge {
    pub fn new(app: Arc<McpApp>) -> Self {
        Self {
            app,
            state: Arc::new(MemoryStateAdapter::new()),
            realtime: Arc::new(MemoryRealtimeAdapter::new()),
            state_fallback: true,
            realtime_fallback: true,
            warned: AtomicBool::new(false),
        }
    }

    pub fn with_state_adapter(mut self, adapter: Arc<dyn StateAdapter>) -> Self {
        self.state = adapter;
        self.state_fallback = false;
        self
    }

    pub fn with_realtime_adapter(mut self, adapter: Arc<dyn RealtimeAdapter>) -> Self {
        self.realtime = adapter;
        self.realtime_fallback = false;
        self
    }

    pub fn app(&self) -> &Arc<McpApp> {
        &self.app
    }

    pub fn state_adapter(&self) -> &Arc<dyn StateAdapter> {
        &self.state
    }

    pub fn realtime_adapter(&self) -> &Arc<dyn RealtimeAdapter> {
        &self.realtime
    }

    fn warn_fallbacks(&self) {
        if self.warned.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.state_fallback {
            tracing::warn!(
                "Using in-memory state adapter. State will not persist across invocations in a real serverless deployment."
            );
        }
        if self.realtime_fallback {
            tracing::warn!(
                "Using in-memory realtime adapter. Messages will not reach clients across invocations in a real serverless deployment."
            );
        }
    }

    /// Tear down an instance created through this bridge
    ///
    /// Deletes its adapter state and clears any singleton mapping to it, so
    /// the next call mints a fresh id. Returns whether anything existed.
    /// Local destroy callbacks are not run; they belong to the stateful path.
    pub async fn destroy_instance(&self, instance_id: &str) -> Result<bool> {
        let had_state = self.state.get(instance_id).await?.is_some();
        self.state.delete(instance_id).await?;
        let was_singleton = self.app.instances().resolver().forget_instance(instance_id);
        tracing::debug!(instance_id, had_state, was_singleton, "Serverless instance destroyed");
        Ok(had_state || was_singleton)
    }

    /// Handle a parsed request; `None` for notifications
    pub async fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        if request.method == methods::CALL_TOOL {
            self.warn_fallbacks();
        }
        let mode = ExecutionMode::Serverless {
            state: self.state.clone(),
            realtime: self.realtime.clone(),
        };
        self.app.handle_request(request, &mode, None).await
    }

    /// Handle a raw request body; `None` for notifications
    pub async fn handle_json(&self, body: &str) -> Option<McpResponse> {
        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                return Some(McpResponse::from_error(None, AppError::Parse(e.to_string())));
            }
        };
        let id = value.get("id").cloned();
        match serde_json::from_value::<McpRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(McpResponse::from_error(id, AppError::Parse(e.to_string()))),
        }
    }
}
