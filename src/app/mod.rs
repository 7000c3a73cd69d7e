//! Tool and resource registration facade
//!
//! `McpApp` owns the tool/resource registries and the instance layer. The
//! stateful HTTP transport and the serverless bridge both drive calls through
//! the same pipeline:
//!
//! 1. split arguments into a [`ToolCallEnvelope`]
//! 2. validate the tool input (failure is a `-32602` protocol error)
//! 3. resolve the instance for the linked UI resource
//! 4. attach the websocket when the resource wants one
//! 5. run the handler with a [`ToolContext`], containing errors and panics
//! 6. format the result for both host profiles

mod context;
mod dispatch;
mod handler;

pub use context::{ToolCallEnvelope, ToolContext, AUTH_TOKEN_FIELD, INSTANCE_ID_FIELD};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::hmr::inject_hmr_script;
use crate::instance::{DestroyEvent, InstanceManager};
use crate::mcp::format::{format_resource_contents, format_tool_result, resource_definition, tool_definition};
use crate::mcp::protocol::{
    methods, InitializeResult, ReadResourceResult, ResourceDefinition, ToolCallResult,
    ToolDefinition,
};
use crate::realtime::{MessageValidator, WebSocketConnection, WebSocketRegistry};
use crate::serverless::{RealtimeAdapter, ServerlessBridge, StateAdapter};
use crate::transport::ServerHandle;
use crate::types::{InstanceId, ResourceConfig, ToolConfig, ToolResult};
use context::{RealtimeBackend, StateBackend};
use handler::{object_schema, schema_for, RegisteredTool, TypedHandler};

#[cfg(feature = "identity")]
use crate::identity::{
    require_token, Identity, IdentityClient, IdentityConfig, IdentityError, IdentityErrorCode,
};

/// Reported to `on_tool_error` hooks when a handler fails or panics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolErrorEvent {
    pub tool: String,
    pub instance_id: Option<InstanceId>,
    pub error: String,
}

pub type ToolErrorHook = Arc<dyn Fn(&ToolErrorEvent) + Send + Sync>;

/// Receives the notification method when the tool or resource list changes
pub type ListChangedHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Where state and realtime live for a call
#[derive(Clone)]
pub(crate) enum ExecutionMode {
    /// Process-local instance manager and websocket registry, for a host
    /// that does or does not render several widgets per resource
    Stateful { host_multi_instance: bool },
    /// Delegated to adapters (one-shot invocations)
    Serverless {
        state: Arc<dyn StateAdapter>,
        realtime: Arc<dyn RealtimeAdapter>,
    },
}

/// MCP application: tools, UI resources and their instances
pub struct McpApp {
    config: AppConfig,
    tools: RwLock<Vec<Arc<RegisteredTool>>>,
    resources: RwLock<Vec<Arc<ResourceConfig>>>,
    instances: Arc<InstanceManager>,
    tool_error_hooks: RwLock<Vec<ToolErrorHook>>,
    list_changed_hooks: RwLock<Vec<ListChangedHook>>,
}

impl McpApp {
    pub fn new(config: AppConfig) -> Self {
        let websockets = Arc::new(WebSocketRegistry::new(config.websocket_base()));
        Self {
            config,
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            instances: Arc::new(InstanceManager::new(websockets)),
            tool_error_hooks: RwLock::new(Vec::new()),
            list_changed_hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn instances(&self) -> &Arc<InstanceManager> {
        &self.instances
    }

    pub(crate) fn websockets(&self) -> &Arc<WebSocketRegistry> {
        self.instances.websockets()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a tool whose input deserializes into `I`
    ///
    /// The input schema is generated from `I`. Registering a name again
    /// replaces the earlier tool.
    pub fn tool<I, F, Fut>(&self, config: ToolConfig, handler: F) -> &Self
    where
        I: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(I, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolResult>> + Send + 'static,
    {
        let schema = schema_for::<I>();
        self.insert_tool(RegisteredTool {
            config,
            input_schema: schema,
            handler: Arc::new(TypedHandler::<I, F>::new(handler)),
        });
        self
    }

    /// Register a tool taking raw JSON arguments
    ///
    /// Without a schema the tool accepts any object.
    pub fn tool_untyped<F, Fut>(&self, config: ToolConfig, schema: Option<Value>, handler: F) -> &Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolResult>> + Send + 'static,
    {
        self.insert_tool(RegisteredTool {
            config,
            input_schema: schema.unwrap_or_else(object_schema),
            handler: Arc::new(TypedHandler::<Value, F>::new(handler)),
        });
        self
    }

    fn insert_tool(&self, tool: RegisteredTool) {
        let name = tool.config.name.clone();
        {
            let mut tools = self.tools.write();
            match tools.iter().position(|t| t.config.name == name) {
                Some(idx) => {
                    tracing::warn!(tool = %name, "Replacing previously registered tool");
                    tools[idx] = Arc::new(tool);
                }
                None => {
                    tracing::debug!(tool = %name, "Registered tool");
                    tools.push(Arc::new(tool));
                }
            }
        }
        self.notify_list_changed(methods::TOOLS_LIST_CHANGED);
    }

    /// Register a UI resource
    ///
    /// Fails with [`AppError::InvalidInput`] when the URI is not `ui://`.
    pub fn resource(&self, config: ResourceConfig) -> Result<&Self> {
        config.validate()?;
        {
            let mut resources = self.resources.write();
            match resources.iter().position(|r| r.uri == config.uri) {
                Some(idx) => {
                    tracing::warn!(uri = %config.uri, "Replacing previously registered resource");
                    resources[idx] = Arc::new(config);
                }
                None => {
                    tracing::debug!(uri = %config.uri, "Registered resource");
                    resources.push(Arc::new(config));
                }
            }
        }
        self.notify_list_changed(methods::RESOURCES_LIST_CHANGED);
        Ok(self)
    }

    /// Add a hook run after a tool or resource is registered or replaced
    ///
    /// The hook receives the matching `notifications/*/list_changed` method.
    pub fn on_list_changed<F>(&self, hook: F) -> &Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.list_changed_hooks.write().push(Arc::new(hook));
        self
    }

    fn notify_list_changed(&self, method: &str) {
        let hooks = self.list_changed_hooks.read().clone();
        for hook in hooks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(method))).is_err() {
                tracing::error!(method, "List change hook panicked");
            }
        }
    }

    fn find_tool(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools
            .read()
            .iter()
            .find(|t| t.config.name == name)
            .cloned()
    }

    fn find_resource(&self, uri: &str) -> Option<Arc<ResourceConfig>> {
        self.resources.read().iter().find(|r| r.uri == uri).cloned()
    }

    // =========================================================================
    // Protocol surface
    // =========================================================================

    pub fn initialize_result(&self) -> InitializeResult {
        InitializeResult::new(&self.config.name, &self.config.version)
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .iter()
            .map(|t| tool_definition(&t.config, t.input_schema.clone()))
            .collect()
    }

    pub fn list_resources(&self) -> Vec<ResourceDefinition> {
        self.resources
            .read()
            .iter()
            .map(|r| resource_definition(r))
            .collect()
    }

    /// Call a tool against the process-local instance layer
    ///
    /// The caller is treated as a singleton-only host.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<ToolCallResult> {
        self.call_tool_for_host(name, arguments, false).await
    }

    /// Call a tool on behalf of a host with known multi-instance support
    pub async fn call_tool_for_host(
        &self,
        name: &str,
        arguments: Option<Value>,
        host_multi_instance: bool,
    ) -> Result<ToolCallResult> {
        let mode = ExecutionMode::Stateful {
            host_multi_instance,
        };
        self.execute_tool(name, arguments, &mode).await
    }

    pub(crate) async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        mode: &ExecutionMode,
    ) -> Result<ToolCallResult> {
        let tool = self
            .find_tool(name)
            .ok_or_else(|| AppError::ToolNotFound(name.to_string()))?;

        let mut envelope = ToolCallEnvelope::parse(arguments)?;
        if tool.rejects_field(INSTANCE_ID_FIELD) {
            envelope.strip_instance_id();
        }
        let prepared = tool.handler.prepare(envelope.tool_args)?;

        let resource = tool.config.ui.as_deref().and_then(|uri| {
            let found = self.find_resource(uri);
            if found.is_none() {
                tracing::warn!(tool = name, uri, "Tool links an unregistered resource");
            }
            found
        });

        let host_multi_instance = match mode {
            ExecutionMode::Stateful {
                host_multi_instance,
            } => *host_multi_instance,
            ExecutionMode::Serverless { .. } => false,
        };
        let instance_id = tool.config.ui.as_deref().map(|uri| {
            let multi_instance = resource.as_ref().is_some_and(|r| r.multi_instance);
            self.instances.resolver().resolve(
                uri,
                envelope.instance_id.as_deref(),
                multi_instance,
                host_multi_instance,
            )
        });
        let wants_websocket = resource.as_ref().is_some_and(|r| r.websocket);

        let (state, realtime, websocket_url) = match (mode, instance_id.as_deref()) {
            (ExecutionMode::Stateful { .. }, Some(id)) if wants_websocket => {
                let conn = self.websockets().get_or_create(id);
                let url = conn.url().to_string();
                (
                    StateBackend::Local(self.instances.clone()),
                    RealtimeBackend::Local(conn),
                    Some(url),
                )
            }
            (ExecutionMode::Stateful { .. }, _) => (
                StateBackend::Local(self.instances.clone()),
                RealtimeBackend::Detached,
                None,
            ),
            (ExecutionMode::Serverless { state, realtime }, Some(id)) if wants_websocket => (
                StateBackend::Adapter(state.clone()),
                RealtimeBackend::Adapter(realtime.clone()),
                realtime.websocket_url(id),
            ),
            (ExecutionMode::Serverless { state, .. }, _) => (
                StateBackend::Adapter(state.clone()),
                RealtimeBackend::Detached,
                None,
            ),
        };

        let ctx = ToolContext::new(
            instance_id.clone(),
            envelope.auth_token,
            websocket_url.clone(),
            state,
            realtime,
        );

        tracing::debug!(tool = name, instance_id = ?instance_id, "Calling tool");
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| prepared(ctx))) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                let message = e.to_string();
                tracing::error!(tool = name, instance_id = ?instance_id, "Tool handler failed: {:#}", e);
                self.report_tool_error(name, instance_id.as_deref(), &message);
                ToolResult::error(format!("Error: {}", message))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(tool = name, instance_id = ?instance_id, "Tool handler panicked: {}", message);
                self.report_tool_error(name, instance_id.as_deref(), &message);
                ToolResult::error(format!("Error: {}", message))
            }
        };

        Ok(format_tool_result(
            &result,
            instance_id.as_deref(),
            websocket_url.as_deref(),
        ))
    }

    /// Read a UI resource, injecting the HMR client in dev mode
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.read_resource_with(uri, self.config.hmr_port()).await
    }

    /// Read a UI resource with an explicit HMR port (`None` disables injection)
    pub async fn read_resource_with(
        &self,
        uri: &str,
        hmr_port: Option<u16>,
    ) -> Result<ReadResourceResult> {
        let resource = self
            .find_resource(uri)
            .ok_or_else(|| AppError::ResourceNotFound(uri.to_string()))?;

        let mut html = resource.html.load().await?;
        if let Some(port) = hmr_port {
            html = inject_hmr_script(&html, port);
        }
        Ok(format_resource_contents(&resource, &html))
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Create an instance outside a tool call
    pub fn create_instance(&self, websocket: bool) -> InstanceId {
        self.instances.create(websocket)
    }

    /// Attach a fresh websocket to an instance, replacing any existing one
    pub fn create_websocket_for_instance(
        &self,
        instance_id: &str,
        validator: Option<MessageValidator>,
    ) -> Arc<WebSocketConnection> {
        self.websockets().create(instance_id, validator)
    }

    pub fn websocket(&self, instance_id: &str) -> Option<Arc<WebSocketConnection>> {
        self.websockets().get(instance_id)
    }

    pub fn websocket_count(&self) -> usize {
        self.websockets().len()
    }

    pub fn get_instance_state(&self, instance_id: &str) -> Option<Value> {
        self.instances.get_state(instance_id)
    }

    pub fn set_instance_state<T: Serialize + ?Sized>(
        &self,
        instance_id: &str,
        state: &T,
    ) -> Result<()> {
        self.instances
            .set_state(instance_id, serde_json::to_value(state)?);
        Ok(())
    }

    pub fn has_instance(&self, instance_id: &str) -> bool {
        self.instances.has_instance(instance_id)
    }

    pub fn destroy_instance(&self, instance_id: &str) -> bool {
        self.instances.destroy(instance_id)
    }

    /// Add a callback run before an instance's state is discarded
    pub fn on_instance_destroy<F>(&self, callback: F) -> &Self
    where
        F: Fn(&DestroyEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.instances.on_destroy(Arc::new(callback));
        self
    }

    /// Add a hook run when a tool handler fails or panics
    pub fn on_tool_error<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ToolErrorEvent) + Send + Sync + 'static,
    {
        self.tool_error_hooks.write().push(Arc::new(hook));
        self
    }

    fn report_tool_error(&self, tool: &str, instance_id: Option<&str>, error: &str) {
        let hooks = self.tool_error_hooks.read().clone();
        if hooks.is_empty() {
            return;
        }
        let event = ToolErrorEvent {
            tool: tool.to_string(),
            instance_id: instance_id.map(str::to_string),
            error: error.to_string(),
        };
        for hook in hooks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(&event))).is_err() {
                tracing::error!(tool, "Tool error hook panicked");
            }
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Bridge for one-shot serverless invocations over this app
    pub fn serverless_bridge(self: &Arc<Self>) -> ServerlessBridge {
        ServerlessBridge::new(self.clone())
    }

    /// Start the stateful HTTP server
    pub async fn serve(self: Arc<Self>) -> Result<ServerHandle> {
        crate::transport::serve(self).await
    }

    /// Resolve the caller behind an auth token via `identity_url`
    #[cfg(feature = "identity")]
    pub async fn get_identity(
        &self,
        token: Option<&str>,
    ) -> std::result::Result<Identity, IdentityError> {
        require_token(token)?;
        let url = self.config.identity_url.clone().ok_or_else(|| {
            IdentityError::new(
                IdentityErrorCode::NotConfigured,
                "No identity URL configured",
            )
        })?;
        IdentityClient::new(IdentityConfig { url })
            .get_identity(token)
            .await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
