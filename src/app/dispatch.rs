//! JSON-RPC method dispatch shared by the HTTP transport and the serverless bridge

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::{ExecutionMode, McpApp};
use crate::error::{AppError, Result};
use crate::mcp::protocol::{methods, CallToolParams, McpRequest, McpResponse, ReadResourceParams};

fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T> {
    serde_json::from_value(params.clone()).map_err(|e| AppError::InvalidParams(e.to_string()))
}

impl McpApp {
    /// Handle one request
    ///
    /// Returns `None` for notifications, which get no response body.
    pub(crate) async fn handle_request(
        &self,
        request: McpRequest,
        mode: &ExecutionMode,
        hmr_port: Option<u16>,
    ) -> Option<McpResponse> {
        if request.method.starts_with("notifications/") {
            tracing::debug!(method = %request.method, "Notification acknowledged");
            return None;
        }

        let id = request.id.clone();
        let response = match self.route(request, mode, hmr_port).await {
            Ok(result) => McpResponse::success(id, result),
            Err(e) => {
                tracing::debug!("Request failed: {}", e);
                McpResponse::from_error(id, e)
            }
        };
        Some(response)
    }

    async fn route(
        &self,
        request: McpRequest,
        mode: &ExecutionMode,
        hmr_port: Option<u16>,
    ) -> Result<Value> {
        match request.method.as_str() {
            methods::INITIALIZE => Ok(serde_json::to_value(self.initialize_result())?),
            methods::PING => Ok(json!({})),
            methods::LIST_TOOLS => Ok(json!({ "tools": self.list_tools() })),
            methods::LIST_RESOURCES => Ok(json!({ "resources": self.list_resources() })),
            methods::CALL_TOOL => {
                let params: CallToolParams = parse_params(&request.params)?;
                let result = self
                    .execute_tool(&params.name, params.arguments, mode)
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            methods::READ_RESOURCE => {
                let params: ReadResourceParams = parse_params(&request.params)?;
                let result = self.read_resource_with(&params.uri, hmr_port).await?;
                Ok(serde_json::to_value(result)?)
            }
            other => Err(AppError::MethodNotFound(other.to_string())),
        }
    }
}
