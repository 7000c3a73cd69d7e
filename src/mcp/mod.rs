//! MCP protocol layer
//!
//! JSON-RPC envelopes and the dual-protocol wire formatting for tools and
//! UI resources.

pub mod format;
pub mod protocol;

pub use format::{
    format_resource_contents, format_tool_result, MCP_APP_MIME_TYPE, SKYBRIDGE_MIME_TYPE,
};
pub use protocol::{methods, McpRequest, McpResponse, ToolCallResult};
