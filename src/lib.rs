//! mcp-apps - interactive UI apps on top of MCP
//!
//! Tool and UI-resource registration, multi-instance widget lifecycle with
//! optional per-instance WebSockets, and dual-protocol output for both MCP
//! Apps hosts and ChatGPT Apps, served over stateful HTTP sessions or one-shot
//! serverless invocations.

pub mod app;
pub mod config;
pub mod error;
pub mod hmr;
pub mod identity;
pub mod instance;
pub mod mcp;
pub mod realtime;
pub mod serverless;
pub mod transport;
pub mod types;

pub use app::{McpApp, ToolCallEnvelope, ToolContext, ToolErrorEvent};
pub use config::AppConfig;
pub use error::{AppError, Result};
pub use identity::{Identity, IdentityError, IdentityErrorCode};
pub use instance::DestroyEvent;
pub use realtime::{MessageValidator, WebSocketConnection};
pub use serverless::ServerlessBridge;
pub use transport::ServerHandle;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
