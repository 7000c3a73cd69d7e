//! Stateful HTTP transport: sessions, SSE and the websocket route

mod http;
mod session;

pub use http::{router, serve, serve_with_listener, ServerHandle, SESSION_HEADER};
pub use session::{McpSession, SessionManager};
