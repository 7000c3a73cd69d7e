//! Real-time channels via WebSocket
//!
//! Each instance can own one connection that fans out to many browser clients.

mod connection;
mod registry;
mod server;

pub use connection::{
    ClientId, ConnectHandler, MessageHandler, MessageValidator, ReadyState, WebSocketConnection,
    WsClient, CLOSE_INSTANCE_NOT_FOUND, CLOSE_NORMAL,
};
pub use registry::WebSocketRegistry;
pub use server::router;
