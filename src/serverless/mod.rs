//! Serverless deployment support
//!
//! One-shot request handling over the same [`McpApp`](crate::app::McpApp)
//! registries, with state and realtime delegated to pluggable adapters.

mod adapters;
mod bridge;
mod platform;

pub use adapters::{MemoryRealtimeAdapter, MemoryStateAdapter, RealtimeAdapter, StateAdapter};
pub use bridge::ServerlessBridge;
pub use platform::{
    lambda_handler, vercel_handler, ApiGatewayEvent, ApiGatewayHttpContext,
    ApiGatewayRequestContext, ApiGatewayResponse,
};
