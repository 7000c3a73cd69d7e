//! Type-erased tool handlers
//!
//! A call is split in two steps: `prepare` validates the arguments (a failure
//! is a protocol error) and returns a closure that runs the application
//! handler once a context exists.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::context::ToolContext;
use crate::error::{AppError, Result};
use crate::types::{ToolConfig, ToolResult};

/// Validated call waiting for its context
pub(crate) type PreparedCall =
    Box<dyn FnOnce(ToolContext) -> BoxFuture<'static, anyhow::Result<ToolResult>> + Send>;

pub(crate) trait ToolHandler: Send + Sync {
    fn prepare(&self, args: Value) -> Result<PreparedCall>;
}

/// Handler taking arguments deserialized into `I`
pub(crate) struct TypedHandler<I, F> {
    handler: Arc<F>,
    _input: PhantomData<fn() -> I>,
}

impl<I, F> TypedHandler<I, F> {
    pub(crate) fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _input: PhantomData,
        }
    }
}

impl<I, F, Fut> ToolHandler for TypedHandler<I, F>
where
    I: DeserializeOwned + Send + 'static,
    F: Fn(I, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ToolResult>> + Send + 'static,
{
    fn prepare(&self, args: Value) -> Result<PreparedCall> {
        let input: I =
            serde_json::from_value(args).map_err(|e| AppError::InvalidParams(e.to_string()))?;
        let handler = self.handler.clone();
        Ok(Box::new(move |ctx| Box::pin(handler(input, ctx))))
    }
}

/// A tool as stored in the registry
pub(crate) struct RegisteredTool {
    pub config: ToolConfig,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    /// Whether the input schema closes the object and does not declare `field`
    pub fn rejects_field(&self, field: &str) -> bool {
        let closed = self.input_schema.get("additionalProperties") == Some(&Value::Bool(false));
        let declared = self
            .input_schema
            .get("properties")
            .and_then(|p| p.get(field))
            .is_some();
        closed && !declared
    }
}

/// Input schema for `I`, generated by schemars
pub(crate) fn schema_for<I: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(I);
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| object_schema());
    if let Some(map) = value.as_object_mut() {
        map.remove("$schema");
    }
    value
}

/// Schema accepting any object
pub(crate) fn object_schema() -> Value {
    serde_json::json!({"type": "object"})
}
