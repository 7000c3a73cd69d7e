//! Error types for mcp-apps

use thiserror::Error;

use crate::identity::IdentityError;

/// Result type alias for framework operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Main error type for the framework
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing session id")]
    MissingSession,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Resource load error: {0}")]
    ResourceLoad(String),

    #[error("State adapter error: {0}")]
    State(String),

    #[error("Realtime adapter error: {0}")]
    Realtime(String),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get JSON-RPC error code
    pub fn code(&self) -> i64 {
        match self {
            AppError::Parse(_) => -32700,
            AppError::InvalidInput(_) | AppError::InvalidParams(_) => -32602,
            AppError::ToolNotFound(_)
            | AppError::ResourceNotFound(_)
            | AppError::MethodNotFound(_) => -32601,
            AppError::MissingSession | AppError::SessionNotFound(_) => -32000,
            _ => -32603,
        }
    }

    /// Whether the error belongs to the session layer rather than a request
    pub fn is_session_error(&self) -> bool {
        matches!(self, AppError::MissingSession | AppError::SessionNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::Parse("x".into()).code(), -32700);
        assert_eq!(AppError::InvalidParams("x".into()).code(), -32602);
        assert_eq!(AppError::ToolNotFound("t".into()).code(), -32601);
        assert_eq!(AppError::ResourceNotFound("ui://a".into()).code(), -32601);
        assert_eq!(AppError::MissingSession.code(), -32000);
        assert_eq!(AppError::Internal("boom".into()).code(), -32603);
        assert_eq!(AppError::ResourceLoad("io".into()).code(), -32603);
    }

    #[test]
    fn test_session_errors() {
        assert!(AppError::MissingSession.is_session_error());
        assert!(AppError::SessionNotFound("abc".into()).is_session_error());
        assert!(!AppError::Parse("x".into()).is_session_error());
    }
}
