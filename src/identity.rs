//! Identity lookup for authenticated tool calls
//!
//! Tool calls may carry an auth token (see [`crate::app::ToolCallEnvelope`]).
//! Applications exchange that token for a user identity with
//! [`IdentityClient::get_identity`]. Expected failures, including the absence
//! of a token, are reported through [`IdentityErrorCode`] rather than as
//! generic errors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable identity failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityErrorCode {
    MissingToken,
    NotConfigured,
    NetworkError,
    InvalidToken,
    InvalidResponse,
    ServerError,
}

impl IdentityErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityErrorCode::MissingToken => "missing_token",
            IdentityErrorCode::NotConfigured => "not_configured",
            IdentityErrorCode::NetworkError => "network_error",
            IdentityErrorCode::InvalidToken => "invalid_token",
            IdentityErrorCode::InvalidResponse => "invalid_response",
            IdentityErrorCode::ServerError => "server_error",
        }
    }
}

impl fmt::Display for IdentityErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity lookup error carrying a code and a human message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct IdentityError {
    pub code: IdentityErrorCode,
    pub message: String,
}

impl IdentityError {
    pub fn new(code: IdentityErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn missing_token() -> Self {
        Self::new(
            IdentityErrorCode::MissingToken,
            "No auth token was provided with the tool call",
        )
    }
}

/// Authenticated user as returned by the identity endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(alias = "id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any additional claims the endpoint returns
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Identity endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub url: String,
}

impl IdentityConfig {
    /// Create config from `MCP_IDENTITY_URL`
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("MCP_IDENTITY_URL").ok()?;
        if url.trim().is_empty() {
            return None;
        }
        Some(Self { url })
    }
}

/// Normalize an optional token, treating blank strings as absent
pub fn require_token(token: Option<&str>) -> Result<&str, IdentityError> {
    match token.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t),
        _ => Err(IdentityError::missing_token()),
    }
}

/// HTTP client for the identity endpoint
#[cfg(feature = "identity")]
pub struct IdentityClient {
    client: reqwest::Client,
    config: IdentityConfig,
}

#[cfg(feature = "identity")]
impl IdentityClient {
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Create client from environment variables
    pub fn from_env() -> Option<Self> {
        IdentityConfig::from_env().map(Self::new)
    }

    /// Resolve the identity behind a bearer token
    pub async fn get_identity(&self, token: Option<&str>) -> Result<Identity, IdentityError> {
        let token = require_token(token)?;

        let response = self
            .client
            .get(&self.config.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::new(IdentityErrorCode::NetworkError, e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(IdentityError::new(
                IdentityErrorCode::InvalidToken,
                format!("Identity endpoint rejected token ({})", status),
            ));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::new(
                IdentityErrorCode::ServerError,
                format!("Status {}: {}", status, body),
            ));
        }

        response.json::<Identity>().await.map_err(|e| {
            IdentityError::new(
                IdentityErrorCode::InvalidResponse,
                format!("Failed to parse identity: {}", e),
            )
        })
    }
}

/// Look up an identity using `MCP_IDENTITY_URL`
#[cfg(feature = "identity")]
pub async fn get_identity(token: Option<&str>) -> Result<Identity, IdentityError> {
    require_token(token)?;
    let client = IdentityClient::from_env().ok_or_else(|| {
        IdentityError::new(
            IdentityErrorCode::NotConfigured,
            "MCP_IDENTITY_URL is not set",
        )
    })?;
    client.get_identity(token).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_token() {
        assert_eq!(require_token(Some(" abc ")).unwrap(), "abc");
        assert_eq!(
            require_token(None).unwrap_err().code,
            IdentityErrorCode::MissingToken
        );
        assert_eq!(
            require_token(Some("   ")).unwrap_err().code,
            IdentityErrorCode::MissingToken
        );
    }

    #[test]
    fn test_error_display() {
        let err = IdentityError::new(IdentityErrorCode::InvalidToken, "expired");
        assert_eq!(err.to_string(), "invalid_token: expired");
    }

    #[test]
    fn test_identity_accepts_id_alias() {
        let identity: Identity =
            serde_json::from_str(r#"{"id": "u_1", "email": "a@b.c", "plan": "pro"}"#).unwrap();
        assert_eq!(identity.user_id, "u_1");
        assert_eq!(identity.email.as_deref(), Some("a@b.c"));
        assert_eq!(identity.extra.get("plan").unwrap(), "pro");
    }

    #[cfg(feature = "identity")]
    #[tokio::test]
    async fn test_missing_token_skips_network() {
        let client = IdentityClient::new(IdentityConfig {
            url: "http://127.0.0.1:1/identity".to_string(),
        });
        let err = client.get_identity(None).await.unwrap_err();
        assert_eq!(err.code, IdentityErrorCode::MissingToken);
    }

    #[cfg(feature = "identity")]
    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let client = IdentityClient::new(IdentityConfig {
            url: "http://127.0.0.1:1/identity".to_string(),
        });
        let err = client.get_identity(Some("tok")).await.unwrap_err();
        assert_eq!(err.code, IdentityErrorCode::NetworkError);
    }
}
