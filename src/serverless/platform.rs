//! Vercel and AWS Lambda entry points

use std::collections::HashMap;

use axum::body::Bytes;
use axum::http::{header, Request, Response, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::bridge::ServerlessBridge;
use crate::error::AppError;
use crate::mcp::protocol::{McpResponse, PROTOCOL_VERSION};

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS"),
    (
        "Access-Control-Allow-Headers",
        "Content-Type, Authorization, Mcp-Session-Id",
    ),
];

/// Platform-neutral reply before it is shaped for a platform
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlatformReply {
    pub status: u16,
    pub body: String,
}

impl PlatformReply {
    fn json(status: u16, body: String) -> Self {
        Self { status, body }
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

fn serialize_response(response: &McpResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize response: {}", e);
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#
            .to_string()
    })
}

/// Route one HTTP-ish request through the bridge
pub(crate) async fn dispatch(bridge: &ServerlessBridge, method: &str, body: &str) -> PlatformReply {
    match method.to_ascii_uppercase().as_str() {
        "OPTIONS" => PlatformReply::empty(204),
        "GET" => {
            let config = bridge.app().config();
            PlatformReply::json(
                200,
                json!({
                    "name": config.name,
                    "version": config.version,
                    "protocolVersion": PROTOCOL_VERSION,
                    "transport": "serverless",
                })
                .to_string(),
            )
        }
        "POST" => match bridge.handle_json(body).await {
            Some(response) => PlatformReply::json(200, serialize_response(&response)),
            None => PlatformReply::empty(202),
        },
        other => {
            let response = McpResponse::from_error(
                None,
                AppError::MethodNotFound(format!("HTTP method {} not allowed", other)),
            );
            PlatformReply::json(405, serialize_response(&response))
        }
    }
}

/// Handle a Vercel function invocation
pub async fn vercel_handler(bridge: &ServerlessBridge, request: Request<Bytes>) -> Response<String> {
    let method = request.method().clone();
    let body = String::from_utf8_lossy(request.body()).into_owned();
    let reply = dispatch(bridge, method.as_str(), &body).await;

    let mut builder = Response::builder().status(
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
    for (name, value) in CORS_HEADERS {
        builder = builder.header(name, value);
    }
    if !reply.body.is_empty() {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
    }
    builder.body(reply.body).unwrap_or_else(|e| {
        tracing::error!("Failed to build response: {}", e);
        let mut fallback = Response::new(String::new());
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

/// HTTP API v2 request context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiGatewayHttpContext {
    pub method: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiGatewayRequestContext {
    #[serde(default)]
    pub http: Option<ApiGatewayHttpContext>,
}

/// API Gateway proxy event (REST v1 or HTTP v2)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiGatewayEvent {
    /// REST API (v1) method
    pub http_method: Option<String>,
    /// HTTP API (v2) context carrying the method
    pub request_context: Option<ApiGatewayRequestContext>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

impl ApiGatewayEvent {
    /// Method from either payload version, defaulting to POST
    pub fn method(&self) -> &str {
        self.http_method
            .as_deref()
            .or_else(|| {
                self.request_context
                    .as_ref()
                    .and_then(|c| c.http.as_ref())
                    .map(|h| h.method.as_str())
            })
            .unwrap_or("POST")
    }

    /// Decoded request body
    pub fn decoded_body(&self) -> Result<String, AppError> {
        let Some(ref body) = self.body else {
            return Ok(String::new());
        };
        if !self.is_base64_encoded {
            return Ok(body.clone());
        }
        let bytes = STANDARD
            .decode(body)
            .map_err(|e| AppError::Parse(format!("Invalid base64 body: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AppError::Parse(format!("Body is not UTF-8: {}", e)))
    }
}

/// API Gateway proxy response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

/// Handle an AWS Lambda invocation behind API Gateway
pub async fn lambda_handler(bridge: &ServerlessBridge, event: ApiGatewayEvent) -> ApiGatewayResponse {
    let reply = match event.decoded_body() {
        Ok(body) => dispatch(bridge, event.method(), &body).await,
        Err(e) => PlatformReply::json(400, serialize_response(&McpResponse::from_error(None, e))),
    };

    let mut headers: HashMap<String, String> = CORS_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if !reply.body.is_empty() {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }

    ApiGatewayResponse {
        status_code: reply.status,
        headers,
        body: reply.body,
        is_base64_encoded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::McpApp;
    use crate::config::AppConfig;
    use std::sync::Arc;

    fn bridge() -> ServerlessBridge {
        Arc::new(McpApp::new(AppConfig::new("edge", "2.0.0"))).serverless_bridge()
    }

    #[tokio::test]
    async fn test_vercel_methods() {
        let bridge = bridge();

        let options = vercel_handler(
            &bridge,
            Request::builder()
                .method("OPTIONS")
                .body(Bytes::new())
                .unwrap(),
        )
        .await;
        assert_eq!(options.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            options.headers()["Access-Control-Allow-Origin"],
            "*"
        );
        assert_eq!(
            options.headers()["Access-Control-Allow-Methods"],
            "GET, POST, DELETE, OPTIONS"
        );

        let info = vercel_handler(&bridge, Request::builder().method("GET").body(Bytes::new()).unwrap()).await;
        assert_eq!(info.status(), StatusCode::OK);
        let info: serde_json::Value = serde_json::from_str(info.body()).unwrap();
        assert_eq!(info["name"], "edge");

        let delete = vercel_handler(&bridge, Request::builder().method("DELETE").body(Bytes::new()).unwrap()).await;
        assert_eq!(delete.status(), StatusCode::METHOD_NOT_ALLOWED);

        let ping = vercel_handler(
            &bridge,
            Request::builder()
                .method("POST")
                .body(Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(ping.status(), StatusCode::OK);
        assert!(ping.body().contains(r#""result":{}"#));

        let notification = vercel_handler(
            &bridge,
            Request::builder()
                .method("POST")
                .body(Bytes::from_static(
                    br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(notification.status(), StatusCode::ACCEPTED);
        assert!(notification.body().is_empty());
    }

    #[tokio::test]
    async fn test_lambda_v1_and_v2() {
        let bridge = bridge();

        let v1 = ApiGatewayEvent {
            http_method: Some("POST".to_string()),
            body: Some(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string()),
            ..Default::default()
        };
        let response = lambda_handler(&bridge, v1).await;
        assert_eq!(response.status_code, 200);
        assert_eq!(response.headers["Access-Control-Allow-Origin"], "*");

        let v2: ApiGatewayEvent = serde_json::from_value(json!({
            "requestContext": {"http": {"method": "POST"}},
            "body": STANDARD.encode(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#),
            "isBase64Encoded": true
        }))
        .unwrap();
        assert_eq!(v2.method(), "POST");
        let response = lambda_handler(&bridge, v2).await;
        assert_eq!(response.status_code, 200);
        assert!(response.body.contains(r#""id":2"#));

        let options: ApiGatewayEvent =
            serde_json::from_value(json!({"requestContext": {"http": {"method": "OPTIONS"}}}))
                .unwrap();
        assert_eq!(lambda_handler(&bridge, options).await.status_code, 204);
    }

    #[tokio::test]
    async fn test_lambda_bad_base64() {
        let event = ApiGatewayEvent {
            http_method: Some("POST".to_string()),
            body: Some("%%%".to_string()),
            is_base64_encoded: true,
            ..Default::default()
        };
        let response = lambda_handler(&bridge(), event).await;
        assert_eq!(response.status_code, 400);
        assert!(response.body.contains("-32700"));
    }
}
