//! Stateful streamable-HTTP transport
//!
//! Routes:
//! - `GET /health`
//! - `POST /mcp` JSON-RPC (session required except for `initialize`)
//! - `GET /mcp` SSE stream for a session
//! - `DELETE /mcp` session termination
//! - `GET /ws/:instance_id` websocket attach (merged from the realtime router)

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::session::{McpSession, SessionManager};
use crate::app::{ExecutionMode, McpApp};
use crate::error::{AppError, Result};
use crate::mcp::protocol::{codes, methods, InitializeParams, McpRequest, McpResponse};

/// Session header name
pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
struct HttpState {
    app: Arc<McpApp>,
    sessions: Arc<SessionManager>,
}

/// Build the full HTTP router for an app
///
/// Tool and resource list changes are pushed to every session's SSE stream.
pub fn router(app: Arc<McpApp>, sessions: Arc<SessionManager>) -> Router {
    let websockets = crate::realtime::router(app.websockets().clone());

    let listeners = Arc::downgrade(&sessions);
    app.on_list_changed(move |method| {
        if let Some(sessions) = listeners.upgrade() {
            let reached = sessions.notify_all(method, json!({}));
            tracing::debug!(method, reached, "Sent list change notification");
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route("/health", get(health))
        .route("/mcp", get(mcp_get).post(mcp_post).delete(mcp_delete))
        .with_state(HttpState { app, sessions })
        .merge(websockets)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(st): State<HttpState>) -> Json<Value> {
    let config = st.app.config();
    Json(json!({
        "status": "ok",
        "server": config.name,
        "version": config.version,
        "activeSessions": st.sessions.len(),
        "websockets": st.app.websocket_count(),
    }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn jsonrpc_response(status: StatusCode, response: &McpResponse, session_id: Option<&str>) -> Response {
    let mut http = (status, Json(response)).into_response();
    if let Some(sid) = session_id {
        if let Ok(value) = HeaderValue::from_str(sid) {
            http.headers_mut()
                .insert(HeaderName::from_static(SESSION_HEADER), value);
        }
    }
    http
}

fn error_response(status: StatusCode, err: AppError) -> Response {
    jsonrpc_response(status, &McpResponse::from_error(None, err), None)
}

/// Resolve the session named by the request headers
fn require_session(st: &HttpState, headers: &HeaderMap) -> std::result::Result<Arc<McpSession>, Response> {
    let Some(sid) = header_str(headers, SESSION_HEADER) else {
        return Err(error_response(StatusCode::BAD_REQUEST, AppError::MissingSession));
    };
    st.sessions
        .get(sid)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, AppError::SessionNotFound(sid.to_string())))
}

async fn mcp_post(State(st): State<HttpState>, headers: HeaderMap, body: String) -> Response {
    let value: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, AppError::Parse(e.to_string())),
    };
    if value.is_array() {
        let response = McpResponse::error(
            None,
            codes::INVALID_REQUEST,
            "Batch requests are not supported".to_string(),
        );
        return jsonrpc_response(StatusCode::BAD_REQUEST, &response, None);
    }
    let id = value.get("id").cloned();
    let request: McpRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            let response = McpResponse::error(id, codes::INVALID_REQUEST, e.to_string());
            return jsonrpc_response(StatusCode::BAD_REQUEST, &response, None);
        }
    };

    let hmr_port = st.app.config().hmr_port();

    // Initialize starts a new session
    if request.method == methods::INITIALIZE {
        let params: InitializeParams =
            serde_json::from_value(request.params.clone()).unwrap_or_default();
        let session = st.sessions.create();
        let client = params
            .client_info
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let multi_instance = session.initialize(params.client_info, &params.capabilities);
        tracing::info!(
            session_id = %session.id(),
            client = %client,
            multi_instance,
            "Session initialized"
        );

        let mode = ExecutionMode::Stateful {
            host_multi_instance: multi_instance,
        };
        return match st.app.handle_request(request, &mode, hmr_port).await {
            Some(response) => jsonrpc_response(StatusCode::OK, &response, Some(session.id())),
            None => StatusCode::ACCEPTED.into_response(),
        };
    }

    let session = match require_session(&st, &headers) {
        Ok(s) => s,
        Err(response) => return response,
    };

    let mode = ExecutionMode::Stateful {
        host_multi_instance: session.host_multi_instance(),
    };
    match st.app.handle_request(request, &mode, hmr_port).await {
        Some(response) => jsonrpc_response(StatusCode::OK, &response, Some(session.id())),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn mcp_get(State(st): State<HttpState>, headers: HeaderMap) -> Response {
    let session = match require_session(&st, &headers) {
        Ok(s) => s,
        Err(response) => return response,
    };
    tracing::debug!(session_id = %session.id(), "SSE stream opened");

    let stream = BroadcastStream::new(session.subscribe()).filter_map(|message| {
        message
            .ok()
            .map(|v| Ok::<Event, Infallible>(Event::default().event("message").data(v.to_string())))
    });

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(session.id()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn mcp_delete(State(st): State<HttpState>, headers: HeaderMap) -> Response {
    let session = match require_session(&st, &headers) {
        Ok(s) => s,
        Err(response) => return response,
    };
    st.sessions.remove(session.id());
    StatusCode::ACCEPTED.into_response()
}

/// Running HTTP server
pub struct ServerHandle {
    addr: SocketAddr,
    app: Arc<McpApp>,
    sessions: Arc<SessionManager>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn app(&self) -> &Arc<McpApp> {
        &self.app
    }

    /// Stop the server
    ///
    /// Sessions and websockets are closed within one graceful-shutdown
    /// timeout, then the HTTP task gets a second timeout before it is aborted.
    pub async fn stop(&self) {
        let timeout = self.app.config().graceful_shutdown_timeout();

        let sessions = self.sessions.clone();
        let app = self.app.clone();
        let cleanup = tokio::task::spawn_blocking(move || {
            sessions.close_all();
            app.websockets().close_all();
        });
        if tokio::time::timeout(timeout, cleanup).await.is_err() {
            tracing::warn!("Timed out closing sessions and websockets");
        }

        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(Ok(()))) => tracing::info!("HTTP server stopped"),
                Ok(Ok(Err(e))) => tracing::error!("HTTP server error: {}", e),
                Ok(Err(e)) => tracing::error!("HTTP server task failed: {}", e),
                Err(_) => {
                    tracing::warn!("HTTP server did not stop in time, aborting");
                    task.abort();
                }
            }
        }
    }
}

/// Bind to the configured port and serve
pub async fn serve(app: Arc<McpApp>) -> Result<ServerHandle> {
    let addr = SocketAddr::from(([0, 0, 0, 0], app.config().port));
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(app, listener).await
}

/// Serve on an already bound listener
pub async fn serve_with_listener(app: Arc<McpApp>, listener: TcpListener) -> Result<ServerHandle> {
    let addr = listener.local_addr()?;
    if app.config().public_url.is_none() {
        app.websockets()
            .set_base_url(format!("ws://localhost:{}", addr.port()));
    }

    let sessions = Arc::new(SessionManager::new());
    let routes = router(app.clone(), sessions.clone());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        axum::serve(listener, routes)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tracing::info!(
        addr = %addr,
        server = %app.config().name,
        "MCP HTTP server listening on /mcp"
    );

    Ok(ServerHandle {
        addr,
        app,
        sessions,
        shutdown: Mutex::new(Some(shutdown_tx)),
        task: Mutex::new(Some(task)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_serve_and_stop() {
        let mut config = AppConfig::new("stop-test", "0.0.1");
        config.graceful_shutdown_ms = 200;
        let app = Arc::new(McpApp::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let handle = serve_with_listener(app.clone(), listener).await.unwrap();

        let port = handle.local_addr().port();
        assert_eq!(
            app.websockets().url_for("inst_1"),
            format!("ws://localhost:{}/ws/inst_1", port)
        );

        handle.sessions().create();
        app.create_instance(true);

        let started = std::time::Instant::now();
        handle.stop().await;
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(handle.sessions().is_empty());
        assert_eq!(app.websocket_count(), 0);
    }
}
