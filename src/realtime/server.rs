//! WebSocket upgrade route: `/ws/:instance_id`

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};

use super::connection::{ReadyState, WsClient, CLOSE_INSTANCE_NOT_FOUND};
use super::registry::WebSocketRegistry;

/// Build the websocket router
pub fn router(registry: Arc<WebSocketRegistry>) -> Router {
    Router::new()
        .route("/ws/:instance_id", get(ws_handler))
        .with_state(registry)
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(instance_id): Path<String>,
    State(registry): State<Arc<WebSocketRegistry>>,
) -> Response {
    if !registry.is_armed() {
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, instance_id, registry))
}

/// Handle an individual client socket
async fn handle_socket(mut socket: WebSocket, instance_id: String, registry: Arc<WebSocketRegistry>) {
    let Some(connection) = registry.get(&instance_id) else {
        tracing::warn!(instance_id = %instance_id, "Websocket upgrade for unknown instance");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_INSTANCE_NOT_FOUND,
                reason: "Instance not found".into(),
            })))
            .await;
        return;
    };

    let (client, mut rx) = WsClient::channel();
    let client_id = client.id().to_string();
    let (mut sender, mut receiver) = socket.split();

    // Task to drain the client's outgoing queue
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    connection.add_client(client.clone());

    // Task to handle incoming messages from the client
    let conn = connection.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    conn.handle_incoming(&text);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    client.set_ready_state(ReadyState::Closed);
    connection.remove_client(&client_id);
}
