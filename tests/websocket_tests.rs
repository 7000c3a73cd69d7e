//! WebSocket route tests against a live server
//!
//! Run with: cargo test --test websocket_tests

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use mcp_apps::realtime::WsClient;
use mcp_apps::transport::serve_with_listener;
use mcp_apps::{AppConfig, McpApp, ServerHandle};

async fn start() -> (Arc<McpApp>, ServerHandle) {
    let app = Arc::new(McpApp::new(AppConfig::new("ws-test", "0.1.0")));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let handle = serve_with_listener(app.clone(), listener).await.unwrap();
    (app, handle)
}

fn ws_url(handle: &ServerHandle, instance_id: &str) -> String {
    format!("ws://127.0.0.1:{}/ws/{}", handle.local_addr().port(), instance_id)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_upgrade_rejected_before_first_connection() {
    let (_app, handle) = start().await;

    let err = tokio_tungstenite::connect_async(ws_url(&handle, "inst_any"))
        .await
        .unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status().as_u16(), 404),
        other => panic!("expected HTTP rejection, got {:?}", other),
    }

    handle.stop().await;
}

#[tokio::test]
async fn test_unknown_instance_closed_with_4004() {
    let (app, handle) = start().await;
    app.create_instance(true);

    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url(&handle, "inst_missing"))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap();
    match frame {
        Some(Ok(Message::Close(Some(close)))) => {
            assert_eq!(u16::from(close.code), 4004);
            assert_eq!(close.reason, "Instance not found");
        }
        other => panic!("expected close frame, got {:?}", other),
    }

    handle.stop().await;
}

#[tokio::test]
async fn test_client_attach_broadcast_and_detach() {
    let (app, handle) = start().await;
    let id = app.create_instance(true);
    let connection = app.websocket(&id).unwrap();

    let connected = Arc::new(Mutex::new(Vec::new()));
    let seen = connected.clone();
    connection.set_connect_handler(Arc::new(move |client: &WsClient| {
        seen.lock().push(client.id().to_string());
    }));

    let received = Arc::new(Mutex::new(Vec::new()));
    let inbox = received.clone();
    connection.set_message_handler(Arc::new(move |message: Value| {
        inbox.lock().push(message);
    }));

    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url(&handle, &id))
        .await
        .unwrap();
    wait_until(|| connection.client_count() == 1).await;
    assert_eq!(connected.lock().len(), 1);

    assert_eq!(connection.broadcast(&json!({"count": 7})), 1);
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap();
    match frame {
        Some(Ok(Message::Text(text))) => {
            let value: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value, json!({"count": 7}));
        }
        other => panic!("expected text frame, got {:?}", other),
    }

    ws.send(Message::Text(json!({"action": "increment"}).to_string()))
        .await
        .unwrap();
    wait_until(|| received.lock().len() == 1).await;
    assert_eq!(received.lock()[0], json!({"action": "increment"}));

    ws.close(None).await.unwrap();
    wait_until(|| connection.client_count() == 0).await;
    assert_eq!(connection.broadcast(&json!({"count": 8})), 0);

    handle.stop().await;
}
