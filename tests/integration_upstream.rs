//! Integration tests for upstream communication
//!
//! Tests the wire envelope and a mock upstream endpoint at the transport
//! level: these exercise the protocol shape and the mock harness itself.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

/// Mock upstream endpoint for testing
struct MockUpstream {
    addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
    messages_received: Arc<RwLock<Vec<String>>>,
}

impl MockUpstream {
    /// Start a mock upstream server
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let messages_received = Arc::new(RwLock::new(Vec::new()));
        let messages_clone = messages_received.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        if let Ok((stream, _)) = accept_result {
                            let messages = messages_clone.clone();
                            tokio::spawn(async move {
                                if let Ok(ws_stream) = accept_async(stream).await {
                                    handle_connection(ws_stream, messages).await;
                                }
                            });
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            messages_received,
        }
    }

    /// Get the WebSocket URL for this mock upstream
    fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get messages received by the upstream
    fn messages(&self) -> Vec<String> {
        self.messages_received.read().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

/// Handle a WebSocket connection in the mock upstream: record text frames,
/// answer pings
async fn handle_connection(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    messages: Arc<RwLock<Vec<String>>>,
) {
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                messages.write().push(text);
            }
            Ok(WsMessage::Ping(payload)) => {
                let _ = write.send(WsMessage::Pong(payload)).await;
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Wire Format Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_envelope_wire_shape() {
    let envelope = serde_json::json!({
        "action": "sendmessage",
        "data": "hello",
    });

    let json = serde_json::to_string(&envelope).unwrap();
    assert_eq!(json, r#"{"action":"sendmessage","data":"hello"}"#);
}

#[test]
fn test_envelope_carries_structured_payload() {
    let envelope = serde_json::json!({
        "action": "sendmessage",
        "data": { "kind": "alert", "severity": 3 },
    });

    let json = serde_json::to_string(&envelope).unwrap();
    assert!(json.contains(r#""action":"sendmessage""#));
    assert!(json.contains(r#""severity":3"#));
}

// ─────────────────────────────────────────────────────────────────
// Mock Upstream Tests
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mock_upstream_starts() {
    let upstream = MockUpstream::start().await;
    assert!(upstream.ws_url().starts_with("ws://127.0.0.1:"));
}

#[tokio::test]
async fn test_mock_upstream_records_enveloped_messages() {
    let upstream = MockUpstream::start().await;

    let (ws_stream, _) = tokio_tungstenite::connect_async(upstream.ws_url())
        .await
        .unwrap();
    let (mut write, _read) = ws_stream.split();

    let envelope = serde_json::json!({
        "action": "sendmessage",
        "data": "probe",
    });
    write
        .send(WsMessage::Text(envelope.to_string()))
        .await
        .unwrap();

    // Give it a moment to process
    tokio::time::sleep(Duration::from_millis(100)).await;

    let messages = upstream.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("sendmessage"));
    assert!(messages[0].contains("probe"));
}

#[tokio::test]
async fn test_mock_upstream_answers_ping_with_pong() {
    let upstream = MockUpstream::start().await;

    let (ws_stream, _) = tokio_tungstenite::connect_async(upstream.ws_url())
        .await
        .unwrap();
    let (mut write, mut read) = ws_stream.split();

    write
        .send(WsMessage::Ping(b"liveness".to_vec()))
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), read.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    match response {
        WsMessage::Pong(payload) => assert_eq!(payload, b"liveness".to_vec()),
        other => panic!("Expected pong, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mock_upstream_handles_close() {
    let upstream = MockUpstream::start().await;

    let (ws_stream, _) = tokio_tungstenite::connect_async(upstream.ws_url())
        .await
        .unwrap();
    let (mut write, _read) = ws_stream.split();

    write.send(WsMessage::Close(None)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The session ended cleanly; nothing was recorded
    assert!(upstream.messages().is_empty());
}
