//! End-to-end relay tests
//!
//! Spawns the wsrelay binary against a mock upstream endpoint and drives it
//! over the local HTTP surface: connect → publish → POST /send → observe the
//! enveloped payload upstream.

use std::net::TcpListener as StdTcpListener;
use std::process::{Child, Command as StdCommand, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

/// Kills the spawned relay on drop
struct RelayProcess {
    child: Child,
}

impl Drop for RelayProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Reserve a port for the relay's HTTP listener
fn free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Start a mock upstream endpoint that pings periodically and records every
/// text frame it receives
async fn start_mock_upstream(ping_every: Duration) -> (String, Arc<RwLock<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let messages = Arc::new(RwLock::new(Vec::new()));
    let messages_clone = messages.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let messages = messages_clone.clone();
            tokio::spawn(async move {
                let Ok(ws) = accept_async(stream).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();
                let mut ping = tokio::time::interval(ping_every);
                loop {
                    tokio::select! {
                        _ = ping.tick() => {
                            if write.send(WsMessage::Ping(Vec::new())).await.is_err() {
                                break;
                            }
                        }
                        frame = read.next() => match frame {
                            Some(Ok(WsMessage::Text(text))) => messages.write().push(text),
                            Some(Ok(WsMessage::Ping(payload))) => {
                                let _ = write.send(WsMessage::Pong(payload)).await;
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Err(_)) => break,
                            _ => {}
                        },
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), messages)
}

/// Spawn `wsrelay run` configured entirely through the environment
fn spawn_relay(upstream_url: &str, http_port: u16, workdir: &std::path::Path) -> RelayProcess {
    let bin = assert_cmd::cargo::cargo_bin("wsrelay");
    let child = StdCommand::new(bin)
        .arg("run")
        .current_dir(workdir)
        .env("WEBSOCKET_SERVER_URL", upstream_url)
        .env("MAX_CONNECTION_RETRY_COUNT", "20")
        .env("CONNECTION_RETRY_DEBOUNCE", "200")
        .env("WSRELAY_HTTP_PORT", http_port.to_string())
        .env("WSRELAY_LOG_LEVEL", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn wsrelay");
    RelayProcess { child }
}

/// Poll /healthz until the relay reports a live upstream connection
async fn wait_until_connected(client: &reqwest::Client, base: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Relay never became ready"
        );
        if let Ok(resp) = client.get(format!("{}/healthz", base)).send().await {
            if resp.status().is_success() {
                let body: serde_json::Value = resp.json().await.unwrap();
                if body["connected"] == serde_json::Value::Bool(true) {
                    return;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_post_send_forwards_enveloped_payload_exactly_once() -> anyhow::Result<()> {
    let (upstream_url, messages) = start_mock_upstream(Duration::from_secs(5)).await;
    let port = free_port();
    let workdir = tempfile::TempDir::new().unwrap();
    let _relay = spawn_relay(&upstream_url, port, workdir.path());

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);
    wait_until_connected(&client, &base).await;

    // POST /send with {"data":"hello"}
    let resp = client
        .post(format!("{}/send", base))
        .json(&serde_json::json!({ "data": "hello" }))
        .send()
        .await?;
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["success"], serde_json::Value::Bool(true));

    // The upstream observes the enveloped payload
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while messages.read().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Message never arrived upstream"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Exactly once, fire-and-forget, canonical envelope
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        *messages.read(),
        vec![r#"{"action":"sendmessage","data":"hello"}"#.to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_structured_payloads_survive_the_relay() -> anyhow::Result<()> {
    let (upstream_url, messages) = start_mock_upstream(Duration::from_secs(5)).await;
    let port = free_port();
    let workdir = tempfile::TempDir::new().unwrap();
    let _relay = spawn_relay(&upstream_url, port, workdir.path());

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);
    wait_until_connected(&client, &base).await;

    let payload = serde_json::json!({ "kind": "telemetry", "values": [1, 2, 3] });
    let resp = client
        .post(format!("{}/send", base))
        .json(&serde_json::json!({ "data": payload }))
        .send()
        .await?;
    assert!(resp.status().is_success());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while messages.read().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Message never arrived upstream"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let received: serde_json::Value = serde_json::from_str(&messages.read()[0])?;
    assert_eq!(received["action"], "sendmessage");
    assert_eq!(received["data"], payload);
    Ok(())
}
