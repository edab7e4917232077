//! WebSocket client for the upstream connection
//!
//! Provides a robust WebSocket client with:
//! - Automatic reconnection with a fixed-delay retry budget
//! - Heartbeat watchdog over remote ping frames
//! - Periodic outbound keepalive probes
//! - Generation-tagged handle publishing for local producers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::UpstreamSettings;
use crate::error::{Error, Result};
use crate::protocol::OutboundEnvelope;

use super::handle::{
    readiness_channel, settle_readiness, ConnectionHandle, HandlePublisher, ReadinessReceiver,
    StartupStatus,
};
use super::heartbeat::HeartbeatWatchdog;
use super::retry::{RetryPolicy, RetryState};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the upstream client
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// WebSocket URL of the upstream endpoint
    pub url: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Maximum connection attempts per acquisition cycle (None = unlimited)
    pub max_attempts: Option<u32>,

    /// Fixed wait between failed attempts
    pub retry_debounce: Duration,

    /// Interval at which the upstream sends ping frames
    pub ping_interval: Duration,

    /// Latency allowance added on top of the ping interval
    pub latency_margin: Duration,

    /// Outbound keepalive probe period (None = disabled)
    pub keepalive_interval: Option<Duration>,

    /// Optional payload sent once after each successful open
    pub hello_message: Option<String>,

    /// Outbound queue size per connection
    pub queue_size: usize,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(30),
            max_attempts: None, // Unlimited
            retry_debounce: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            latency_margin: Duration::from_secs(1),
            keepalive_interval: Some(Duration::from_secs(540)),
            hello_message: None,
            queue_size: 64,
        }
    }
}

impl From<&UpstreamSettings> for UpstreamClientConfig {
    fn from(settings: &UpstreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            max_attempts: settings.max_attempts(),
            retry_debounce: settings.retry_debounce(),
            ping_interval: Duration::from_millis(settings.ping_interval_ms),
            latency_margin: Duration::from_millis(settings.latency_margin_ms),
            keepalive_interval: settings.keepalive_interval(),
            hello_message: settings.hello_message.clone(),
            queue_size: 64,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connection open and published
    Connected,
    /// Connection lost, re-acquiring
    Reconnecting,
    /// Shutting down
    ShuttingDown,
}

/// Internal client state
#[derive(Debug, Default)]
struct ClientState {
    /// Current connection state
    connection_state: ConnectionState,

    /// Generation id of the live connection, if any
    generation: Option<Uuid>,

    /// When the live connection opened
    connected_at: Option<Instant>,

    /// Attempt counter for the current acquisition cycle
    retry: RetryState,
}

// ─────────────────────────────────────────────────────────────────
// Command / Event Channels
// ─────────────────────────────────────────────────────────────────

/// Commands that can be sent to the client
#[derive(Debug)]
pub enum UpstreamCommand {
    /// Initiate graceful shutdown
    Shutdown,

    /// Get current connection state
    GetState(oneshot::Sender<ConnectionState>),
}

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// Connected to the upstream endpoint
    Connected { generation: Uuid },

    /// An established connection was lost
    Disconnected { reason: String },

    /// Waiting before the next connection attempt
    Reconnecting { attempt: u32, delay: Duration },

    /// The heartbeat watchdog terminated the connection
    WatchdogExpired,

    /// Application message received from the upstream
    MessageReceived { text: String },

    /// The retry budget is spent; the client has given up
    Failed { attempts: u32, message: String },
}

/// How a connection driver run ended
#[derive(Debug)]
enum DriverExit {
    /// Shutdown was requested
    Shutdown,
    /// The watchdog deadline passed without a liveness signal
    WatchdogExpired,
    /// The remote closed the connection or the stream ended
    Closed(String),
    /// A transport fault interrupted the connection
    Fault(String),
}

// ─────────────────────────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────────────────────────

/// Transport seam for opening one WebSocket session.
///
/// One call is one connection attempt: it either yields an open transport or
/// an attempt failure for the retry policy to rule on.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport produced by a successful attempt
    type Transport: Stream<Item = std::result::Result<WsMessage, WsError>>
        + Sink<WsMessage, Error = WsError>
        + Send
        + Unpin
        + 'static;

    /// Open one session to the endpoint.
    async fn connect(&self, url: &Url) -> Result<Self::Transport>;
}

/// Production connector backed by tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    /// Per-attempt connection timeout
    pub connect_timeout: Duration,
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn connect(&self, url: &Url) -> Result<Self::Transport> {
        match tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(Error::connection_failed(url.as_str(), e.to_string())),
            Err(_) => Err(Error::connection_timeout(
                url.as_str(),
                self.connect_timeout.as_secs(),
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Upstream Client
// ─────────────────────────────────────────────────────────────────

/// WebSocket client owning the single upstream connection
pub struct UpstreamClient {
    config: UpstreamClientConfig,
    state: Arc<RwLock<ClientState>>,
    publisher: Arc<HandlePublisher>,
    readiness_tx: Option<watch::Sender<StartupStatus>>,
    readiness_rx: ReadinessReceiver,
    command_tx: mpsc::Sender<UpstreamCommand>,
}

impl UpstreamClient {
    /// Create a new upstream client
    pub fn new(config: UpstreamClientConfig) -> Self {
        let (readiness_tx, readiness_rx) = readiness_channel();
        let (command_tx, _command_rx) = mpsc::channel(config.queue_size);

        Self {
            config,
            state: Arc::new(RwLock::new(ClientState::default())),
            publisher: HandlePublisher::shared(),
            readiness_tx: Some(readiness_tx),
            readiness_rx,
            command_tx,
        }
    }

    /// The handle publisher consumers read the live connection from
    pub fn publisher(&self) -> Arc<HandlePublisher> {
        self.publisher.clone()
    }

    /// The startup readiness signal
    pub fn readiness(&self) -> ReadinessReceiver {
        self.readiness_rx.clone()
    }

    /// Get current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().connection_state
    }

    /// Start the client with the production connector and return the event
    /// receiver
    pub async fn start(&mut self) -> Result<mpsc::Receiver<UpstreamEvent>> {
        let connector = WsConnector {
            connect_timeout: self.config.connect_timeout,
        };
        self.start_with_connector(connector).await
    }

    /// Start the client with a custom connector
    pub async fn start_with_connector<C: Connector>(
        &mut self,
        connector: C,
    ) -> Result<mpsc::Receiver<UpstreamEvent>> {
        let readiness_tx = self
            .readiness_tx
            .take()
            .ok_or_else(|| Error::Internal("Client already started".to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(self.config.queue_size);
        let (command_tx, command_rx) = mpsc::channel(self.config.queue_size);
        self.command_tx = command_tx;

        let config = self.config.clone();
        let state = self.state.clone();
        let publisher = self.publisher.clone();

        tokio::spawn(async move {
            run_client_loop(
                config,
                connector,
                state,
                publisher,
                readiness_tx,
                command_rx,
                event_tx,
            )
            .await;
        });

        Ok(event_rx)
    }

    /// Send a command to the client
    pub async fn send_command(&self, command: UpstreamCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::Connection("Client channel closed".to_string()))
    }

    /// Request graceful shutdown
    pub async fn shutdown(&self) -> Result<()> {
        self.send_command(UpstreamCommand::Shutdown).await
    }
}

// ─────────────────────────────────────────────────────────────────
// Client Loop
// ─────────────────────────────────────────────────────────────────

/// Main client loop: acquisition cycle with fixed-delay retry, connection
/// driving, and re-acquisition after loss
async fn run_client_loop<C: Connector>(
    config: UpstreamClientConfig,
    connector: C,
    state: Arc<RwLock<ClientState>>,
    publisher: Arc<HandlePublisher>,
    readiness_tx: watch::Sender<StartupStatus>,
    mut command_rx: mpsc::Receiver<UpstreamCommand>,
    event_tx: mpsc::Sender<UpstreamEvent>,
) {
    let url = match Url::parse(&config.url) {
        Ok(u) => u,
        Err(e) => {
            error!(url = %config.url, error = %e, "Invalid upstream URL");
            settle_readiness(&readiness_tx, StartupStatus::Failed { attempts: 0 });
            let _ = event_tx
                .send(UpstreamEvent::Failed {
                    attempts: 0,
                    message: format!("Invalid URL: {}", e),
                })
                .await;
            return;
        }
    };

    let mut policy = RetryPolicy::new(config.max_attempts, config.retry_debounce);

    loop {
        // Check if we should shutdown
        {
            let s = state.read();
            if s.connection_state == ConnectionState::ShuttingDown {
                info!("Client shutdown requested");
                break;
            }
        }

        // Consult the retry policy before every attempt
        let attempt = state.read().retry.attempt_index();
        if !policy.should_retry(attempt) {
            error!(
                attempts = attempt,
                max = ?policy.max_attempts(),
                "Connection retry budget exhausted"
            );
            state.write().connection_state = ConnectionState::Disconnected;
            settle_readiness(&readiness_tx, StartupStatus::Failed { attempts: attempt });
            let _ = event_tx
                .send(UpstreamEvent::Failed {
                    attempts: attempt,
                    message: "Connection retry budget exhausted".to_string(),
                })
                .await;
            break;
        }

        state.write().connection_state = ConnectionState::Connecting;
        info!(url = %url, attempt, "Connecting to upstream");

        match connector.connect(&url).await {
            Ok(transport) => {
                let generation = Uuid::new_v4();
                {
                    let mut s = state.write();
                    s.connection_state = ConnectionState::Connected;
                    s.connected_at = Some(Instant::now());
                    s.generation = Some(generation);
                    // The budget governs acquisition; a proven-reachable
                    // endpoint gets a fresh one.
                    s.retry.reset();
                }

                info!(%generation, "Upstream connection established");

                // Publish the handle before signalling readiness: a caller
                // woken by the readiness signal must find a live handle.
                let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_size);
                publisher.publish(ConnectionHandle::new(generation, outbound_tx));
                settle_readiness(&readiness_tx, StartupStatus::Connected);
                let _ = event_tx.send(UpstreamEvent::Connected { generation }).await;

                let exit = drive_connection(
                    &config,
                    transport,
                    outbound_rx,
                    &mut command_rx,
                    &event_tx,
                    &state,
                )
                .await;

                // Clear the published handle before any reconnection logic;
                // the watchdog and keepalive timers died with the driver.
                publisher.clear(generation);
                {
                    let mut s = state.write();
                    s.generation = None;
                    s.connected_at = None;
                    s.connection_state = match exit {
                        DriverExit::Shutdown => ConnectionState::ShuttingDown,
                        _ => ConnectionState::Reconnecting,
                    };
                }

                match exit {
                    DriverExit::Shutdown => break,
                    DriverExit::WatchdogExpired => {
                        let _ = event_tx.send(UpstreamEvent::WatchdogExpired).await;
                    }
                    DriverExit::Closed(reason) | DriverExit::Fault(reason) => {
                        warn!(reason = %reason, "Upstream connection lost");
                        let _ = event_tx.send(UpstreamEvent::Disconnected { reason }).await;
                    }
                }

                // Loss of an established session: begin a new acquisition
                // cycle immediately. The debounce applies only between
                // failed attempts.
            }
            Err(e) => {
                warn!(error = %e, attempt, "Connection attempt failed");
                let next_attempt = {
                    let mut s = state.write();
                    s.retry.record_failure();
                    s.connection_state = ConnectionState::Reconnecting;
                    s.retry.attempt_index()
                };

                // A denied next attempt terminates without further delay;
                // the check at the top of the loop reports exhaustion.
                if !policy.should_retry(next_attempt) {
                    continue;
                }

                let delay = policy.next_delay();
                let _ = event_tx
                    .send(UpstreamEvent::Reconnecting {
                        attempt: next_attempt,
                        delay,
                    })
                    .await;

                info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = next_attempt,
                    "Waiting before next connection attempt"
                );

                // Wait the fixed debounce (also watch for shutdown commands)
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    Some(cmd) = command_rx.recv() => {
                        match cmd {
                            UpstreamCommand::Shutdown => {
                                let mut s = state.write();
                                s.connection_state = ConnectionState::ShuttingDown;
                            }
                            UpstreamCommand::GetState(tx) => {
                                let _ = tx.send(state.read().connection_state);
                            }
                        }
                    }
                }
            }
        }
    }

    info!("Client loop terminated");
}

/// Drive one open connection until it closes, faults, expires, or shutdown.
///
/// Owns every timer bound to this connection generation: the watchdog
/// deadline and the keepalive interval both live on this stack frame and
/// cannot fire once it returns.
async fn drive_connection<T>(
    config: &UpstreamClientConfig,
    transport: T,
    mut outbound_rx: mpsc::Receiver<OutboundEnvelope>,
    command_rx: &mut mpsc::Receiver<UpstreamCommand>,
    event_tx: &mpsc::Sender<UpstreamEvent>,
    state: &Arc<RwLock<ClientState>>,
) -> DriverExit
where
    T: Stream<Item = std::result::Result<WsMessage, WsError>>
        + Sink<WsMessage, Error = WsError>
        + Unpin,
{
    let (mut write, mut read) = transport.split();

    // Connectivity probe, once per open
    if let Some(ref hello) = config.hello_message {
        let envelope =
            OutboundEnvelope::send_message(serde_json::Value::String(hello.clone()));
        match envelope.to_json() {
            Ok(json) => {
                if let Err(e) = write.send(WsMessage::Text(json)).await {
                    warn!(error = %e, "Failed to send connectivity probe");
                    return DriverExit::Fault(e.to_string());
                }
                debug!("Sent connectivity probe");
            }
            Err(e) => warn!(error = %e, "Failed to encode connectivity probe"),
        }
    }

    // Arm the liveness deadline for this connection
    let mut watchdog = HeartbeatWatchdog::new(config.ping_interval, config.latency_margin);
    watchdog.arm();

    // Outbound keepalive probe timer. When probing is disabled the timer
    // still exists (select! needs a future) but its branch never runs.
    let keepalive_enabled = config.keepalive_interval.is_some();
    let keepalive_period = config
        .keepalive_interval
        .unwrap_or(Duration::from_secs(3600));
    let mut keepalive_timer =
        tokio::time::interval_at(Instant::now() + keepalive_period, keepalive_period);
    keepalive_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Main connection loop
    loop {
        tokio::select! {
            // Liveness deadline
            _ = tokio::time::sleep_until(watchdog.expires_at()) => {
                if watchdog.expire() {
                    warn!(
                        deadline_ms = watchdog.deadline().as_millis() as u64,
                        "No liveness signal within deadline, terminating connection"
                    );
                    // Abrupt termination: drop the transport without a close
                    // handshake.
                    return DriverExit::WatchdogExpired;
                }
            }

            // Keepalive probe tick
            _ = keepalive_timer.tick(), if keepalive_enabled => {
                debug!("Sending keepalive probe");
                if let Err(e) = write.send(WsMessage::Ping(Vec::new())).await {
                    warn!(error = %e, "Failed to send keepalive probe");
                    return DriverExit::Fault(e.to_string());
                }
            }

            // Outbound messages from published handles
            envelope = outbound_rx.recv() => {
                match envelope {
                    Some(envelope) => {
                        let json = match envelope.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode outbound message");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(WsMessage::Text(json)).await {
                            warn!(error = %e, "Failed to forward message upstream");
                            return DriverExit::Fault(e.to_string());
                        }
                        debug!("Forwarded message upstream");
                    }
                    None => {
                        return DriverExit::Fault("Outbound queue closed".to_string());
                    }
                }
            }

            // Inbound frames from the upstream
            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Ping(payload))) => {
                        debug!("Liveness signal received");
                        watchdog.observe_liveness();
                        if let Err(e) = write.send(WsMessage::Pong(payload)).await {
                            warn!(error = %e, "Failed to answer ping");
                            return DriverExit::Fault(e.to_string());
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        // Ignore pong
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        info!(message = %text, "Received message");
                        let _ = event_tx.send(UpstreamEvent::MessageReceived { text }).await;
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        debug!(bytes = data.len(), "Received binary message");
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(frame = ?frame, "Received close frame");
                        watchdog.disarm();
                        return DriverExit::Closed("Remote close".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        watchdog.disarm();
                        return DriverExit::Fault(e.to_string());
                    }
                    None => {
                        info!("Upstream stream ended");
                        watchdog.disarm();
                        return DriverExit::Closed("Stream ended".to_string());
                    }
                }
            }

            // Commands from the application
            cmd = command_rx.recv() => {
                match cmd {
                    Some(UpstreamCommand::Shutdown) => {
                        info!("Shutdown command received");
                        let _ = write.send(WsMessage::Close(None)).await;
                        watchdog.disarm();
                        return DriverExit::Shutdown;
                    }
                    Some(UpstreamCommand::GetState(tx)) => {
                        let _ = tx.send(state.read().connection_state);
                    }
                    None => {
                        info!("Command channel closed");
                        watchdog.disarm();
                        return DriverExit::Shutdown;
                    }
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
