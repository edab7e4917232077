//! HTTP relay server: Axum routes for the local send endpoint.
//!
//! `POST /send` wraps the request payload in the outbound envelope and hands
//! it to the current connection. Success means handed to the transport; there
//! is no delivery confirmation of any kind. The connection handle is fetched
//! from the publisher on every request; a handle cached across requests
//! would go stale on reconnect.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::OutboundEnvelope;
use crate::upstream::HandlePublisher;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Publisher of the live connection handle
    pub publisher: Arc<HandlePublisher>,
    /// When the relay started
    pub start_time: Instant,
}

impl AppState {
    /// Create relay state over a handle publisher.
    pub fn new(publisher: Arc<HandlePublisher>) -> Self {
        Self {
            publisher,
            start_time: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/send", post(send_handler))
        .route("/healthz", get(health_handler))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────
// POST /send
// ─────────────────────────────────────────────────────────────────

/// Request body for `POST /send`
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Opaque payload to forward upstream
    pub data: Value,
}

/// Response body for `POST /send`
#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    /// Whether the payload was handed to the transport
    pub success: bool,

    /// Failure detail, present only on rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /send
async fn send_handler(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> (StatusCode, Json<SendResponse>) {
    let Some(handle) = state.publisher.current() else {
        warn!("Rejected send: not connected to upstream");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SendResponse {
                success: false,
                error: Some("Not connected to upstream".to_string()),
            }),
        );
    };

    let envelope = OutboundEnvelope::send_message(request.data);
    match handle.send(envelope).await {
        Ok(()) => {
            debug!(generation = %handle.generation(), "Message accepted for forwarding");
            (
                StatusCode::OK,
                Json(SendResponse {
                    success: true,
                    error: None,
                }),
            )
        }
        Err(e) => {
            // The connection went away between the fetch and the hand-off.
            warn!(error = %e, "Connection lost before hand-off");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(SendResponse {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// GET /healthz
// ─────────────────────────────────────────────────────────────────

/// Response body for `GET /healthz`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "connected" or "disconnected"
    pub status: String,
    /// Whether a live upstream connection is published
    pub connected: bool,
    /// Seconds since the relay started
    pub uptime_secs: u64,
}

/// GET /healthz
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = state.publisher.is_connected();
    Json(HealthResponse {
        status: if connected { "connected" } else { "disconnected" }.to_string(),
        connected,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
