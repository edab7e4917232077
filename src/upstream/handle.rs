//! Connection handle publishing
//!
//! The lifecycle manager owns the connection; everyone else goes through the
//! [`HandlePublisher`]. The publisher holds the handle for the *current*
//! connection generation only: it is populated on every successful open and
//! cleared on every close, so a caller either gets a handle that is safe to
//! send on right now, or an explicit `None` during a reconnection gap.
//!
//! Handles are tagged with a generation id and must be re-fetched for every
//! send: a handle captured before a reconnect belongs to a dead generation
//! and its sends fail.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::OutboundEnvelope;

// ─────────────────────────────────────────────────────────────────
// Connection Handle
// ─────────────────────────────────────────────────────────────────

/// Send-capable reference to one connection generation.
///
/// Cheap to clone; all clones feed the same connection's outbound queue.
/// Once that connection closes, every clone's `send` fails.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    generation: Uuid,
    outbound: mpsc::Sender<OutboundEnvelope>,
}

impl ConnectionHandle {
    /// Create a handle for a connection generation.
    pub fn new(generation: Uuid, outbound: mpsc::Sender<OutboundEnvelope>) -> Self {
        Self { generation, outbound }
    }

    /// The generation this handle belongs to.
    pub fn generation(&self) -> Uuid {
        self.generation
    }

    /// Hand an envelope to the transport, fire-and-forget.
    ///
    /// Success means queued for the connection's writer, not delivered.
    pub async fn send(&self, envelope: OutboundEnvelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Whether the owning connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

// ─────────────────────────────────────────────────────────────────
// Handle Publisher
// ─────────────────────────────────────────────────────────────────

/// Mutable "current connection" cell.
#[derive(Debug, Default)]
pub struct HandlePublisher {
    current: RwLock<Option<ConnectionHandle>>,
}

impl HandlePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared publisher for handing to consumers.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Install the handle for a freshly opened connection.
    pub fn publish(&self, handle: ConnectionHandle) {
        *self.current.write() = Some(handle);
    }

    /// Remove the handle for a closed generation.
    ///
    /// Generation-checked: a late clear from an old connection must not wipe
    /// the handle a newer open has already published.
    pub fn clear(&self, generation: Uuid) {
        let mut current = self.current.write();
        if current
            .as_ref()
            .map(|h| h.generation() == generation)
            .unwrap_or(false)
        {
            *current = None;
        }
    }

    /// The current live handle, if any.
    ///
    /// Returns `None` during a reconnection gap, and never returns a handle
    /// whose connection has already gone away.
    pub fn current(&self) -> Option<ConnectionHandle> {
        self.current
            .read()
            .as_ref()
            .filter(|h| !h.is_closed())
            .cloned()
    }

    /// Whether a live connection is currently published.
    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }
}

// ─────────────────────────────────────────────────────────────────
// Startup Readiness
// ─────────────────────────────────────────────────────────────────

/// One-shot startup outcome.
///
/// Settled exactly once: to `Connected` on the first successful open, or to
/// `Failed` when the retry budget is spent without one. Later reconnect
/// cycles never touch it; callers wanting the live connection use
/// [`HandlePublisher::current`], not this signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStatus {
    /// No connection attempt has concluded yet
    Starting,
    /// The first connection was established
    Connected,
    /// The retry budget was spent without ever connecting
    Failed {
        /// Attempts made before giving up
        attempts: u32,
    },
}

/// Receiver half of the readiness signal.
pub type ReadinessReceiver = watch::Receiver<StartupStatus>;

/// Create the readiness signal pair.
pub fn readiness_channel() -> (watch::Sender<StartupStatus>, ReadinessReceiver) {
    watch::channel(StartupStatus::Starting)
}

/// Settle the readiness signal. Only the first settlement takes effect.
pub fn settle_readiness(tx: &watch::Sender<StartupStatus>, status: StartupStatus) -> bool {
    tx.send_if_modified(|current| {
        if *current == StartupStatus::Starting && status != StartupStatus::Starting {
            *current = status;
            true
        } else {
            false
        }
    })
}

/// Wait until the readiness signal settles.
pub async fn wait_ready(rx: &mut ReadinessReceiver) -> StartupStatus {
    loop {
        let status = *rx.borrow();
        if status != StartupStatus::Starting {
            return status;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without settling: the manager died before the
            // first attempt concluded.
            return StartupStatus::Failed { attempts: 0 };
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
