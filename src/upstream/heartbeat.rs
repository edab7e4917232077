//! Heartbeat watchdog
//!
//! The upstream endpoint pings on a fixed interval while it considers the
//! connection healthy. The watchdog arms a single deadline of
//! `ping_interval + latency_margin` and re-arms it on every observed ping;
//! if the deadline passes without a liveness signal the connection is torn
//! down abruptly rather than waiting for a close handshake that may never
//! arrive.
//!
//! One watchdog belongs to exactly one connection generation. The owning
//! driver holds it on its stack, so no deadline can outlive the connection
//! it was armed for.

use std::time::Duration;

use tokio::time::Instant;

/// Sleep horizon used while the watchdog is not armed.
const IDLE_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Watchdog lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// No deadline outstanding
    Unarmed,
    /// Deadline armed, waiting for a liveness signal
    Armed,
    /// Deadline passed; the connection has been condemned
    Expired,
}

/// Deadline timer for remote liveness signals.
#[derive(Debug)]
pub struct HeartbeatWatchdog {
    deadline: Duration,
    state: WatchdogState,
    expires_at: Option<Instant>,
}

impl HeartbeatWatchdog {
    /// Create an unarmed watchdog with deadline `ping_interval + latency_margin`.
    pub fn new(ping_interval: Duration, latency_margin: Duration) -> Self {
        Self {
            deadline: ping_interval + latency_margin,
            state: WatchdogState::Unarmed,
            expires_at: None,
        }
    }

    /// The absolute deadline duration.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Current state.
    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Whether a deadline is outstanding.
    pub fn is_armed(&self) -> bool {
        self.state == WatchdogState::Armed
    }

    /// Start (or restart) the deadline.
    pub fn arm(&mut self) {
        self.state = WatchdogState::Armed;
        self.expires_at = Some(Instant::now() + self.deadline);
    }

    /// A liveness signal was observed: cancel and re-arm the deadline.
    ///
    /// Ignored unless armed: a ping racing a local terminate must not
    /// resurrect an expired watchdog.
    pub fn observe_liveness(&mut self) {
        if self.state == WatchdogState::Armed {
            self.expires_at = Some(Instant::now() + self.deadline);
        }
    }

    /// The instant the deadline fires, or a far-future horizon when idle.
    ///
    /// Shaped for `tokio::time::sleep_until` in a `select!` loop.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
            .unwrap_or_else(|| Instant::now() + IDLE_HORIZON)
    }

    /// Transition to expired. Returns true exactly once per armed deadline,
    /// so the connection is terminated exactly once.
    pub fn expire(&mut self) -> bool {
        if self.state == WatchdogState::Armed {
            self.state = WatchdogState::Expired;
            self.expires_at = None;
            true
        } else {
            false
        }
    }

    /// Cancel the deadline. Idempotent: a local terminate and a remote close
    /// can both reach this.
    pub fn disarm(&mut self) {
        self.state = WatchdogState::Unarmed;
        self.expires_at = None;
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
