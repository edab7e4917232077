//! Upstream connection module
//!
//! Owns the single persistent WebSocket connection, including:
//! - Connection establishment with bounded fixed-delay retry
//! - Heartbeat watchdog over remote liveness signals
//! - Outbound keepalive probing
//! - Publishing the live connection handle to local producers

mod client;
mod handle;
mod heartbeat;
mod retry;

pub use client::*;
pub use handle::*;
pub use heartbeat::*;
pub use retry::*;
