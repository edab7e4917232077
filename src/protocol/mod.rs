//! Protocol module for upstream communication
//!
//! Defines the outbound message envelope and serialization for the
//! relay-upstream wire format: UTF-8 JSON over WebSocket text frames.

mod messages;

pub use messages::*;
