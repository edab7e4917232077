//! Local HTTP relay surface
//!
//! Accepts payloads over HTTP and forwards them over the live upstream
//! connection obtained from the handle publisher.

mod server;

pub use server::*;
