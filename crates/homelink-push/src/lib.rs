//! `homelink-push` – WebSocket push layer for remote viewers.
//!
//! Registers as an [`EventBridge`][homelink_bridge::EventBridge] sink per
//! connected client and forwards every envelope as JSON. Upstream messages
//! from clients are control envelopes routed to the command channel or the
//! voice trigger client.

pub mod server;

pub use server::{DEFAULT_PORT, PushServer};
