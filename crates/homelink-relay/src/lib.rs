//! `homelink-relay` – the relay/broadcast networking core of the HomeLink
//! hub.
//!
//! # Modules
//!
//! - [`registry`] – thread-safe set of live outbound write handles for one
//!   channel.
//! - [`server`] – generic channel relay server: accept loop, per-connection
//!   reader/writer tasks, listener callbacks, peer fan-out.
//! - [`telemetry`] – infallible `SENSOR KEY=VALUE` line parser.
//! - [`trigger`] – fire-and-forget outbound client for the voice-capture
//!   process.

pub mod registry;
pub mod server;
pub mod telemetry;
pub mod trigger;

pub use registry::{ConnectionRegistry, PeerId};
pub use server::{ChannelServer, ListenerId};
pub use telemetry::parse_reading;
pub use trigger::TriggerClient;
