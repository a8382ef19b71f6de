//! [`TriggerClient`] – fire-and-forget client for the voice-capture
//! process.
//!
//! Intentionally the simplest component in the crate: each call opens a
//! fresh connection, writes a single control word, and closes. No response
//! is read, no connection is reused, no retry on failure.

use homelink_types::HubError;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Control word that starts voice capture.
pub const START_RECORDING: &str = "START_RECORDING";
/// Control word that stops voice capture.
pub const STOP_RECORDING: &str = "STOP_RECORDING";

/// Short-lived outbound client for a fixed external address.
#[derive(Debug, Clone)]
pub struct TriggerClient {
    addr: String,
}

impl TriggerClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Address this client dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one line and close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Trigger`] when the connect or write fails; the
    /// caller decides whether to surface it (there is no retry here).
    pub async fn trigger(&self, word: &str) -> Result<(), HubError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| HubError::Trigger(format!("connect {}: {e}", self.addr)))?;
        stream
            .write_all(word.as_bytes())
            .await
            .map_err(|e| HubError::Trigger(format!("write: {e}")))?;
        stream
            .write_all(b"\n")
            .await
            .map_err(|e| HubError::Trigger(format!("write: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| HubError::Trigger(format!("shutdown: {e}")))?;
        debug!(addr = %self.addr, word, "trigger sent");
        Ok(())
    }

    /// Convenience: send [`START_RECORDING`].
    pub async fn start_recording(&self) -> Result<(), HubError> {
        self.trigger(START_RECORDING).await
    }

    /// Convenience: send [`STOP_RECORDING`].
    pub async fn stop_recording(&self) -> Result<(), HubError> {
        self.trigger(STOP_RECORDING).await
    }
}
