//! Hub configuration – reads `homelink.toml`.
//!
//! Every field has a default matching the reference deployment, so a
//! missing file or a partial file both work.

use std::fs;
use std::path::PathBuf;

use homelink_types::HubError;
use serde::{Deserialize, Serialize};

/// Hub configuration loaded from `homelink.toml` (path overridable via the
/// `HOMELINK_CONFIG` environment variable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Command relay channel port.
    #[serde(default = "default_command_port")]
    pub command_port: u16,

    /// Telemetry ingestion channel port.
    #[serde(default = "default_sensor_port")]
    pub sensor_port: u16,

    /// Voice transcription ingestion channel port.
    #[serde(default = "default_voice_port")]
    pub voice_port: u16,

    /// Door-event relay channel port.
    #[serde(default = "default_door_port")]
    pub door_port: u16,

    /// WebSocket push server port.
    #[serde(default = "default_push_port")]
    pub push_port: u16,

    /// Address of the external voice-capture trigger endpoint.
    #[serde(default = "default_trigger_addr")]
    pub trigger_addr: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_port: default_command_port(),
            sensor_port: default_sensor_port(),
            voice_port: default_voice_port(),
            door_port: default_door_port(),
            push_port: default_push_port(),
            trigger_addr: default_trigger_addr(),
        }
    }
}

fn default_command_port() -> u16 {
    39186
}
fn default_sensor_port() -> u16 {
    39187
}
fn default_voice_port() -> u16 {
    39188
}
fn default_door_port() -> u16 {
    39189
}
fn default_push_port() -> u16 {
    8080
}
fn default_trigger_addr() -> String {
    "127.0.0.1:40191".to_string()
}

/// Path of the config file: `$HOMELINK_CONFIG` or `./homelink.toml`.
pub fn config_path() -> PathBuf {
    std::env::var_os("HOMELINK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("homelink.toml"))
}

/// Load the configuration. Returns `Ok(None)` when the file does not exist
/// (callers fall back to [`HubConfig::default`]).
///
/// # Errors
///
/// Returns [`HubError::Config`] when the file exists but cannot be read or
/// parsed.
pub fn load() -> Result<Option<HubConfig>, HubError> {
    load_from(&config_path())
}

fn load_from(path: &std::path::Path) -> Result<Option<HubConfig>, HubError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)
        .map_err(|e| HubError::Config(format!("read {}: {e}", path.display())))?;
    let config = toml::from_str(&text)
        .map_err(|e| HubError::Config(format!("parse {}: {e}", path.display())))?;
    Ok(Some(config))
}
