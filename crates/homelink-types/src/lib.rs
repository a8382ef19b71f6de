//! `homelink-types` – shared data model for the HomeLink hub.
//!
//! Everything that crosses a crate boundary lives here: the channel
//! taxonomy, the structured sensor reading, door-lock states, the
//! [`Event`] envelope routed over the event bridge, and the global
//! [`HubError`] type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The four independent channels the hub exposes.
///
/// Each variant corresponds to one listening TCP endpoint with its own
/// registry and protocol semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Free-form device commands (`LED_ON`, `RGB_SET 10 20 30`, …).
    Command,
    /// `SENSOR KEY=VALUE …` telemetry from the sensor bridge process.
    Sensor,
    /// Door-lock state tokens (`LOCKED`, `UNLOCKED`, alert codes).
    DoorEvent,
    /// Speech-to-text transcriptions from the voice-capture process.
    Voice,
}

impl ChannelKind {
    /// Stable wire tag used in logs and envelopes.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Command => "command",
            ChannelKind::Sensor => "sensor",
            ChannelKind::DoorEvent => "door_event",
            ChannelKind::Voice => "voice",
        }
    }

    /// Whether inbound lines on this channel are relayed to the other
    /// connected peers by default.
    ///
    /// Sensor and voice channels are ingestion-only: a single authoritative
    /// producer feeds them and there is nothing useful to echo back.
    pub fn relays_peers(&self) -> bool {
        match self {
            ChannelKind::Command | ChannelKind::DoorEvent => true,
            ChannelKind::Sensor | ChannelKind::Voice => false,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized telemetry sample.
///
/// Derived per incoming line, never persisted. String fields default to
/// `"---"` and `pir` to `0` when a key is missing or malformed; `raw`
/// carries the original line only when the line could not be parsed at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    pub gas: String,
    pub humidity: String,
    pub dust: String,
    pub pir: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Default for SensorReading {
    fn default() -> Self {
        Self {
            gas: FIELD_DEFAULT.to_string(),
            humidity: FIELD_DEFAULT.to_string(),
            dust: FIELD_DEFAULT.to_string(),
            pir: 0,
            raw: None,
        }
    }
}

/// Placeholder shown for a sensor field that was absent from the packet.
pub const FIELD_DEFAULT: &str = "---";

/// Door-lock state as reported by the door channel.
///
/// Transitions are reported, not validated: the relay is a dumb pipe and
/// accepts any sequence of states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum DoorState {
    Locked,
    Unlocked,
    /// Anything that is neither locked nor unlocked, e.g. `ALERT_FAIL_3`.
    Alert(String),
}

impl DoorState {
    /// Parse a door token. `UNLOCK` is a legacy alias for `UNLOCKED`.
    pub fn parse(token: &str) -> Self {
        match token {
            "LOCKED" => DoorState::Locked,
            "UNLOCKED" | "UNLOCK" => DoorState::Unlocked,
            other => DoorState::Alert(other.to_string()),
        }
    }

    /// Canonical wire token for this state.
    pub fn as_token(&self) -> &str {
        match self {
            DoorState::Locked => "LOCKED",
            DoorState::Unlocked => "UNLOCKED",
            DoorState::Alert(code) => code,
        }
    }
}

impl From<DoorState> for String {
    fn from(state: DoorState) -> String {
        state.as_token().to_string()
    }
}

impl From<String> for DoorState {
    fn from(token: String) -> DoorState {
        DoorState::parse(&token)
    }
}

impl std::fmt::Display for DoorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Unified envelope routed over the event bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Channel the event was observed on.
    pub channel: ChannelKind,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Build a freshly stamped event.
    pub fn new(channel: ChannelKind, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            channel,
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bridge.
///
/// Serializes as the `{type, payload}` envelope the push layer forwards to
/// remote viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    /// A raw command line observed on the command channel.
    Command(String),
    /// A parsed telemetry sample.
    Sensor(SensorReading),
    /// A normalized door-lock transition.
    Door(DoorState),
    /// A speech-to-text transcription line.
    Voice(String),
    /// Connection lifecycle and informational notices.
    Lifecycle { message: String },
}

/// Global error type spanning channel binds, sink delivery, the outbound
/// trigger client, and configuration loading.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("bind failed on {channel} channel: {message}")]
    Bind {
        channel: ChannelKind,
        message: String,
    },

    #[error("trigger send failed: {0}")]
    Trigger(String),

    #[error("sink delivery failed: {0}")]
    Delivery(String),

    #[error("push server error: {0}")]
    Push(String),

    #[error("config error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn door_token_roundtrip() {
        assert_eq!(DoorState::parse("LOCKED"), DoorState::Locked);
        assert_eq!(DoorState::parse("UNLOCKED"), DoorState::Unlocked);
        assert_eq!(
            DoorState::parse("ALERT_FAIL_3"),
            DoorState::Alert("ALERT_FAIL_3".to_string())
        );
        assert_eq!(DoorState::parse("ALERT_FAIL_3").as_token(), "ALERT_FAIL_3");
    }

    #[test]
    fn unlock_alias_normalizes_to_unlocked() {
        let state = DoorState::parse("UNLOCK");
        assert_eq!(state, DoorState::Unlocked);
        assert_eq!(state.as_token(), "UNLOCKED");
    }

    #[test]
    fn door_state_serializes_as_token() {
        let json = serde_json::to_string(&DoorState::Unlocked).unwrap();
        assert_eq!(json, "\"UNLOCKED\"");
        let back: DoorState = serde_json::from_str("\"UNLOCK\"").unwrap();
        assert_eq!(back, DoorState::Unlocked);
    }

    #[test]
    fn event_envelope_carries_type_tag() {
        let event = Event::new(
            ChannelKind::Sensor,
            EventPayload::Sensor(SensorReading {
                gas: "123".to_string(),
                ..SensorReading::default()
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"sensor\""));
        assert!(json.contains("\"gas\":\"123\""));
        // Unset raw fallback must not leak into the envelope.
        assert!(!json.contains("\"raw\""));
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            ChannelKind::DoorEvent,
            EventPayload::Door(DoorState::Locked),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.channel, ChannelKind::DoorEvent);
        assert!(matches!(back.payload, EventPayload::Door(DoorState::Locked)));
    }

    #[test]
    fn relay_defaults_per_channel() {
        assert!(ChannelKind::Command.relays_peers());
        assert!(ChannelKind::DoorEvent.relays_peers());
        assert!(!ChannelKind::Sensor.relays_peers());
        assert!(!ChannelKind::Voice.relays_peers());
    }

    #[test]
    fn hub_error_display() {
        let err = HubError::Bind {
            channel: ChannelKind::Command,
            message: "address in use".to_string(),
        };
        assert!(err.to_string().contains("command"));
        assert!(err.to_string().contains("address in use"));
    }
}
