//! [`PushServer`] – WebSocket bridge between the hub and remote viewers.
//!
//! * Downstream: every connection registers a per-client [`Sink`]; events
//!   published to the bridge after the client connected are serialized to
//!   JSON and pushed out. A closed client makes delivery fail, which
//!   auto-unsubscribes its sink.
//! * Upstream: clients send JSON control envelopes (`command`, `rgb`,
//!   `voice`) that are routed to the command channel or the voice trigger.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use homelink_bridge::{EventBridge, Sink};
use homelink_relay::{ChannelServer, TriggerClient};
use homelink_types::{ChannelKind, Event, EventPayload, HubError};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default TCP port for the push WebSocket server.
pub const DEFAULT_PORT: u16 = 8080;

/// WebSocket server fanning bridge envelopes out to every connected viewer
/// and accepting control messages back.
pub struct PushServer {
    bridge: Arc<EventBridge>,
    command: Arc<ChannelServer>,
    trigger: TriggerClient,
    port: u16,
}

impl PushServer {
    /// Create a server on the [`DEFAULT_PORT`]. `command` is the channel
    /// upstream command envelopes are sent out on.
    pub fn new(bridge: Arc<EventBridge>, command: Arc<ChannelServer>, trigger: TriggerClient) -> Self {
        Self {
            bridge,
            command,
            trigger,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Return the configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Push`] when the listener cannot bind; per-client
    /// failures are isolated to their connection task.
    pub async fn run(self) -> Result<(), HubError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HubError::Push(format!("bind error on {addr}: {e}")))?;

        info!(%addr, "push server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = Arc::clone(&self.bridge);
                    let command = Arc::clone(&self.command);
                    let trigger = self.trigger.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, peer, bridge, command, trigger).await {
                            debug!(%peer, error = %e, "push client error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "push accept error");
                }
            }
        }
    }
}

/// Per-client sink: hands serialized envelopes to the connection task.
struct WsSink {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Sink for WsSink {
    async fn deliver(&self, event: &Event) -> Result<(), HubError> {
        let json = serde_json::to_string(event)
            .map_err(|e| HubError::Delivery(format!("serialize: {e}")))?;
        self.tx
            .send(json)
            .map_err(|_| HubError::Delivery("push client gone".to_string()))
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    bridge: Arc<EventBridge>,
    command: Arc<ChannelServer>,
    trigger: TriggerClient,
) -> Result<(), HubError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| HubError::Push(format!("handshake from {peer}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let sink_id = bridge.subscribe(Arc::new(WsSink { tx })).await;
    info!(%peer, "push client connected");

    loop {
        tokio::select! {
            // Bridge → client.
            envelope = rx.recv() => {
                match envelope {
                    Some(json) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Client → hub.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_control(text.as_str()) {
                            Some(action) => apply_control(action, &command, &trigger, &bridge).await,
                            None => warn!(%peer, "ignoring malformed control message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    bridge.unsubscribe(sink_id).await;
    info!(%peer, "push client disconnected");
    Ok(())
}

/// A decoded upstream control envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlAction {
    /// Send a line out on the command channel.
    Command(String),
    /// Start or stop voice capture via the trigger client.
    Voice(VoiceAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VoiceAction {
    Start,
    Stop,
}

/// Parse an upstream JSON control envelope.
///
/// Recognised shapes:
///
/// | `type` | Effect |
/// |---|---|
/// | `command` | `{"command": "LED_ON"}` → sent verbatim |
/// | `rgb` | `{"r":10,"g":20,"b":30}` → `RGB_SET 10 20 30` |
/// | `voice` | `{"action":"start"\|"stop"}` → trigger client |
///
/// Anything else yields `None`.
pub(crate) fn parse_control(text: &str) -> Option<ControlAction> {
    let json: Value = serde_json::from_str(text).ok()?;
    let kind = json.get("type").and_then(|t| t.as_str())?;

    match kind {
        "command" => {
            let cmd = json.get("command").and_then(|c| c.as_str())?.trim();
            if cmd.is_empty() {
                return None;
            }
            Some(ControlAction::Command(cmd.to_string()))
        }
        "rgb" => {
            let channel = |key| json.get(key).and_then(Value::as_i64).unwrap_or(0);
            Some(ControlAction::Command(format!(
                "RGB_SET {} {} {}",
                channel("r"),
                channel("g"),
                channel("b")
            )))
        }
        "voice" => match json.get("action").and_then(|a| a.as_str()) {
            Some(action) if action.eq_ignore_ascii_case("start") => {
                Some(ControlAction::Voice(VoiceAction::Start))
            }
            Some(action) if action.eq_ignore_ascii_case("stop") => {
                Some(ControlAction::Voice(VoiceAction::Stop))
            }
            _ => None,
        },
        _ => None,
    }
}

async fn apply_control(
    action: ControlAction,
    command: &Arc<ChannelServer>,
    trigger: &TriggerClient,
    bridge: &Arc<EventBridge>,
) {
    match action {
        ControlAction::Command(line) => {
            command.send_command(&line);
        }
        ControlAction::Voice(voice) => {
            let result = match voice {
                VoiceAction::Start => trigger.start_recording().await,
                VoiceAction::Stop => trigger.stop_recording().await,
            };
            if let Err(e) = result {
                warn!(error = %e, "voice trigger failed");
                bridge
                    .publish(
                        ChannelKind::Voice,
                        EventPayload::Lifecycle {
                            message: format!("voice trigger failed: {e}"),
                        },
                    )
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_envelope_parses() {
        let action = parse_control(r#"{"type":"command","command":"LED_ON"}"#).unwrap();
        assert_eq!(action, ControlAction::Command("LED_ON".to_string()));
    }

    #[test]
    fn blank_command_is_rejected() {
        assert_eq!(parse_control(r#"{"type":"command","command":"  "}"#), None);
        assert_eq!(parse_control(r#"{"type":"command"}"#), None);
    }

    #[test]
    fn rgb_envelope_becomes_rgb_set_line() {
        let action = parse_control(r#"{"type":"rgb","r":10,"g":20,"b":30}"#).unwrap();
        assert_eq!(action, ControlAction::Command("RGB_SET 10 20 30".to_string()));
    }

    #[test]
    fn rgb_missing_channels_default_to_zero() {
        let action = parse_control(r#"{"type":"rgb","r":100}"#).unwrap();
        assert_eq!(action, ControlAction::Command("RGB_SET 100 0 0".to_string()));
    }

    #[test]
    fn voice_envelope_parses_both_actions() {
        assert_eq!(
            parse_control(r#"{"type":"voice","action":"start"}"#),
            Some(ControlAction::Voice(VoiceAction::Start))
        );
        assert_eq!(
            parse_control(r#"{"type":"voice","action":"STOP"}"#),
            Some(ControlAction::Voice(VoiceAction::Stop))
        );
        assert_eq!(parse_control(r#"{"type":"voice","action":"pause"}"#), None);
    }

    #[test]
    fn unknown_and_malformed_envelopes_are_ignored() {
        assert_eq!(parse_control(r#"{"type":"subscribe"}"#), None);
        assert_eq!(parse_control("not json at all"), None);
        assert_eq!(parse_control(r#"{"command":"LED_ON"}"#), None);
    }

    #[test]
    fn default_port_and_override() {
        let bridge = Arc::new(EventBridge::new());
        let command = ChannelServer::new(ChannelKind::Command, Arc::clone(&bridge));
        let trigger = TriggerClient::new("127.0.0.1:40191");

        let server = PushServer::new(Arc::clone(&bridge), Arc::clone(&command), trigger.clone());
        assert_eq!(server.port(), DEFAULT_PORT);

        let server = PushServer::new(bridge, command, trigger).with_port(9999);
        assert_eq!(server.port(), 9999);
    }
}
