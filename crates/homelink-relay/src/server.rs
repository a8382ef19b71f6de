//! [`ChannelServer`] – one listening endpoint speaking the newline-delimited
//! line protocol.
//!
//! Concurrency model: one accept-loop task per channel plus one reader task
//! and one writer task per accepted connection. The reader task is the only
//! reader of its socket; the writer task is the only writer. All reader
//! tasks of a channel share that channel's [`ConnectionRegistry`] and the
//! process-wide [`EventBridge`], nothing else.
//!
//! For each received line the reader trims it, drops it when empty, invokes
//! the local listener callbacks, publishes an event to the bridge, and (on
//! relay-enabled channels) fans the line out to every other registered peer.
//! There is no cooperative cancellation: a channel, once started, runs for
//! process lifetime, and the only teardown path is per-connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use homelink_bridge::EventBridge;
use homelink_types::{ChannelKind, DoorState, EventPayload, HubError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionRegistry, PeerId};
use crate::telemetry::{SENSOR_MARKER, parse_reading};

/// Identifies one registered line listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type LineListener = Box<dyn Fn(&str) + Send + Sync>;

/// One independent relay channel: a listening endpoint, its registry, and
/// its protocol semantics.
///
/// Construct with [`ChannelServer::new`], optionally adjust peer relay with
/// [`ChannelServer::with_relay`], then call [`ChannelServer::start`].
pub struct ChannelServer {
    kind: ChannelKind,
    relay_peers: bool,
    registry: ConnectionRegistry,
    listeners: Mutex<Vec<(ListenerId, LineListener)>>,
    next_listener: AtomicU64,
    bridge: Arc<EventBridge>,
}

impl ChannelServer {
    /// Create a server for `kind` with the kind's default peer-relay
    /// behavior.
    pub fn new(kind: ChannelKind, bridge: Arc<EventBridge>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            relay_peers: kind.relays_peers(),
            registry: ConnectionRegistry::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            bridge,
        })
    }

    /// Override whether inbound lines are relayed to the other peers
    /// (builder-style, before [`ChannelServer::start`]). Listeners
    /// registered so far carry over.
    pub fn with_relay(self: Arc<Self>, relay_peers: bool) -> Arc<Self> {
        // Servers are shared behind an Arc from construction on; rebuild
        // rather than mutate.
        let listeners = std::mem::take(&mut *self.lock_listeners());
        Arc::new(Self {
            kind: self.kind,
            relay_peers,
            registry: ConnectionRegistry::new(),
            listeners: Mutex::new(listeners),
            next_listener: AtomicU64::new(self.next_listener.load(Ordering::Relaxed)),
            bridge: Arc::clone(&self.bridge),
        })
    }

    /// The channel this server speaks for.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Register a callback invoked synchronously on the reader task for
    /// every received, non-empty, trimmed line (normalized on the door
    /// channel). Callbacks run in registration order.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, Box::new(listener)));
        id
    }

    /// Remove a previously registered listener. Unknown ids are a no-op.
    pub fn remove_listener(&self, id: ListenerId) {
        self.lock_listeners().retain(|(lid, _)| *lid != id);
    }

    /// Broadcast a process-originated line to every registered peer (there
    /// is no sender to exclude). Returns the number of peers reached.
    pub fn send_command(&self, line: &str) -> usize {
        let delivered = self.registry.broadcast(line, None);
        debug!(channel = %self.kind, line, delivered, "command sent");
        delivered
    }

    /// Bind the listening endpoint and start the accept loop.
    ///
    /// Returns the bound address (pass port 0 to let the OS pick one). A
    /// bind failure is fatal for this channel and reported once as
    /// [`HubError::Bind`]; no relay for the channel is available until the
    /// process restarts.
    pub async fn start(self: &Arc<Self>, port: u16) -> Result<SocketAddr, HubError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| HubError::Bind {
                channel: self.kind,
                message: e.to_string(),
            })?;
        let addr = listener.local_addr().map_err(|e| HubError::Bind {
            channel: self.kind,
            message: e.to_string(),
        })?;

        info!(channel = %self.kind, %addr, "channel listening");

        let server = Arc::clone(self);
        tokio::spawn(async move {
            server.accept_loop(listener).await;
        });
        Ok(addr)
    }

    /// Unbounded accept loop. Each accepted connection is registered on
    /// this task, before the next accept, so a peer accepted earlier is
    /// never missing from a fan-out triggered by a later one.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let (id, read_half) = self.register_connection(stream, peer);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.handle_connection(id, read_half, peer).await;
                    });
                }
                Err(e) => {
                    // Transient accept errors (e.g. EMFILE) do not take the
                    // channel down.
                    warn!(channel = %self.kind, error = %e, "accept error");
                }
            }
        }
    }

    /// Split the stream, spawn the writer task, and add the peer's write
    /// handle to the registry. Runs on the accept loop, so registration
    /// precedes the next accept; the reader half goes to
    /// [`ChannelServer::handle_connection`].
    fn register_connection(&self, stream: TcpStream, peer: SocketAddr) -> (PeerId, OwnedReadHalf) {
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        // Writer task: sole owner of the write half. Exits when every
        // sender is gone (peer removed from the registry) or a write
        // fails, which in turn makes future registry sends fail.
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        let id = self.registry.add(tx);
        info!(channel = %self.kind, %peer, %id, "peer connected");
        (id, read_half)
    }

    /// Per-connection reader: read lines until EOF or error, then
    /// deregister. A failure here is isolated to this connection.
    async fn handle_connection(
        self: Arc<Self>,
        id: PeerId,
        read_half: OwnedReadHalf,
        peer: SocketAddr,
    ) {
        self.bridge
            .publish(
                self.kind,
                EventPayload::Lifecycle {
                    message: format!("peer connected: {peer}"),
                },
            )
            .await;

        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    self.handle_line(id, line).await;
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(channel = %self.kind, %id, error = %e, "read error");
                    break;
                }
            }
        }

        // Removal from the registry is the only required teardown; the
        // writer task then drains out and closes the transport.
        self.registry.remove(id);
        info!(channel = %self.kind, %peer, %id, "peer disconnected");
        self.bridge
            .publish(
                self.kind,
                EventPayload::Lifecycle {
                    message: format!("peer disconnected: {peer}"),
                },
            )
            .await;
    }

    /// Dispatch one trimmed, non-empty line according to the channel's
    /// protocol semantics.
    async fn handle_line(&self, from: PeerId, line: &str) {
        match self.kind {
            ChannelKind::Command => {
                self.notify_listeners(line);
                self.bridge
                    .publish(self.kind, EventPayload::Command(line.to_string()))
                    .await;
                if self.relay_peers {
                    self.registry.broadcast(line, Some(from));
                }
            }
            ChannelKind::Sensor => {
                // The producer interleaves non-telemetry chatter; only
                // marker lines are meaningful on this channel.
                if !line.starts_with(SENSOR_MARKER) {
                    return;
                }
                self.notify_listeners(line);
                self.bridge
                    .publish(self.kind, EventPayload::Sensor(parse_reading(line)))
                    .await;
                if self.relay_peers {
                    self.registry.broadcast(line, Some(from));
                }
            }
            ChannelKind::DoorEvent => {
                let state = DoorState::parse(line);
                let normalized = state.as_token().to_string();
                self.notify_listeners(&normalized);
                self.bridge
                    .publish(self.kind, EventPayload::Door(state))
                    .await;
                if self.relay_peers {
                    self.registry.broadcast(&normalized, Some(from));
                }
            }
            ChannelKind::Voice => {
                self.notify_listeners(line);
                self.bridge
                    .publish(self.kind, EventPayload::Voice(line.to_string()))
                    .await;
                if self.relay_peers {
                    self.registry.broadcast(line, Some(from));
                }
            }
        }
    }

    fn notify_listeners(&self, line: &str) {
        for (_, listener) in self.lock_listeners().iter() {
            listener(line);
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, LineListener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
