//! [`ConnectionRegistry`] – the set of live outbound write handles for one
//! channel.
//!
//! Each accepted connection gets a writer task that owns the socket's write
//! half exclusively; the registry stores the `mpsc` sender feeding that
//! task. A dead writer task (the peer hung up or a write failed) makes
//! `send` fail, which is how a broadcast detects and prunes a dead peer
//! without ever blocking on it.
//!
//! No two channels ever share a registry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Identifies one accepted peer connection for the lifetime of its reader
/// task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Thread-safe set of outbound write handles, keyed by [`PeerId`].
///
/// `add`, `remove`, and `snapshot` are linearizable with respect to one
/// another; the lock is held only for the map operation itself, never
/// across a write, so a stalled peer cannot stall the registry.
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: Mutex<HashMap<PeerId, UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer's write handle, returning its id.
    pub fn add(&self, sender: UnboundedSender<String>) -> PeerId {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, sender);
        id
    }

    /// Remove a peer. After this returns no subsequent snapshot includes
    /// the peer; an in-flight broadcast that already snapshotted may still
    /// attempt (and tolerate failure of) a write to it.
    pub fn remove(&self, id: PeerId) {
        if self.lock().remove(&id).is_some() {
            debug!(peer = %id, "peer removed from registry");
        }
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Independent copy of the current handle set.
    pub fn snapshot(&self) -> Vec<(PeerId, UnboundedSender<String>)> {
        self.lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect()
    }

    /// Fan a line out to every registered peer except `exclude`.
    ///
    /// Works off a snapshot; each send is independent, so one dead peer
    /// never blocks delivery to the rest. Peers whose handle is dead are
    /// removed after the pass. Returns the number of peers reached.
    pub fn broadcast(&self, line: &str, exclude: Option<PeerId>) -> usize {
        let snapshot = self.snapshot();
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, tx) in snapshot {
            if Some(id) == exclude {
                continue;
            }
            if tx.send(line.to_string()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        for id in dead {
            self.remove(id);
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, UnboundedSender<String>>> {
        // Writer-handle maps hold no invariants worth poisoning over; a
        // panicked holder leaves the map itself consistent.
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn add_snapshot_remove() {
        let registry = ConnectionRegistry::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        let a = registry.add(tx_a);
        let b = registry.add(tx_b);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        registry.remove(a);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, b);
    }

    #[test]
    fn remove_unknown_peer_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.remove(PeerId(42));
        assert!(registry.is_empty());
    }

    #[test]
    fn broadcast_excludes_sender() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.add(tx_a);
        let _b = registry.add(tx_b);

        let delivered = registry.broadcast("LED_ON", Some(a));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), "LED_ON");
    }

    #[test]
    fn broadcast_prunes_dead_peers_and_still_delivers() {
        let registry = ConnectionRegistry::new();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        registry.add(tx_dead);
        registry.add(tx_live);

        // Simulate a peer whose writer task already exited.
        drop(rx_dead);

        let delivered = registry.broadcast("FAN_ON", None);
        assert_eq!(delivered, 1);
        assert_eq!(rx_live.try_recv().unwrap(), "FAN_ON");
        // The dead handle was pruned during the pass.
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn process_originated_broadcast_reaches_everyone() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.add(tx_a);
        registry.add(tx_b);

        let delivered = registry.broadcast("RGB_SET 10 20 30", None);
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.try_recv().unwrap(), "RGB_SET 10 20 30");
        assert_eq!(rx_b.try_recv().unwrap(), "RGB_SET 10 20 30");
    }
}
