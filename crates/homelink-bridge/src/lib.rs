//! `homelink-bridge` – the hub's event fan-out point.
//!
//! Channel servers never talk to the push layer directly. They publish
//! [`Event`]s to the [`EventBridge`]; external consumers register a
//! [`Sink`] and receive every event published after they subscribed.
//!
//! The bridge is a pure observer, never a channel of record: it keeps no
//! history, and a sink registered after an event was published never sees
//! it. Delivery is fire-and-forget per sink: a failed delivery
//! unsubscribes that sink and does not affect the others or the publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use homelink_types::{ChannelKind, Event, EventPayload, HubError};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// An external subscriber of normalized events.
///
/// Implementations are owned by whichever collaborator registers them; the
/// bridge holds only a shared reference. `deliver` should fail fast when
/// the underlying consumer is gone so the bridge can prune the sink.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, event: &Event) -> Result<(), HubError>;
}

/// Process-wide event fan-out point.
///
/// Cheap to share behind an [`Arc`]; the sink set is the only state.
pub struct EventBridge {
    sinks: Mutex<Vec<(SinkId, Arc<dyn Sink>)>>,
    next_id: AtomicU64,
}

impl EventBridge {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a sink. Events published from this point on are delivered
    /// to it until it is unsubscribed or a delivery fails.
    pub async fn subscribe(&self, sink: Arc<dyn Sink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks.lock().await.push((id, sink));
        id
    }

    /// Remove a sink. A no-op when the id is unknown (e.g. already pruned
    /// after a failed delivery).
    pub async fn unsubscribe(&self, id: SinkId) {
        self.sinks.lock().await.retain(|(sid, _)| *sid != id);
    }

    /// Number of currently subscribed sinks.
    pub async fn sink_count(&self) -> usize {
        self.sinks.lock().await.len()
    }

    /// Build an [`Event`] and deliver it to every subscribed sink.
    ///
    /// Works off a snapshot of the sink set, so subscribes and unsubscribes
    /// racing with a publish are safe. Sinks whose delivery fails are
    /// unsubscribed after the pass. Returns the number of successful
    /// deliveries; delivery failures never surface to the publisher.
    pub async fn publish(&self, channel: ChannelKind, payload: EventPayload) -> usize {
        let event = Event::new(channel, payload);
        let snapshot: Vec<(SinkId, Arc<dyn Sink>)> = self.sinks.lock().await.clone();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sink) in &snapshot {
            match sink.deliver(&event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "sink delivery failed, unsubscribing");
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            self.sinks
                .lock()
                .await
                .retain(|(sid, _)| !dead.contains(sid));
        }

        debug!(channel = %channel, delivered, "event published");
        delivered
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Records every delivered event; optionally fails each delivery.
    struct RecordingSink {
        seen: Mutex<Vec<Event>>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn deliver(&self, event: &Event) -> Result<(), HubError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HubError::Delivery("sink closed".to_string()));
            }
            self.seen.lock().await.push(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_sink() {
        let bridge = EventBridge::new();
        let a = RecordingSink::new(false);
        let b = RecordingSink::new(false);
        bridge.subscribe(a.clone()).await;
        bridge.subscribe(b.clone()).await;

        let delivered = bridge
            .publish(ChannelKind::Command, EventPayload::Command("LED_ON".into()))
            .await;

        assert_eq!(delivered, 2);
        assert_eq!(a.seen.lock().await.len(), 1);
        assert_eq!(b.seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_sink_is_unsubscribed_and_others_keep_receiving() {
        let bridge = EventBridge::new();
        let bad = RecordingSink::new(true);
        let good = RecordingSink::new(false);
        bridge.subscribe(bad.clone()).await;
        bridge.subscribe(good.clone()).await;

        let first = bridge
            .publish(ChannelKind::Command, EventPayload::Command("FAN_ON".into()))
            .await;
        assert_eq!(first, 1);
        assert_eq!(bridge.sink_count().await, 1);

        let second = bridge
            .publish(ChannelKind::Command, EventPayload::Command("FAN_OFF".into()))
            .await;
        assert_eq!(second, 1);

        // The failing sink was only attempted once.
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
        assert_eq!(good.seen.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn no_history_for_late_subscribers() {
        let bridge = EventBridge::new();
        bridge
            .publish(ChannelKind::Voice, EventPayload::Voice("turn on the light".into()))
            .await;

        let late = RecordingSink::new(false);
        bridge.subscribe(late.clone()).await;
        assert!(late.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bridge = EventBridge::new();
        let sink = RecordingSink::new(false);
        let id = bridge.subscribe(sink.clone()).await;
        bridge.unsubscribe(id).await;

        let delivered = bridge
            .publish(ChannelKind::Command, EventPayload::Command("LED_OFF".into()))
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }
}
