//! Event fan-out to independently buffered subscribers.
//!
//! The read loop publishes connection-state changes and server notifications
//! through an [`EventBus`]. Delivery is best-effort per subscriber: each
//! [`Subscription`] owns a bounded queue and a full queue drops the event for
//! that subscriber only. Publishing never blocks, so a slow consumer cannot
//! stall the read loop or starve other subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde_json::Value;
use tokio::sync::mpsc;

/// Kind of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Device came online (produced by the polling discovery adapter; this
    /// client never emits it but shares the shape).
    Online,
    /// The connection to the device was lost.
    Offline,
    /// Server-originated JSON-RPC notification.
    Notification,
}

/// An event observed on the channel. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub device_id: String,
    pub occurred_at: SystemTime,
    /// Which adapter produced the event; lets downstream consumers treat the
    /// polling and channel sources uniformly.
    pub source: String,
    pub payload: Value,
}

impl Event {
    pub(crate) fn now(
        kind: EventKind,
        device_id: impl Into<String>,
        source: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            device_id: device_id.into(),
            occurred_at: SystemTime::now(),
            source: source.into(),
            payload,
        }
    }
}

/// A subscriber's receive handle.
///
/// Events arrive until the subscription or the client is closed; afterwards
/// [`Subscription::recv`] drains anything already buffered and then yields
/// `None` exactly once.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    closed: Arc<AtomicBool>,
}

impl Subscription {
    /// Receive the next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive, mainly useful in tests and polling loops.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Close the subscription. Idempotent; publishing to a closed
    /// subscription is a no-op.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.rx.close();
    }
}

struct SubscriberSlot {
    tx: mpsc::Sender<Event>,
    closed: Arc<AtomicBool>,
}

/// Registry of live subscribers.
#[derive(Default)]
pub(crate) struct EventBus {
    slots: Mutex<Vec<SubscriberSlot>>,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with the given buffer capacity (minimum 1).
    pub fn subscribe(&self, buffer: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let closed = Arc::new(AtomicBool::new(false));
        self.slots.lock().unwrap().push(SubscriberSlot {
            tx,
            closed: closed.clone(),
        });
        Subscription { rx, closed }
    }

    /// Fan the event out to every live subscriber, dropping it for any whose
    /// queue is full. Never blocks; the lock is held only around the
    /// non-blocking `try_send` calls.
    pub fn publish(&self, event: Event) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|slot| !slot.closed.load(Ordering::Acquire));
        for slot in slots.iter() {
            match slot.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(kind = ?event.kind, "subscriber queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    slot.closed.store(true, Ordering::Release);
                }
            }
        }
    }

    /// Close every live subscription exactly once and refuse further
    /// publishes. Idempotent.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the senders ends each subscriber's stream.
        self.slots.lock().unwrap().clear();
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: i64) -> Event {
        Event::now(EventKind::Notification, "mac:001122334455", "adapter", json!({ "n": n }))
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(4);

        bus.publish(event(1));
        let evt = sub.recv().await.unwrap();
        assert_eq!(evt.kind, EventKind::Notification);
        assert_eq!(evt.payload["n"], 1);
    }

    #[tokio::test]
    async fn full_subscriber_drops_without_blocking_others() {
        let bus = EventBus::new();
        let mut full = bus.subscribe(1);
        let mut roomy = bus.subscribe(8);

        for n in 0..3 {
            bus.publish(event(n));
        }

        // The roomy subscriber sees all three.
        for n in 0..3 {
            assert_eq!(roomy.recv().await.unwrap().payload["n"], n);
        }
        // The full one kept only the first.
        assert_eq!(full.try_recv().unwrap().payload["n"], 0);
        assert!(full.try_recv().is_none());
    }

    #[tokio::test]
    async fn close_all_ends_streams_once() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(4);

        bus.publish(event(1));
        bus.close_all();
        bus.close_all();

        // Buffered event still drains, then the stream ends.
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_after_close_is_noop() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(4);

        bus.close_all();
        bus.publish(event(1));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_subscription_is_pruned() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(4);
        let mut other = bus.subscribe(4);

        sub.close();
        sub.close(); // idempotent
        bus.publish(event(1));

        assert_eq!(other.recv().await.unwrap().payload["n"], 1);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
