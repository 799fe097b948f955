//! Event hub: N-subscriber broadcast with bounded per-subscriber queues.
//!
//! A single event loop owns the subscriber set; registration,
//! unregistration, and broadcast all reach it through channels. Delivery
//! to one subscriber preserves broadcast order, but a subscriber whose
//! queue is full simply misses the message — a slow consumer never stalls
//! the hub or its peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const BROADCAST_CAPACITY: usize = 256;
const SUBSCRIBER_CAPACITY: usize = 64;
const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

/// One message on a subscriber queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMessage {
    /// A named event with a serialized payload.
    Event { event: String, data: String },
    /// Liveness sentinel, rendered as a comment on the wire.
    KeepAlive,
}

type Registration = (u64, mpsc::Sender<HubMessage>);

struct Channels {
    broadcast_rx: mpsc::Receiver<HubMessage>,
    register_rx: mpsc::UnboundedReceiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<u64>,
}

/// The fan-out hub. Create once, [`start`](Self::start) once, share via
/// `Arc`.
pub struct EventHub {
    broadcast_tx: mpsc::Sender<HubMessage>,
    register_tx: mpsc::UnboundedSender<Registration>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    next_id: AtomicU64,
    client_count: Arc<AtomicUsize>,
    channels: Mutex<Option<Channels>>,
}

/// A live subscription. Dropping it unregisters from the hub, which
/// closes the queue and lets the reader terminate cleanly.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<HubMessage>,
    unregister_tx: mpsc::UnboundedSender<u64>,
}

impl Subscription {
    /// Receives the next message; `None` once unregistered.
    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for drains in tests and shutdown paths.
    pub fn try_recv(&mut self) -> Option<HubMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.unregister_tx.send(self.id);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Creates a hub. The event loop does not run until [`Self::start`].
    #[must_use]
    pub fn new() -> Self {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CAPACITY);
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();

        Self {
            broadcast_tx,
            register_tx,
            unregister_tx,
            next_id: AtomicU64::new(1),
            client_count: Arc::new(AtomicUsize::new(0)),
            channels: Mutex::new(Some(Channels {
                broadcast_rx,
                register_rx,
                unregister_rx,
            })),
        }
    }

    /// Spawns the event loop. Subsequent calls are no-ops.
    pub fn start(self: &Arc<Self>) {
        let Some(channels) = self.channels.lock().ok().and_then(|mut c| c.take()) else {
            return;
        };
        let count = Arc::clone(&self.client_count);
        tokio::spawn(run_loop(channels, count));
    }

    /// Registers a new subscriber and returns its queue.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let _ = self.register_tx.send((id, tx));
        Subscription {
            id,
            receiver: rx,
            unregister_tx: self.unregister_tx.clone(),
        }
    }

    /// Queues an event for delivery to every subscriber.
    ///
    /// The hub input is bounded; under sustained pressure the message is
    /// dropped here rather than blocking the caller.
    pub fn broadcast(&self, event: impl Into<String>, data: impl Into<String>) {
        let message = HubMessage::Event {
            event: event.into(),
            data: data.into(),
        };
        if self.broadcast_tx.try_send(message).is_err() {
            tracing::warn!("event hub broadcast queue full; dropping message");
        }
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }
}

async fn run_loop(mut channels: Channels, count: Arc<AtomicUsize>) {
    let mut subscribers: HashMap<u64, mpsc::Sender<HubMessage>> = HashMap::new();
    let start = tokio::time::Instant::now() + KEEPALIVE_INTERVAL;
    let mut keepalive = tokio::time::interval_at(start, KEEPALIVE_INTERVAL);

    loop {
        tokio::select! {
            registration = channels.register_rx.recv() => {
                let Some((id, tx)) = registration else { return };
                subscribers.insert(id, tx);
                count.store(subscribers.len(), Ordering::Relaxed);
            }
            unregistered = channels.unregister_rx.recv() => {
                let Some(id) = unregistered else { return };
                subscribers.remove(&id);
                count.store(subscribers.len(), Ordering::Relaxed);
            }
            message = channels.broadcast_rx.recv() => {
                let Some(message) = message else { return };
                for tx in subscribers.values() {
                    // Queue full: drop for this subscriber only.
                    let _ = tx.try_send(message.clone());
                }
            }
            _ = keepalive.tick() => {
                for tx in subscribers.values() {
                    let _ = tx.try_send(HubMessage::KeepAlive);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn event(name: &str, data: &str) -> HubMessage {
        HubMessage::Event {
            event: name.to_string(),
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_in_order() {
        let hub = Arc::new(EventHub::new());
        hub.start();

        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        settle().await;
        assert_eq!(hub.client_count(), 2);

        hub.broadcast("sleeve:add", "one");
        hub.broadcast("sleeve:update", "two");
        settle().await;

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await, Some(event("sleeve:add", "one")));
            assert_eq!(sub.recv().await, Some(event("sleeve:update", "two")));
        }
    }

    #[tokio::test]
    async fn dropping_a_subscription_unregisters() {
        let hub = Arc::new(EventHub::new());
        hub.start();

        let sub = hub.subscribe();
        settle().await;
        assert_eq!(hub.client_count(), 1);

        drop(sub);
        settle().await;
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_loses_messages_without_stalling_peers() {
        let hub = Arc::new(EventHub::new());
        hub.start();

        let mut slow = hub.subscribe();
        settle().await;

        // Overflow the per-subscriber queue without draining.
        for i in 0..SUBSCRIBER_CAPACITY + 10 {
            hub.broadcast("tick", i.to_string());
            tokio::task::yield_now().await;
        }
        settle().await;

        let mut received = 0;
        while slow.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_CAPACITY);

        // A subscriber that drained keeps receiving afterwards.
        hub.broadcast("tick", "after");
        settle().await;
        assert_eq!(slow.recv().await, Some(event("tick", "after")));
    }

    #[tokio::test]
    async fn closed_queue_terminates_reader() {
        let hub = Arc::new(EventHub::new());
        hub.start();

        let mut sub = hub.subscribe();
        settle().await;

        // Simulate server-side unregistration.
        let _ = hub.unregister_tx.send(sub.id);
        settle().await;

        assert_eq!(sub.recv().await, None);
    }
}
