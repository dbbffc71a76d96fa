//! The Event Bus (§4.6): single-process publish-subscribe with fan-out.
//! Subscribers are independent and a slow subscriber never delays the
//! publisher — delivery is via bounded per-subscriber queues that drop the
//! oldest entry on overflow, counting drops as they happen.
//!
//! Grounded on `ultrafast-gateway`'s `WebSocketManager` for the overall
//! subscribe/broadcast shape, but deliberately *not* on its use of
//! `tokio::sync::broadcast`: `broadcast::Receiver::recv` reports a lagging
//! subscriber by discarding its *entire* backlog up to the oldest surviving
//! message (`Lagged`), not by dropping individual oldest entries one at a
//! time, which is what this section specifies. A hand-rolled bounded queue
//! behind a `Notify` gives the exact semantics asked for.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use flowforge_runtime::model::LifecycleEvent;
use tokio::sync::Notify;
use uuid::Uuid;

const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct SubscriberQueue {
    inner: tokio::sync::Mutex<VecDeque<LifecycleEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    async fn push(&self, event: LifecycleEvent) {
        let mut queue = self.inner.lock().await;
        if queue.len() == self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }
}

/// A subscriber's handle: pull events in order, one at a time.
pub struct Subscription {
    id: Uuid,
    queue: Arc<SubscriberQueue>,
    bus: Arc<EventBusInner>,
}

impl Subscription {
    /// Waits for and returns the next event. Resolves immediately if one is
    /// already queued.
    pub async fn next(&self) -> LifecycleEvent {
        loop {
            {
                let mut queue = self.queue.inner.lock().await;
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    /// Count of events dropped for this subscriber due to overflow (§4.6).
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.remove(&self.id);
    }
}

struct EventBusInner {
    subscribers: DashMap<Uuid, Arc<SubscriberQueue>>,
    queue_capacity: usize,
    total_dropped: AtomicU64,
}

/// Shared, cloneable handle to the bus. Publishing fans out to every current
/// subscriber without waiting on any of them.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                subscribers: DashMap::new(),
                queue_capacity,
                total_dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let queue = Arc::new(SubscriberQueue::new(self.inner.queue_capacity));
        self.inner.subscribers.insert(id, queue.clone());
        Subscription {
            id,
            queue,
            bus: self.inner.clone(),
        }
    }

    /// Fans `event` out to all current subscribers. Each subscriber's push is
    /// a bounded, non-blocking in-memory operation — no subscriber's slowness
    /// is visible to the publisher.
    pub async fn publish(&self, event: LifecycleEvent) {
        let before: u64 = self
            .inner
            .subscribers
            .iter()
            .map(|entry| entry.value().dropped.load(Ordering::Relaxed))
            .sum();

        for entry in self.inner.subscribers.iter() {
            entry.value().push(event.clone()).await;
        }

        let after: u64 = self
            .inner
            .subscribers
            .iter()
            .map(|entry| entry.value().dropped.load(Ordering::Relaxed))
            .sum();
        if after > before {
            self.inner
                .total_dropped
                .fetch_add(after - before, Ordering::Relaxed);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Cumulative drop count across all subscribers, ever. Surfaced on
    /// `/metrics` (§12).
    pub fn total_dropped(&self) -> u64 {
        self.inner.total_dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowforge_runtime::model::EventKind;
    use serde_json::json;

    fn event(plugin_key: &str) -> LifecycleEvent {
        LifecycleEvent {
            plugin_key: plugin_key.to_string(),
            kind: EventKind::PluginInstalled,
            timestamp: Utc::now(),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn a_subscriber_receives_published_events_in_order() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        bus.publish(event("a")).await;
        bus.publish(event("b")).await;

        assert_eq!(sub.next().await.plugin_key, "a");
        assert_eq!(sub.next().await.plugin_key, "b");
    }

    #[tokio::test]
    async fn a_full_queue_drops_the_oldest_entry_and_counts_it() {
        let bus = EventBus::with_capacity(2);
        let sub = bus.subscribe();
        bus.publish(event("a")).await;
        bus.publish(event("b")).await;
        bus.publish(event("c")).await;

        assert_eq!(sub.dropped_count(), 1);
        assert_eq!(sub.next().await.plugin_key, "b");
        assert_eq!(sub.next().await.plugin_key, "c");
    }

    #[tokio::test]
    async fn dropping_a_subscription_removes_it_from_the_bus() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn a_slow_subscriber_does_not_block_publish_to_others() {
        let bus = EventBus::new();
        let fast = bus.subscribe();
        let _slow = bus.subscribe();
        bus.publish(event("a")).await;
        assert_eq!(fast.next().await.plugin_key, "a");
    }
}
