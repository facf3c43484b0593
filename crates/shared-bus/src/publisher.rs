//! # Event Publisher
//!
//! Defines the publishing side of the event bus.

use crate::events::{Event, EventFilter, EventTopic, KernelEvent};
use crate::subscriber::{EventStream, Subscription, SubscriptionGuard};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Trait for publishing events to the bus.
///
/// Kernel components hold an `Arc<dyn EventPublisher>` so tests can swap
/// in a recording publisher.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event to the bus.
    ///
    /// Never blocks on subscribers. Returns the number of active receivers.
    async fn publish(&self, event: KernelEvent) -> usize;

    /// Get the total number of events published.
    fn events_published(&self) -> u64;
}

/// Subscriber counts keyed by topic.
pub(crate) type TopicCounts = Arc<RwLock<HashMap<EventTopic, usize>>>;

/// In-memory implementation of the event bus.
///
/// Uses `tokio::sync::broadcast` for multi-producer, multi-consumer
/// semantics. A slow subscriber lags and loses events; publishers are never
/// held up.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<Event>,

    /// Active subscription count by topic.
    subscriptions: TopicCounts,

    events_published: AtomicU64,

    /// Events published while nobody was listening.
    events_dropped: AtomicU64,

    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory event bus with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            capacity,
        }
    }

    /// Subscribe to events matching a filter.
    ///
    /// Events published before this call are not delivered.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let receiver = self.sender.subscribe();
        let topics = filter.effective_topics();
        {
            let mut subs = self.subscriptions.write();
            for topic in &topics {
                *subs.entry(*topic).or_insert(0) += 1;
            }
        }

        debug!(topics = ?filter.topics, resources = ?filter.resources, "[bus] subscription created");

        let guard = SubscriptionGuard::new(self.subscriptions.clone(), topics);
        Subscription::new(receiver, filter, guard)
    }

    /// Get a stream of events matching a filter.
    #[must_use]
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        self.subscribe(filter).into_stream()
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Number of subscriptions whose filter includes `topic`.
    #[must_use]
    pub fn subscribers_for(&self, topic: EventTopic) -> usize {
        self.subscriptions.read().get(&topic).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: KernelEvent) -> usize {
        let topic = event.topic();
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(Event::new(event)) {
            Ok(receivers) => {
                trace!(topic = ?topic, receivers, "[bus] event published");
                receivers
            }
            Err(_) => {
                // Fire-and-forget: no receivers is not an error.
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(topic = ?topic, "[bus] event dropped (no receivers)");
                0
            }
        }
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
