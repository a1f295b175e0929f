//! Event bus implementation
//!
//! This module provides the event bus abstraction and the in-memory
//! implementation used to fan session events out to observers.

use crate::types::Event;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Event bus error types.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Failed to subscribe
    #[error("Failed to subscribe: {0}")]
    SubscribeError(String),

    /// The subscriber fell behind and missed events
    #[error("Subscriber lagged, {0} events dropped")]
    Lagged(u64),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Subscription handle for receiving events.
///
/// Dropping the subscription detaches it from the bus.
pub struct Subscription {
    /// Subscription ID
    pub id: String,
    /// Topic pattern
    pub topic: String,
    receiver: broadcast::Receiver<Event>,
    active: Arc<AtomicUsize>,
}

impl Subscription {
    /// Receive the next event.
    pub async fn recv(&mut self) -> EventBusResult<Event> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::ChannelClosed,
            broadcast::error::RecvError::Lagged(n) => EventBusError::Lagged(n),
        })
    }

    /// Receive an already-published event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain every event published so far.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Detach from the bus.
    pub fn detach(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

/// Event bus trait for publish/subscribe operations.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> EventBusResult<()>;

    /// Subscribe to a topic pattern.
    ///
    /// Topic patterns support wildcards:
    /// - `*` matches any single segment
    /// - `#` matches zero or more segments
    ///
    /// Examples:
    /// - `session.exchange.*` matches `session.exchange.failed`
    /// - `#` matches everything
    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription>;

    /// Get event bus stats.
    async fn stats(&self) -> EventBusStats;
}

/// Event bus statistics.
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    /// Total events published
    pub events_published: u64,
    /// Total events delivered
    pub events_delivered: u64,
    /// Active subscriptions
    pub active_subscriptions: usize,
}

/// In-memory event bus implementation.
///
/// Each distinct topic pattern owns one broadcast channel; subscribers to the
/// same pattern share it.
pub struct MemoryEventBus {
    /// Topic subscribers
    subscribers: RwLock<HashMap<String, broadcast::Sender<Event>>>,
    events_published: AtomicU64,
    events_delivered: AtomicU64,
    active_subscriptions: Arc<AtomicUsize>,
    /// Default channel capacity
    channel_capacity: usize,
}

impl std::fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl MemoryEventBus {
    /// Create a new in-memory event bus.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create with custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            events_published: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
            channel_capacity: capacity.max(1),
        }
    }

    /// Check if a topic matches a pattern.
    pub(crate) fn topic_matches(pattern: &str, topic: &str) -> bool {
        let pattern_parts: Vec<&str> = pattern.split('.').collect();
        let topic_parts: Vec<&str> = topic.split('.').collect();
        Self::segments_match(&pattern_parts, &topic_parts)
    }

    fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
        match pattern.split_first() {
            None => topic.is_empty(),
            Some((&"#", rest)) => {
                if rest.is_empty() {
                    return true;
                }
                (0..=topic.len()).any(|i| Self::segments_match(rest, &topic[i..]))
            }
            Some((&"*", rest)) => !topic.is_empty() && Self::segments_match(rest, &topic[1..]),
            Some((segment, rest)) => {
                topic.first() == Some(segment) && Self::segments_match(rest, &topic[1..])
            }
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) -> EventBusResult<()> {
        let topic = event.topic();
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let mut stale = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (pattern, sender) in subscribers.iter() {
                if !Self::topic_matches(pattern, &topic) {
                    continue;
                }
                match sender.send(event.clone()) {
                    Ok(n) => {
                        self.events_delivered.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Err(_) => stale.push(pattern.clone()),
                }
            }
        }

        // Patterns whose receivers have all been dropped
        if !stale.is_empty() {
            let mut subscribers = self.subscribers.write();
            for pattern in stale {
                if subscribers
                    .get(&pattern)
                    .is_some_and(|s| s.receiver_count() == 0)
                {
                    subscribers.remove(&pattern);
                }
            }
        }

        tracing::trace!(topic = %topic, event_id = %event.id, "event published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription> {
        if topic.is_empty() {
            return Err(EventBusError::SubscribeError(
                "topic pattern must not be empty".to_string(),
            ));
        }

        let id = uuid::Uuid::now_v7().to_string();

        let receiver = {
            let mut subscribers = self.subscribers.write();

            if let Some(sender) = subscribers.get(topic) {
                sender.subscribe()
            } else {
                let (sender, receiver) = broadcast::channel(self.channel_capacity);
                subscribers.insert(topic.to_string(), sender);
                receiver
            }
        };

        self.active_subscriptions.fetch_add(1, Ordering::Relaxed);

        Ok(Subscription {
            id,
            topic: topic.to_string(),
            receiver,
            active: self.active_subscriptions.clone(),
        })
    }

    async fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
