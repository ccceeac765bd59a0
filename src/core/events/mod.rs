//! Event Publisher (§4.H): best-effort, fire-and-forget fan-out of state-change events.
//!
//! Built on `tokio::sync::broadcast` rather than a hand-rolled subscriber list: a
//! broadcast channel is bounded, delivers to every live receiver in send order (the
//! per-subject ordering guarantee in §5), and drops the oldest buffered message for a
//! lagging receiver instead of blocking the publisher — exactly the "must not block"
//! contract §4.H asks for. Late subscribers start receiving from the point they
//! subscribed, never replaying history.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Topics a subscriber can listen on (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    SystemStatus,
    EndpointUpdate,
    GroupUpdate,
    UsageUpdate,
    ConfigReloaded,
    Error,
    Notification,
}

impl Topic {
    fn as_str(self) -> &'static str {
        match self {
            Topic::SystemStatus => "system:status",
            Topic::EndpointUpdate => "endpoint:update",
            Topic::GroupUpdate => "group:update",
            Topic::UsageUpdate => "usage:update",
            Topic::ConfigReloaded => "config:reloaded",
            Topic::Error => "error",
            Topic::Notification => "notification",
        }
    }
}

/// A published event: a topic plus a structured JSON payload (§4.H "structured data").
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: Topic,
    pub data: Value,
}

/// Cancellation handle returned by `subscribe`; dropping it, or calling
/// [`Unsubscribe::cancel`], stops delivery to that handler.
pub struct Unsubscribe(tokio::task::JoinHandle<()>);

impl Unsubscribe {
    pub fn cancel(self) {
        self.0.abort();
    }
}

const CHANNEL_CAPACITY: usize = 1024;

/// Fan-out publisher. Cheap to construct; cheap to clone (internally `Arc`-backed).
pub struct EventPublisher {
    sender: broadcast::Sender<Arc<Event>>,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Best-effort: if there are no subscribers this is a no-op, and
    /// a slow subscriber never blocks this call.
    pub fn publish(&self, topic: Topic, data: Value) {
        trace!(topic = topic.as_str(), "publishing event");
        // `send` only errors when there are zero receivers, which is an expected,
        // non-exceptional state for a fire-and-forget publisher.
        let _ = self.sender.send(Arc::new(Event { topic, data }));
    }

    /// Subscribe a handler to a topic. The handler runs on its own task so a slow
    /// handler cannot back up the publisher or other subscribers.
    pub fn subscribe<F>(&self, topic: Topic, mut handler: F) -> Unsubscribe
    where
        F: FnMut(Arc<Event>) + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let join = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.topic == topic => handler(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Unsubscribe(join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn subscriber_receives_matching_topic_only() {
        let publisher = EventPublisher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let _sub = publisher.subscribe(Topic::EndpointUpdate, move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        publisher.publish(Topic::GroupUpdate, serde_json::json!({}));
        publisher.publish(Topic::EndpointUpdate, serde_json::json!({"name": "a"}));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let publisher = EventPublisher::new();
        publisher.publish(Topic::SystemStatus, serde_json::json!({"ok": true}));
    }
}
