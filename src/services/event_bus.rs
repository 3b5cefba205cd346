//! EventBus service (spec §4.B): in-process publish/subscribe over domain
//! events, backed by a bounded broadcast channel per bus instance.
//!
//! The persisted `Event` row is the canonical audit trail; it is written by
//! the caller *before* `publish` is invoked (spec §8 invariant 5), not by
//! the bus itself, so publish stays a pure in-memory fan-out.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::error::DomainResult;
use crate::domain::models::Event;
use crate::domain::ports::EventRepository;

/// Capacity of the broadcast channel. Once a subscriber falls this many
/// events behind, `tokio::sync::broadcast` drops its oldest buffered events
/// for it rather than blocking the publisher — the backpressure policy
/// spec §4.B requires.
const DEFAULT_BUFFER: usize = 1024;

/// In-process fan-out, backed by the durable `events` table. `publish`
/// writes the row first (spec §8 invariant 5: the persisted event is the
/// audit trail) and only then notifies subscribers, so a reader can never
/// observe a fan-out without a matching row behind it.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    repo: Arc<dyn EventRepository>,
}

impl EventBus {
    pub fn new(buffer: usize, repo: Arc<dyn EventRepository>) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender, repo }
    }

    /// Persists `event`, then publishes it to every live subscriber.
    /// Best-effort on the fan-out side: if there are no subscribers this is
    /// a no-op past persistence, and a subscriber that cannot keep up
    /// silently drops the oldest entries in its own queue rather than
    /// blocking this call.
    pub async fn publish(&self, event: Event) -> DomainResult<()> {
        self.repo.insert(&event).await?;
        // `send` only errors when there are zero receivers, which is a
        // normal and uninteresting state for this bus.
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Returns a subscription. Callers filter by `event_type` prefix
    /// themselves via `EventSubscription::recv_matching`.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct EventSubscription {
    receiver: broadcast::Receiver<Event>,
}

impl EventSubscription {
    /// Receives the next event whose `event_type` starts with `prefix`.
    /// A lagged subscriber logs a warning and resumes from the oldest
    /// event still buffered, matching the drop-oldest policy.
    pub async fn recv_matching(&mut self, prefix: &str) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.matches_prefix(prefix) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber fell behind; dropping oldest events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber fell behind; dropping oldest events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use crate::domain::models::EventType;

    #[derive(Default)]
    struct InMemoryEventRepository {
        events: StdMutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventRepository for InMemoryEventRepository {
        async fn insert(&self, event: &Event) -> DomainResult<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
        async fn list_for_entity(&self, entity_id: Uuid) -> DomainResult<Vec<Event>> {
            Ok(self.events.lock().unwrap().iter().filter(|e| e.entity_id == entity_id).cloned().collect())
        }
        async fn list_recent(&self, limit: u32) -> DomainResult<Vec<Event>> {
            Ok(self.events.lock().unwrap().iter().rev().take(limit as usize).cloned().collect())
        }
    }

    fn sample_event(event_type: EventType) -> Event {
        Event::new(event_type, "task", Uuid::new_v4(), json!({}))
    }

    fn bus() -> (EventBus, Arc<InMemoryEventRepository>) {
        let repo = Arc::new(InMemoryEventRepository::default());
        (EventBus::new(16, repo.clone()), repo)
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let (bus, _repo) = bus();
        let mut sub = bus.subscribe();
        bus.publish(sample_event(EventType::TaskAssigned)).await.unwrap();
        let received = sub.recv().await.expect("event");
        assert_eq!(received.event_type, EventType::TaskAssigned);
    }

    #[tokio::test]
    async fn recv_matching_skips_non_matching_prefixes() {
        let (bus, _repo) = bus();
        let mut sub = bus.subscribe();
        bus.publish(sample_event(EventType::LockAcquired)).await.unwrap();
        bus.publish(sample_event(EventType::AgentQuarantined)).await.unwrap();
        let received = sub.recv_matching("agent.").await.expect("event");
        assert_eq!(received.event_type, EventType::AgentQuarantined);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let (bus, _repo) = bus();
        bus.publish(sample_event(EventType::TaskAssigned)).await.unwrap();
    }

    #[tokio::test]
    async fn publish_persists_the_event_row_before_fan_out() {
        let (bus, repo) = bus();
        bus.publish(sample_event(EventType::TaskAssigned)).await.unwrap();
        assert_eq!(repo.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscriber_count_tracks_active_subscriptions() {
        let (bus, _repo) = bus();
        assert_eq!(bus.subscriber_count(), 0);
        let _sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }
}
