//! Broadcast routing with a replay ring.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use uuid::Uuid;

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};

/// Stream handed to subscribers. Notifications lost to lag are skipped.
pub type EventStream = Pin<Box<dyn Stream<Item = EventEnvelope> + Send>>;

struct ReplayRing {
    next_id: EventId,
    entries: VecDeque<EventEnvelope>,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    replay: Arc<Mutex<ReplayRing>>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a bus with a custom replay capacity.
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        let capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            replay: Arc::new(Mutex::new(ReplayRing {
                next_id: 1,
                entries: VecDeque::with_capacity(capacity),
            })),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Subscribe to new events. When `last_event_id` is given, buffered events
    /// newer than it are delivered first.
    #[must_use]
    pub fn subscribe(&self, last_event_id: Option<EventId>) -> EventStream {
        let replay = self.lock_replay();
        let rx = self.sender.subscribe();
        let backlog = last_event_id
            .map_or_else(Vec::new, |last| collect_after(&replay.entries, last));
        drop(replay);
        let replayed_up_to = backlog.last().map_or(0, |env| env.id);
        let live = BroadcastStream::new(rx).filter_map(move |item| {
            item.ok().filter(|envelope| envelope.id > replayed_up_to)
        });
        Box::pin(tokio_stream::iter(backlog).chain(live))
    }

    /// Subscribe to the events of a single job.
    #[must_use]
    pub fn subscribe_job(&self, job_id: Uuid) -> EventStream {
        Box::pin(
            self.subscribe(None)
                .filter(move |envelope| envelope.event.job_id() == Some(job_id)),
        )
    }

    /// Publish an event and return its identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let mut replay = self.lock_replay();
        let id = replay.next_id;
        replay.next_id = id.saturating_add(1);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        if replay.entries.len() == self.replay_capacity {
            let _ = replay.entries.pop_front();
        }
        replay.entries.push_back(envelope.clone());
        drop(replay);
        let _ = self.sender.send(envelope);
        id
    }

    /// Last event id held in the replay ring.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_replay().entries.back().map(|env| env.id)
    }

    /// Buffered events emitted after `id`.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        collect_after(&self.lock_replay().entries, id)
    }

    fn lock_replay(&self) -> MutexGuard<'_, ReplayRing> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_after(entries: &VecDeque<EventEnvelope>, id: EventId) -> Vec<EventEnvelope> {
    entries.iter().filter(|env| env.id > id).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled(job_id: Uuid) -> Event {
        Event::JobCancelled { job_id }
    }

    #[tokio::test]
    async fn publish_and_replay_from_id() {
        let bus = EventBus::with_capacity(4);
        let first = bus.publish(Event::HealthChanged { degraded: vec![] });
        let second = bus.publish(Event::HealthChanged {
            degraded: vec!["servicing".into()],
        });

        assert_eq!(bus.last_event_id(), Some(second));
        let backlog = bus.backlog_since(first);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, second);
    }

    #[tokio::test]
    async fn replay_ring_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        for _ in 0..3 {
            let _ = bus.publish(cancelled(Uuid::nil()));
        }
        let ids: Vec<EventId> = bus.backlog_since(0).iter().map(|env| env.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn subscribe_with_last_id_receives_backlog() {
        let bus = EventBus::new();
        let first = bus.publish(cancelled(Uuid::nil()));
        let second = bus.publish(cancelled(Uuid::nil()));
        let mut stream = bus.subscribe(Some(first));
        let envelope = stream.next().await.expect("stream item");
        assert_eq!(envelope.id, second);
        let third = bus.publish(cancelled(Uuid::nil()));
        let envelope = stream.next().await.expect("stream item");
        assert_eq!(envelope.id, third);
    }

    #[tokio::test]
    async fn subscribe_job_filters_other_jobs() {
        let bus = EventBus::new();
        let wanted = Uuid::new_v4();
        let mut stream = bus.subscribe_job(wanted);
        let _ = bus.publish(cancelled(Uuid::new_v4()));
        let _ = bus.publish(Event::JobsReconciled { job_ids: vec![] });
        let id = bus.publish(cancelled(wanted));
        let envelope = stream.next().await.expect("stream item");
        assert_eq!(envelope.id, id);
        assert_eq!(envelope.event.job_id(), Some(wanted));
    }
}
