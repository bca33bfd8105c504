//! Progress notices with a bounded drop-oldest queue.
//!
//! Producers push a job id and return immediately. A single dispatcher task drains the
//! queue, loads the current snapshot (job plus log tail), and publishes it on the
//! [`EventBus`]. Pending notices for the same job coalesce, since the dispatcher always
//! reads the latest state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kassia_core::JobId;
use kassia_events::{Event, EventBus};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::recorder::JobRecorder;

/// Default number of pending notices kept before the oldest is dropped.
pub const DEFAULT_NOTICE_CAPACITY: usize = 64;

struct NoticeQueue {
    pending: Mutex<VecDeque<JobId>>,
    capacity: usize,
    ready: Notify,
    dropped: AtomicU64,
}

impl NoticeQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<JobId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle shared by every producer of job progress.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    queue: Arc<NoticeQueue>,
    events: EventBus,
}

impl ProgressBroadcaster {
    /// Broadcaster publishing on `events` with room for `capacity` pending notices.
    #[must_use]
    pub fn new(events: EventBus, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Arc::new(NoticeQueue {
                pending: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                ready: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
            events,
        }
    }

    /// Event bus snapshots are published on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Queue a snapshot for `job_id`. Never blocks.
    pub fn notify(&self, job_id: JobId) {
        let mut pending = self.queue.lock();
        if pending.contains(&job_id) {
            return;
        }
        if pending.len() == self.queue.capacity {
            pending.pop_front();
            self.queue.dropped.fetch_add(1, Ordering::Relaxed);
        }
        pending.push_back(job_id);
        drop(pending);
        self.queue.ready.notify_one();
    }

    /// Notices waiting for the dispatcher.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Notices discarded because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    fn pop(&self) -> Option<JobId> {
        self.queue.lock().pop_front()
    }

    /// Publish the snapshot for one queued notice. Returns `false` when the queue is empty.
    pub async fn dispatch_one(&self, recorder: &JobRecorder) -> bool {
        let Some(job_id) = self.pop() else {
            return false;
        };
        if let Some(snapshot) = recorder.snapshot(job_id).await {
            self.events.publish(Event::JobSnapshot {
                job_id,
                snapshot: Box::new(snapshot),
            });
        }
        true
    }

    /// Spawn the dispatcher. It drains what is left and exits once `shutdown` fires.
    #[must_use]
    pub fn spawn_dispatcher(
        &self,
        recorder: JobRecorder,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            loop {
                if broadcaster.dispatch_one(&recorder).await {
                    continue;
                }
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = broadcaster.queue.ready.notified() => {}
                }
            }
            while broadcaster.dispatch_one(&recorder).await {}
            debug!("progress dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn full_queue_drops_oldest() {
        let broadcaster = ProgressBroadcaster::new(EventBus::new(), 2);
        let ids: Vec<JobId> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            broadcaster.notify(*id);
        }
        assert_eq!(broadcaster.pending(), 2);
        assert_eq!(broadcaster.dropped(), 1);
        assert_eq!(broadcaster.pop(), Some(ids[1]));
        assert_eq!(broadcaster.pop(), Some(ids[2]));
    }

    #[test]
    fn repeated_notices_coalesce() {
        let broadcaster = ProgressBroadcaster::new(EventBus::new(), 4);
        let id = Uuid::new_v4();
        broadcaster.notify(id);
        broadcaster.notify(id);
        assert_eq!(broadcaster.pending(), 1);
        assert_eq!(broadcaster.dropped(), 0);
    }
}
