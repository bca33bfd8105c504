//! Cache-first job updates.
//!
//! The in-memory cache is authoritative for the life of the process. Every change is
//! applied to the cache first, then written through to the store; store failures are
//! logged and never surface to the build.

use std::collections::HashMap;
use std::sync::Arc;

use kassia_core::{Job, JobId, JobLogEntry, JobPatch, JobSnapshot, JobStore, LogLevel};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::broadcaster::ProgressBroadcaster;

/// Shared writer for job state and job logs.
#[derive(Clone)]
pub struct JobRecorder {
    cache: Arc<RwLock<HashMap<JobId, Job>>>,
    store: Arc<dyn JobStore>,
    broadcaster: ProgressBroadcaster,
    log_tail: usize,
}

impl JobRecorder {
    /// Recorder writing through to `store` and announcing changes on `broadcaster`.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, broadcaster: ProgressBroadcaster, log_tail: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            store,
            broadcaster,
            log_tail,
        }
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Broadcaster used for change notices.
    #[must_use]
    pub const fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    /// Track a new job and persist it.
    pub async fn insert(&self, job: Job) {
        let job_id = job.id;
        let stored = job.clone();
        self.cache.write().await.insert(job_id, job);
        if let Err(err) = self.store.create(&stored).await {
            warn!(job_id = %job_id, error = %err, "job store create failed; cache remains authoritative");
        }
        self.broadcaster.notify(job_id);
    }

    /// Cached copy of a job.
    pub async fn cached(&self, job_id: JobId) -> Option<Job> {
        self.cache.read().await.get(&job_id).cloned()
    }

    /// Every cached job.
    pub async fn cached_jobs(&self) -> Vec<Job> {
        self.cache.read().await.values().cloned().collect()
    }

    /// Drop cached jobs matching `predicate`. Returns how many were removed.
    pub async fn evict<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job) -> bool,
    {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, job| !predicate(job));
        before - cache.len()
    }

    /// Apply `patch` to a cached job and write it through.
    ///
    /// Terminal jobs are left untouched. Returns the job as it stands afterwards, or `None`
    /// when the job is not cached.
    pub async fn apply(&self, job_id: JobId, patch: &JobPatch) -> Option<Job> {
        let updated = {
            let mut cache = self.cache.write().await;
            let job = cache.get_mut(&job_id)?;
            if job.is_terminal() {
                debug!(job_id = %job_id, status = %job.status, "ignoring update to finished job");
                return Some(job.clone());
            }
            job.apply(patch);
            job.clone()
        };
        if let Err(err) = self.store.update(job_id, patch).await {
            warn!(job_id = %job_id, error = %err, "job store update failed; cache remains authoritative");
        }
        self.broadcaster.notify(job_id);
        Some(updated)
    }

    /// Append a log entry and mirror it to tracing.
    pub async fn log(&self, job_id: JobId, entry: JobLogEntry) {
        let component = entry.component.as_str();
        match entry.level {
            LogLevel::Debug => debug!(job_id = %job_id, component, "{}", entry.message),
            LogLevel::Info => info!(job_id = %job_id, component, "{}", entry.message),
            LogLevel::Warning => warn!(job_id = %job_id, component, "{}", entry.message),
            LogLevel::Error => error!(job_id = %job_id, component, "{}", entry.message),
        }
        if let Err(err) = self.store.append_log(job_id, &entry).await {
            warn!(job_id = %job_id, error = %err, "job log append failed");
        }
        self.broadcaster.notify(job_id);
    }

    /// Current job plus its log tail.
    pub async fn snapshot(&self, job_id: JobId) -> Option<JobSnapshot> {
        let job = match self.cached(job_id).await {
            Some(job) => job,
            None => self.store.get(job_id).await.ok().flatten()?,
        };
        let logs = self
            .store
            .logs(job_id, self.log_tail)
            .await
            .unwrap_or_else(|err| {
                warn!(job_id = %job_id, error = %err, "job log tail unavailable");
                Vec::new()
            });
        Some(JobSnapshot { job, logs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassia_core::{BuildRequest, JobStatus};
    use kassia_data::MemoryJobStore;
    use kassia_events::EventBus;

    fn recorder() -> JobRecorder {
        JobRecorder::new(
            Arc::new(MemoryJobStore::new()),
            ProgressBroadcaster::new(EventBus::new(), 8),
            10,
        )
    }

    #[tokio::test]
    async fn finished_jobs_ignore_further_patches() -> anyhow::Result<()> {
        let recorder = recorder();
        let job = Job::new(&BuildRequest::new("X1", 10));
        let job_id = job.id;
        recorder.insert(job).await;

        recorder
            .apply(job_id, &JobPatch::status(JobStatus::Cancelled))
            .await;
        let after = recorder.apply(job_id, &JobPatch::failed("late failure")).await;

        let after = after.ok_or_else(|| anyhow::anyhow!("job missing"))?;
        assert_eq!(after.status, JobStatus::Cancelled);
        assert!(after.error.is_none());
        let stored = recorder.store().get(job_id).await?;
        assert_eq!(stored.map(|job| job.status), Some(JobStatus::Cancelled));
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_carries_log_tail() -> anyhow::Result<()> {
        let recorder = recorder();
        let job = Job::new(&BuildRequest::new("X1", 10));
        let job_id = job.id;
        recorder.insert(job).await;
        for index in 0..15 {
            recorder
                .log(job_id, JobLogEntry::info("test", format!("entry {index}")))
                .await;
        }
        let snapshot = recorder
            .snapshot(job_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("snapshot missing"))?;
        assert_eq!(snapshot.logs.len(), 10);
        assert_eq!(snapshot.logs[0].message, "entry 5");
        Ok(())
    }
}
