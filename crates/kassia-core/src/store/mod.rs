//! Persistence seam for job snapshots and logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::model::{Job, JobFilter, JobId, JobLogEntry, JobPatch};

/// Durable record of jobs and their logs.
///
/// Stores only persist and return snapshots; every transition is decided by the
/// orchestrator. Implementations must tolerate concurrent callers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    async fn create(&self, job: &Job) -> StoreResult<()>;

    /// Apply a partial update and return the stored record.
    ///
    /// Jobs in a terminal status are returned unchanged.
    async fn update(&self, id: JobId, patch: &JobPatch) -> StoreResult<Job>;

    /// Fetch one job.
    async fn get(&self, id: JobId) -> StoreResult<Option<Job>>;

    /// List jobs newest first.
    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>>;

    /// Append a log entry to an existing job.
    async fn append_log(&self, id: JobId, entry: &JobLogEntry) -> StoreResult<()>;

    /// Return the most recent `limit` entries in chronological order.
    async fn logs(&self, id: JobId, limit: usize) -> StoreResult<Vec<JobLogEntry>>;

    /// Remove a job and its logs. Returns whether a job was removed.
    async fn delete(&self, id: JobId) -> StoreResult<bool>;

    /// Remove terminal jobs created before `cutoff`. Returns the number removed.
    async fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}
