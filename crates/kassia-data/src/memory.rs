//! Process-local [`JobStore`] used by tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kassia_core::{Job, JobFilter, JobId, JobLogEntry, JobPatch, JobStore, StoreError, StoreResult};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<JobId, Job>,
    logs: HashMap<JobId, Vec<JobLogEntry>>,
}

/// Job store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    tables: RwLock<Tables>,
}

impl MemoryJobStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate { job_id: job.id });
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, id: JobId, patch: &JobPatch) -> StoreResult<Job> {
        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::NotFound { job_id: id })?;
        if !job.is_terminal() {
            job.apply(patch);
        }
        Ok(job.clone())
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<Job> = tables
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn append_log(&self, id: JobId, entry: &JobLogEntry) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.jobs.contains_key(&id) {
            return Err(StoreError::NotFound { job_id: id });
        }
        tables.logs.entry(id).or_default().push(entry.clone());
        Ok(())
    }

    async fn logs(&self, id: JobId, limit: usize) -> StoreResult<Vec<JobLogEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.logs.get(&id).map_or_else(Vec::new, |entries| {
            entries[entries.len().saturating_sub(limit)..].to_vec()
        }))
    }

    async fn delete(&self, id: JobId) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        tables.logs.remove(&id);
        Ok(tables.jobs.remove(&id).is_some())
    }

    async fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let doomed: Vec<JobId> = tables
            .jobs
            .values()
            .filter(|job| job.is_terminal() && job.created_at < cutoff)
            .map(|job| job.id)
            .collect();
        for id in &doomed {
            tables.jobs.remove(id);
            tables.logs.remove(id);
        }
        Ok(u64::try_from(doomed.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassia_core::BuildRequest;

    #[tokio::test]
    async fn log_tail_keeps_the_newest_entries() -> anyhow::Result<()> {
        let store = MemoryJobStore::new();
        let job = Job::new(&BuildRequest::new("X1", 10));
        store.create(&job).await?;
        for index in 0..5 {
            store
                .append_log(job.id, &JobLogEntry::info("test", format!("line {index}")))
                .await?;
        }
        let tail: Vec<String> = store
            .logs(job.id, 2)
            .await?
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert_eq!(tail, vec!["line 3", "line 4"]);
        Ok(())
    }
}
