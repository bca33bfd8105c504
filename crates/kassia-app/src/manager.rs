//! Job submission, lookup, cancellation, and restart reconciliation.
//!
//! # Design
//!
//! - The manager owns the only job cache; the store is a write-through copy.
//! - Requests are validated into a [`BuildPlan`] before any job exists.
//! - Each build runs in its own task; a per-mount-point lock keeps two builds off the
//!   same mount directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kassia_config::{BuildConfig, BuildPlan, load_device_config};
use kassia_core::{
    BuildRequest, INTERRUPTED_BY_RESTART, Job, JobFilter, JobId, JobLogEntry, JobPatch,
    JobStatus, JobStore,
};
use kassia_events::{Event, EventBus, EventId, EventStream};
use kassia_servicing::ImageServicer;
use kassia_telemetry::Metrics;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcaster::ProgressBroadcaster;
use crate::error::{AppError, AppResult};
use crate::orchestrator::{BuildOrchestrator, RunOutcome};
use crate::recorder::JobRecorder;
use crate::servicer::InstrumentedServicer;

const COMPONENT: &str = "manager";
const WAIT_POLL: Duration = Duration::from_millis(250);

/// Settings the manager needs beyond its injected collaborators.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Build configuration used to resolve every request.
    pub config: BuildConfig,
    /// Log entries attached to progress snapshots.
    pub log_tail: usize,
    /// Pending progress notices kept before the oldest is dropped.
    pub notice_capacity: usize,
}

impl From<BuildConfig> for ManagerSettings {
    fn from(config: BuildConfig) -> Self {
        Self {
            log_tail: config.log_tail,
            notice_capacity: config.broadcast_capacity,
            config,
        }
    }
}

struct RunningBuild {
    cancel: CancellationToken,
    handle: Option<JoinHandle<RunOutcome>>,
}

struct ManagerInner {
    config: BuildConfig,
    recorder: JobRecorder,
    orchestrator: BuildOrchestrator,
    events: EventBus,
    tasks: Mutex<HashMap<JobId, RunningBuild>>,
    mount_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ManagerInner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<JobId, RunningBuild>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mount_lock(&self, mount_point: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let key = std::fs::canonicalize(mount_point).unwrap_or_else(|_| mount_point.to_path_buf());
        let mut locks = self.mount_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }
}

/// Entry point for everything that creates, observes, or stops builds.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    /// Wire a manager around injected collaborators and start the progress dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        settings: ManagerSettings,
        store: Arc<dyn JobStore>,
        servicer: Arc<dyn ImageServicer>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        let broadcaster = ProgressBroadcaster::new(events.clone(), settings.notice_capacity);
        let recorder = JobRecorder::new(store, broadcaster.clone(), settings.log_tail);
        let servicer: Arc<dyn ImageServicer> =
            Arc::new(InstrumentedServicer::new(servicer, metrics.clone()));
        let orchestrator = BuildOrchestrator::new(servicer, recorder.clone(), metrics);
        let shutdown = CancellationToken::new();
        let dispatcher = broadcaster.spawn_dispatcher(recorder.clone(), shutdown.clone());
        Self {
            inner: Arc::new(ManagerInner {
                config: settings.config,
                recorder,
                orchestrator,
                events,
                tasks: Mutex::new(HashMap::new()),
                mount_locks: Mutex::new(HashMap::new()),
                shutdown,
                dispatcher: Mutex::new(Some(dispatcher)),
            }),
        }
    }

    /// Event bus carrying job events.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Validate `request`, create its job, and start the build.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the device document cannot be loaded or the
    /// request does not resolve to a valid plan. No job is created in that case.
    pub async fn submit(&self, request: BuildRequest) -> AppResult<JobId> {
        let config = &self.inner.config;
        let device = load_device_config(&config.device_config_dir, &request.device)
            .map_err(|source| AppError::config("device_config.load", source))?;
        let plan = BuildPlan::resolve(config, &device, &request)
            .map_err(|source| AppError::config("build_plan.resolve", source))?;

        let job = Job::new(&request);
        let job_id = job.id;
        self.inner.recorder.insert(job).await;
        self.inner.events.publish(Event::JobCreated {
            job_id,
            device: request.device.clone(),
            os_id: request.os_id,
        });
        info!(job_id = %job_id, device = %request.device, os_id = request.os_id, "build submitted");

        let cancel = CancellationToken::new();
        let lock = self.inner.mount_lock(&plan.mount.mount_point);
        let mut tasks = self.inner.tasks();
        tasks.retain(|_, running| {
            running
                .handle
                .as_ref()
                .is_none_or(|handle| !handle.is_finished())
        });
        let handle = tokio::spawn(run_build(
            Arc::clone(&self.inner),
            job_id,
            plan,
            lock,
            cancel.clone(),
        ));
        tasks.insert(
            job_id,
            RunningBuild {
                cancel,
                handle: Some(handle),
            },
        );
        drop(tasks);
        Ok(job_id)
    }

    /// Current state of a job.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::JobNotFound`] for unknown ids, or a store error.
    pub async fn get(&self, job_id: JobId) -> AppResult<Job> {
        if let Some(job) = self.inner.recorder.cached(job_id).await {
            return Ok(job);
        }
        self.inner
            .recorder
            .store()
            .get(job_id)
            .await
            .map_err(|source| AppError::store("jobs.get", source))?
            .ok_or(AppError::JobNotFound { job_id })
    }

    /// Jobs matching `filter`, newest first. Cached state wins over stored state.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be read.
    pub async fn list(&self, filter: &JobFilter) -> AppResult<Vec<Job>> {
        let unbounded = JobFilter {
            limit: None,
            ..filter.clone()
        };
        let stored = self
            .inner
            .recorder
            .store()
            .list(&unbounded)
            .await
            .map_err(|source| AppError::store("jobs.list", source))?;
        let mut merged: HashMap<JobId, Job> =
            stored.into_iter().map(|job| (job.id, job)).collect();
        for job in self.inner.recorder.cached_jobs().await {
            merged.insert(job.id, job);
        }
        let mut jobs: Vec<Job> = merged
            .into_values()
            .filter(|job| filter.matches(job))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    /// The most recent `limit` log entries of a job, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::JobNotFound`] for unknown ids, or a store error.
    pub async fn logs(&self, job_id: JobId, limit: usize) -> AppResult<Vec<JobLogEntry>> {
        self.get(job_id).await?;
        self.inner
            .recorder
            .store()
            .logs(job_id, limit)
            .await
            .map_err(|source| AppError::store("jobs.logs", source))
    }

    /// Cancel a job that has not finished. Returns `false` when it already had.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::JobNotFound`] for unknown ids, or a store error.
    pub async fn cancel(&self, job_id: JobId) -> AppResult<bool> {
        let job = self.get(job_id).await?;
        if job.is_terminal() {
            return Ok(false);
        }
        let patch = JobPatch::status(JobStatus::Cancelled).with_completed_at(Utc::now());
        let status = match self.inner.recorder.apply(job_id, &patch).await {
            Some(job) => job.status,
            None => {
                self.inner
                    .recorder
                    .store()
                    .update(job_id, &patch)
                    .await
                    .map_err(|source| AppError::store("jobs.cancel", source))?
                    .status
            }
        };
        if status != JobStatus::Cancelled {
            return Ok(false);
        }
        self.inner
            .recorder
            .log(job_id, JobLogEntry::warning(COMPONENT, "cancellation requested"))
            .await;
        if let Some(running) = self.inner.tasks().get(&job_id) {
            running.cancel.cancel();
        }
        self.inner.events.publish(Event::JobCancelled { job_id });
        Ok(true)
    }

    /// Stream of every job event, replaying buffered events newer than `last_event_id`.
    #[must_use]
    pub fn subscribe(&self, last_event_id: Option<EventId>) -> EventStream {
        self.inner.events.subscribe(last_event_id)
    }

    /// Stream of the events of one job.
    #[must_use]
    pub fn subscribe_job(&self, job_id: JobId) -> EventStream {
        self.inner.events.subscribe_job(job_id)
    }

    /// Wait until a job reaches a terminal status and return it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TaskFailed`] when the build task could not be joined, or
    /// [`AppError::JobNotFound`] for unknown ids.
    pub async fn wait(&self, job_id: JobId) -> AppResult<Job> {
        let handle = self
            .inner
            .tasks()
            .get_mut(&job_id)
            .and_then(|running| running.handle.take());
        if let Some(handle) = handle {
            handle.await.map_err(|join| AppError::TaskFailed {
                job_id,
                detail: join.to_string(),
            })?;
            return self.get(job_id).await;
        }

        let mut stream = self.subscribe_job(job_id);
        loop {
            let job = self.get(job_id).await?;
            if job.is_terminal() {
                return Ok(job);
            }
            if let Ok(None) = tokio::time::timeout(WAIT_POLL, stream.next()).await {
                tokio::time::sleep(WAIT_POLL).await;
            }
        }
    }

    /// Fail every job a previous process left unfinished. Returns the reconciled ids.
    ///
    /// Jobs created by this manager are always cached before they reach the store, so
    /// cached jobs are never reconciled.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be read or updated.
    pub async fn recover(&self) -> AppResult<Vec<JobId>> {
        let store = self.inner.recorder.store();
        let jobs = store
            .list(&JobFilter::default())
            .await
            .map_err(|source| AppError::store("jobs.recover", source))?;
        let mut reconciled = Vec::new();
        for job in jobs {
            if job.is_terminal()
                || self.inner.tasks().contains_key(&job.id)
                || self.inner.recorder.cached(job.id).await.is_some()
            {
                continue;
            }
            store
                .update(job.id, &JobPatch::failed(INTERRUPTED_BY_RESTART))
                .await
                .map_err(|source| AppError::store("jobs.recover", source))?;
            if let Err(err) = store
                .append_log(
                    job.id,
                    &JobLogEntry::error(COMPONENT, INTERRUPTED_BY_RESTART),
                )
                .await
            {
                warn!(job_id = %job.id, error = %err, "reconciliation log append failed");
            }
            warn!(job_id = %job.id, status = %job.status, "unfinished job failed at startup");
            reconciled.push(job.id);
        }
        if !reconciled.is_empty() {
            self.inner.events.publish(Event::JobsReconciled {
                job_ids: reconciled.clone(),
            });
        }
        Ok(reconciled)
    }

    /// Remove finished jobs created before `cutoff` from the store and the cache.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot prune.
    pub async fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let removed = self
            .inner
            .recorder
            .store()
            .prune_finished_before(cutoff)
            .await
            .map_err(|source| AppError::store("jobs.prune", source))?;
        let evicted = self
            .inner
            .recorder
            .evict(|job| job.is_terminal() && job.created_at < cutoff)
            .await;
        info!(removed, evicted, cutoff = %cutoff, "finished jobs pruned");
        Ok(removed)
    }

    /// Stop the progress dispatcher after it publishes what is still queued.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let dispatcher = self
            .inner
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatcher) = dispatcher {
            if let Err(err) = dispatcher.await {
                warn!(error = %err, "progress dispatcher did not stop cleanly");
            }
        }
    }
}

async fn run_build(
    inner: Arc<ManagerInner>,
    job_id: JobId,
    plan: BuildPlan,
    lock: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
) -> RunOutcome {
    let guard = tokio::select! {
        guard = lock.lock_owned() => guard,
        () = cancel.cancelled() => {
            inner.tasks().remove(&job_id);
            return RunOutcome::ended(JobStatus::Cancelled);
        }
    };

    let worker = tokio::spawn({
        let orchestrator = inner.orchestrator.clone();
        let plan = plan.clone();
        let cancel = cancel.clone();
        async move { orchestrator.run(job_id, plan, cancel).await }
    });
    let outcome = match worker.await {
        Ok(outcome) => outcome,
        Err(join) => {
            inner
                .orchestrator
                .release_after_panic(job_id, &plan, &join.to_string())
                .await;
            let status = inner
                .recorder
                .cached(job_id)
                .await
                .map_or(JobStatus::Failed, |job| job.status);
            RunOutcome::ended(status)
        }
    };
    drop(guard);
    inner.tasks().remove(&job_id);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::Result;
    use kassia_data::MemoryJobStore;
    use kassia_test_support::{CatalogFixture, ScriptedServicer};

    #[tokio::test]
    async fn recover_leaves_jobs_created_by_this_manager() -> Result<()> {
        let fixture = CatalogFixture::new()?;
        let store = Arc::new(MemoryJobStore::new());
        let manager = JobManager::new(
            ManagerSettings::from(fixture.config().clone()),
            store.clone(),
            Arc::new(ScriptedServicer::new()),
            EventBus::new(),
            Metrics::new()?,
        );
        let job = Job::new(&BuildRequest::new("X1", 10));
        manager.inner.recorder.insert(job.clone()).await;

        let reconciled = manager.recover().await?;

        assert!(reconciled.is_empty());
        assert_eq!(manager.get(job.id).await?.status, JobStatus::Created);
        assert_eq!(
            store.get(job.id).await?.map(|stored| stored.status),
            Some(JobStatus::Created)
        );
        manager.shutdown().await;
        Ok(())
    }
}
