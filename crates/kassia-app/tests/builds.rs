use std::fs;
use std::sync::Arc;
use std::time::Duration;

use kassia_app::{AppError, JobManager, ManagerSettings};
use kassia_core::{
    BuildRequest, INTERRUPTED_BY_RESTART, Job, JobFilter, JobPatch, JobStatus, JobStore,
};
use kassia_data::MemoryJobStore;
use kassia_events::{Event, EventStream};
use kassia_servicing::{ServicingOperation, ToolOutput};
use kassia_telemetry::Metrics;
use kassia_test_support::{CatalogFixture, ScriptedServicer};
use serde_json::json;
use tokio_stream::StreamExt;

type TestResult<T> = anyhow::Result<T>;

struct Harness {
    fixture: CatalogFixture,
    servicer: Arc<ScriptedServicer>,
    store: Arc<MemoryJobStore>,
    manager: JobManager,
}

impl Harness {
    fn new() -> TestResult<Self> {
        Self::with_servicer(ScriptedServicer::new())
    }

    fn with_servicer(servicer: ScriptedServicer) -> TestResult<Self> {
        let fixture = CatalogFixture::new()?;
        fixture.device("X1", &[10], &[100])?;
        fixture.base_image("w10_base.wim")?;
        fixture.driver(
            "lan",
            &json!({
                "driverName": "LAN",
                "supportedOperatingSystems": [10],
                "supportedDevices": [100]
            }),
            &["lan.inf"],
        )?;
        fixture.update(
            "kb500",
            &json!({
                "updateName": "KB500",
                "supportedOperatingSystems": [10],
                "downloadFileName": "kb500.msu"
            }),
            &["kb500.msu"],
        )?;
        let servicer = Arc::new(servicer);
        let store = Arc::new(MemoryJobStore::new());
        let manager = JobManager::new(
            ManagerSettings::from(fixture.config().clone()),
            store.clone(),
            servicer.clone(),
            kassia_events::EventBus::new(),
            Metrics::new()?,
        );
        Ok(Self {
            fixture,
            servicer,
            store,
            manager,
        })
    }

    async fn build(&self) -> TestResult<Job> {
        let job_id = self.manager.submit(BuildRequest::new("X1", 10)).await?;
        Ok(self.manager.wait(job_id).await?)
    }

    fn leftover_working_copies(&self) -> TestResult<usize> {
        let temp = &self.fixture.config().temp_path;
        if !temp.is_dir() {
            return Ok(0);
        }
        Ok(fs::read_dir(temp)?
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "wim"))
            .count())
    }
}

async fn drain(stream: &mut EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(Some(envelope)) = tokio::time::timeout(Duration::from_millis(200), stream.next()).await {
        events.push(envelope.event);
    }
    events
}

#[tokio::test]
async fn stage_numbers_strictly_increase() -> TestResult<()> {
    let harness = Harness::new()?;
    let mut stream = harness.manager.subscribe(None);
    let job = harness.build().await?;
    harness.manager.shutdown().await;

    let mut stages: Vec<u8> = drain(&mut stream)
        .await
        .into_iter()
        .filter_map(|event| match event {
            Event::JobSnapshot { job_id, snapshot } if job_id == job.id => {
                Some(snapshot.job.stage_number)
            }
            _ => None,
        })
        .collect();
    stages.dedup();
    assert!(!stages.is_empty());
    assert!(stages.windows(2).all(|pair| pair[0] < pair[1]), "{stages:?}");
    assert_eq!(stages.last(), Some(&9));
    Ok(())
}

#[tokio::test]
async fn completed_build_records_report() -> TestResult<()> {
    let harness = Harness::new()?;
    let job = harness.build().await?;

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.progress_percent, 100);
    assert_eq!(job.stage_number, 9);
    assert!(job.completed_at.is_some());

    let report = job
        .results
        .get("build")
        .ok_or_else(|| anyhow::anyhow!("missing build report"))?;
    let image = report["final_image"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing final image"))?;
    assert!(std::path::Path::new(image).is_file());
    assert!(image.contains("10_X1_"));
    assert_eq!(report["drivers"]["total"], 1);
    assert_eq!(report["updates"]["succeeded"], 1);

    let operations = harness.servicer.operations();
    for expected in [
        ServicingOperation::Info,
        ServicingOperation::Mount,
        ServicingOperation::AddDriver,
        ServicingOperation::AddPackage,
        ServicingOperation::Unmount,
        ServicingOperation::Export,
    ] {
        assert!(operations.contains(&expected), "{expected} missing");
    }
    assert_eq!(harness.leftover_working_copies()?, 0);

    let stored = harness.store.get(job.id).await?;
    assert_eq!(stored.map(|job| job.status), Some(JobStatus::Completed));
    Ok(())
}

#[tokio::test]
async fn failed_driver_does_not_fail_the_build() -> TestResult<()> {
    let harness = Harness::new()?;
    harness.servicer.push(
        ServicingOperation::AddDriver,
        ToolOutput::failure(2, "Error: 2 The driver package could not be installed."),
    );
    let job = harness.build().await?;

    assert_eq!(job.status, JobStatus::Completed);
    let report = &job.results["build"];
    assert_eq!(report["drivers"]["failed"], 1);
    assert_eq!(report["updates"]["failed"], 0);
    let logs = harness.manager.logs(job.id, 100).await?;
    assert!(logs.iter().any(|entry| entry.message.starts_with("LAN [")));
    Ok(())
}

#[tokio::test]
async fn mount_failure_fails_the_job_and_removes_the_copy() -> TestResult<()> {
    let harness = Harness::new()?;
    harness
        .servicer
        .push(ServicingOperation::Mount, ToolOutput::failure(5, "Access is denied."));
    let job = harness.build().await?;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap_or_default();
    assert!(error.starts_with("mount failed"), "{error}");
    assert!(!error.contains("; cleanup: "), "{error}");
    assert_eq!(harness.servicer.count(ServicingOperation::Unmount), 1);
    assert_eq!(harness.servicer.count(ServicingOperation::Cleanup), 1);
    assert_eq!(harness.servicer.count(ServicingOperation::Export), 0);
    assert_eq!(harness.leftover_working_copies()?, 0);
    Ok(())
}

#[tokio::test]
async fn commit_failure_discards_the_mount() -> TestResult<()> {
    let harness = Harness::new()?;
    harness
        .servicer
        .push(ServicingOperation::Unmount, ToolOutput::failure(1, "commit failed"));
    let job = harness.build().await?;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap_or_default().starts_with("unmount failed"));
    assert_eq!(harness.servicer.count(ServicingOperation::Unmount), 2);
    assert_eq!(harness.leftover_working_copies()?, 0);
    Ok(())
}

#[tokio::test]
async fn failed_discard_is_appended_to_the_commit_error() -> TestResult<()> {
    let harness = Harness::new()?;
    harness
        .servicer
        .push(ServicingOperation::Unmount, ToolOutput::failure(1, "commit failed"));
    harness
        .servicer
        .push(ServicingOperation::Unmount, ToolOutput::failure(1, "discard failed"));
    let job = harness.build().await?;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap_or_default();
    assert!(error.starts_with("unmount failed"), "{error}");
    assert!(error.contains("commit failed"), "{error}");
    assert!(error.contains("; cleanup: "), "{error}");
    assert!(error.contains("discard failed"), "{error}");
    assert_eq!(harness.leftover_working_copies()?, 0);
    Ok(())
}

#[tokio::test]
async fn unreleased_stale_mount_is_left_in_place() -> TestResult<()> {
    let harness = Harness::new()?;
    let live_file = harness
        .fixture
        .config()
        .mount_point
        .join("Windows/System32/live-image-file.dll");
    if let Some(parent) = live_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&live_file, b"mounted")?;
    harness
        .servicer
        .push(ServicingOperation::Unmount, ToolOutput::failure(1, "image is busy"));
    harness
        .servicer
        .push(ServicingOperation::Cleanup, ToolOutput::failure(1, "cleanup refused"));
    let job = harness.build().await?;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap_or_default();
    assert!(error.starts_with("stale mount at"), "{error}");
    assert!(live_file.is_file());
    assert_eq!(harness.servicer.count(ServicingOperation::Mount), 0);
    assert_eq!(harness.servicer.count(ServicingOperation::Unmount), 1);
    assert_eq!(harness.leftover_working_copies()?, 0);
    Ok(())
}

#[tokio::test]
async fn cancellation_stops_before_export() -> TestResult<()> {
    let harness = Harness::with_servicer(
        ScriptedServicer::new().with_delay(Duration::from_millis(150)),
    )?;
    let job_id = harness.manager.submit(BuildRequest::new("X1", 10)).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(harness.manager.cancel(job_id).await?);
    let job = harness.manager.wait(job_id).await?;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.completed_at.is_some());
    assert_eq!(harness.servicer.count(ServicingOperation::Export), 0);
    assert!(!harness.manager.cancel(job_id).await?);
    Ok(())
}

#[tokio::test]
async fn builds_on_one_mount_point_do_not_overlap() -> TestResult<()> {
    let harness = Harness::with_servicer(
        ScriptedServicer::new().with_delay(Duration::from_millis(5)),
    )?;
    let first = harness.manager.submit(BuildRequest::new("X1", 10)).await?;
    let second = harness.manager.submit(BuildRequest::new("X1", 10)).await?;
    assert_eq!(harness.manager.wait(first).await?.status, JobStatus::Completed);
    assert_eq!(harness.manager.wait(second).await?.status, JobStatus::Completed);

    let mut mounted = false;
    for operation in harness.servicer.operations() {
        match operation {
            ServicingOperation::Mount => {
                assert!(!mounted, "second mount while the first was active");
                mounted = true;
            }
            ServicingOperation::Export => mounted = false,
            _ => {}
        }
    }
    Ok(())
}

#[tokio::test]
async fn unsupported_os_is_rejected_without_a_job() -> TestResult<()> {
    let harness = Harness::new()?;
    let result = harness.manager.submit(BuildRequest::new("X1", 11)).await;

    assert!(matches!(result, Err(AppError::Config { .. })));
    assert!(harness.manager.list(&JobFilter::default()).await?.is_empty());
    assert!(harness.servicer.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn recover_fails_jobs_left_running() -> TestResult<()> {
    let harness = Harness::new()?;
    let mut running = Job::new(&BuildRequest::new("X1", 10));
    running.apply(&JobPatch::status(JobStatus::Running));
    let mut finished = Job::new(&BuildRequest::new("X1", 10));
    finished.apply(&JobPatch::status(JobStatus::Completed));
    harness.store.create(&running).await?;
    harness.store.create(&finished).await?;

    let mut stream = harness.manager.subscribe(None);
    let reconciled = harness.manager.recover().await?;

    assert_eq!(reconciled, vec![running.id]);
    let job = harness.manager.get(running.id).await?;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(INTERRUPTED_BY_RESTART));
    assert_eq!(
        harness.manager.get(finished.id).await?.status,
        JobStatus::Completed
    );
    let events = drain(&mut stream).await;
    assert!(events.iter().any(|event| matches!(
        event,
        Event::JobsReconciled { job_ids } if job_ids == &vec![running.id]
    )));
    Ok(())
}

#[tokio::test]
async fn prune_removes_old_finished_jobs() -> TestResult<()> {
    let harness = Harness::new()?;
    let job = harness.build().await?;

    let removed = harness
        .manager
        .prune_finished_before(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await?;

    assert_eq!(removed, 1);
    assert!(matches!(
        harness.manager.get(job.id).await,
        Err(AppError::JobNotFound { .. })
    ));
    Ok(())
}
