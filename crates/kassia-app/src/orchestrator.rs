//! Nine-stage build state machine.
//!
//! # Design
//!
//! - One orchestrator run owns one job, one mount point, and one working copy.
//! - Stages run strictly in order; cancellation is observed between stages.
//! - A failing stage triggers an emergency release of the mount and working copy; release
//!   errors are appended to the original message and never replace it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use kassia_assets::{AssetError, AssetKind, CatalogRoots, CatalogScanner, CompatibleAssetSet, resolve};
use kassia_config::BuildPlan;
use kassia_core::{BuildStage, JobId, JobLogEntry, JobPatch, JobStatus};
use kassia_events::Event;
use kassia_integration::{
    IntegrationAggregator, IntegrationError, IntegrationResult, IntegrationSummary,
    IntegrationTarget,
};
use kassia_servicing::{ImageServicer, ServicingError, cleanup_mounts, export, image_info, mount, unmount};
use kassia_telemetry::Metrics;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::recorder::JobRecorder;
use crate::report::{BUILD_RESULT_KEY, BuildReport};

const COMPONENT: &str = "orchestrator";

/// Errors that fail a build stage.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The resolved plan is unusable at run time.
    #[error("invalid build plan")]
    Plan {
        /// Offending field.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The asset catalog could not be scanned.
    #[error("asset catalog unavailable")]
    Assets {
        /// Source catalog error.
        source: AssetError,
    },
    /// No base image matches the requested OS.
    #[error("no base image available")]
    BaseImageMissing {
        /// Requested OS.
        os_id: u32,
        /// Root that was searched.
        root: PathBuf,
    },
    /// A servicing step failed.
    #[error("servicing step failed")]
    Servicing {
        /// Step label.
        step: &'static str,
        /// Source servicing error.
        source: ServicingError,
    },
    /// Integration could not start.
    #[error("integration could not start")]
    Integration {
        /// Source integration error.
        source: IntegrationError,
    },
    /// A previous mount could not be released, so the mount directory was left alone.
    #[error("stale mount could not be released")]
    StaleMount {
        /// Mount directory.
        mount_point: PathBuf,
        /// Failed release steps.
        problems: Vec<String>,
    },
    /// The mounted image lacks its root marker.
    #[error("mount point is not ready")]
    MountNotReady {
        /// Mount directory.
        mount_point: PathBuf,
        /// Expected marker directory name.
        marker: String,
    },
    /// Local file-system work failed.
    #[error("build io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A blocking helper task did not complete.
    #[error("build helper task failed")]
    Join {
        /// Operation identifier.
        operation: &'static str,
        /// Join failure detail.
        detail: String,
    },
    /// The build report could not be encoded.
    #[error("build report encoding failed")]
    Report {
        /// Source serialization error.
        source: serde_json::Error,
    },
}

impl OrchestratorError {
    fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    fn servicing(step: &'static str) -> impl FnOnce(ServicingError) -> Self {
        move |source| Self::Servicing { step, source }
    }

    /// Human-readable message recorded on the failed job.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Plan { field, reason } => format!("invalid build plan: {field} {reason}"),
            Self::Assets { source } => describe_asset_error(source),
            Self::BaseImageMissing { os_id, root } => {
                format!("no base image for os {os_id} under {}", root.display())
            }
            Self::Servicing { step, source } => describe_servicing_error(step, source),
            Self::Integration { source } => source.describe(),
            Self::StaleMount {
                mount_point,
                problems,
            } => format!(
                "stale mount at {} could not be released: {}",
                mount_point.display(),
                problems.join("; ")
            ),
            Self::MountNotReady {
                mount_point,
                marker,
            } => format!(
                "mount point {} has no {marker} directory after mount",
                mount_point.display()
            ),
            Self::Io {
                operation,
                path,
                source,
            } => format!("{operation} failed for {}: {source}", path.display()),
            Self::Join { operation, detail } => format!("{operation} task failed: {detail}"),
            Self::Report { source } => format!("build report encoding failed: {source}"),
        }
    }
}

fn describe_asset_error(error: &AssetError) -> String {
    match error {
        AssetError::Io {
            operation,
            path,
            source,
        } => format!("{operation} failed for {}: {source}", path.display()),
        AssetError::Walk { path, source } => {
            format!("catalog walk failed under {}: {source}", path.display())
        }
        AssetError::Descriptor { path, source } => {
            format!("malformed descriptor {}: {source}", path.display())
        }
        AssetError::InvalidDescriptor {
            path,
            field,
            reason,
        } => format!("invalid descriptor {}: {field} {reason}", path.display()),
    }
}

fn describe_servicing_error(step: &str, error: &ServicingError) -> String {
    match error {
        ServicingError::Spawn { tool, source, .. } => {
            format!("{step} could not start {}: {source}", tool.display())
        }
        ServicingError::Timeout { timeout, .. } => {
            format!("{step} timed out after {}s", timeout.as_secs())
        }
        ServicingError::Failed {
            exit_code, message, ..
        } => format!("{step} failed (exit code {exit_code}): {message}"),
    }
}

/// Final state of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Status the job ended in.
    pub status: JobStatus,
    /// Report of a completed build.
    pub report: Option<BuildReport>,
}

impl RunOutcome {
    /// Outcome without a report.
    #[must_use]
    pub const fn ended(status: JobStatus) -> Self {
        Self {
            status,
            report: None,
        }
    }
}

/// Mutable state threaded through the stages of one run.
struct BuildRun {
    job_id: JobId,
    plan: BuildPlan,
    started_at: DateTime<Utc>,
    clock: Instant,
    base_image: Option<PathBuf>,
    working_copy: Option<PathBuf>,
    mounted: bool,
    drivers: CompatibleAssetSet,
    updates: CompatibleAssetSet,
    driver_summary: Option<IntegrationSummary>,
    update_summary: Option<IntegrationSummary>,
    exported: Option<(PathBuf, u64, String)>,
    report: Option<BuildReport>,
}

impl BuildRun {
    fn new(job_id: JobId, plan: BuildPlan, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            plan,
            started_at,
            clock: Instant::now(),
            base_image: None,
            working_copy: None,
            mounted: false,
            drivers: CompatibleAssetSet::default(),
            updates: CompatibleAssetSet::default(),
            driver_summary: None,
            update_summary: None,
            exported: None,
            report: None,
        }
    }

    fn detail(&self, stage: BuildStage) -> String {
        match stage {
            BuildStage::ConfigurationLoad => format!(
                "Loading configuration for {} (OS {})",
                self.plan.device.device_id, self.plan.os_id
            ),
            BuildStage::AssetDiscovery => "Scanning asset catalog".to_string(),
            BuildStage::WimPreparation => format!(
                "Preparing working copy of {}",
                self.base_image
                    .as_deref()
                    .and_then(Path::file_name)
                    .map_or_else(|| "base image".into(), |name| name.to_string_lossy())
            ),
            BuildStage::WimMount => format!(
                "Mounting image at {}",
                self.plan.mount.mount_point.display()
            ),
            BuildStage::DriverIntegration => format!("Integrating {} drivers", self.drivers.len()),
            BuildStage::UpdateIntegration => format!("Integrating {} updates", self.updates.len()),
            BuildStage::WimExport => "Exporting image".to_string(),
            BuildStage::Cleanup => "Removing temporary files".to_string(),
            BuildStage::Done => "Writing build report".to_string(),
        }
    }

    fn target(&self) -> IntegrationTarget {
        let mut target = IntegrationTarget::new(
            self.plan.mount.mount_point.clone(),
            self.plan.integration.staging_root.clone(),
        );
        target.mount_marker.clone_from(&self.plan.mount.mount_marker);
        target.agent_root.clone_from(&self.plan.discovery.agent_root);
        target.measure_growth = self.plan.integration.measure_update_growth;
        target
    }
}

/// Drives one build through every stage.
#[derive(Clone)]
pub struct BuildOrchestrator {
    servicer: Arc<dyn ImageServicer>,
    aggregator: IntegrationAggregator,
    recorder: JobRecorder,
    metrics: Metrics,
}

impl BuildOrchestrator {
    /// Orchestrator using `servicer` for every image operation.
    #[must_use]
    pub fn new(servicer: Arc<dyn ImageServicer>, recorder: JobRecorder, metrics: Metrics) -> Self {
        let aggregator =
            IntegrationAggregator::new(Arc::clone(&servicer)).with_metrics(metrics.clone());
        Self {
            servicer,
            aggregator,
            recorder,
            metrics,
        }
    }

    /// Run every stage for `job_id`. Always leaves the job in a terminal status.
    pub async fn run(
        &self,
        job_id: JobId,
        plan: BuildPlan,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let started_at = Utc::now();
        self.metrics.job_started();
        let running = JobPatch {
            status: Some(JobStatus::Running),
            started_at: Some(started_at),
            ..JobPatch::default()
        };
        self.recorder.apply(job_id, &running).await;
        self.log(
            job_id,
            JobLogEntry::info(
                COMPONENT,
                format!(
                    "build started for device {} os {}",
                    plan.device.device_id, plan.os_id
                ),
            ),
        )
        .await;

        let mut run = BuildRun::new(job_id, plan, started_at);
        let status = self.drive(&mut run, &cancel).await;
        self.metrics.job_finished();
        self.metrics.inc_job(status.as_str());
        RunOutcome {
            status,
            report: run.report.take(),
        }
    }

    /// Release the mount left by a build whose task died without unwinding its state.
    pub async fn release_after_panic(&self, job_id: JobId, plan: &BuildPlan, detail: &str) {
        let mounted = plan.mount.mount_point.join(&plan.mount.mount_marker).is_dir();
        let problems = release(
            self.servicer.as_ref(),
            &plan.mount.mount_point,
            mounted,
            None,
        )
        .await;
        let mut message = format!("build task panicked: {detail}");
        if !problems.is_empty() {
            message = format!("{message}; cleanup: {}", problems.join("; "));
        }
        self.log(job_id, JobLogEntry::error(COMPONENT, message.clone()))
            .await;
        self.recorder
            .apply(job_id, &JobPatch::failed(message.clone()))
            .await;
        self.recorder
            .broadcaster()
            .events()
            .publish(Event::JobFailed { job_id, message });
        self.metrics.job_finished();
        self.metrics.inc_job(JobStatus::Failed.as_str());
    }

    async fn drive(&self, run: &mut BuildRun, cancel: &CancellationToken) -> JobStatus {
        let job_id = run.job_id;
        for stage in BuildStage::ALL {
            if cancel.is_cancelled() || self.cancelled_elsewhere(job_id).await {
                return self.cancelled(run, stage).await;
            }
            let detail = run.detail(stage);
            self.recorder
                .apply(job_id, &JobPatch::enter_stage(stage, detail.clone()))
                .await;
            self.log(
                job_id,
                JobLogEntry::info(COMPONENT, detail).with_category(stage.as_str()),
            )
            .await;

            let clock = Instant::now();
            let outcome = self.run_stage(stage, run).await;
            self.metrics.observe_stage(stage.as_str(), clock.elapsed());

            match outcome {
                Ok(result) if stage == BuildStage::Done => {
                    return self.complete(run, result).await;
                }
                Ok(result) => {
                    self.recorder
                        .apply(job_id, &JobPatch::complete_stage(stage, result))
                        .await;
                }
                Err(err) => return self.fail(run, stage, &err).await,
            }
        }
        JobStatus::Completed
    }

    async fn run_stage(
        &self,
        stage: BuildStage,
        run: &mut BuildRun,
    ) -> Result<Option<Value>, OrchestratorError> {
        match stage {
            BuildStage::ConfigurationLoad => Self::configuration_load(run).await,
            BuildStage::AssetDiscovery => self.asset_discovery(run).await,
            BuildStage::WimPreparation => self.wim_preparation(run).await,
            BuildStage::WimMount => self.wim_mount(run).await,
            BuildStage::DriverIntegration => self.integrate(run, AssetKind::Driver).await,
            BuildStage::UpdateIntegration => self.integrate(run, AssetKind::Update).await,
            BuildStage::WimExport => self.wim_export(run).await,
            BuildStage::Cleanup => self.cleanup(run).await,
            BuildStage::Done => Self::done(run),
        }
    }

    async fn configuration_load(run: &BuildRun) -> Result<Option<Value>, OrchestratorError> {
        let plan = &run.plan;
        if !plan.device.supports_os(plan.os_id) {
            return Err(OrchestratorError::Plan {
                field: "os_id",
                reason: "unsupported_by_device",
            });
        }
        for (operation, dir) in [
            ("temp_path.create", &plan.preparation.temp_path),
            ("export_path.create", &plan.export.export_path),
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| OrchestratorError::io(operation, dir, source))?;
        }
        Ok(Some(json!({
            "device": plan.device.device_id,
            "os_id": plan.os_id,
            "flags": plan.flags,
            "mount_point": plan.mount.mount_point,
            "temp_path": plan.preparation.temp_path,
            "export_path": plan.export.export_path,
            "staging_root": plan.integration.staging_root,
            "servicing_tool": plan.servicing.tool_path,
        })))
    }

    async fn asset_discovery(&self, run: &mut BuildRun) -> Result<Option<Value>, OrchestratorError> {
        let roots = CatalogRoots::from(&run.plan.discovery);
        let catalog = tokio::task::spawn_blocking(move || CatalogScanner::scan(&roots))
            .await
            .map_err(|join| OrchestratorError::Join {
                operation: "catalog.scan",
                detail: join.to_string(),
            })?
            .map_err(|source| OrchestratorError::Assets { source })?;

        let compatible = resolve(&catalog, &run.plan.device, run.plan.os_id);
        run.drivers = compatible.of_kind(AssetKind::Driver);
        run.updates = compatible.of_kind(AssetKind::Update);

        let base_image = catalog
            .base_image_for(run.plan.os_id, run.plan.discovery.image_override.as_deref())
            .ok_or_else(|| OrchestratorError::BaseImageMissing {
                os_id: run.plan.os_id,
                root: run.plan.discovery.base_image_root.clone(),
            })?;
        run.base_image = Some(base_image.clone());

        self.log(
            run.job_id,
            JobLogEntry::info(
                COMPONENT,
                format!(
                    "{} compatible drivers and {} updates of {} catalog entries; base image {}",
                    run.drivers.len(),
                    run.updates.len(),
                    catalog.assets().len(),
                    base_image.display()
                ),
            )
            .with_category(BuildStage::AssetDiscovery.as_str()),
        )
        .await;

        Ok(Some(json!({
            "catalog_size": catalog.assets().len(),
            "drivers": run.drivers.len(),
            "updates": run.updates.len(),
            "driver_names": run.drivers.names(),
            "update_names": run.updates.names(),
            "base_image": base_image,
        })))
    }

    async fn wim_preparation(&self, run: &mut BuildRun) -> Result<Option<Value>, OrchestratorError> {
        let base_image = run.base_image.clone().ok_or(OrchestratorError::Plan {
            field: "base_image",
            reason: "not_selected",
        })?;
        let copy = run
            .plan
            .preparation
            .working_copy(&run.plan.export.name_prefix, run.started_at);
        run.working_copy = Some(copy.clone());
        let size = tokio::fs::copy(&base_image, &copy)
            .await
            .map_err(|source| OrchestratorError::io("working_copy.copy", &base_image, source))?;

        let info = if run.plan.preparation.skip_validation {
            None
        } else {
            Some(
                image_info(self.servicer.as_ref(), &copy)
                    .await
                    .map_err(OrchestratorError::servicing("image info"))?,
            )
        };
        Ok(Some(json!({
            "working_copy": copy,
            "size_bytes": size,
            "image": info,
        })))
    }

    async fn wim_mount(&self, run: &mut BuildRun) -> Result<Option<Value>, OrchestratorError> {
        let copy = run.working_copy.clone().ok_or(OrchestratorError::Plan {
            field: "working_copy",
            reason: "not_prepared",
        })?;
        let mount_point = run.plan.mount.mount_point.clone();
        self.clear_mount_dir(run, &mount_point).await?;

        if let Err(source) = mount(
            self.servicer.as_ref(),
            &copy,
            run.plan.mount.image_index,
            &mount_point,
        )
        .await
        {
            self.discard_failed_mount(run.job_id, &mount_point).await;
            return Err(OrchestratorError::Servicing {
                step: "mount",
                source,
            });
        }
        run.mounted = true;

        if !mount_point.join(&run.plan.mount.mount_marker).is_dir() {
            return Err(OrchestratorError::MountNotReady {
                mount_point,
                marker: run.plan.mount.mount_marker.clone(),
            });
        }
        Ok(Some(json!({
            "mount_point": mount_point,
            "index": run.plan.mount.image_index,
        })))
    }

    async fn clear_mount_dir(&self, run: &BuildRun, mount_point: &Path) -> Result<(), OrchestratorError> {
        if mount_point.join(&run.plan.mount.mount_marker).is_dir() {
            self.log(
                run.job_id,
                JobLogEntry::warning(COMPONENT, "discarding stale mount")
                    .with_category(BuildStage::WimMount.as_str()),
            )
            .await;
            let mut problems = Vec::new();
            if let Err(err) = unmount(self.servicer.as_ref(), mount_point, false).await {
                problems.push(describe_servicing_error("unmount", &err));
            }
            if let Err(err) = cleanup_mounts(self.servicer.as_ref()).await {
                problems.push(describe_servicing_error("cleanup", &err));
            }
            if !problems.is_empty() {
                return Err(OrchestratorError::StaleMount {
                    mount_point: mount_point.to_path_buf(),
                    problems,
                });
            }
        }
        reset_dir(mount_point)
            .await
            .map_err(|source| OrchestratorError::io("mount_dir.clear", mount_point, source))
    }

    /// Best-effort discard after a mount attempt failed part way.
    async fn discard_failed_mount(&self, job_id: JobId, mount_point: &Path) {
        if let Err(err) = unmount(self.servicer.as_ref(), mount_point, false).await {
            warn!(job_id = %job_id, error = %describe_servicing_error("unmount", &err), "failed mount discard failed");
        }
        if let Err(err) = cleanup_mounts(self.servicer.as_ref()).await {
            warn!(job_id = %job_id, error = %describe_servicing_error("cleanup", &err), "failed mount cleanup failed");
        }
    }

    async fn integrate(
        &self,
        run: &mut BuildRun,
        kind: AssetKind,
    ) -> Result<Option<Value>, OrchestratorError> {
        let (stage, skip, noun) = match kind {
            AssetKind::Driver => (
                BuildStage::DriverIntegration,
                run.plan.integration.skip_drivers,
                "drivers",
            ),
            _ => (
                BuildStage::UpdateIntegration,
                run.plan.integration.skip_updates,
                "updates",
            ),
        };
        let assets = match kind {
            AssetKind::Driver => &run.drivers,
            _ => &run.updates,
        };
        if skip || assets.is_empty() {
            let reason = if skip { "skipped by request" } else { "no compatible assets" };
            self.log(
                run.job_id,
                JobLogEntry::info(COMPONENT, format!("{noun} {reason}")).with_category(stage.as_str()),
            )
            .await;
            return Ok(Some(json!({ "skipped": true, "reason": reason })));
        }

        let job_id = run.job_id;
        let target = run.target();
        let (sender, mut receiver) = mpsc::unbounded_channel::<JobLogEntry>();
        let component = stage.as_str();
        let integrate = self.aggregator.integrate(assets, &target, move |result| {
            let _ = sender.send(result_entry(component, result));
        });
        let drain = async {
            while let Some(entry) = receiver.recv().await {
                self.recorder.log(job_id, entry).await;
            }
        };
        let (report, ()) = tokio::join!(integrate, drain);
        let report = report.map_err(|source| OrchestratorError::Integration { source })?;

        let summary = report.summary;
        let entry = if summary.success() {
            JobLogEntry::info(
                component,
                format!("{} of {} {noun} integrated", summary.succeeded, summary.total),
            )
        } else {
            JobLogEntry::warning(
                component,
                format!("{} of {} {noun} failed", summary.failed, summary.total),
            )
        };
        self.log(job_id, entry).await;
        match kind {
            AssetKind::Driver => run.driver_summary = Some(summary),
            _ => run.update_summary = Some(summary),
        }
        Ok(Some(json!({
            "summary": summary,
            "failures": report.failures(),
            "results": report.results,
        })))
    }

    async fn wim_export(&self, run: &mut BuildRun) -> Result<Option<Value>, OrchestratorError> {
        let copy = run.working_copy.clone().ok_or(OrchestratorError::Plan {
            field: "working_copy",
            reason: "not_prepared",
        })?;
        unmount(self.servicer.as_ref(), &run.plan.mount.mount_point, true)
            .await
            .map_err(OrchestratorError::servicing("unmount"))?;
        run.mounted = false;

        let destination = run.plan.export.destination(run.started_at);
        let name = run.plan.export.image_name(run.started_at);
        export(
            self.servicer.as_ref(),
            &copy,
            run.plan.export.source_index,
            &destination,
            Some(name.clone()),
        )
        .await
        .map_err(OrchestratorError::servicing("export"))?;
        let size = tokio::fs::metadata(&destination)
            .await
            .map_err(|source| OrchestratorError::io("export.stat", &destination, source))?
            .len();

        let result = json!({
            "image_path": destination,
            "size_bytes": size,
            "export_name": name,
        });
        run.exported = Some((destination, size, name));
        Ok(Some(result))
    }

    async fn cleanup(&self, run: &mut BuildRun) -> Result<Option<Value>, OrchestratorError> {
        let mut warnings = Vec::new();
        if let Some(copy) = run.working_copy.take() {
            if let Err(err) = remove_file_if_present(&copy).await {
                warnings.push(format!("remove {}: {err}", copy.display()));
            }
        }
        if let Err(err) = reset_dir(&run.plan.mount.mount_point).await {
            warnings.push(format!(
                "empty {}: {err}",
                run.plan.mount.mount_point.display()
            ));
        }
        for warning in &warnings {
            self.log(
                run.job_id,
                JobLogEntry::warning(COMPONENT, warning.clone())
                    .with_category(BuildStage::Cleanup.as_str()),
            )
            .await;
        }
        Ok(Some(json!({ "warnings": warnings })))
    }

    fn done(run: &mut BuildRun) -> Result<Option<Value>, OrchestratorError> {
        let (final_image, final_size_bytes, export_name) =
            run.exported.clone().ok_or(OrchestratorError::Plan {
                field: "final_image",
                reason: "not_exported",
            })?;
        let report = BuildReport {
            final_image,
            final_size_bytes,
            drivers: run.driver_summary,
            updates: run.update_summary,
            duration_ms: u64::try_from(run.clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            export_name,
        };
        let value =
            serde_json::to_value(&report).map_err(|source| OrchestratorError::Report { source })?;
        run.report = Some(report);
        Ok(Some(value))
    }

    async fn complete(&self, run: &BuildRun, report: Option<Value>) -> JobStatus {
        let job_id = run.job_id;
        let mut patch = JobPatch::complete_stage(BuildStage::Done, None)
            .with_completed_at(Utc::now());
        patch.status = Some(JobStatus::Completed);
        if let Some(report) = report {
            patch.results.insert(BUILD_RESULT_KEY.to_string(), report);
        }
        let status = self
            .recorder
            .apply(job_id, &patch)
            .await
            .map_or(JobStatus::Completed, |job| job.status);
        if status == JobStatus::Completed {
            let image_path = run
                .exported
                .as_ref()
                .map(|(path, _, _)| path.display().to_string())
                .unwrap_or_default();
            self.log(
                job_id,
                JobLogEntry::info(COMPONENT, format!("build completed: {image_path}")),
            )
            .await;
            self.recorder
                .broadcaster()
                .events()
                .publish(Event::JobCompleted { job_id, image_path });
        }
        status
    }

    async fn fail(&self, run: &mut BuildRun, stage: BuildStage, err: &OrchestratorError) -> JobStatus {
        let job_id = run.job_id;
        let mut message = err.describe();
        let problems = release(
            self.servicer.as_ref(),
            &run.plan.mount.mount_point,
            run.mounted,
            run.working_copy.take(),
        )
        .await;
        run.mounted = false;
        if !problems.is_empty() {
            message = format!("{message}; cleanup: {}", problems.join("; "));
        }
        error!(job_id = %job_id, stage = %stage, error = %message, "build stage failed");
        self.log(
            job_id,
            JobLogEntry::error(COMPONENT, message.clone()).with_category(stage.as_str()),
        )
        .await;
        let status = self
            .recorder
            .apply(job_id, &JobPatch::failed(message.clone()))
            .await
            .map_or(JobStatus::Failed, |job| job.status);
        if status == JobStatus::Failed {
            self.recorder
                .broadcaster()
                .events()
                .publish(Event::JobFailed { job_id, message });
        }
        status
    }

    async fn cancelled(&self, run: &mut BuildRun, next: BuildStage) -> JobStatus {
        let job_id = run.job_id;
        self.log(
            job_id,
            JobLogEntry::warning(COMPONENT, format!("build cancelled before {next}")),
        )
        .await;
        let servicer = Arc::clone(&self.servicer);
        let mount_point = run.plan.mount.mount_point.clone();
        let mounted = run.mounted;
        let working_copy = run.working_copy.take();
        run.mounted = false;
        tokio::spawn(async move {
            let problems = release(servicer.as_ref(), &mount_point, mounted, working_copy).await;
            if problems.is_empty() {
                info!(job_id = %job_id, "cancelled build released");
            } else {
                warn!(job_id = %job_id, problems = %problems.join("; "), "cancelled build cleanup incomplete");
            }
        });
        JobStatus::Cancelled
    }

    async fn cancelled_elsewhere(&self, job_id: JobId) -> bool {
        self.recorder
            .cached(job_id)
            .await
            .is_some_and(|job| job.status == JobStatus::Cancelled)
    }

    async fn log(&self, job_id: JobId, entry: JobLogEntry) {
        self.recorder.log(job_id, entry).await;
    }
}

fn result_entry(component: &str, result: &IntegrationResult) -> JobLogEntry {
    let message = format!(
        "{} [{}]: {}",
        result.asset.name, result.strategy, result.message
    );
    let entry = if result.succeeded {
        JobLogEntry::info(component, message)
    } else {
        JobLogEntry::warning(component, message)
    };
    entry.with_category(result.strategy.as_str())
}

/// Discard the mount and remove the working copy, collecting problems as text.
async fn release(
    servicer: &dyn ImageServicer,
    mount_point: &Path,
    mounted: bool,
    working_copy: Option<PathBuf>,
) -> Vec<String> {
    let mut problems = Vec::new();
    if mounted {
        if let Err(err) = unmount(servicer, mount_point, false).await {
            problems.push(describe_servicing_error("unmount", &err));
        }
    }
    if let Some(copy) = working_copy {
        if let Err(err) = remove_file_if_present(&copy).await {
            problems.push(format!("remove {}: {err}", copy.display()));
        }
    }
    problems
}

async fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Leave `dir` as an existing, empty directory.
async fn reset_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
        _ => {}
    }
    tokio::fs::create_dir_all(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassia_servicing::ServicingOperation;
    use std::time::Duration;

    #[test]
    fn servicing_errors_describe_the_step() {
        let timeout = ServicingError::Timeout {
            operation: ServicingOperation::Mount,
            timeout: Duration::from_secs(300),
        };
        assert_eq!(
            describe_servicing_error("mount", &timeout),
            "mount timed out after 300s"
        );
        let failed = OrchestratorError::Servicing {
            step: "export",
            source: ServicingError::Failed {
                operation: ServicingOperation::Export,
                exit_code: 5,
                message: "Access is denied.".into(),
            },
        };
        assert_eq!(
            failed.describe(),
            "export failed (exit code 5): Access is denied."
        );
    }

    #[tokio::test]
    async fn reset_dir_empties_existing_tree() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let dir = temp.path().join("mount");
        std::fs::create_dir_all(dir.join("Windows/System32"))?;
        reset_dir(&dir).await?;
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir)?.count(), 0);
        reset_dir(&temp.path().join("fresh")).await?;
        assert!(temp.path().join("fresh").is_dir());
        Ok(())
    }
}
