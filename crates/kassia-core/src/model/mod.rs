//! Job records, build requests, and partial updates.

mod log;
mod stage;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ModelError;

pub use log::{JobLogEntry, LogLevel};
pub use stage::{BuildStage, TOTAL_STAGES};

/// Opaque job identifier.
pub type JobId = Uuid;

/// Reserved failure reason applied to jobs left behind by a previous process.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

const DEFAULT_ORIGIN: &str = "cli";

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted but not yet started.
    Created,
    /// A worker is driving the stages.
    Running,
    /// Every stage finished.
    Completed,
    /// A stage failed or the process restarted mid-run.
    Failed,
    /// Cancelled by an external request.
    Cancelled,
}

impl JobStatus {
    /// Machine-friendly label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ModelError::UnknownLabel {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Stage toggles supplied with a build request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFlags {
    /// Skip the driver integration stage.
    pub skip_drivers: bool,
    /// Skip the update integration stage.
    pub skip_updates: bool,
    /// Skip base image inspection.
    pub skip_validation: bool,
}

/// Request to build a customised image for a device and OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Device identifier as declared in the device catalog.
    pub device: String,
    /// Target operating system identifier.
    pub os_id: u32,
    /// Stage toggles.
    #[serde(default)]
    pub flags: JobFlags,
    /// Principal that asked for the build.
    #[serde(default)]
    pub created_by: Option<String>,
}

impl BuildRequest {
    /// Request with default flags.
    #[must_use]
    pub fn new(device: impl Into<String>, os_id: u32) -> Self {
        Self {
            device: device.into(),
            os_id,
            flags: JobFlags::default(),
            created_by: None,
        }
    }

    /// Replace the stage toggles.
    #[must_use]
    pub const fn with_flags(mut self, flags: JobFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Durable orchestration state for one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Device identifier.
    pub device: String,
    /// Target operating system identifier.
    pub os_id: u32,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Stage currently executing, or the last one reached.
    pub current_stage: Option<BuildStage>,
    /// One-based number of `current_stage`, zero before the first stage.
    pub stage_number: u8,
    /// Number of stages in the sequence.
    pub total_stages: u8,
    /// Stage-proportional progress.
    pub progress_percent: u8,
    /// Human-readable description of the current step.
    pub stage_detail: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the worker started.
    pub started_at: Option<DateTime<Utc>>,
    /// Time a terminal status was reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason for terminal failures.
    pub error: Option<String>,
    /// Structured results keyed by stage label.
    pub results: Map<String, Value>,
    /// Stage toggles.
    pub flags: JobFlags,
    /// Principal that created the job.
    pub created_by: String,
}

impl Job {
    /// Create a job in the `created` status for the given request.
    #[must_use]
    pub fn new(request: &BuildRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            device: request.device.clone(),
            os_id: request.os_id,
            status: JobStatus::Created,
            current_stage: None,
            stage_number: 0,
            total_stages: TOTAL_STAGES,
            progress_percent: 0,
            stage_detail: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            results: Map::new(),
            flags: request.flags,
            created_by: request
                .created_by
                .clone()
                .unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
        }
    }

    /// Whether the job reached a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(stage) = patch.current_stage {
            self.current_stage = Some(stage);
            self.stage_number = stage.number();
        }
        if let Some(progress) = patch.progress_percent {
            self.progress_percent = progress.min(100);
        }
        if let Some(detail) = &patch.stage_detail {
            self.stage_detail = Some(detail.clone());
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = Some(completed_at);
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
        for (key, value) in &patch.results {
            self.results.insert(key.clone(), value.clone());
        }
    }
}

/// Partial update applied by the orchestrator. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    /// New status.
    pub status: Option<JobStatus>,
    /// New current stage; also moves `stage_number`.
    pub current_stage: Option<BuildStage>,
    /// New progress.
    pub progress_percent: Option<u8>,
    /// New stage detail.
    pub stage_detail: Option<String>,
    /// Start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason.
    pub error: Option<String>,
    /// Result entries merged into the job's results by key.
    pub results: Map<String, Value>,
}

impl JobPatch {
    /// Patch that only changes the status.
    #[must_use]
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch entering a stage.
    #[must_use]
    pub fn enter_stage(stage: BuildStage, detail: impl Into<String>) -> Self {
        Self {
            current_stage: Some(stage),
            stage_detail: Some(detail.into()),
            ..Self::default()
        }
    }

    /// Patch completing a stage, optionally recording its result.
    #[must_use]
    pub fn complete_stage(stage: BuildStage, result: Option<Value>) -> Self {
        let mut results = Map::new();
        if let Some(result) = result {
            results.insert(stage.as_str().to_string(), result);
        }
        Self {
            current_stage: Some(stage),
            progress_percent: Some(stage.progress_percent()),
            results,
            ..Self::default()
        }
    }

    /// Patch moving the job into a terminal failure.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Set the terminal timestamp.
    #[must_use]
    pub const fn with_completed_at(mut self, completed_at: DateTime<Utc>) -> Self {
        self.completed_at = Some(completed_at);
        self
    }

    /// Merge one result entry.
    #[must_use]
    pub fn with_result(mut self, key: impl Into<String>, value: Value) -> Self {
        self.results.insert(key.into(), value);
        self
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Listing filter applied by stores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// Restrict to one status.
    pub status: Option<JobStatus>,
    /// Restrict to one device.
    pub device: Option<String>,
    /// Maximum number of jobs returned, newest first.
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Filter on a single status.
    #[must_use]
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Whether the job satisfies the status and device predicates.
    #[must_use]
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|status| job.status == status)
            && self.device.as_deref().is_none_or(|device| job.device == device)
    }
}

/// Job fields plus the most recent log tail, as pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Full job record.
    pub job: Job,
    /// Most recent log entries in chronological order.
    pub logs: Vec<JobLogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_job_starts_created_at_stage_zero() {
        let job = Job::new(&BuildRequest::new("X1", 10));
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.stage_number, 0);
        assert_eq!(job.total_stages, TOTAL_STAGES);
        assert_eq!(job.created_by, "cli");
        assert!(job.results.is_empty());
    }

    #[test]
    fn patch_moves_stage_number_with_stage() {
        let mut job = Job::new(&BuildRequest::new("X1", 10));
        job.apply(&JobPatch::enter_stage(BuildStage::WimMount, "Mounting"));
        assert_eq!(job.stage_number, 4);
        assert_eq!(job.stage_detail.as_deref(), Some("Mounting"));

        job.apply(&JobPatch::complete_stage(
            BuildStage::WimMount,
            Some(json!({"mounted": true})),
        ));
        assert_eq!(job.progress_percent, 44);
        assert_eq!(job.results["wim_mount"], json!({"mounted": true}));
    }

    #[test]
    fn patch_merges_results_by_key() {
        let mut job = Job::new(&BuildRequest::new("X1", 10));
        job.apply(&JobPatch::default().with_result("a", json!(1)));
        job.apply(&JobPatch::default().with_result("b", json!(2)));
        assert_eq!(job.results.len(), 2);
        assert!(JobPatch::default().is_empty());
    }

    #[test]
    fn failed_patch_is_terminal() {
        let mut job = Job::new(&BuildRequest::new("X1", 10));
        job.apply(&JobPatch::failed("boom"));
        assert!(job.is_terminal());
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn filter_matches_status_and_device() {
        let job = Job::new(&BuildRequest::new("X1", 10));
        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter::with_status(JobStatus::Created).matches(&job));
        assert!(!JobFilter::with_status(JobStatus::Running).matches(&job));
        let other_device = JobFilter {
            device: Some("X2".into()),
            ..JobFilter::default()
        };
        assert!(!other_device.matches(&job));
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            JobStatus::Created,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
    }
}
