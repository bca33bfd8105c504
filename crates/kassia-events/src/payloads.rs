//! Event payload types carried across the pipeline.

use chrono::{DateTime, Utc};
use kassia_core::JobSnapshot;
use uuid::Uuid;

/// Identifier assigned to each event.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed events surfaced to observers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A build request was accepted.
    JobCreated {
        /// Identifier of the new job.
        job_id: Uuid,
        /// Device the build targets.
        device: String,
        /// Operating system the build targets.
        os_id: u32,
    },
    /// Job state changed; carries the full record and recent logs.
    JobSnapshot {
        /// Identifier of the job.
        job_id: Uuid,
        /// Job fields plus log tail.
        snapshot: Box<JobSnapshot>,
    },
    /// The build finished and produced an image.
    JobCompleted {
        /// Identifier of the job.
        job_id: Uuid,
        /// Path of the exported image.
        image_path: String,
    },
    /// The build failed.
    JobFailed {
        /// Identifier of the job.
        job_id: Uuid,
        /// Failure reason recorded on the job.
        message: String,
    },
    /// The build was cancelled.
    JobCancelled {
        /// Identifier of the job.
        job_id: Uuid,
    },
    /// Jobs left running by a previous process were failed at startup.
    JobsReconciled {
        /// Identifiers of the reconciled jobs.
        job_ids: Vec<Uuid>,
    },
    /// Health of a component changed.
    HealthChanged {
        /// Components currently considered degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job_created",
            Self::JobSnapshot { .. } => "job_snapshot",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::JobCancelled { .. } => "job_cancelled",
            Self::JobsReconciled { .. } => "jobs_reconciled",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// Job the event concerns, when it concerns exactly one.
    #[must_use]
    pub const fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::JobCreated { job_id, .. }
            | Self::JobSnapshot { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id } => Some(*job_id),
            Self::JobsReconciled { .. } | Self::HealthChanged { .. } => None,
        }
    }
}

/// Metadata wrapper around events.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Time the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassia_core::{BuildRequest, Job};

    #[test]
    fn kind_and_job_id_follow_variant() {
        let job = Job::new(&BuildRequest::new("X1", 10));
        let snapshot = Event::JobSnapshot {
            job_id: job.id,
            snapshot: Box::new(JobSnapshot {
                job: job.clone(),
                logs: vec![],
            }),
        };
        assert_eq!(snapshot.kind(), "job_snapshot");
        assert_eq!(snapshot.job_id(), Some(job.id));

        let reconciled = Event::JobsReconciled {
            job_ids: vec![job.id],
        };
        assert_eq!(reconciled.kind(), "jobs_reconciled");
        assert_eq!(reconciled.job_id(), None);
    }

    #[test]
    fn events_serialise_with_type_tag() {
        let event = Event::JobFailed {
            job_id: Uuid::nil(),
            message: "mount failed".into(),
        };
        let value = serde_json::to_value(&event).expect("serialise");
        assert_eq!(value["type"], "job_failed");
        assert_eq!(value["message"], "mount failed");
        let decoded: Event = serde_json::from_value(value).expect("deserialise");
        assert_eq!(decoded, event);
    }
}
