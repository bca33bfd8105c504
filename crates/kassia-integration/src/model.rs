//! Integration results, summaries, and the target they apply to.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use kassia_assets::AssetDescriptor;
use kassia_servicing::NoOpReason;
use serde::Serialize;

/// How an asset is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Applied to the mounted image by the servicing utility.
    Immediate,
    /// Staged for installation on first boot.
    Deferred,
    /// Not applied.
    Skipped,
}

impl Strategy {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Deferred => "deferred",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Mounted image an integration run writes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrationTarget {
    /// Mount directory.
    pub mount_point: PathBuf,
    /// Staging directory relative to the mount.
    pub staging_root: PathBuf,
    /// Directory that must exist inside a mounted image.
    pub mount_marker: String,
    /// Post-deployment agent files copied into the staging root.
    pub agent_root: Option<PathBuf>,
    /// Measure mount growth for immediate update packages.
    pub measure_growth: bool,
}

impl IntegrationTarget {
    /// Target with default marker and no agent.
    #[must_use]
    pub fn new(mount_point: impl Into<PathBuf>, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            staging_root: staging_root.into(),
            mount_marker: "Windows".to_string(),
            agent_root: None,
            measure_growth: false,
        }
    }

    /// Absolute staging directory inside the mount.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.mount_point.join(&self.staging_root)
    }

    /// Marker directory that proves the image is mounted.
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.mount_point.join(&self.mount_marker)
    }

    /// Whether the marker directory exists.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.marker_path().is_dir()
    }
}

/// Outcome of processing one asset. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationResult {
    /// Asset processed.
    pub asset: AssetDescriptor,
    /// Whether the asset counts as applied.
    pub succeeded: bool,
    /// Strategy used.
    pub strategy: Strategy,
    /// Human-readable outcome.
    pub message: String,
    /// Wall-clock time spent.
    pub duration_ms: u64,
    /// Bytes added to the image, when known.
    pub bytes_added: Option<u64>,
    /// Set when nothing needed to change.
    pub noop: Option<NoOpReason>,
    /// Staging directory for deferred assets.
    pub staged_path: Option<PathBuf>,
}

impl IntegrationResult {
    /// Successful result.
    #[must_use]
    pub fn success(
        asset: &AssetDescriptor,
        strategy: Strategy,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            asset: asset.clone(),
            succeeded: true,
            strategy,
            message: message.into(),
            duration_ms: duration_ms(elapsed),
            bytes_added: None,
            noop: None,
            staged_path: None,
        }
    }

    /// Failed result.
    #[must_use]
    pub fn failure(
        asset: &AssetDescriptor,
        strategy: Strategy,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            succeeded: false,
            ..Self::success(asset, strategy, message, elapsed)
        }
    }

    /// Successful no-op result.
    #[must_use]
    pub fn noop(
        asset: &AssetDescriptor,
        strategy: Strategy,
        reason: NoOpReason,
        elapsed: Duration,
    ) -> Self {
        Self {
            noop: Some(reason),
            ..Self::success(asset, strategy, reason.describe(), elapsed)
        }
    }

    /// Attach the bytes added.
    #[must_use]
    pub const fn with_bytes(mut self, bytes: Option<u64>) -> Self {
        self.bytes_added = bytes;
        self
    }

    /// Attach the staging directory.
    #[must_use]
    pub fn with_staged_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.staged_path = Some(path.into());
        self
    }

    /// Metrics outcome label.
    #[must_use]
    pub const fn outcome_label(&self) -> &'static str {
        if !self.succeeded {
            "failure"
        } else if self.noop.is_some() {
            "noop"
        } else {
            "success"
        }
    }
}

/// Aggregate counters derived from a list of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrationSummary {
    /// Assets processed.
    pub total: usize,
    /// Successful results, including no-ops.
    pub succeeded: usize,
    /// Failed results.
    pub failed: usize,
    /// Immediate results.
    pub immediate: usize,
    /// Deferred results.
    pub deferred: usize,
    /// Skipped results.
    pub skipped: usize,
    /// No-op results.
    pub noop: usize,
    /// Sum of known bytes added.
    pub bytes_added: u64,
}

impl IntegrationSummary {
    /// Recompute counters from `results`.
    #[must_use]
    pub fn from_results(results: &[IntegrationResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            summary.total += 1;
            if result.succeeded {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            match result.strategy {
                Strategy::Immediate => summary.immediate += 1,
                Strategy::Deferred => summary.deferred += 1,
                Strategy::Skipped => summary.skipped += 1,
            }
            if result.noop.is_some() {
                summary.noop += 1;
            }
            summary.bytes_added += result.bytes_added.unwrap_or(0);
            summary
        })
    }

    /// True when no asset failed.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Summary plus per-asset results of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrationReport {
    /// Derived counters.
    pub summary: IntegrationSummary,
    /// Results in processing order.
    pub results: Vec<IntegrationResult>,
}

impl IntegrationReport {
    /// Build a report, deriving the summary.
    #[must_use]
    pub fn new(results: Vec<IntegrationResult>) -> Self {
        Self {
            summary: IntegrationSummary::from_results(&results),
            results,
        }
    }

    /// Messages of failed results, prefixed with the asset name.
    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|result| !result.succeeded)
            .map(|result| format!("{}: {}", result.asset.name, result.message))
            .collect()
    }
}

pub(crate) fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassia_assets::{AssetKind, TypeTag};

    fn asset(name: &str) -> AssetDescriptor {
        AssetDescriptor::new(name, AssetKind::Driver, TypeTag::Inf, format!("/d/{name}"))
    }

    #[test]
    fn summary_is_derived_from_results() {
        let results = vec![
            IntegrationResult::success(&asset("a"), Strategy::Immediate, "ok", Duration::ZERO)
                .with_bytes(Some(10)),
            IntegrationResult::noop(
                &asset("b"),
                Strategy::Immediate,
                NoOpReason::AlreadyInstalled,
                Duration::ZERO,
            ),
            IntegrationResult::failure(&asset("c"), Strategy::Deferred, "copy", Duration::ZERO),
            IntegrationResult::failure(&asset("d"), Strategy::Skipped, "unknown", Duration::ZERO),
        ];
        let report = IntegrationReport::new(results);
        let summary = report.summary;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!((summary.immediate, summary.deferred, summary.skipped), (2, 1, 1));
        assert_eq!(summary.noop, 1);
        assert_eq!(summary.bytes_added, 10);
        assert!(!summary.success());
        assert_eq!(report.failures(), vec!["c: copy", "d: unknown"]);
    }

    #[test]
    fn noop_message_names_the_reason() {
        let result = IntegrationResult::noop(
            &asset("kb"),
            Strategy::Immediate,
            NoOpReason::NotApplicable,
            Duration::from_millis(3),
        );
        assert!(result.succeeded);
        assert_eq!(result.message, "not applicable to this image");
        assert_eq!(result.outcome_label(), "noop");
        assert_eq!(result.duration_ms, 3);
    }

    #[test]
    fn empty_summary_is_success() {
        assert!(IntegrationSummary::from_results(&[]).success());
    }
}
