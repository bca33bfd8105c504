//! Result contract of a completed build.

use std::path::PathBuf;

use kassia_integration::IntegrationSummary;
use serde::Serialize;

/// Key the report is stored under in the job results.
pub const BUILD_RESULT_KEY: &str = "build";

/// Outcome of a build that reached the final stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Exported image path.
    pub final_image: PathBuf,
    /// Exported image size.
    pub final_size_bytes: u64,
    /// Driver integration counters; `None` when the stage was skipped.
    pub drivers: Option<IntegrationSummary>,
    /// Update integration counters; `None` when the stage was skipped.
    pub updates: Option<IntegrationSummary>,
    /// Wall-clock duration of the whole run.
    pub duration_ms: u64,
    /// Image name written into the exported file.
    pub export_name: String,
}

impl BuildReport {
    /// Whether every attempted asset integrated successfully.
    #[must_use]
    pub fn fully_integrated(&self) -> bool {
        self.drivers.is_none_or(|summary| summary.success())
            && self.updates.is_none_or(|summary| summary.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_stages_count_as_integrated() {
        let mut report = BuildReport {
            final_image: PathBuf::from("/export/10_X1.wim"),
            final_size_bytes: 42,
            drivers: None,
            updates: None,
            duration_ms: 5,
            export_name: "10_X1".into(),
        };
        assert!(report.fully_integrated());
        report.drivers = Some(IntegrationSummary {
            total: 2,
            succeeded: 1,
            failed: 1,
            ..IntegrationSummary::default()
        });
        assert!(!report.fully_integrated());
    }
}
