//! Fixed build stage sequence.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Number of stages every build walks through.
pub const TOTAL_STAGES: u8 = 9;

/// Named step of the build sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    /// Verify the resolved plan and prepare working directories.
    ConfigurationLoad,
    /// Scan the catalog and resolve compatible assets.
    AssetDiscovery,
    /// Copy the base image into the temp path and inspect it.
    WimPreparation,
    /// Mount the working image.
    WimMount,
    /// Integrate drivers into the mounted image.
    DriverIntegration,
    /// Integrate updates into the mounted image.
    UpdateIntegration,
    /// Commit the mount and export the final image.
    WimExport,
    /// Remove temporary state.
    Cleanup,
    /// Record the build report.
    Done,
}

impl BuildStage {
    /// Every stage in execution order.
    pub const ALL: [Self; TOTAL_STAGES as usize] = [
        Self::ConfigurationLoad,
        Self::AssetDiscovery,
        Self::WimPreparation,
        Self::WimMount,
        Self::DriverIntegration,
        Self::UpdateIntegration,
        Self::WimExport,
        Self::Cleanup,
        Self::Done,
    ];

    /// One-based position of the stage.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::ConfigurationLoad => 1,
            Self::AssetDiscovery => 2,
            Self::WimPreparation => 3,
            Self::WimMount => 4,
            Self::DriverIntegration => 5,
            Self::UpdateIntegration => 6,
            Self::WimExport => 7,
            Self::Cleanup => 8,
            Self::Done => 9,
        }
    }

    /// Progress reported once the stage has completed.
    #[must_use]
    pub const fn progress_percent(self) -> u8 {
        let scaled = self.number() as u16 * 100 + (TOTAL_STAGES as u16 / 2);
        (scaled / TOTAL_STAGES as u16) as u8
    }

    /// Machine-friendly label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigurationLoad => "configuration_load",
            Self::AssetDiscovery => "asset_discovery",
            Self::WimPreparation => "wim_preparation",
            Self::WimMount => "wim_mount",
            Self::DriverIntegration => "driver_integration",
            Self::UpdateIntegration => "update_integration",
            Self::WimExport => "wim_export",
            Self::Cleanup => "cleanup",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for BuildStage {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == value)
            .ok_or_else(|| ModelError::UnknownLabel {
                field: "current_stage",
                value: value.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_numbers_strictly_increase() {
        let numbers: Vec<u8> = BuildStage::ALL.iter().map(|stage| stage.number()).collect();
        assert_eq!(numbers, (1..=TOTAL_STAGES).collect::<Vec<_>>());
    }

    #[test]
    fn progress_is_stage_proportional() {
        let progress: Vec<u8> = BuildStage::ALL
            .iter()
            .map(|stage| stage.progress_percent())
            .collect();
        assert_eq!(progress, vec![11, 22, 33, 44, 56, 67, 78, 89, 100]);
    }

    #[test]
    fn labels_round_trip() {
        for stage in BuildStage::ALL {
            assert_eq!(stage.as_str().parse::<BuildStage>(), Ok(stage));
        }
        assert!("mount".parse::<BuildStage>().is_err());
    }
}
