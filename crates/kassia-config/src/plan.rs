//! Per-stage plans resolved once per build request.
//!
//! # Design
//! - `BuildPlan::resolve` is the single validation point for a request; stages only
//!   read the typed plan afterwards.
//! - File names derived from the build timestamp live here so every stage agrees on them.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use kassia_core::{BuildRequest, JobFlags};
use serde::Serialize;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{BuildConfig, DeviceConfig, ServicingConfig};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Everything a build needs, validated up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    /// Device document for the target device.
    pub device: DeviceConfig,
    /// Target operating system.
    pub os_id: u32,
    /// Stage toggles from the request.
    pub flags: JobFlags,
    /// Asset discovery inputs.
    pub discovery: DiscoveryPlan,
    /// Base image preparation inputs.
    pub preparation: PreparationPlan,
    /// Mount inputs.
    pub mount: MountPlan,
    /// Integration inputs.
    pub integration: IntegrationPlan,
    /// Export inputs.
    pub export: ExportPlan,
    /// Servicing tool settings.
    pub servicing: ServicingConfig,
}

/// Catalog roots and filters for asset discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryPlan {
    /// Driver catalog root.
    pub driver_root: PathBuf,
    /// Update catalog root.
    pub update_root: PathBuf,
    /// Base image root.
    pub base_image_root: PathBuf,
    /// Post-deployment agent files.
    pub agent_root: Option<PathBuf>,
    /// Explicit base image for the OS, when configured.
    pub image_override: Option<PathBuf>,
    /// Driver families the device requires for the OS.
    pub driver_families: BTreeSet<u32>,
}

/// Working copy location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparationPlan {
    /// Directory receiving the working copy.
    pub temp_path: PathBuf,
    /// Skip image inspection.
    pub skip_validation: bool,
}

/// Mount location and verification marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPlan {
    /// Mount directory.
    pub mount_point: PathBuf,
    /// Image index to mount.
    pub image_index: u32,
    /// Directory expected at the mount root.
    pub mount_marker: String,
}

/// Integration toggles and staging layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrationPlan {
    /// Staging root relative to the mount.
    pub staging_root: PathBuf,
    /// Skip driver integration.
    pub skip_drivers: bool,
    /// Skip update integration.
    pub skip_updates: bool,
    /// Measure mount growth for update packages.
    pub measure_update_growth: bool,
}

/// Export destination and naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportPlan {
    /// Directory receiving exported images.
    pub export_path: PathBuf,
    /// Image index exported.
    pub source_index: u32,
    /// Name prefix, `<os>_<device>`.
    pub name_prefix: String,
}

impl BuildPlan {
    /// Validate a request against the configuration and produce typed stage plans.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid, the device document does not
    /// match the request, or the device does not support the requested OS.
    pub fn resolve(
        config: &BuildConfig,
        device: &DeviceConfig,
        request: &BuildRequest,
    ) -> ConfigResult<Self> {
        config.validate()?;
        device.validate()?;
        if request.device != device.device_id {
            return Err(ConfigError::invalid(
                "request",
                "device",
                "mismatched_device",
                Some(request.device.clone()),
            ));
        }
        if request.os_id == 0 {
            return Err(ConfigError::invalid(
                "request",
                "os_id",
                "zero",
                Some(request.os_id.to_string()),
            ));
        }
        if !device.supports_os(request.os_id) {
            return Err(ConfigError::UnsupportedOs {
                device: device.device_id.clone(),
                os_id: request.os_id,
                supported: device.supported_os_ids(),
            });
        }

        Ok(Self {
            device: device.clone(),
            os_id: request.os_id,
            flags: request.flags,
            discovery: DiscoveryPlan {
                driver_root: config.driver_root.clone(),
                update_root: config.update_root.clone(),
                base_image_root: config.base_image_root.clone(),
                agent_root: config.agent_root.clone(),
                image_override: config.os_image_map.get(&request.os_id).cloned(),
                driver_families: device.driver_families(request.os_id),
            },
            preparation: PreparationPlan {
                temp_path: config.temp_path.clone(),
                skip_validation: request.flags.skip_validation,
            },
            mount: MountPlan {
                mount_point: config.mount_point.clone(),
                image_index: defaults::IMAGE_INDEX,
                mount_marker: config.mount_marker.clone(),
            },
            integration: IntegrationPlan {
                staging_root: config.staging_root.clone(),
                skip_drivers: request.flags.skip_drivers,
                skip_updates: request.flags.skip_updates,
                measure_update_growth: config.measure_update_growth,
            },
            export: ExportPlan {
                export_path: config.export_path.clone(),
                source_index: defaults::IMAGE_INDEX,
                name_prefix: format!("{}_{}", request.os_id, device.device_id),
            },
            servicing: config.servicing.clone(),
        })
    }

    /// Directory deferred assets are staged under for this build.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.mount.mount_point.join(&self.integration.staging_root)
    }
}

impl PreparationPlan {
    /// Working copy path for a build started at `started_at`.
    #[must_use]
    pub fn working_copy(&self, prefix: &str, started_at: DateTime<Utc>) -> PathBuf {
        self.temp_path.join(format!(
            "{prefix}_{}.wim",
            started_at.format(TIMESTAMP_FORMAT)
        ))
    }
}

impl ExportPlan {
    /// Image name recorded inside the exported file.
    #[must_use]
    pub fn image_name(&self, started_at: DateTime<Utc>) -> String {
        format!("{}_{}", self.name_prefix, started_at.format(TIMESTAMP_FORMAT))
    }

    /// Exported file path for a build started at `started_at`.
    #[must_use]
    pub fn destination(&self, started_at: DateTime<Utc>) -> PathBuf {
        self.export_path
            .join(format!("{}.wim", self.image_name(started_at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OsSupport;
    use chrono::TimeZone;
    use std::path::Path;

    fn device() -> DeviceConfig {
        DeviceConfig {
            device_id: "X1".into(),
            supported_device_ids: BTreeSet::from([100]),
            os_support: vec![OsSupport {
                os_id: 10,
                driver_family_ids: vec![7],
            }],
            description: None,
        }
    }

    #[test]
    fn resolve_builds_stage_plans() -> Result<(), ConfigError> {
        let mut config = BuildConfig::rooted_at(Path::new("/srv"));
        config
            .os_image_map
            .insert(10, PathBuf::from("/srv/assets/sbi/w10.wim"));
        let request = BuildRequest::new("X1", 10).with_flags(JobFlags {
            skip_drivers: true,
            ..JobFlags::default()
        });
        let plan = BuildPlan::resolve(&config, &device(), &request)?;
        assert!(plan.integration.skip_drivers);
        assert_eq!(plan.discovery.driver_families, BTreeSet::from([7]));
        assert_eq!(
            plan.discovery.image_override,
            Some(PathBuf::from("/srv/assets/sbi/w10.wim"))
        );
        assert_eq!(
            plan.staging_dir(),
            PathBuf::from("/srv/runtime/mount/Users/Public/Yunona")
        );
        Ok(())
    }

    #[test]
    fn resolve_rejects_unsupported_os() {
        let config = BuildConfig::rooted_at(Path::new("/srv"));
        let err = BuildPlan::resolve(&config, &device(), &BuildRequest::new("X1", 11))
            .expect_err("os 11 unsupported");
        assert!(matches!(
            err,
            ConfigError::UnsupportedOs { os_id: 11, ref supported, .. } if supported == &vec![10]
        ));
    }

    #[test]
    fn resolve_rejects_mismatched_device() {
        let config = BuildConfig::rooted_at(Path::new("/srv"));
        assert!(matches!(
            BuildPlan::resolve(&config, &device(), &BuildRequest::new("X2", 10)),
            Err(ConfigError::InvalidField {
                reason: "mismatched_device",
                ..
            })
        ));
    }

    #[test]
    fn export_names_embed_timestamp() -> Result<(), ConfigError> {
        let config = BuildConfig::rooted_at(Path::new("/srv"));
        let plan = BuildPlan::resolve(&config, &device(), &BuildRequest::new("X1", 10))?;
        let at = Utc
            .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
            .single()
            .expect("valid timestamp");
        assert_eq!(
            plan.export.destination(at),
            PathBuf::from("/srv/runtime/export/10_X1_20260304_050607.wim")
        );
        assert_eq!(
            plan.preparation.working_copy(&plan.export.name_prefix, at),
            PathBuf::from("/srv/runtime/temp/10_X1_20260304_050607.wim")
        );
        Ok(())
    }
}
