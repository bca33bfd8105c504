//! Configuration documents deserialised from disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::ConfigResult;
use crate::validate;

/// Build-wide settings shared by every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Directory the working image is mounted into.
    pub mount_point: PathBuf,
    /// Directory holding working copies of base images.
    pub temp_path: PathBuf,
    /// Directory receiving exported images.
    pub export_path: PathBuf,
    /// Driver catalog root.
    pub driver_root: PathBuf,
    /// Update catalog root.
    pub update_root: PathBuf,
    /// Base image root.
    #[serde(alias = "sbiRoot")]
    pub base_image_root: PathBuf,
    /// Post-deployment agent files copied into the staging root.
    #[serde(default, alias = "yunonaPath")]
    pub agent_root: Option<PathBuf>,
    /// Directory holding `<device>.json` documents.
    #[serde(default = "default_device_config_dir")]
    pub device_config_dir: PathBuf,
    /// Explicit base image per OS identifier.
    #[serde(default, alias = "osWimMap")]
    pub os_image_map: BTreeMap<u32, PathBuf>,
    /// Servicing tool settings.
    #[serde(default, alias = "windowsTools")]
    pub servicing: ServicingConfig,
    /// Staging root for deferred assets, relative to the mount.
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,
    /// Directory that must exist at the mount root.
    #[serde(default = "default_mount_marker")]
    pub mount_marker: String,
    /// Job database URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Log entries attached to progress snapshots.
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
    /// Pending progress notifications retained before dropping the oldest.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Measure mount growth after each update package.
    #[serde(default = "default_true")]
    pub measure_update_growth: bool,
}

impl BuildConfig {
    /// Configuration rooted at `base` with default layout underneath.
    #[must_use]
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            mount_point: base.join("runtime").join("mount"),
            temp_path: base.join("runtime").join("temp"),
            export_path: base.join("runtime").join("export"),
            driver_root: base.join("assets").join("drivers"),
            update_root: base.join("assets").join("updates"),
            base_image_root: base.join("assets").join("sbi"),
            agent_root: None,
            device_config_dir: base.join(defaults::DEVICE_CONFIG_DIR),
            os_image_map: BTreeMap::new(),
            servicing: ServicingConfig::default(),
            staging_root: default_staging_root(),
            mount_marker: default_mount_marker(),
            database_url: default_database_url(),
            log_tail: defaults::LOG_TAIL,
            broadcast_capacity: defaults::BROADCAST_CAPACITY,
            measure_update_growth: true,
        }
    }

    /// Validate field values.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError::InvalidField`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        validate::non_empty_path("build", "mount_point", &self.mount_point)?;
        validate::non_empty_path("build", "temp_path", &self.temp_path)?;
        validate::non_empty_path("build", "export_path", &self.export_path)?;
        validate::non_empty_path("build", "driver_root", &self.driver_root)?;
        validate::non_empty_path("build", "update_root", &self.update_root)?;
        validate::non_empty_path("build", "base_image_root", &self.base_image_root)?;
        validate::disjoint_paths("build", "mount_point", &self.mount_point, &self.temp_path)?;
        validate::disjoint_paths(
            "build",
            "mount_point",
            &self.mount_point,
            &self.export_path,
        )?;
        validate::relative_path("build", "staging_root", &self.staging_root)?;
        validate::non_empty_str("build", "mount_marker", &self.mount_marker)?;
        validate::non_empty_str("build", "database_url", &self.database_url)?;
        validate::within_range("build", "log_tail", self.log_tail, 1, 100)?;
        validate::within_range(
            "build",
            "broadcast_capacity",
            self.broadcast_capacity,
            1,
            65_536,
        )?;
        self.servicing.validate()
    }
}

/// Servicing tool location and per-operation timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicingConfig {
    /// Executable invoked for image servicing.
    #[serde(default = "default_servicing_tool", alias = "dismPath")]
    pub tool_path: PathBuf,
    /// Per-operation timeouts.
    #[serde(default)]
    pub timeouts: OperationTimeouts,
}

impl Default for ServicingConfig {
    fn default() -> Self {
        Self {
            tool_path: default_servicing_tool(),
            timeouts: OperationTimeouts::default(),
        }
    }
}

impl ServicingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate::non_empty_path("servicing", "tool_path", &self.tool_path)?;
        let timeouts = &self.timeouts;
        for (field, value) in [
            ("timeouts.info_secs", timeouts.info_secs),
            ("timeouts.mount_secs", timeouts.mount_secs),
            ("timeouts.unmount_secs", timeouts.unmount_secs),
            ("timeouts.export_secs", timeouts.export_secs),
            ("timeouts.add_driver_secs", timeouts.add_driver_secs),
            ("timeouts.add_package_secs", timeouts.add_package_secs),
            ("timeouts.cleanup_secs", timeouts.cleanup_secs),
        ] {
            if value == 0 {
                return Err(crate::ConfigError::invalid(
                    "servicing",
                    field,
                    "zero_timeout",
                    Some(value.to_string()),
                ));
            }
        }
        Ok(())
    }
}

/// Timeouts in seconds for each servicing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationTimeouts {
    /// Image info query.
    pub info_secs: u64,
    /// Mount.
    pub mount_secs: u64,
    /// Unmount with commit or discard.
    pub unmount_secs: u64,
    /// Export.
    pub export_secs: u64,
    /// Add driver.
    pub add_driver_secs: u64,
    /// Add package.
    pub add_package_secs: u64,
    /// Stale mount cleanup.
    pub cleanup_secs: u64,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            info_secs: defaults::INFO_TIMEOUT_SECS,
            mount_secs: defaults::MOUNT_TIMEOUT_SECS,
            unmount_secs: defaults::UNMOUNT_TIMEOUT_SECS,
            export_secs: defaults::EXPORT_TIMEOUT_SECS,
            add_driver_secs: defaults::ADD_DRIVER_TIMEOUT_SECS,
            add_package_secs: defaults::ADD_PACKAGE_TIMEOUT_SECS,
            cleanup_secs: defaults::CLEANUP_TIMEOUT_SECS,
        }
    }
}

/// Per-device document describing supported hardware and operating systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Device identifier.
    pub device_id: String,
    /// Hardware identifiers drivers may target.
    #[serde(default)]
    pub supported_device_ids: BTreeSet<u32>,
    /// Operating systems the device supports.
    #[serde(default)]
    pub os_support: Vec<OsSupport>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

impl DeviceConfig {
    /// OS identifiers the device supports.
    #[must_use]
    pub fn supported_os_ids(&self) -> Vec<u32> {
        self.os_support.iter().map(|os| os.os_id).collect()
    }

    /// Whether the device supports `os_id`.
    #[must_use]
    pub fn supports_os(&self, os_id: u32) -> bool {
        self.os_support.iter().any(|os| os.os_id == os_id)
    }

    /// Driver families required for `os_id`; empty when unrestricted.
    #[must_use]
    pub fn driver_families(&self, os_id: u32) -> BTreeSet<u32> {
        self.os_support
            .iter()
            .find(|os| os.os_id == os_id)
            .map(|os| os.driver_family_ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Validate field values.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError::InvalidField`] for empty identifiers or a zero OS id.
    pub fn validate(&self) -> ConfigResult<()> {
        validate::non_empty_str("device", "device_id", &self.device_id)?;
        if let Some(os) = self.os_support.iter().find(|os| os.os_id == 0) {
            return Err(crate::ConfigError::invalid(
                "device",
                "os_support.os_id",
                "zero",
                Some(os.os_id.to_string()),
            ));
        }
        Ok(())
    }
}

/// Operating system entry within a device document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsSupport {
    /// Operating system identifier.
    pub os_id: u32,
    /// Driver families required for this OS.
    #[serde(default)]
    pub driver_family_ids: Vec<u32>,
}

fn default_device_config_dir() -> PathBuf {
    PathBuf::from(defaults::DEVICE_CONFIG_DIR)
}

fn default_staging_root() -> PathBuf {
    PathBuf::from(defaults::STAGING_ROOT)
}

fn default_mount_marker() -> String {
    defaults::MOUNT_MARKER.to_string()
}

fn default_database_url() -> String {
    defaults::DATABASE_URL.to_string()
}

fn default_servicing_tool() -> PathBuf {
    PathBuf::from(defaults::SERVICING_TOOL)
}

const fn default_log_tail() -> usize {
    defaults::LOG_TAIL
}

const fn default_broadcast_capacity() -> usize {
    defaults::BROADCAST_CAPACITY
}

const fn default_true() -> bool {
    true
}
