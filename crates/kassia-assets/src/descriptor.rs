//! On-disk descriptor records for drivers and updates.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use crate::model::DEFAULT_INSTALL_ORDER;

/// Descriptor stored next to a driver package.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRecord {
    /// Display name; defaults to the directory name.
    #[serde(default)]
    pub driver_name: Option<String>,
    /// Declared version.
    #[serde(default, alias = "driverVersion")]
    pub version: Option<String>,
    /// Explicit type label overriding detection.
    #[serde(default)]
    pub driver_type: Option<String>,
    /// Supported OS identifiers.
    #[serde(default)]
    pub supported_operating_systems: BTreeSet<u32>,
    /// Supported hardware identifiers.
    #[serde(default)]
    pub supported_devices: BTreeSet<u32>,
    /// Driver family.
    #[serde(default)]
    pub driver_family_id: Option<u32>,
    /// Reboot requirement.
    #[serde(default)]
    pub reboot_required: bool,
    /// Install order.
    #[serde(default = "default_order")]
    pub order: i64,
    /// Installer arguments for deferred installs.
    #[serde(default)]
    pub install_arguments: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Descriptor stored next to an update payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecord {
    /// Display name; defaults to the directory name.
    #[serde(default)]
    pub update_name: Option<String>,
    /// Declared version.
    #[serde(default)]
    pub update_version: Option<String>,
    /// Explicit type label; defaults to the payload extension.
    #[serde(default)]
    pub update_type: Option<String>,
    /// Payload file name relative to the descriptor.
    #[serde(default)]
    pub download_file_name: Option<String>,
    /// Supported OS identifiers.
    #[serde(default)]
    pub supported_operating_systems: BTreeSet<u32>,
    /// Reboot requirement.
    #[serde(default)]
    pub reboot_required: bool,
    /// Install order.
    #[serde(default = "default_order")]
    pub order: i64,
    /// Installer arguments for deferred installs.
    #[serde(default)]
    pub install_arguments: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

const fn default_order() -> i64 {
    DEFAULT_INSTALL_ORDER
}
