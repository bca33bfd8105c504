//! Default values for configuration documents.

/// Staging root for deferred assets, relative to the mount.
pub const STAGING_ROOT: &str = "Users/Public/Yunona";
/// Directory that must exist at the mount root before integration.
pub const MOUNT_MARKER: &str = "Windows";
/// Image index mounted and exported.
pub const IMAGE_INDEX: u32 = 1;
/// Default job database location.
pub const DATABASE_URL: &str = "sqlite://runtime/kassia.db";
/// Default directory holding `<device>.json` documents.
pub const DEVICE_CONFIG_DIR: &str = "config/device_configs";
/// Default servicing tool.
pub const SERVICING_TOOL: &str = "dism.exe";
/// Log entries attached to each progress snapshot.
pub const LOG_TAIL: usize = 10;
/// Pending progress notifications held before the oldest is dropped.
pub const BROADCAST_CAPACITY: usize = 64;

/// Timeout for image info queries, in seconds.
pub const INFO_TIMEOUT_SECS: u64 = 30;
/// Timeout for mounting, in seconds.
pub const MOUNT_TIMEOUT_SECS: u64 = 300;
/// Timeout for unmounting, in seconds.
pub const UNMOUNT_TIMEOUT_SECS: u64 = 600;
/// Timeout for exports, in seconds.
pub const EXPORT_TIMEOUT_SECS: u64 = 1_800;
/// Timeout for adding a driver, in seconds.
pub const ADD_DRIVER_TIMEOUT_SECS: u64 = 300;
/// Timeout for adding a package, in seconds.
pub const ADD_PACKAGE_TIMEOUT_SECS: u64 = 600;
/// Timeout for stale mount cleanup, in seconds.
pub const CLEANUP_TIMEOUT_SECS: u64 = 300;
