//! File loading and environment overrides.
//!
//! # Design
//! - Build documents may be YAML (`.yaml`/`.yml`) or JSON; device documents are JSON.
//! - Environment overrides are applied through an injected lookup so tests stay hermetic.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{BuildConfig, DeviceConfig};

/// Environment variable overriding the mount point.
pub const ENV_MOUNT_POINT: &str = "KASSIA_MOUNT_POINT";
/// Environment variable overriding the temp path.
pub const ENV_TEMP_PATH: &str = "KASSIA_TEMP_PATH";
/// Environment variable overriding the export path.
pub const ENV_EXPORT_PATH: &str = "KASSIA_EXPORT_PATH";
/// Environment variable overriding the database URL.
pub const ENV_DATABASE_URL: &str = "KASSIA_DATABASE_URL";
/// Environment variable overriding the servicing tool path.
pub const ENV_SERVICING_TOOL: &str = "KASSIA_SERVICING_TOOL";

/// Load and validate a build configuration document.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or fails validation.
pub fn load_build_config(path: &Path) -> ConfigResult<BuildConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::io("build_config.read", path, source))?;
    let config: BuildConfig = if is_yaml(path) {
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?
    };
    config.validate()?;
    debug!(path = %path.display(), "build configuration loaded");
    Ok(config)
}

/// Load and validate `<dir>/<device>.json`.
///
/// # Errors
///
/// Returns [`ConfigError::DeviceNotFound`] when no document exists, or a parse or
/// validation error otherwise.
pub fn load_device_config(dir: &Path, device: &str) -> ConfigResult<DeviceConfig> {
    if device.is_empty() || device.contains(['/', '\\']) || device.starts_with('.') {
        return Err(ConfigError::invalid(
            "device",
            "device_id",
            "invalid_identifier",
            Some(device.to_string()),
        ));
    }
    let path = dir.join(format!("{device}.json"));
    if !path.is_file() {
        return Err(ConfigError::DeviceNotFound {
            device: device.to_string(),
            path,
        });
    }
    let raw = fs::read_to_string(&path)
        .map_err(|source| ConfigError::io("device_config.read", &path, source))?;
    let config: DeviceConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.clone(),
        source,
    })?;
    config.validate()?;
    if config.device_id != device {
        return Err(ConfigError::invalid(
            "device",
            "device_id",
            "mismatched_file_name",
            Some(config.device_id),
        ));
    }
    Ok(config)
}

/// Apply `KASSIA_*` overrides using `lookup` to read variables.
///
/// # Errors
///
/// Returns an error when the overridden configuration fails validation.
pub fn apply_env_overrides<F>(config: &mut BuildConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
    if let Some(value) = read(ENV_MOUNT_POINT) {
        config.mount_point = PathBuf::from(value);
    }
    if let Some(value) = read(ENV_TEMP_PATH) {
        config.temp_path = PathBuf::from(value);
    }
    if let Some(value) = read(ENV_EXPORT_PATH) {
        config.export_path = PathBuf::from(value);
    }
    if let Some(value) = read(ENV_DATABASE_URL) {
        config.database_url = value;
    }
    if let Some(value) = read(ENV_SERVICING_TOOL) {
        config.servicing.tool_path = PathBuf::from(value);
    }
    config.validate()
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn loads_yaml_build_config_with_defaults() -> TestResult<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("kassia.yaml");
        fs::write(
            &path,
            "mountPoint: /srv/mount\n\
             tempPath: /srv/temp\n\
             exportPath: /srv/export\n\
             driverRoot: /srv/assets/drivers\n\
             updateRoot: /srv/assets/updates\n\
             sbiRoot: /srv/assets/sbi\n\
             osWimMap:\n  10: /srv/assets/sbi/w10.wim\n",
        )?;
        let config = load_build_config(&path)?;
        assert_eq!(config.base_image_root, PathBuf::from("/srv/assets/sbi"));
        assert_eq!(
            config.os_image_map.get(&10),
            Some(&PathBuf::from("/srv/assets/sbi/w10.wim"))
        );
        assert_eq!(config.mount_marker, "Windows");
        assert_eq!(config.servicing.timeouts.export_secs, 1_800);
        Ok(())
    }

    #[test]
    fn loads_json_build_config() -> TestResult<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "mountPoint": "/srv/mount",
                "tempPath": "/srv/temp",
                "exportPath": "/srv/export",
                "driverRoot": "/srv/drivers",
                "updateRoot": "/srv/updates",
                "baseImageRoot": "/srv/sbi",
                "yunonaPath": "/srv/yunona",
                "windowsTools": {"dismPath": "C:/Windows/System32/dism.exe"}
            }"#,
        )?;
        let config = load_build_config(&path)?;
        assert_eq!(config.agent_root, Some(PathBuf::from("/srv/yunona")));
        assert_eq!(
            config.servicing.tool_path,
            PathBuf::from("C:/Windows/System32/dism.exe")
        );
        Ok(())
    }

    #[test]
    fn malformed_build_config_reports_path() -> TestResult<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json")?;
        let err = load_build_config(&path).expect_err("malformed");
        assert!(matches!(err, ConfigError::Json { path: ref p, .. } if p == &path));
        Ok(())
    }

    #[test]
    fn device_config_lookup() -> TestResult<()> {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join("X1.json"),
            r#"{"deviceId": "X1", "supportedDeviceIds": [1], "osSupport": [{"osId": 10}]}"#,
        )?;
        let device = load_device_config(dir.path(), "X1")?;
        assert!(device.supports_os(10));

        assert!(matches!(
            load_device_config(dir.path(), "X2"),
            Err(ConfigError::DeviceNotFound { .. })
        ));
        assert!(matches!(
            load_device_config(dir.path(), "../X1"),
            Err(ConfigError::InvalidField { .. })
        ));
        Ok(())
    }

    #[test]
    fn env_overrides_replace_paths() -> TestResult<()> {
        let mut config = BuildConfig::rooted_at(Path::new("/srv/kassia"));
        let vars = HashMap::from([
            (ENV_MOUNT_POINT, "/mnt/kassia"),
            (ENV_DATABASE_URL, "sqlite::memory:"),
            (ENV_EXPORT_PATH, "  "),
        ]);
        apply_env_overrides(&mut config, |name| {
            vars.get(name).map(|value| (*value).to_string())
        })?;
        assert_eq!(config.mount_point, PathBuf::from("/mnt/kassia"));
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(
            config.export_path,
            PathBuf::from("/srv/kassia/runtime/export")
        );
        Ok(())
    }
}
