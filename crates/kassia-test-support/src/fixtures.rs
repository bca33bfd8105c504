//! Temporary catalog, device, and runtime trees.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use kassia_config::{BuildConfig, DeviceConfig, OsSupport};
use serde_json::Value;
use tempfile::TempDir;

/// A temporary workspace laid out like [`BuildConfig::rooted_at`].
#[derive(Debug)]
pub struct CatalogFixture {
    root: TempDir,
    config: BuildConfig,
}

impl CatalogFixture {
    /// Create an empty fixture with catalog and runtime directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary tree cannot be created.
    pub fn new() -> Result<Self> {
        let root = TempDir::new()?;
        let mut config = BuildConfig::rooted_at(root.path());
        config.agent_root = Some(root.path().join("assets").join("agent"));
        config.database_url = format!(
            "sqlite://{}",
            root.path().join("runtime").join("kassia.db").display()
        );
        for dir in [
            &config.driver_root,
            &config.update_root,
            &config.base_image_root,
            &config.device_config_dir,
            &config.mount_point,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(Self { root, config })
    }

    /// Fixture root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Build configuration pointing into the fixture.
    #[must_use]
    pub const fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Mutable build configuration.
    pub const fn config_mut(&mut self) -> &mut BuildConfig {
        &mut self.config
    }

    /// Write a driver descriptor plus empty payload files under `drivers/<dir>`.
    ///
    /// # Errors
    ///
    /// Returns an error if files cannot be written.
    pub fn driver(&self, dir: &str, descriptor: &Value, payloads: &[&str]) -> Result<PathBuf> {
        let path = self.config.driver_root.join(dir);
        write_descriptor(&path, "driver.json", descriptor, payloads)?;
        Ok(path)
    }

    /// Write an update descriptor plus payload files under `updates/<dir>`.
    ///
    /// # Errors
    ///
    /// Returns an error if files cannot be written.
    pub fn update(&self, dir: &str, descriptor: &Value, payloads: &[&str]) -> Result<PathBuf> {
        let path = self.config.update_root.join(dir);
        write_descriptor(&path, "update.json", descriptor, payloads)?;
        Ok(path)
    }

    /// Write a base image file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn base_image(&self, name: &str) -> Result<PathBuf> {
        let path = self.config.base_image_root.join(name);
        fs::write(&path, b"base-image")?;
        Ok(path)
    }

    /// Write a post-deployment agent file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn agent_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let root = self
            .config
            .agent_root
            .clone()
            .unwrap_or_else(|| self.path().join("assets").join("agent"));
        fs::create_dir_all(&root)?;
        let path = root.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write a device document supporting `os_ids` and return it.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub fn device(&self, device_id: &str, os_ids: &[u32], hardware: &[u32]) -> Result<DeviceConfig> {
        let device = DeviceConfig {
            device_id: device_id.to_string(),
            supported_device_ids: hardware.iter().copied().collect(),
            os_support: os_ids
                .iter()
                .map(|os_id| OsSupport {
                    os_id: *os_id,
                    driver_family_ids: Vec::new(),
                })
                .collect(),
            description: None,
        };
        let path = self
            .config
            .device_config_dir
            .join(format!("{device_id}.json"));
        fs::write(path, serde_json::to_string_pretty(&device)?)?;
        Ok(device)
    }
}

fn write_descriptor(dir: &Path, file: &str, descriptor: &Value, payloads: &[&str]) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(file), serde_json::to_string_pretty(descriptor)?)?;
    for payload in payloads {
        let path = dir.join(payload);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, b"payload")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_catalog_entries_under_config_roots() -> Result<()> {
        let fixture = CatalogFixture::new()?;
        let driver = fixture.driver("lan", &json!({"driverName": "LAN"}), &["lan.inf"])?;
        assert!(driver.join("driver.json").is_file());
        assert!(driver.join("lan.inf").is_file());
        let device = fixture.device("tablet", &[10], &[100])?;
        assert!(device.supports_os(10));
        assert!(
            fixture
                .config()
                .device_config_dir
                .join("tablet.json")
                .is_file()
        );
        fixture.config().validate()?;
        Ok(())
    }
}
