//! Catalog scanning over the configured asset roots.
//!
//! # Design
//! - Walks are sorted by file name so discovery order is stable between runs.
//! - A missing root contributes no assets; a malformed descriptor aborts the scan.

use std::fs;
use std::path::{Path, PathBuf};

use kassia_config::DiscoveryPlan;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::descriptor::{DriverRecord, UpdateRecord};
use crate::error::{AssetError, AssetResult};
use crate::model::{AssetCatalog, AssetDescriptor, AssetKind, TypeTag};

const DESCRIPTOR_EXTENSION: &str = "json";
const IMAGE_EXTENSION: &str = "wim";
const SCRIPT_EXTENSIONS: &[&str] = &["py", "ps1", "cmd", "bat"];
const DRIVER_DETECTION_ORDER: &[(&[&str], TypeTag)] = &[
    (&["inf"], TypeTag::Inf),
    (&["appx", "appxbundle", "msix", "msixbundle"], TypeTag::Appx),
    (&["exe"], TypeTag::Exe),
    (&["msi"], TypeTag::Msi),
];

static IMAGE_OS_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)^w(\d+)_").ok());

/// Directories the scanner walks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRoots {
    /// Driver descriptors.
    pub drivers: Option<PathBuf>,
    /// Update descriptors.
    pub updates: Option<PathBuf>,
    /// Base images.
    pub base_images: Option<PathBuf>,
    /// Post-deployment agent files.
    pub agent: Option<PathBuf>,
}

impl From<&DiscoveryPlan> for CatalogRoots {
    fn from(plan: &DiscoveryPlan) -> Self {
        Self {
            drivers: Some(plan.driver_root.clone()),
            updates: Some(plan.update_root.clone()),
            base_images: Some(plan.base_image_root.clone()),
            agent: plan.agent_root.clone(),
        }
    }
}

/// Walks catalog roots and produces typed descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogScanner;

impl CatalogScanner {
    /// Scan every configured root. Drivers come first, then updates, base images,
    /// and agent files.
    ///
    /// # Errors
    ///
    /// Returns an error when a root cannot be traversed or a descriptor is malformed.
    pub fn scan(roots: &CatalogRoots) -> AssetResult<AssetCatalog> {
        let mut assets = Vec::new();
        if let Some(root) = existing_root(roots.drivers.as_deref(), "drivers") {
            for path in files_with_extensions(root, &[DESCRIPTOR_EXTENSION])? {
                assets.push(load_driver(&path)?);
            }
        }
        if let Some(root) = existing_root(roots.updates.as_deref(), "updates") {
            for path in files_with_extensions(root, &[DESCRIPTOR_EXTENSION])? {
                assets.push(load_update(&path)?);
            }
        }
        if let Some(root) = existing_root(roots.base_images.as_deref(), "base_images") {
            for path in files_with_extensions(root, &[IMAGE_EXTENSION])? {
                assets.push(base_image(path));
            }
        }
        if let Some(root) = existing_root(roots.agent.as_deref(), "agent") {
            for path in files_with_extensions(root, SCRIPT_EXTENSIONS)? {
                assets.push(agent_file(path));
            }
        }
        debug!(assets = assets.len(), "asset catalog scanned");
        Ok(AssetCatalog::new(assets))
    }
}

fn existing_root<'a>(root: Option<&'a Path>, label: &'static str) -> Option<&'a Path> {
    let root = root?;
    if root.is_dir() {
        Some(root)
    } else {
        warn!(root = %root.display(), catalog = label, "catalog root missing; skipping");
        None
    }
}

fn files_with_extensions(root: &Path, extensions: &[&str]) -> AssetResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| AssetError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|wanted| ext.eq_ignore_ascii_case(wanted)))
}

fn read_descriptor<T: serde::de::DeserializeOwned>(path: &Path) -> AssetResult<T> {
    let raw =
        fs::read_to_string(path).map_err(|source| AssetError::io("descriptor.read", path, source))?;
    serde_json::from_str(&raw).map_err(|source| AssetError::Descriptor {
        path: path.to_path_buf(),
        source,
    })
}

fn descriptor_dir(path: &Path) -> AssetResult<&Path> {
    path.parent().ok_or_else(|| AssetError::InvalidDescriptor {
        path: path.to_path_buf(),
        field: "path",
        reason: "no_parent",
    })
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_driver(path: &Path) -> AssetResult<AssetDescriptor> {
    let record: DriverRecord = read_descriptor(path)?;
    let dir = descriptor_dir(path)?;
    let type_tag = match record.driver_type.as_deref() {
        Some(label) => TypeTag::parse(label),
        None => detect_driver_type(dir)?,
    };
    let mut metadata = record.extra;
    metadata.insert(
        "descriptor".to_string(),
        Value::from(path.display().to_string()),
    );
    Ok(AssetDescriptor {
        name: record.driver_name.unwrap_or_else(|| dir_name(dir)),
        kind: AssetKind::Driver,
        type_tag,
        source_path: dir.to_path_buf(),
        supported_os_ids: record.supported_operating_systems,
        supported_device_ids: record.supported_devices,
        family_id: record.driver_family_id,
        install_order: record.order,
        reboot_required: record.reboot_required,
        version: record.version,
        install_arguments: record.install_arguments,
        metadata,
    })
}

fn detect_driver_type(dir: &Path) -> AssetResult<TypeTag> {
    for (extensions, tag) in DRIVER_DETECTION_ORDER {
        if !files_with_extensions(dir, extensions)?.is_empty() {
            return Ok(tag.clone());
        }
    }
    Ok(TypeTag::Unknown("no_payload".to_string()))
}

fn load_update(path: &Path) -> AssetResult<AssetDescriptor> {
    let record: UpdateRecord = read_descriptor(path)?;
    let dir = descriptor_dir(path)?;
    let payload = record
        .download_file_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AssetError::InvalidDescriptor {
            path: path.to_path_buf(),
            field: "downloadFileName",
            reason: "missing",
        })?;
    let source_path = dir.join(payload);
    let type_tag = record.update_type.as_deref().map_or_else(
        || {
            source_path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or_else(|| TypeTag::Unknown(String::new()), TypeTag::parse)
        },
        TypeTag::parse,
    );
    let mut metadata = record.extra;
    metadata.insert(
        "descriptor".to_string(),
        Value::from(path.display().to_string()),
    );
    Ok(AssetDescriptor {
        name: record.update_name.unwrap_or_else(|| dir_name(dir)),
        kind: AssetKind::Update,
        type_tag,
        source_path,
        supported_os_ids: record.supported_operating_systems,
        supported_device_ids: std::collections::BTreeSet::new(),
        family_id: None,
        install_order: record.order,
        reboot_required: record.reboot_required,
        version: record.update_version,
        install_arguments: record.install_arguments,
        metadata,
    })
}

fn base_image(path: PathBuf) -> AssetDescriptor {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let os_ids = IMAGE_OS_PATTERN
        .as_ref()
        .and_then(|pattern| pattern.captures(&stem))
        .and_then(|captures| captures.get(1))
        .and_then(|os| os.as_str().parse::<u32>().ok());
    AssetDescriptor::new(stem, AssetKind::BaseImage, TypeTag::Wim, path).with_os_ids(os_ids)
}

fn agent_file(path: PathBuf) -> AssetDescriptor {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    AssetDescriptor::new(name, AssetKind::PostDeployScript, TypeTag::Script, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    fn write(path: &Path, contents: &str) -> TestResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    #[test]
    fn scans_drivers_updates_and_images_in_stable_order() -> TestResult<()> {
        let root = TempDir::new()?;
        let drivers = root.path().join("drivers");
        let updates = root.path().join("updates");
        let images = root.path().join("sbi");
        write(
            &drivers.join("b_audio/driver.json"),
            r#"{"driverName": "Audio", "order": 20}"#,
        )?;
        write(&drivers.join("b_audio/audio.inf"), "")?;
        write(
            &drivers.join("a_lan/driver.json"),
            r#"{"driverName": "LAN", "supportedDevices": [100], "driverFamilyId": 7}"#,
        )?;
        write(&drivers.join("a_lan/setup.exe"), "")?;
        write(
            &updates.join("kb1/update.json"),
            r#"{"updateName": "KB1", "downloadFileName": "kb1.msu", "supportedOperatingSystems": [10]}"#,
        )?;
        write(&images.join("w10_enterprise.wim"), "")?;

        let catalog = CatalogScanner::scan(&CatalogRoots {
            drivers: Some(drivers.clone()),
            updates: Some(updates.clone()),
            base_images: Some(images),
            agent: Some(root.path().join("missing")),
        })?;

        let names: Vec<&str> = catalog.assets().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["LAN", "Audio", "KB1", "w10_enterprise"]);

        let lan = &catalog.assets()[0];
        assert_eq!(lan.type_tag, TypeTag::Exe);
        assert_eq!(lan.source_path, drivers.join("a_lan"));
        assert_eq!(lan.family_id, Some(7));
        assert!(lan.metadata.contains_key("descriptor"));

        let update = &catalog.assets()[2];
        assert_eq!(update.type_tag, TypeTag::Msu);
        assert_eq!(update.source_path, updates.join("kb1/kb1.msu"));

        let image = &catalog.assets()[3];
        assert!(image.supported_os_ids.contains(&10));
        Ok(())
    }

    #[test]
    fn inf_wins_driver_type_detection() -> TestResult<()> {
        let root = TempDir::new()?;
        let dir = root.path().join("gpu");
        write(&dir.join("driver.json"), "{}")?;
        write(&dir.join("installer.exe"), "")?;
        write(&dir.join("sub/gpu.INF"), "")?;
        let catalog = CatalogScanner::scan(&CatalogRoots {
            drivers: Some(root.path().to_path_buf()),
            ..CatalogRoots::default()
        })?;
        assert_eq!(catalog.assets()[0].type_tag, TypeTag::Inf);
        assert_eq!(catalog.assets()[0].name, "gpu");
        Ok(())
    }

    #[test]
    fn malformed_descriptor_is_an_error() -> TestResult<()> {
        let root = TempDir::new()?;
        let path = root.path().join("bad/driver.json");
        write(&path, "{ nope")?;
        let err = CatalogScanner::scan(&CatalogRoots {
            drivers: Some(root.path().to_path_buf()),
            ..CatalogRoots::default()
        })
        .expect_err("malformed descriptor");
        assert!(matches!(err, AssetError::Descriptor { path: ref p, .. } if p == &path));
        Ok(())
    }

    #[test]
    fn update_without_payload_name_is_invalid() -> TestResult<()> {
        let root = TempDir::new()?;
        write(&root.path().join("kb/update.json"), r#"{"updateName": "KB"}"#)?;
        let err = CatalogScanner::scan(&CatalogRoots {
            updates: Some(root.path().to_path_buf()),
            ..CatalogRoots::default()
        })
        .expect_err("missing payload name");
        assert!(matches!(
            err,
            AssetError::InvalidDescriptor {
                field: "downloadFileName",
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn base_image_lookup_prefers_os_match() -> TestResult<()> {
        let root = TempDir::new()?;
        write(&root.path().join("a_generic.wim"), "")?;
        write(&root.path().join("w11_pro.wim"), "")?;
        write(&root.path().join("w10_pro.wim"), "")?;
        let catalog = CatalogScanner::scan(&CatalogRoots {
            base_images: Some(root.path().to_path_buf()),
            ..CatalogRoots::default()
        })?;
        assert_eq!(
            catalog.base_image_for(10, None),
            Some(root.path().join("w10_pro.wim"))
        );
        assert_eq!(
            catalog.base_image_for(7, None),
            Some(root.path().join("a_generic.wim"))
        );
        assert_eq!(
            catalog.base_image_for(10, Some(&root.path().join("missing.wim"))),
            None
        );
        Ok(())
    }
}
