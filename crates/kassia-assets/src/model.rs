//! Asset descriptors, catalogs, and resolver output.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Install order applied when a descriptor does not set one.
pub const DEFAULT_INSTALL_ORDER: i64 = 9_999;

/// Category of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Hardware driver.
    Driver,
    /// Operating system update.
    Update,
    /// Base image the build starts from.
    BaseImage,
    /// File belonging to the post-deployment agent.
    PostDeployScript,
}

impl AssetKind {
    /// Machine-friendly label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Update => "update",
            Self::BaseImage => "base_image",
            Self::PostDeployScript => "post_deploy_script",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Format subtype of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    /// Driver package directory with `.inf` files.
    Inf,
    /// Standalone update package.
    Msu,
    /// Cabinet package.
    Cab,
    /// App package.
    Appx,
    /// Executable installer.
    Exe,
    /// Installer bundle.
    Msi,
    /// Image file.
    Wim,
    /// Script file.
    Script,
    /// Anything else, keeping the original label.
    Unknown(String),
}

impl TypeTag {
    /// Parse a descriptor label or file extension.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "inf" => Self::Inf,
            "msu" => Self::Msu,
            "cab" => Self::Cab,
            "appx" | "appxbundle" | "msix" | "msixbundle" => Self::Appx,
            "exe" => Self::Exe,
            "msi" => Self::Msi,
            "wim" => Self::Wim,
            "script" | "ps1" | "cmd" | "bat" | "py" => Self::Script,
            _ => Self::Unknown(normalized),
        }
    }

    /// Label used in logs and staged metadata.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inf => "inf",
            Self::Msu => "msu",
            Self::Cab => "cab",
            Self::Appx => "appx",
            Self::Exe => "exe",
            Self::Msi => "msi",
            Self::Wim => "wim",
            Self::Script => "script",
            Self::Unknown(label) => label,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Immutable record of one catalog entry. Identity is `source_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Display name.
    pub name: String,
    /// Category.
    pub kind: AssetKind,
    /// Format subtype.
    pub type_tag: TypeTag,
    /// Directory (drivers) or payload file (updates, images, scripts).
    pub source_path: PathBuf,
    /// Supported OS identifiers; empty means universal.
    pub supported_os_ids: BTreeSet<u32>,
    /// Supported hardware identifiers; empty means unrestricted.
    pub supported_device_ids: BTreeSet<u32>,
    /// Driver family, when declared.
    pub family_id: Option<u32>,
    /// Lower values install first.
    pub install_order: i64,
    /// Whether installation requires a reboot.
    pub reboot_required: bool,
    /// Declared version.
    pub version: Option<String>,
    /// Installer arguments for deferred installs.
    pub install_arguments: Option<String>,
    /// Remaining descriptor fields.
    pub metadata: BTreeMap<String, Value>,
}

impl AssetDescriptor {
    /// Minimal descriptor with defaults, mainly for fixtures.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: AssetKind,
        type_tag: TypeTag,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            type_tag,
            source_path: source_path.into(),
            supported_os_ids: BTreeSet::new(),
            supported_device_ids: BTreeSet::new(),
            family_id: None,
            install_order: DEFAULT_INSTALL_ORDER,
            reboot_required: false,
            version: None,
            install_arguments: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the install order.
    #[must_use]
    pub const fn with_order(mut self, install_order: i64) -> Self {
        self.install_order = install_order;
        self
    }

    /// Set the supported OS identifiers.
    #[must_use]
    pub fn with_os_ids(mut self, os_ids: impl IntoIterator<Item = u32>) -> Self {
        self.supported_os_ids = os_ids.into_iter().collect();
        self
    }

    /// Set the supported device identifiers.
    #[must_use]
    pub fn with_device_ids(mut self, device_ids: impl IntoIterator<Item = u32>) -> Self {
        self.supported_device_ids = device_ids.into_iter().collect();
        self
    }

    /// Whether the asset applies to `os_id`.
    #[must_use]
    pub fn supports_os(&self, os_id: u32) -> bool {
        self.supported_os_ids.is_empty() || self.supported_os_ids.contains(&os_id)
    }

    /// Directory holding the asset and its co-located files.
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        if self.source_path.is_dir() {
            &self.source_path
        } else {
            self.source_path.parent().unwrap_or(&self.source_path)
        }
    }

    /// File-system friendly name used for staging directories.
    #[must_use]
    pub fn staging_name(&self) -> String {
        let base = if self.source_path.is_dir() {
            self.source_path.file_name()
        } else {
            self.source_path.file_stem()
        };
        base.and_then(|name| name.to_str())
            .map_or_else(|| sanitize(&self.name), sanitize)
    }
}

fn sanitize(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "asset".to_string()
    } else {
        cleaned
    }
}

/// Every asset found by a scan, in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetCatalog {
    assets: Vec<AssetDescriptor>,
}

impl AssetCatalog {
    /// Build a catalog from descriptors already in discovery order.
    #[must_use]
    pub const fn new(assets: Vec<AssetDescriptor>) -> Self {
        Self { assets }
    }

    /// All assets in discovery order.
    #[must_use]
    pub fn assets(&self) -> &[AssetDescriptor] {
        &self.assets
    }

    /// Assets of one kind in discovery order.
    pub fn of_kind(&self, kind: AssetKind) -> impl Iterator<Item = &AssetDescriptor> {
        self.assets.iter().filter(move |asset| asset.kind == kind)
    }

    /// Number of assets of one kind.
    #[must_use]
    pub fn count(&self, kind: AssetKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Pick the base image for `os_id`.
    ///
    /// An explicit override wins. Otherwise image file names are tried against
    /// `*<os>*.wim`, then `w<os>_*.wim`, then any `.wim`.
    #[must_use]
    pub fn base_image_for(&self, os_id: u32, explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return path.is_file().then(|| path.to_path_buf());
        }
        let os = os_id.to_string();
        let prefixed = format!("w{os}_");
        let images: Vec<&AssetDescriptor> = self.of_kind(AssetKind::BaseImage).collect();
        let by_name = |predicate: &dyn Fn(&str) -> bool| {
            images
                .iter()
                .find(|image| {
                    image
                        .source_path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(predicate)
                })
                .map(|image| image.source_path.clone())
        };
        by_name(&|name| name.contains(&os))
            .or_else(|| by_name(&|name| name.starts_with(&prefixed)))
            .or_else(|| images.first().map(|image| image.source_path.clone()))
    }
}

/// Resolver output: compatible assets in install order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompatibleAssetSet {
    assets: Vec<AssetDescriptor>,
}

impl CompatibleAssetSet {
    /// Wrap assets that are already filtered and ordered.
    #[must_use]
    pub const fn from_ordered(assets: Vec<AssetDescriptor>) -> Self {
        Self { assets }
    }

    /// Assets in install order.
    #[must_use]
    pub fn assets(&self) -> &[AssetDescriptor] {
        &self.assets
    }

    /// Iterate in install order.
    pub fn iter(&self) -> std::slice::Iter<'_, AssetDescriptor> {
        self.assets.iter()
    }

    /// Number of assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Subset of one kind, preserving order.
    #[must_use]
    pub fn of_kind(&self, kind: AssetKind) -> Self {
        Self {
            assets: self
                .assets
                .iter()
                .filter(|asset| asset.kind == kind)
                .cloned()
                .collect(),
        }
    }

    /// Asset names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.assets.iter().map(|asset| asset.name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a CompatibleAssetSet {
    type Item = &'a AssetDescriptor;
    type IntoIter = std::slice::Iter<'a, AssetDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.assets.iter()
    }
}
