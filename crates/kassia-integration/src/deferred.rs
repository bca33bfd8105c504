//! Executor that stages installers inside the image for first-boot installation.
//!
//! # Design
//! - Each asset lands in `<staging>/<Drivers|Updates>/<name>` with one install script and
//!   one `kassia-staged.json` sidecar.
//! - A destination whose sidecar matches the asset is left untouched and reported as a no-op.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use kassia_assets::{AssetDescriptor, AssetKind, TypeTag};
use kassia_servicing::NoOpReason;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{IntegrationError, Result};
use crate::fsops::{self, CopyStats};
use crate::model::{IntegrationResult, IntegrationTarget, Strategy};

/// Sidecar file written next to every staged asset.
pub const STAGED_SIDECAR: &str = "kassia-staged.json";
const DRIVERS_DIR: &str = "Drivers";
const UPDATES_DIR: &str = "Updates";
const REBOOT_MARKER: &str = "REBOOT_REQUIRED";
const AGENT_CONFIG: &str = "config.json";

/// Metadata describing a staged asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRecord {
    /// Asset name.
    pub name: String,
    /// Asset category label.
    pub kind: String,
    /// Declared version.
    pub version: Option<String>,
    /// Format label.
    pub type_tag: String,
    /// Reboot requirement.
    pub reboot_required: bool,
    /// Staging time.
    pub staged_at: DateTime<Utc>,
    /// Catalog location the asset came from.
    pub original_path: PathBuf,
    /// Generated install script.
    pub install_script: String,
    /// Files copied.
    pub files_copied: u64,
    /// Bytes copied.
    pub bytes_copied: u64,
}

impl StagedRecord {
    fn matches(&self, asset: &AssetDescriptor) -> bool {
        self.name == asset.name
            && self.version == asset.version
            && self.type_tag == asset.type_tag.as_str()
            && self.original_path == asset.source_path
    }
}

/// Stages app packages, executables, and installer bundles.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredExecutor;

impl DeferredExecutor {
    /// Stage one asset. Always returns a result.
    pub async fn execute(
        &self,
        asset: &AssetDescriptor,
        target: &IntegrationTarget,
    ) -> IntegrationResult {
        let started = Instant::now();
        let owned_asset = asset.clone();
        let staging_dir = target.staging_dir();
        let staged = tokio::task::spawn_blocking(move || stage(&owned_asset, &staging_dir)).await;
        let elapsed = started.elapsed();
        match staged {
            Ok(Ok(Staged::Fresh { path, stats })) => {
                info!(
                    asset = %asset.name,
                    staged = %path.display(),
                    files = stats.files,
                    bytes = stats.bytes,
                    "asset staged for deferred installation"
                );
                IntegrationResult::success(
                    asset,
                    Strategy::Deferred,
                    format!("staged {} files for first-boot installation", stats.files),
                    elapsed,
                )
                .with_bytes(Some(stats.bytes))
                .with_staged_path(path)
            }
            Ok(Ok(Staged::Existing { path })) => {
                IntegrationResult::noop(asset, Strategy::Deferred, NoOpReason::AlreadyInstalled, elapsed)
                    .with_staged_path(path)
            }
            Ok(Err(StageFailure::MissingSource)) => IntegrationResult::failure(
                asset,
                Strategy::Deferred,
                format!("source not found: {}", asset.source_path.display()),
                elapsed,
            ),
            Ok(Err(StageFailure::Io(err))) => {
                warn!(asset = %asset.name, error = %err, "deferred staging failed");
                IntegrationResult::failure(asset, Strategy::Deferred, err.describe(), elapsed)
            }
            Err(join) => IntegrationResult::failure(
                asset,
                Strategy::Deferred,
                format!("staging task failed: {join}"),
                elapsed,
            ),
        }
    }

    /// Copy the post-deployment agent into the staging root unless its config is present.
    ///
    /// Returns `true` when files were copied.
    ///
    /// # Errors
    ///
    /// Returns an error when the copy fails.
    pub fn ensure_agent(agent_root: &Path, staging_dir: &Path) -> Result<bool> {
        if !agent_root.is_dir() {
            warn!(agent = %agent_root.display(), "agent source missing; skipping");
            return Ok(false);
        }
        if staging_dir.join(AGENT_CONFIG).exists() {
            return Ok(false);
        }
        let stats = fsops::copy_tree(agent_root, staging_dir)?;
        info!(files = stats.files, staging = %staging_dir.display(), "agent files copied into image");
        Ok(true)
    }
}

enum Staged {
    Fresh { path: PathBuf, stats: CopyStats },
    Existing { path: PathBuf },
}

enum StageFailure {
    MissingSource,
    Io(IntegrationError),
}

impl From<IntegrationError> for StageFailure {
    fn from(value: IntegrationError) -> Self {
        Self::Io(value)
    }
}

/// Destination directory for `asset` under `staging_dir`.
#[must_use]
pub fn staging_destination(asset: &AssetDescriptor, staging_dir: &Path) -> PathBuf {
    let bucket = if asset.kind == AssetKind::Update {
        UPDATES_DIR
    } else {
        DRIVERS_DIR
    };
    staging_dir.join(bucket).join(asset.staging_name())
}

fn stage(
    asset: &AssetDescriptor,
    staging_dir: &Path,
) -> std::result::Result<Staged, StageFailure> {
    if !asset.source_path.exists() {
        return Err(StageFailure::MissingSource);
    }
    let destination = staging_destination(asset, staging_dir);
    let sidecar = destination.join(STAGED_SIDECAR);
    if read_sidecar(&sidecar).is_some_and(|existing| existing.matches(asset)) {
        return Ok(Staged::Existing { path: destination });
    }

    match populate(asset, &destination, &sidecar) {
        Ok(stats) => Ok(Staged::Fresh {
            path: destination,
            stats,
        }),
        Err(err) => {
            if let Err(cleanup) = fs::remove_dir_all(&destination) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %destination.display(), error = %cleanup, "partial staging left behind");
                }
            }
            Err(err.into())
        }
    }
}

/// Copy the payload, then write the install script and the sidecar.
fn populate(asset: &AssetDescriptor, destination: &Path, sidecar: &Path) -> Result<CopyStats> {
    let stats = fsops::copy_tree(asset.source_dir(), destination)?;
    let (script_name, script) = install_script(asset, destination)?;
    let script_path = destination.join(script_name);
    fs::write(&script_path, script)
        .map_err(|err| IntegrationError::io("deferred.write_script", &script_path, err))?;

    let record = StagedRecord {
        name: asset.name.clone(),
        kind: asset.kind.as_str().to_string(),
        version: asset.version.clone(),
        type_tag: asset.type_tag.as_str().to_string(),
        reboot_required: asset.reboot_required,
        staged_at: Utc::now(),
        original_path: asset.source_path.clone(),
        install_script: script_name.to_string(),
        files_copied: stats.files,
        bytes_copied: stats.bytes,
    };
    let json = serde_json::to_string_pretty(&record).map_err(|source| IntegrationError::Json {
        operation: "deferred.sidecar.serialize",
        path: sidecar.to_path_buf(),
        source,
    })?;
    fs::write(sidecar, json)
        .map_err(|err| IntegrationError::io("deferred.sidecar.write", sidecar, err))?;
    Ok(stats)
}

fn read_sidecar(path: &Path) -> Option<StagedRecord> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn install_script(
    asset: &AssetDescriptor,
    destination: &Path,
) -> Result<(&'static str, String)> {
    match asset.type_tag {
        TypeTag::Appx => {
            let packages = fsops::files_with_extensions(
                destination,
                &["appx", "appxbundle", "msix", "msixbundle"],
            )?;
            Ok(("install.ps1", powershell_script(asset, &packages)))
        }
        TypeTag::Msi => {
            let installers = payloads(asset, destination, &["msi"])?;
            let args = asset
                .install_arguments
                .as_deref()
                .unwrap_or("/quiet /norestart");
            let lines = installers
                .iter()
                .map(|file| format!("msiexec /i \"{file}\" {args}"))
                .collect::<Vec<_>>();
            Ok(("install.cmd", batch_script(asset, &lines)))
        }
        _ => {
            let installers = payloads(asset, destination, &["exe"])?;
            let default_args = if asset.kind == AssetKind::Update {
                "/quiet /norestart"
            } else {
                "/S /V\"/qn\""
            };
            let args = asset.install_arguments.as_deref().unwrap_or(default_args);
            let lines = installers
                .iter()
                .map(|file| format!("\"{file}\" {args}"))
                .collect::<Vec<_>>();
            Ok(("install.cmd", batch_script(asset, &lines)))
        }
    }
}

fn payloads(
    asset: &AssetDescriptor,
    destination: &Path,
    extensions: &[&str],
) -> Result<Vec<String>> {
    if asset.source_path.is_file() {
        return Ok(asset
            .source_path
            .file_name()
            .map(|name| vec![name.to_string_lossy().into_owned()])
            .unwrap_or_default());
    }
    fsops::files_with_extensions(destination, extensions)
}

fn powershell_script(asset: &AssetDescriptor, packages: &[String]) -> String {
    let mut lines = vec![
        format!("# Deferred installation for {}", asset.name),
        format!("# Version: {}", asset.version.as_deref().unwrap_or("unknown")),
        "$ErrorActionPreference = 'Stop'".to_string(),
        "Set-Location -Path $PSScriptRoot".to_string(),
        "$failed = $false".to_string(),
    ];
    for package in packages {
        lines.push(format!(
            "try {{ Add-AppxPackage -Path '{package}' -ForceApplicationShutdown }} catch {{ Write-Host \"Failed to install {package}: $_\"; $failed = $true }}"
        ));
    }
    if asset.reboot_required {
        lines.push(format!(
            "if (-not $failed) {{ New-Item -ItemType File -Path '{REBOOT_MARKER}' -Force | Out-Null }}"
        ));
    }
    lines.push("if ($failed) { exit 1 }".to_string());
    lines.join("\r\n")
}

fn batch_script(asset: &AssetDescriptor, commands: &[String]) -> String {
    let mut lines = vec![
        "@echo off".to_string(),
        format!("REM Deferred installation for {}", asset.name),
        format!(
            "REM Version: {}",
            asset.version.as_deref().unwrap_or("unknown")
        ),
        "cd /d \"%~dp0\"".to_string(),
        "set INSTALL_RESULT=0".to_string(),
    ];
    for command in commands {
        lines.push(command.clone());
        lines.push("if errorlevel 1 set INSTALL_RESULT=1".to_string());
    }
    if asset.reboot_required {
        lines.push(format!(
            "if %INSTALL_RESULT% equ 0 echo REBOOT_REQUIRED=true > {REBOOT_MARKER}"
        ));
    }
    lines.push("exit /b %INSTALL_RESULT%".to_string());
    lines.join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    fn exe_driver(root: &Path) -> TestResult<AssetDescriptor> {
        let source = root.join("catalog/touchpad");
        fs::create_dir_all(&source)?;
        fs::write(source.join("driver.json"), "{}")?;
        fs::write(source.join("setup.exe"), b"binary")?;
        let mut asset = AssetDescriptor::new("Touchpad", AssetKind::Driver, TypeTag::Exe, source);
        asset.reboot_required = true;
        Ok(asset)
    }

    #[tokio::test]
    async fn staging_writes_payload_script_and_sidecar() -> TestResult<()> {
        let temp = TempDir::new()?;
        let asset = exe_driver(temp.path())?;
        let target = IntegrationTarget::new(temp.path().join("mount"), "Users/Public/Yunona");

        let result = DeferredExecutor.execute(&asset, &target).await;
        assert!(result.succeeded, "{}", result.message);
        assert_eq!(result.strategy, Strategy::Deferred);
        let staged = target.staging_dir().join("Drivers/touchpad");
        assert_eq!(result.staged_path.as_deref(), Some(staged.as_path()));
        assert_eq!(result.bytes_added, Some(8));

        assert!(staged.join("setup.exe").is_file());
        let script = fs::read_to_string(staged.join("install.cmd"))?;
        assert!(script.contains("\"setup.exe\" /S /V\"/qn\""));
        assert!(script.contains(REBOOT_MARKER));
        let record: StagedRecord =
            serde_json::from_str(&fs::read_to_string(staged.join(STAGED_SIDECAR))?)?;
        assert_eq!(record.files_copied, 2);
        assert_eq!(record.install_script, "install.cmd");
        Ok(())
    }

    #[tokio::test]
    async fn restaging_matching_asset_is_already_installed() -> TestResult<()> {
        let temp = TempDir::new()?;
        let asset = exe_driver(temp.path())?;
        let target = IntegrationTarget::new(temp.path().join("mount"), "Yunona");

        let first = DeferredExecutor.execute(&asset, &target).await;
        assert!(first.noop.is_none());
        let second = DeferredExecutor.execute(&asset, &target).await;
        assert!(second.succeeded);
        assert_eq!(second.noop, Some(NoOpReason::AlreadyInstalled));
        Ok(())
    }

    #[tokio::test]
    async fn msi_update_uses_msiexec_with_payload_name() -> TestResult<()> {
        let temp = TempDir::new()?;
        let dir = temp.path().join("catalog/vcredist");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("vc.msi"), b"m")?;
        let mut asset =
            AssetDescriptor::new("VC Runtime", AssetKind::Update, TypeTag::Msi, dir.join("vc.msi"));
        asset.install_arguments = Some("/qn".into());
        let target = IntegrationTarget::new(temp.path().join("mount"), "Yunona");

        let result = DeferredExecutor.execute(&asset, &target).await;
        assert!(result.succeeded, "{}", result.message);
        let script =
            fs::read_to_string(target.staging_dir().join("Updates/vc/install.cmd"))?;
        assert!(script.contains("msiexec /i \"vc.msi\" /qn"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_fails_without_staging() -> TestResult<()> {
        let temp = TempDir::new()?;
        let asset = AssetDescriptor::new(
            "Ghost",
            AssetKind::Driver,
            TypeTag::Appx,
            temp.path().join("nowhere"),
        );
        let target = IntegrationTarget::new(temp.path().join("mount"), "Yunona");
        let result = DeferredExecutor.execute(&asset, &target).await;
        assert!(!result.succeeded);
        assert!(result.message.starts_with("source not found"));
        assert!(!target.staging_dir().exists());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_copy_removes_partial_destination() -> TestResult<()> {
        let temp = TempDir::new()?;
        let asset = exe_driver(temp.path())?;
        std::os::unix::fs::symlink(
            temp.path().join("missing.bin"),
            asset.source_dir().join("zz-broken.bin"),
        )?;
        let target = IntegrationTarget::new(temp.path().join("mount"), "Yunona");

        let result = DeferredExecutor.execute(&asset, &target).await;
        assert!(!result.succeeded);
        assert!(!target.staging_dir().join("Drivers/touchpad").exists());
        Ok(())
    }

    #[test]
    fn agent_is_copied_once() -> TestResult<()> {
        let temp = TempDir::new()?;
        let agent = temp.path().join("agent");
        fs::create_dir_all(&agent)?;
        fs::write(agent.join(AGENT_CONFIG), "{}")?;
        fs::write(agent.join("agent.py"), "print()")?;
        let staging = temp.path().join("mount/Yunona");
        assert!(DeferredExecutor::ensure_agent(&agent, &staging)?);
        assert!(staging.join("agent.py").is_file());
        assert!(!DeferredExecutor::ensure_agent(&agent, &staging)?);
        Ok(())
    }
}
