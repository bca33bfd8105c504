//! Image lifecycle helpers built on [`ImageServicer`].

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::command::{ServicingCommand, ServicingOperation};
use crate::error::{ServicingError, ServicingResult};
use crate::outcome::{ServicingOutcome, ToolOutput};
use crate::servicer::ImageServicer;

/// Metadata reported for an image file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    /// Image file.
    pub path: PathBuf,
    /// First index reported.
    pub index: u32,
    /// Image name.
    pub name: Option<String>,
    /// Image description.
    pub description: Option<String>,
    /// Architecture label.
    pub architecture: Option<String>,
    /// File size on disk.
    pub size_bytes: Option<u64>,
    /// Number of indexes reported.
    pub image_count: u32,
}

impl ImageInfo {
    /// Parse `Key : Value` lines from info output.
    #[must_use]
    pub fn parse(path: &Path, output: &str) -> Self {
        let mut info = Self {
            path: path.to_path_buf(),
            index: 1,
            ..Self::default()
        };
        for line in output.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Index" => {
                    if let Ok(index) = value.parse::<u32>() {
                        if info.image_count == 0 {
                            info.index = index;
                        }
                        info.image_count += 1;
                    }
                }
                "Name" if info.name.is_none() => info.name = Some(value.to_string()),
                "Description" if info.description.is_none() => {
                    info.description = Some(value.to_string());
                }
                "Architecture" if info.architecture.is_none() => {
                    info.architecture = Some(value.to_string());
                }
                _ => {}
            }
        }
        info.image_count = info.image_count.max(1);
        info
    }
}

fn require_success(
    operation: ServicingOperation,
    output: ToolOutput,
) -> ServicingResult<ToolOutput> {
    match output.outcome() {
        ServicingOutcome::Success => Ok(output),
        ServicingOutcome::NoOp { detail, .. } => Err(ServicingError::Failed {
            operation,
            exit_code: output.exit_code,
            message: detail,
        }),
        ServicingOutcome::Failure { exit_code, message } => Err(ServicingError::Failed {
            operation,
            exit_code,
            message,
        }),
    }
}

/// Read image metadata, including its on-disk size.
///
/// # Errors
///
/// Returns an error when the utility fails or cannot be run.
pub async fn image_info(servicer: &dyn ImageServicer, image: &Path) -> ServicingResult<ImageInfo> {
    let output = servicer
        .execute(&ServicingCommand::Info {
            image: image.to_path_buf(),
        })
        .await?;
    let output = require_success(ServicingOperation::Info, output)?;
    let mut info = ImageInfo::parse(image, &output.stdout);
    info.size_bytes = tokio::fs::metadata(image)
        .await
        .map(|meta| meta.len())
        .ok();
    Ok(info)
}

/// Mount `index` of `image` at `mount_dir`.
///
/// # Errors
///
/// Returns an error when the utility fails or cannot be run.
pub async fn mount(
    servicer: &dyn ImageServicer,
    image: &Path,
    index: u32,
    mount_dir: &Path,
) -> ServicingResult<()> {
    let output = servicer
        .execute(&ServicingCommand::Mount {
            image: image.to_path_buf(),
            index,
            mount_dir: mount_dir.to_path_buf(),
        })
        .await?;
    require_success(ServicingOperation::Mount, output)?;
    info!(image = %image.display(), mount = %mount_dir.display(), index, "image mounted");
    Ok(())
}

/// Unmount `mount_dir`, committing or discarding changes.
///
/// # Errors
///
/// Returns an error when the utility fails or cannot be run.
pub async fn unmount(
    servicer: &dyn ImageServicer,
    mount_dir: &Path,
    commit: bool,
) -> ServicingResult<()> {
    let output = servicer
        .execute(&ServicingCommand::Unmount {
            mount_dir: mount_dir.to_path_buf(),
            commit,
        })
        .await?;
    require_success(ServicingOperation::Unmount, output)?;
    info!(mount = %mount_dir.display(), commit, "image unmounted");
    Ok(())
}

/// Export `index` of `source` to `destination` with maximum compression.
///
/// # Errors
///
/// Returns an error when the utility fails or cannot be run.
pub async fn export(
    servicer: &dyn ImageServicer,
    source: &Path,
    index: u32,
    destination: &Path,
    name: Option<String>,
) -> ServicingResult<()> {
    let output = servicer
        .execute(&ServicingCommand::Export {
            source: source.to_path_buf(),
            index,
            destination: destination.to_path_buf(),
            name,
        })
        .await?;
    require_success(ServicingOperation::Export, output)?;
    info!(destination = %destination.display(), "image exported");
    Ok(())
}

/// Clear stale mount registrations.
///
/// # Errors
///
/// Returns an error when the utility fails or cannot be run.
pub async fn cleanup_mounts(servicer: &dyn ImageServicer) -> ServicingResult<()> {
    let output = servicer.execute(&ServicingCommand::Cleanup).await?;
    require_success(ServicingOperation::Cleanup, output).map(|_| ())
}

/// Inject a driver directory into the mounted image.
///
/// # Errors
///
/// Returns an error only when the utility cannot be run or times out.
pub async fn add_driver(
    servicer: &dyn ImageServicer,
    mount_dir: &Path,
    driver: &Path,
) -> ServicingResult<ServicingOutcome> {
    let output = servicer
        .execute(&ServicingCommand::AddDriver {
            mount_dir: mount_dir.to_path_buf(),
            driver: driver.to_path_buf(),
        })
        .await?;
    Ok(output.outcome())
}

/// Apply an update package to the mounted image.
///
/// # Errors
///
/// Returns an error only when the utility cannot be run or times out.
pub async fn add_package(
    servicer: &dyn ImageServicer,
    mount_dir: &Path,
    package: &Path,
) -> ServicingResult<ServicingOutcome> {
    let output = servicer
        .execute(&ServicingCommand::AddPackage {
            mount_dir: mount_dir.to_path_buf(),
            package: package.to_path_buf(),
        })
        .await?;
    Ok(output.outcome())
}
