//! # Design
//!
//! - Only conditions that stop the whole loop are errors; per-asset problems become failed results.
//! - Messages are constant; paths travel as fields.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for integration operations.
pub type Result<T> = std::result::Result<T, IntegrationError>;

/// Errors that abort an integration run.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// The mount point does not contain the expected root marker.
    #[error("mount point is not ready")]
    MountNotReady {
        /// Mount point checked.
        mount_point: PathBuf,
        /// Marker directory expected inside the mount.
        marker: String,
    },
    /// File-system failure outside any single asset.
    #[error("integration io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Directory traversal failure.
    #[error("integration walk failure")]
    Walk {
        /// Operation identifier.
        operation: &'static str,
        /// Root being walked.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Sidecar serialization failure.
    #[error("integration json failure")]
    Json {
        /// Operation identifier.
        operation: &'static str,
        /// Sidecar path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// A path could not be expressed relative to its root.
    #[error("path outside copy root")]
    OutsideRoot {
        /// Offending path.
        path: PathBuf,
    },
}

impl IntegrationError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walk(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walk {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure was caused by a full disk.
    #[must_use]
    pub fn is_storage_full(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == io::ErrorKind::StorageFull,
            Self::Walk { source, .. } => source
                .io_error()
                .is_some_and(|err| err.kind() == io::ErrorKind::StorageFull),
            _ => false,
        }
    }

    /// Human-readable description including the path and cause.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.is_storage_full() {
            return match self {
                Self::Io { path, .. } | Self::Walk { path, .. } => {
                    format!("disk full while writing {}", path.display())
                }
                _ => "disk full".to_string(),
            };
        }
        match self {
            Self::MountNotReady {
                mount_point,
                marker,
            } => format!(
                "mount point {} has no {marker} directory",
                mount_point.display()
            ),
            Self::Io {
                operation,
                path,
                source,
            } => format!("{operation} failed for {}: {source}", path.display()),
            Self::Walk {
                operation,
                path,
                source,
            } => format!("{operation} failed for {}: {source}", path.display()),
            Self::Json {
                operation,
                path,
                source,
            } => format!("{operation} failed for {}: {source}", path.display()),
            Self::OutsideRoot { path } => format!("path outside copy root: {}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_full_is_reported_as_disk_full() {
        let err = IntegrationError::io(
            "copy_tree.copy_entry",
            "/mnt/Users/Public/Yunona/Drivers/gpu/setup.exe",
            io::Error::from(io::ErrorKind::StorageFull),
        );
        assert!(err.is_storage_full());
        assert!(err.describe().starts_with("disk full"));
    }

    #[test]
    fn other_io_keeps_operation_and_cause() {
        let err = IntegrationError::io(
            "copy_tree.create_dir",
            "/mnt/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_storage_full());
        assert_eq!(err.describe(), "copy_tree.create_dir failed for /mnt/x: denied");
        assert_eq!(err.to_string(), "integration io failure");
    }
}
