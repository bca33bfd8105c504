//! Typed servicing invocations and their argument rendering.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use kassia_config::OperationTimeouts;

/// Operation families, one timeout each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServicingOperation {
    /// Read image metadata.
    Info,
    /// Mount an image index.
    Mount,
    /// Unmount with commit or discard.
    Unmount,
    /// Export an image index.
    Export,
    /// Inject a driver package.
    AddDriver,
    /// Apply an update package.
    AddPackage,
    /// Clear stale mounts.
    Cleanup,
}

impl ServicingOperation {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Export => "export",
            Self::AddDriver => "add_driver",
            Self::AddPackage => "add_package",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for ServicingOperation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One invocation of the servicing utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicingCommand {
    /// `/Get-WimInfo`.
    Info {
        /// Image file.
        image: PathBuf,
    },
    /// `/Mount-Wim`.
    Mount {
        /// Image file.
        image: PathBuf,
        /// Image index.
        index: u32,
        /// Mount directory.
        mount_dir: PathBuf,
    },
    /// `/Unmount-Wim`.
    Unmount {
        /// Mount directory.
        mount_dir: PathBuf,
        /// Commit changes instead of discarding them.
        commit: bool,
    },
    /// `/Export-Image` with maximum compression.
    Export {
        /// Source image file.
        source: PathBuf,
        /// Source index.
        index: u32,
        /// Destination image file.
        destination: PathBuf,
        /// Optional destination image name.
        name: Option<String>,
    },
    /// `/Add-Driver` against a mounted image.
    AddDriver {
        /// Mount directory.
        mount_dir: PathBuf,
        /// Driver directory, searched recursively.
        driver: PathBuf,
    },
    /// `/Add-Package` against a mounted image.
    AddPackage {
        /// Mount directory.
        mount_dir: PathBuf,
        /// Package file.
        package: PathBuf,
    },
    /// `/Cleanup-Wim`.
    Cleanup,
}

impl ServicingCommand {
    /// Operation family of this command.
    #[must_use]
    pub const fn operation(&self) -> ServicingOperation {
        match self {
            Self::Info { .. } => ServicingOperation::Info,
            Self::Mount { .. } => ServicingOperation::Mount,
            Self::Unmount { .. } => ServicingOperation::Unmount,
            Self::Export { .. } => ServicingOperation::Export,
            Self::AddDriver { .. } => ServicingOperation::AddDriver,
            Self::AddPackage { .. } => ServicingOperation::AddPackage,
            Self::Cleanup => ServicingOperation::Cleanup,
        }
    }

    /// Command-line arguments for the utility.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Info { image } => vec![
                "/Get-WimInfo".into(),
                format!("/WimFile:{}", image.display()),
            ],
            Self::Mount {
                image,
                index,
                mount_dir,
            } => vec![
                "/Mount-Wim".into(),
                format!("/WimFile:{}", image.display()),
                format!("/Index:{index}"),
                format!("/MountDir:{}", mount_dir.display()),
            ],
            Self::Unmount { mount_dir, commit } => vec![
                "/Unmount-Wim".into(),
                format!("/MountDir:{}", mount_dir.display()),
                if *commit { "/Commit" } else { "/Discard" }.into(),
            ],
            Self::Export {
                source,
                index,
                destination,
                name,
            } => {
                let mut args = vec![
                    "/Export-Image".into(),
                    format!("/SourceImageFile:{}", source.display()),
                    format!("/SourceIndex:{index}"),
                    format!("/DestinationImageFile:{}", destination.display()),
                    "/Compress:max".into(),
                ];
                if let Some(name) = name {
                    args.push(format!("/DestinationName:{name}"));
                }
                args
            }
            Self::AddDriver { mount_dir, driver } => vec![
                format!("/Image:{}", mount_dir.display()),
                "/Add-Driver".into(),
                format!("/Driver:{}", driver.display()),
                "/Recurse".into(),
                "/ForceUnsigned".into(),
            ],
            Self::AddPackage { mount_dir, package } => vec![
                format!("/Image:{}", mount_dir.display()),
                "/Add-Package".into(),
                format!("/PackagePath:{}", package.display()),
            ],
            Self::Cleanup => vec!["/Cleanup-Wim".into()],
        }
    }
}

/// Per-operation deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicingTimeouts {
    /// Info deadline.
    pub info: Duration,
    /// Mount deadline.
    pub mount: Duration,
    /// Unmount deadline.
    pub unmount: Duration,
    /// Export deadline.
    pub export: Duration,
    /// Driver injection deadline.
    pub add_driver: Duration,
    /// Package application deadline.
    pub add_package: Duration,
    /// Cleanup deadline.
    pub cleanup: Duration,
}

impl ServicingTimeouts {
    /// Deadline for one operation family.
    #[must_use]
    pub const fn for_operation(&self, operation: ServicingOperation) -> Duration {
        match operation {
            ServicingOperation::Info => self.info,
            ServicingOperation::Mount => self.mount,
            ServicingOperation::Unmount => self.unmount,
            ServicingOperation::Export => self.export,
            ServicingOperation::AddDriver => self.add_driver,
            ServicingOperation::AddPackage => self.add_package,
            ServicingOperation::Cleanup => self.cleanup,
        }
    }
}

impl From<&OperationTimeouts> for ServicingTimeouts {
    fn from(value: &OperationTimeouts) -> Self {
        Self {
            info: Duration::from_secs(value.info_secs),
            mount: Duration::from_secs(value.mount_secs),
            unmount: Duration::from_secs(value.unmount_secs),
            export: Duration::from_secs(value.export_secs),
            add_driver: Duration::from_secs(value.add_driver_secs),
            add_package: Duration::from_secs(value.add_package_secs),
            cleanup: Duration::from_secs(value.cleanup_secs),
        }
    }
}

impl Default for ServicingTimeouts {
    fn default() -> Self {
        Self::from(&OperationTimeouts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_mount_and_unmount_arguments() {
        let mount = ServicingCommand::Mount {
            image: PathBuf::from("C:/temp/work.wim"),
            index: 1,
            mount_dir: PathBuf::from("C:/mount"),
        };
        assert_eq!(
            mount.args(),
            vec![
                "/Mount-Wim",
                "/WimFile:C:/temp/work.wim",
                "/Index:1",
                "/MountDir:C:/mount"
            ]
        );
        let discard = ServicingCommand::Unmount {
            mount_dir: PathBuf::from("C:/mount"),
            commit: false,
        };
        assert_eq!(discard.args().last().map(String::as_str), Some("/Discard"));
        assert_eq!(discard.operation(), ServicingOperation::Unmount);
    }

    #[test]
    fn export_appends_name_only_when_given() {
        let mut export = ServicingCommand::Export {
            source: PathBuf::from("a.wim"),
            index: 1,
            destination: PathBuf::from("b.wim"),
            name: None,
        };
        assert_eq!(export.args().last().map(String::as_str), Some("/Compress:max"));
        if let ServicingCommand::Export { name, .. } = &mut export {
            *name = Some("10_tablet".into());
        }
        assert_eq!(
            export.args().last().map(String::as_str),
            Some("/DestinationName:10_tablet")
        );
    }

    #[test]
    fn default_timeouts_follow_operation_table() {
        let timeouts = ServicingTimeouts::default();
        assert_eq!(timeouts.for_operation(ServicingOperation::Info), Duration::from_secs(30));
        assert_eq!(
            timeouts.for_operation(ServicingOperation::Export),
            Duration::from_secs(1_800)
        );
        assert_eq!(
            timeouts.for_operation(ServicingOperation::AddPackage),
            Duration::from_secs(600)
        );
    }
}
