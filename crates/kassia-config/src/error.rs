//! Error types for configuration loading and validation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a configuration document failed.
    #[error("configuration io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path being read.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A JSON document could not be parsed.
    #[error("configuration json parse failure")]
    Json {
        /// Document path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
    /// A YAML document could not be parsed.
    #[error("configuration yaml parse failure")]
    Yaml {
        /// Document path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_yaml::Error,
    },
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// No device document exists for the requested device.
    #[error("device configuration not found")]
    DeviceNotFound {
        /// Requested device identifier.
        device: String,
        /// Path that was probed.
        path: PathBuf,
    },
    /// The device does not declare support for the requested OS.
    #[error("operating system not supported by device")]
    UnsupportedOs {
        /// Device identifier.
        device: String,
        /// Requested OS identifier.
        os_id: u32,
        /// OS identifiers the device supports.
        supported: Vec<u32>,
    },
}

impl ConfigError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(
        section: &'static str,
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidField {
            section,
            field,
            reason,
            value,
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
