//! # Design
//!
//! - Constant messages; paths and operations travel as fields.
//! - A malformed descriptor is a configuration error and carries the descriptor path.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for catalog operations.
pub type AssetResult<T> = Result<T, AssetError>;

/// Errors produced while scanning the asset catalog.
#[derive(Debug, Error)]
pub enum AssetError {
    /// IO failure while reading the catalog.
    #[error("asset catalog io failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Directory traversal failure.
    #[error("asset catalog walk failure")]
    Walk {
        /// Root being walked.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// A descriptor file could not be parsed.
    #[error("asset descriptor parse failure")]
    Descriptor {
        /// Descriptor path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// A descriptor parsed but contained an unusable value.
    #[error("invalid asset descriptor")]
    InvalidDescriptor {
        /// Descriptor path.
        path: PathBuf,
        /// Offending field.
        field: &'static str,
        /// Static reason.
        reason: &'static str,
    },
}

impl AssetError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
