//! # Design
//!
//! - Centralize application-level errors for bootstrap, job management, and the CLI.
//! - Keep error messages constant while carrying context fields for debugging.

use std::io;
use std::path::PathBuf;

use kassia_core::JobId;
use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading or plan resolution failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: kassia_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: kassia_telemetry::TelemetryError,
    },
    /// Opening the job database failed.
    #[error("job database unavailable")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: kassia_data::DataError,
    },
    /// A job store call failed.
    #[error("job store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: kassia_core::StoreError,
    },
    /// The referenced job does not exist.
    #[error("job not found")]
    JobNotFound {
        /// Requested job identifier.
        job_id: JobId,
    },
    /// A build task ended without reporting back.
    #[error("build task failed")]
    TaskFailed {
        /// Job whose task failed.
        job_id: JobId,
        /// Join failure detail.
        detail: String,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// Output rendering failed.
    #[error("output rendering failed")]
    Render {
        /// Source serialization error.
        source: serde_json::Error,
    },
    /// Argument values were invalid.
    #[error("invalid argument")]
    InvalidArgument {
        /// Argument name.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: kassia_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: kassia_core::StoreError) -> Self {
        Self::Store { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use uuid::Uuid;

    #[test]
    fn app_error_messages_are_constant() {
        let missing = AppError::JobNotFound {
            job_id: Uuid::nil(),
        };
        assert_eq!(missing.to_string(), "job not found");

        let store = AppError::store(
            "jobs.get",
            kassia_core::StoreError::backend("jobs.get", "locked"),
        );
        assert_eq!(store.to_string(), "job store operation failed");
        assert!(store.source().is_some());

        let invalid = AppError::InvalidArgument {
            field: "days",
            reason: "zero",
            value: Some("0".into()),
        };
        assert_eq!(invalid.to_string(), "invalid argument");
    }
}
