//! # Design
//!
//! - Constant error messages with context carried in fields.
//! - Store errors wrap backend failures behind a boxed source so the trait stays backend-neutral.

use std::error::Error;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while decoding model labels.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// A persisted label did not map to a known variant.
    #[error("unknown model label")]
    UnknownLabel {
        /// Field being decoded.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Errors surfaced by [`crate::JobStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced job does not exist.
    #[error("job not found")]
    NotFound {
        /// Missing job identifier.
        job_id: Uuid,
    },
    /// A job with the same identifier already exists.
    #[error("job already exists")]
    Duplicate {
        /// Conflicting job identifier.
        job_id: Uuid,
    },
    /// A stored record could not be decoded.
    #[error("stored job record is corrupt")]
    Corrupt {
        /// Column or field that failed to decode.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// The persistence backend failed.
    #[error("job store backend failure")]
    Backend {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StoreError {
    /// Wrap a backend failure with the operation that triggered it.
    pub fn backend(operation: &'static str, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }
}

impl From<ModelError> for StoreError {
    fn from(error: ModelError) -> Self {
        match error {
            ModelError::UnknownLabel { field, value } => Self::Corrupt {
                field,
                value: Some(value),
            },
        }
    }
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_converts_to_corrupt_store_error() {
        let err: StoreError = ModelError::UnknownLabel {
            field: "status",
            value: "paused".into(),
        }
        .into();
        assert!(matches!(
            err,
            StoreError::Corrupt {
                field: "status",
                value: Some(ref value)
            } if value == "paused"
        ));
        assert_eq!(err.to_string(), "stored job record is corrupt");
    }

    #[test]
    fn backend_error_preserves_source() {
        let err = StoreError::backend("jobs.insert", "disk unavailable");
        assert_eq!(err.to_string(), "job store backend failure");
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("disk unavailable")
        );
    }
}
