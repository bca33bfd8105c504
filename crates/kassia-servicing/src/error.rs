//! # Design
//!
//! - Spawn and timeout failures are errors; a non-zero exit is an outcome, not an error,
//!   until a helper requires success.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::command::ServicingOperation;

/// Result type for servicing operations.
pub type ServicingResult<T> = Result<T, ServicingError>;

/// Errors raised while invoking the servicing utility.
#[derive(Debug, Error)]
pub enum ServicingError {
    /// The utility could not be started.
    #[error("servicing utility spawn failed")]
    Spawn {
        /// Operation being attempted.
        operation: ServicingOperation,
        /// Utility path.
        tool: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The utility exceeded its deadline and was killed.
    #[error("servicing utility timed out")]
    Timeout {
        /// Operation being attempted.
        operation: ServicingOperation,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The utility reported a failure.
    #[error("servicing operation failed: {message}")]
    Failed {
        /// Operation being attempted.
        operation: ServicingOperation,
        /// Exit code reported by the utility.
        exit_code: i32,
        /// Error text reported by the utility.
        message: String,
    },
}
