//! Classification of raw utility output into typed outcomes.
//!
//! `classify` is the only place utility text is inspected.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const NOT_APPLICABLE: &str = "not applicable";
const ALREADY_INSTALLED: &str = "already installed";

/// Captured result of one utility invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Process exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration of the invocation.
    pub elapsed: Duration,
}

impl ToolOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            elapsed: Duration::ZERO,
        }
    }

    /// Classify this output.
    #[must_use]
    pub fn outcome(&self) -> ServicingOutcome {
        classify(self.exit_code, &self.stdout, &self.stderr)
    }
}

/// Why an invocation changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    /// The package or driver is already present in the image.
    AlreadyInstalled,
    /// The package does not apply to this image.
    NotApplicable,
}

impl NoOpReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyInstalled => "already_installed",
            Self::NotApplicable => "not_applicable",
        }
    }

    /// Human-readable message for integration results.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::AlreadyInstalled => "already installed",
            Self::NotApplicable => "not applicable to this image",
        }
    }
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Typed result of a servicing invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicingOutcome {
    /// The utility applied the change.
    Success,
    /// The utility declined without error.
    NoOp {
        /// Why nothing changed.
        reason: NoOpReason,
        /// Utility text that led to the classification.
        detail: String,
    },
    /// The utility failed.
    Failure {
        /// Exit code.
        exit_code: i32,
        /// Utility error text.
        message: String,
    },
}

impl ServicingOutcome {
    /// Whether the outcome counts as success, including no-ops.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }

    /// Label used in metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoOp { .. } => "noop",
            Self::Failure { .. } => "failure",
        }
    }
}

/// Translate an exit code and captured text into an outcome.
///
/// A zero exit is success. Otherwise "not applicable" or "already installed" in either stream
/// (case-insensitive) is a no-op, and anything else is a failure carrying the utility's text.
#[must_use]
pub fn classify(exit_code: i32, stdout: &str, stderr: &str) -> ServicingOutcome {
    if exit_code == 0 {
        return ServicingOutcome::Success;
    }
    let lowered_out = stdout.to_lowercase();
    let lowered_err = stderr.to_lowercase();
    let mentions = |needle: &str| lowered_err.contains(needle) || lowered_out.contains(needle);
    let reason = if mentions(NOT_APPLICABLE) {
        Some(NoOpReason::NotApplicable)
    } else if mentions(ALREADY_INSTALLED) {
        Some(NoOpReason::AlreadyInstalled)
    } else {
        None
    };
    let text = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    match reason {
        Some(reason) => ServicingOutcome::NoOp {
            reason,
            detail: text.to_string(),
        },
        None => ServicingOutcome::Failure {
            exit_code,
            message: if text.is_empty() {
                format!("exit code {exit_code}")
            } else {
                text.to_string()
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_is_success_regardless_of_text() {
        assert_eq!(
            classify(0, "The package is already installed", ""),
            ServicingOutcome::Success
        );
    }

    #[test]
    fn noop_reasons_are_matched_case_insensitively_in_either_stream() {
        assert!(matches!(
            classify(87, "", "Error: The package is NOT APPLICABLE to this image."),
            ServicingOutcome::NoOp {
                reason: NoOpReason::NotApplicable,
                ..
            }
        ));
        assert!(matches!(
            classify(1, "Package Already Installed", ""),
            ServicingOutcome::NoOp {
                reason: NoOpReason::AlreadyInstalled,
                ..
            }
        ));
    }

    #[test]
    fn failure_keeps_utility_text_verbatim() {
        let outcome = classify(2, "progress", "  Error: 0x800f0922 access denied \n");
        assert_eq!(
            outcome,
            ServicingOutcome::Failure {
                exit_code: 2,
                message: "Error: 0x800f0922 access denied".into(),
            }
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.label(), "failure");
        assert_eq!(
            classify(5, "", ""),
            ServicingOutcome::Failure {
                exit_code: 5,
                message: "exit code 5".into(),
            }
        );
    }
}
