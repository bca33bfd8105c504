//! Append-only job log entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Severity attached to a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable problem.
    Warning,
    /// Failure.
    Error,
}

impl LogLevel {
    /// Machine-friendly label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(ModelError::UnknownLabel {
                field: "level",
                value: other.to_string(),
            }),
        }
    }
}

/// Write-once log line recorded against a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogEntry {
    /// Time the entry was produced.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Component that produced the entry.
    pub component: String,
    /// Optional finer-grained category.
    pub category: Option<String>,
}

impl JobLogEntry {
    /// Build an entry stamped with the current time.
    #[must_use]
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            component: component.into(),
            category: None,
        }
    }

    /// Shorthand for an informational entry.
    #[must_use]
    pub fn info(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, component, message)
    }

    /// Shorthand for a warning entry.
    #[must_use]
    pub fn warning(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, component, message)
    }

    /// Shorthand for an error entry.
    #[must_use]
    pub fn error(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, component, message)
    }

    /// Attach a category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}
