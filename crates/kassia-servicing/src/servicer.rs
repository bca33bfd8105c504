//! The servicing seam and its subprocess implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use kassia_config::ServicingConfig;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::command::{ServicingCommand, ServicingTimeouts};
use crate::error::{ServicingError, ServicingResult};
use crate::outcome::ToolOutput;

/// Executes servicing commands against images.
///
/// Implementations return the captured output for every completed invocation, including
/// non-zero exits; only spawn failures and timeouts are errors.
#[async_trait]
pub trait ImageServicer: Send + Sync {
    /// Run one command to completion.
    async fn execute(&self, command: &ServicingCommand) -> ServicingResult<ToolOutput>;
}

/// Runs the configured utility as a subprocess with per-operation deadlines.
#[derive(Debug, Clone)]
pub struct DismServicer {
    tool: PathBuf,
    timeouts: ServicingTimeouts,
}

impl DismServicer {
    /// Build a servicer for `tool`.
    #[must_use]
    pub fn new(tool: impl Into<PathBuf>, timeouts: ServicingTimeouts) -> Self {
        Self {
            tool: tool.into(),
            timeouts,
        }
    }

    /// Build a servicer from configuration.
    #[must_use]
    pub fn from_config(config: &ServicingConfig) -> Self {
        Self::new(config.tool_path.clone(), ServicingTimeouts::from(&config.timeouts))
    }

    /// Utility path.
    #[must_use]
    pub fn tool(&self) -> &Path {
        &self.tool
    }
}

#[async_trait]
impl ImageServicer for DismServicer {
    async fn execute(&self, command: &ServicingCommand) -> ServicingResult<ToolOutput> {
        let operation = command.operation();
        let deadline = self.timeouts.for_operation(operation);
        let args = command.args();
        debug!(tool = %self.tool.display(), operation = %operation, ?args, "invoking servicing utility");

        let started = Instant::now();
        let child = Command::new(&self.tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServicingError::Spawn {
                operation,
                tool: self.tool.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ServicingError::Spawn {
                operation,
                tool: self.tool.clone(),
                source,
            })?,
            Err(_) => {
                warn!(operation = %operation, timeout_secs = deadline.as_secs(), "servicing utility timed out; killed");
                return Err(ServicingError::Timeout {
                    operation,
                    timeout: deadline,
                });
            }
        };

        let result = ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: started.elapsed(),
        };
        debug!(
            operation = %operation,
            exit_code = result.exit_code,
            elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
            "servicing utility finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ServicingOutcome;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_tool_is_a_spawn_error() {
        let dir = TempDir::new().expect("tempdir");
        let servicer = DismServicer::new(dir.path().join("no-such-tool"), ServicingTimeouts::default());
        let err = servicer
            .execute(&ServicingCommand::Cleanup)
            .await
            .expect_err("spawn should fail");
        assert!(matches!(err, ServicingError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_returned_as_output() {
        let servicer = DismServicer::new("/bin/sh", ServicingTimeouts::default());
        let output = servicer
            .execute(&ServicingCommand::Cleanup)
            .await
            .expect("shell runs");
        assert_ne!(output.exit_code, 0);
        assert!(matches!(output.outcome(), ServicingOutcome::Failure { .. }));
    }
}
