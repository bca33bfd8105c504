//! Scripted stand-in for the servicing utility.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kassia_servicing::{
    ImageServicer, ServicingCommand, ServicingError, ServicingOperation, ServicingResult,
    ToolOutput,
};

const DEFAULT_INFO: &str = "Index : 1\nName : Scripted Image\nDescription : test\nArchitecture : x64\n";

/// One queued response.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Return this output.
    Output(ToolOutput),
    /// Fail with a timeout.
    Timeout,
}

#[derive(Debug, Default)]
struct ScriptState {
    queued: HashMap<ServicingOperation, VecDeque<Scripted>>,
    calls: Vec<ServicingCommand>,
}

/// Fake [`ImageServicer`] with queued outcomes per operation and a call log.
///
/// Unqueued calls succeed. A successful mount creates the marker directory; a successful
/// export writes a small destination file.
#[derive(Debug)]
pub struct ScriptedServicer {
    state: Mutex<ScriptState>,
    marker: String,
    delay: Option<Duration>,
}

impl Default for ScriptedServicer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedServicer {
    /// Servicer that succeeds at everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState::default()),
            marker: "Windows".to_string(),
            delay: None,
        }
    }

    /// Sleep before answering each call.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue an output for the next call of `operation`.
    pub fn push(&self, operation: ServicingOperation, output: ToolOutput) {
        self.push_scripted(operation, Scripted::Output(output));
    }

    /// Queue a timeout for the next call of `operation`.
    pub fn push_timeout(&self, operation: ServicingOperation) {
        self.push_scripted(operation, Scripted::Timeout);
    }

    fn push_scripted(&self, operation: ServicingOperation, scripted: Scripted) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queued
            .entry(operation)
            .or_default()
            .push_back(scripted);
    }

    /// Every command received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ServicingCommand> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    /// Operation of every command received, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<ServicingOperation> {
        self.calls().iter().map(ServicingCommand::operation).collect()
    }

    /// Number of calls of `operation`.
    #[must_use]
    pub fn count(&self, operation: ServicingOperation) -> usize {
        self.operations()
            .into_iter()
            .filter(|seen| *seen == operation)
            .count()
    }

    fn apply_side_effects(&self, command: &ServicingCommand) {
        match command {
            ServicingCommand::Mount { mount_dir, .. } => {
                let _ = fs::create_dir_all(mount_dir.join(&self.marker));
            }
            ServicingCommand::Export { destination, .. } => {
                if let Some(parent) = destination.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                let _ = fs::write(destination, b"exported-image");
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ImageServicer for ScriptedServicer {
    async fn execute(&self, command: &ServicingCommand) -> ServicingResult<ToolOutput> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let operation = command.operation();
        let scripted = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls.push(command.clone());
            state
                .queued
                .get_mut(&operation)
                .and_then(VecDeque::pop_front)
        };
        let output = match scripted {
            Some(Scripted::Timeout) => {
                return Err(ServicingError::Timeout {
                    operation,
                    timeout: Duration::from_secs(1),
                });
            }
            Some(Scripted::Output(output)) => output,
            None if operation == ServicingOperation::Info => ToolOutput::success(DEFAULT_INFO),
            None => ToolOutput::success(""),
        };
        if output.exit_code == 0 {
            self.apply_side_effects(command);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn queued_outputs_are_consumed_in_order() -> anyhow::Result<()> {
        let servicer = ScriptedServicer::new();
        servicer.push(
            ServicingOperation::AddPackage,
            ToolOutput::failure(1, "already installed"),
        );
        let command = ServicingCommand::AddPackage {
            mount_dir: PathBuf::from("m"),
            package: PathBuf::from("kb.msu"),
        };
        assert_eq!(servicer.execute(&command).await?.exit_code, 1);
        assert_eq!(servicer.execute(&command).await?.exit_code, 0);
        assert_eq!(servicer.count(ServicingOperation::AddPackage), 2);
        Ok(())
    }

    #[tokio::test]
    async fn mount_creates_marker() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let servicer = ScriptedServicer::new();
        servicer
            .execute(&ServicingCommand::Mount {
                image: temp.path().join("a.wim"),
                index: 1,
                mount_dir: temp.path().join("mount"),
            })
            .await?;
        assert!(temp.path().join("mount/Windows").is_dir());
        Ok(())
    }
}
