//! Executor that applies assets directly through the servicing utility.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use kassia_assets::{AssetDescriptor, AssetKind};
use kassia_servicing::{ImageServicer, ServicingError, ServicingOutcome, add_driver, add_package};
use tracing::{debug, info, warn};

use crate::fsops;
use crate::model::{IntegrationResult, IntegrationTarget, Strategy};

/// Applies drivers with `add-driver` and updates with `add-package`.
#[derive(Clone)]
pub struct ImmediateExecutor {
    servicer: Arc<dyn ImageServicer>,
}

impl ImmediateExecutor {
    /// Executor backed by `servicer`.
    #[must_use]
    pub fn new(servicer: Arc<dyn ImageServicer>) -> Self {
        Self { servicer }
    }

    /// Apply one asset. Always returns a result.
    pub async fn execute(
        &self,
        asset: &AssetDescriptor,
        target: &IntegrationTarget,
    ) -> IntegrationResult {
        let started = Instant::now();
        if !asset.source_path.exists() {
            return IntegrationResult::failure(
                asset,
                Strategy::Immediate,
                format!("source not found: {}", asset.source_path.display()),
                started.elapsed(),
            );
        }

        let measure = target.measure_growth && asset.kind == AssetKind::Update;
        let before = if measure {
            Some(mount_size(target.mount_point.clone()).await)
        } else {
            None
        };

        let outcome = match asset.kind {
            AssetKind::Update => {
                add_package(
                    self.servicer.as_ref(),
                    &target.mount_point,
                    &asset.source_path,
                )
                .await
            }
            _ => {
                add_driver(
                    self.servicer.as_ref(),
                    &target.mount_point,
                    &asset.source_path,
                )
                .await
            }
        };

        match outcome {
            Ok(ServicingOutcome::Success) => {
                let bytes = match before {
                    Some(before) => {
                        let after = mount_size(target.mount_point.clone()).await;
                        Some(after.saturating_sub(before))
                    }
                    None => None,
                };
                info!(asset = %asset.name, kind = %asset.kind, "asset applied to image");
                IntegrationResult::success(
                    asset,
                    Strategy::Immediate,
                    format!("applied {} via servicing utility", asset.type_tag),
                    started.elapsed(),
                )
                .with_bytes(bytes)
            }
            Ok(ServicingOutcome::NoOp { reason, detail }) => {
                debug!(asset = %asset.name, reason = %reason, detail = %detail, "servicing no-op");
                IntegrationResult::noop(asset, Strategy::Immediate, reason, started.elapsed())
            }
            Ok(ServicingOutcome::Failure { exit_code, message }) => {
                warn!(asset = %asset.name, exit_code, "servicing utility rejected asset");
                IntegrationResult::failure(asset, Strategy::Immediate, message, started.elapsed())
            }
            Err(err) => {
                warn!(asset = %asset.name, error = %err, "servicing utility invocation failed");
                IntegrationResult::failure(
                    asset,
                    Strategy::Immediate,
                    describe_servicing_error(&err),
                    started.elapsed(),
                )
            }
        }
    }
}

async fn mount_size(mount_point: PathBuf) -> u64 {
    tokio::task::spawn_blocking(move || fsops::tree_size(&mount_point))
        .await
        .unwrap_or(0)
}

fn describe_servicing_error(err: &ServicingError) -> String {
    match err {
        ServicingError::Spawn { tool, source, .. } => {
            format!("failed to start {}: {source}", tool.display())
        }
        ServicingError::Timeout { operation, timeout } => {
            format!("{operation} timed out after {}s", timeout.as_secs())
        }
        ServicingError::Failed { message, .. } => message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeout_description_names_operation_and_deadline() {
        let err = ServicingError::Timeout {
            operation: kassia_servicing::ServicingOperation::AddPackage,
            timeout: Duration::from_secs(600),
        };
        assert_eq!(describe_servicing_error(&err), "add_package timed out after 600s");
    }
}
