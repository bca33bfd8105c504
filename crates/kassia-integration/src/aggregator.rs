//! Ordered, best-effort integration over a resolved asset set.

use std::path::PathBuf;
use std::sync::Arc;

use kassia_assets::CompatibleAssetSet;
use kassia_servicing::ImageServicer;
use kassia_telemetry::Metrics;
use tracing::{info, warn};

use crate::deferred::DeferredExecutor;
use crate::error::{IntegrationError, Result};
use crate::model::{IntegrationReport, IntegrationResult, IntegrationTarget, Strategy};
use crate::router::{Router, strategy_for};

/// Runs the router over assets in order and reports every outcome.
#[derive(Clone)]
pub struct IntegrationAggregator {
    router: Router,
    metrics: Option<Metrics>,
}

impl IntegrationAggregator {
    /// Aggregator whose immediate executor uses `servicer`.
    #[must_use]
    pub fn new(servicer: Arc<dyn ImageServicer>) -> Self {
        Self {
            router: Router::new(servicer),
            metrics: None,
        }
    }

    /// Record results in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Integrate `assets` into `target` strictly in order.
    ///
    /// Per-asset failures are recorded and never stop the loop. `on_result` sees each
    /// result as soon as it is produced.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::MountNotReady`] when the mount marker is missing, or an
    /// error when the agent files cannot be staged. Both are reported before any asset is
    /// touched.
    pub async fn integrate<F>(
        &self,
        assets: &CompatibleAssetSet,
        target: &IntegrationTarget,
        mut on_result: F,
    ) -> Result<IntegrationReport>
    where
        F: FnMut(&IntegrationResult) + Send,
    {
        if !target.is_mounted() {
            return Err(IntegrationError::MountNotReady {
                mount_point: target.mount_point.clone(),
                marker: target.mount_marker.clone(),
            });
        }

        let needs_agent = assets
            .into_iter()
            .any(|asset| strategy_for(&asset.type_tag) == Strategy::Deferred);
        if let Some(agent_root) = target.agent_root.clone().filter(|_| needs_agent) {
            ensure_agent(agent_root, target.staging_dir()).await?;
        }

        let mut results = Vec::with_capacity(assets.len());
        for asset in assets {
            let result = self.router.execute(asset, target).await;
            if result.succeeded {
                info!(asset = %asset.name, strategy = %result.strategy, message = %result.message, "asset integrated");
            } else {
                warn!(asset = %asset.name, strategy = %result.strategy, message = %result.message, "asset integration failed");
            }
            if let Some(metrics) = &self.metrics {
                metrics.inc_integration_result(
                    asset.kind.as_str(),
                    result.strategy.as_str(),
                    result.outcome_label(),
                );
            }
            on_result(&result);
            results.push(result);
        }

        let report = IntegrationReport::new(results);
        info!(
            total = report.summary.total,
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            "integration run finished"
        );
        Ok(report)
    }
}

async fn ensure_agent(agent_root: PathBuf, staging_dir: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || DeferredExecutor::ensure_agent(&agent_root, &staging_dir))
        .await
        .map_err(|join| IntegrationError::io("agent.copy", PathBuf::new(), std::io::Error::other(join)))?
        .map(|_| ())
}
