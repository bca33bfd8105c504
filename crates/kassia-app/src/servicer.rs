//! Servicing decorator that records invocation metrics.

use std::sync::Arc;

use async_trait::async_trait;
use kassia_servicing::{ImageServicer, ServicingCommand, ServicingError, ServicingResult, ToolOutput};
use kassia_telemetry::Metrics;
use tracing::debug;

/// Wraps an [`ImageServicer`] and counts every invocation by operation and outcome.
#[derive(Clone)]
pub struct InstrumentedServicer {
    inner: Arc<dyn ImageServicer>,
    metrics: Metrics,
}

impl InstrumentedServicer {
    /// Decorate `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn ImageServicer>, metrics: Metrics) -> Self {
        Self { inner, metrics }
    }
}

fn error_label(error: &ServicingError) -> &'static str {
    match error {
        ServicingError::Timeout { .. } => "timeout",
        ServicingError::Spawn { .. } => "error",
        ServicingError::Failed { .. } => "failure",
    }
}

#[async_trait]
impl ImageServicer for InstrumentedServicer {
    async fn execute(&self, command: &ServicingCommand) -> ServicingResult<ToolOutput> {
        let operation = command.operation();
        let result = self.inner.execute(command).await;
        let outcome = match &result {
            Ok(output) => output.outcome().label(),
            Err(error) => error_label(error),
        };
        debug!(operation = %operation, outcome, "servicing invocation finished");
        self.metrics
            .inc_servicing_invocation(operation.as_str(), outcome);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassia_servicing::ServicingOperation;
    use kassia_test_support::ScriptedServicer;

    #[tokio::test]
    async fn counts_invocations_by_outcome() -> anyhow::Result<()> {
        let scripted = Arc::new(ScriptedServicer::new());
        scripted.push_timeout(ServicingOperation::Cleanup);
        let metrics = Metrics::new()?;
        let servicer = InstrumentedServicer::new(scripted, metrics.clone());

        assert!(servicer.execute(&ServicingCommand::Cleanup).await.is_err());
        servicer.execute(&ServicingCommand::Cleanup).await?;

        let rendered = metrics.render()?;
        assert!(rendered.contains("kassia_servicing_invocations_total"));
        assert!(rendered.contains("outcome=\"timeout\""));
        assert!(rendered.contains("outcome=\"success\""));
        Ok(())
    }
}
