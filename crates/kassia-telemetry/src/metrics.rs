//! Prometheus-backed metrics registry.
//!
//! # Design
//! - Collector registration stays private; callers record through typed methods.
//! - One registry per process, cloned cheaply through an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Metrics registry shared by the orchestrator and integration layers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    jobs_total: IntCounterVec,
    stage_duration_ms: IntGaugeVec,
    integration_results_total: IntCounterVec,
    servicing_invocations_total: IntCounterVec,
    active_jobs: IntGauge,
}

/// Point-in-time view of selected collectors.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Builds currently running.
    pub active_jobs: i64,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Metrics")
            .field("active_jobs", &self.inner.active_jobs.get())
            .finish_non_exhaustive()
    }
}

fn register<C>(registry: &Registry, name: &'static str, collector: C) -> Result<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    Ok(collector)
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a registry with every Kassia collector registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let jobs_total = register(
            &registry,
            "kassia_jobs_total",
            counter_vec(
                "kassia_jobs_total",
                "Builds that reached a terminal status",
                &["status"],
            )?,
        )?;
        let stage_duration_ms = register(
            &registry,
            "kassia_stage_duration_ms",
            IntGaugeVec::new(
                Opts::new(
                    "kassia_stage_duration_ms",
                    "Duration of the most recent run of each stage (ms)",
                ),
                &["stage"],
            )
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "kassia_stage_duration_ms",
                source,
            })?,
        )?;
        let integration_results_total = register(
            &registry,
            "kassia_integration_results_total",
            counter_vec(
                "kassia_integration_results_total",
                "Asset integration results by kind, strategy and outcome",
                &["kind", "strategy", "outcome"],
            )?,
        )?;
        let servicing_invocations_total = register(
            &registry,
            "kassia_servicing_invocations_total",
            counter_vec(
                "kassia_servicing_invocations_total",
                "Servicing utility invocations by operation and outcome",
                &["operation", "outcome"],
            )?,
        )?;
        let active_jobs = register(
            &registry,
            "kassia_active_jobs",
            IntGauge::with_opts(Opts::new("kassia_active_jobs", "Builds currently running"))
                .map_err(|source| TelemetryError::MetricsRegister {
                    name: "kassia_active_jobs",
                    source,
                })?,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                jobs_total,
                stage_duration_ms,
                integration_results_total,
                servicing_invocations_total,
                active_jobs,
            }),
        })
    }

    /// Count a build reaching `status`.
    pub fn inc_job(&self, status: &str) {
        self.inner.jobs_total.with_label_values(&[status]).inc();
    }

    /// Record how long `stage` took.
    pub fn observe_stage(&self, stage: &str, duration: Duration) {
        self.inner
            .stage_duration_ms
            .with_label_values(&[stage])
            .set(Self::duration_to_ms(duration));
    }

    /// Count one asset integration result.
    pub fn inc_integration_result(&self, kind: &str, strategy: &str, outcome: &str) {
        self.inner
            .integration_results_total
            .with_label_values(&[kind, strategy, outcome])
            .inc();
    }

    /// Count one servicing invocation.
    pub fn inc_servicing_invocation(&self, operation: &str, outcome: &str) {
        self.inner
            .servicing_invocations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Mark a build as started.
    pub fn job_started(&self) {
        self.inner.active_jobs.inc();
    }

    /// Mark a build as finished.
    pub fn job_finished(&self) {
        self.inner.active_jobs.dec();
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_jobs: self.inner.active_jobs.get(),
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_renders_kassia_collectors() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_job("completed");
        metrics.observe_stage("wim_mount", Duration::from_millis(1_500));
        metrics.inc_integration_result("driver", "immediate", "success");
        metrics.inc_servicing_invocation("mount", "success");
        metrics.job_started();

        let rendered = metrics.render()?;
        assert!(rendered.contains("kassia_jobs_total{status=\"completed\"} 1"));
        assert!(rendered.contains("kassia_stage_duration_ms{stage=\"wim_mount\"} 1500"));
        assert!(rendered.contains("kassia_servicing_invocations_total"));
        assert_eq!(metrics.snapshot().active_jobs, 1);

        metrics.job_finished();
        assert_eq!(metrics.snapshot().active_jobs, 0);
        Ok(())
    }
}
