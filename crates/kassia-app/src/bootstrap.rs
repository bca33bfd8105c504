//! Process wiring for the `kassia` binary.

use std::path::Path;
use std::sync::Arc;

use kassia_config::{BuildConfig, apply_env_overrides, load_build_config};
use kassia_core::JobStore;
use kassia_data::SqliteJobStore;
use kassia_events::EventBus;
use kassia_servicing::{DismServicer, ImageServicer};
use kassia_telemetry::{LogFormat, LoggingConfig, Metrics, build_sha, init_logging};
use tracing::{info, warn};

use crate::cli::{self, Cli};
use crate::error::{AppError, AppResult};
use crate::manager::{JobManager, ManagerSettings};

/// Long-lived services shared by every command.
#[derive(Clone)]
pub struct AppContext {
    /// Effective build configuration.
    pub config: BuildConfig,
    /// Job manager.
    pub manager: JobManager,
    /// Process metrics.
    pub metrics: Metrics,
}

impl AppContext {
    /// Open the SQLite job database and the configured servicing tool.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened or metrics cannot register.
    pub async fn open(config: BuildConfig) -> AppResult<Self> {
        let store = SqliteJobStore::connect(&config.database_url)
            .await
            .map_err(|source| AppError::Data {
                operation: "job_store.connect",
                source,
            })?;
        let servicer = DismServicer::from_config(&config.servicing);
        Self::with_dependencies(config, Arc::new(store), Arc::new(servicer)).await
    }

    /// Wire the context around injected collaborators and reconcile unfinished jobs.
    ///
    /// # Errors
    ///
    /// Returns an error when metrics cannot register or reconciliation cannot read the store.
    pub async fn with_dependencies(
        config: BuildConfig,
        store: Arc<dyn JobStore>,
        servicer: Arc<dyn ImageServicer>,
    ) -> AppResult<Self> {
        let metrics = Metrics::new().map_err(|source| AppError::Telemetry {
            operation: "telemetry.metrics",
            source,
        })?;
        let manager = JobManager::new(
            ManagerSettings::from(config.clone()),
            store,
            servicer,
            EventBus::new(),
            metrics.clone(),
        );
        let reconciled = manager.recover().await?;
        if !reconciled.is_empty() {
            warn!(count = reconciled.len(), "failed jobs interrupted by a previous run");
        }
        Ok(Self {
            config,
            manager,
            metrics,
        })
    }

    /// Flush pending progress and stop background tasks.
    pub async fn close(&self) {
        self.manager.shutdown().await;
    }
}

/// Load the build configuration, falling back to the default layout under the
/// working directory, then apply `KASSIA_*` overrides.
///
/// # Errors
///
/// Returns an error when the file cannot be loaded or the result fails validation.
pub fn load_config(path: Option<&Path>) -> AppResult<BuildConfig> {
    let mut config = match path {
        Some(path) => load_build_config(path)
            .map_err(|source| AppError::config("build_config.load", source))?,
        None => {
            let base = std::env::current_dir().map_err(|source| AppError::Io {
                operation: "current_dir",
                path: None,
                source,
            })?;
            BuildConfig::rooted_at(&base)
        }
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())
        .map_err(|source| AppError::config("build_config.env", source))?;
    Ok(config)
}

/// Parse arguments, install logging, and run one command. Returns the exit code.
pub async fn run_app() -> i32 {
    use clap::Parser as _;

    let cli = Cli::parse();
    let logging = LoggingConfig {
        level: &cli.log_level,
        format: cli
            .log_format
            .as_deref()
            .map_or_else(LogFormat::infer, LogFormat::from_label),
        build_sha: build_sha(),
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("error: logging initialisation failed: {err}");
        return cli::EXIT_FAILURE;
    }
    info!(command = cli.command.label(), "kassia starting");
    cli::execute(cli, &mut std::io::stdout()).await
}
