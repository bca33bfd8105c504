//! Command-line surface of the `kassia` binary.

use std::io::Write;
use std::path::PathBuf;

use anyhow::anyhow;
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use kassia_core::{BuildRequest, JobFilter, JobFlags, JobId, JobStatus};
use kassia_telemetry::DEFAULT_LOG_LEVEL;
use serde::Serialize;
use serde_json::json;

use crate::bootstrap::{AppContext, load_config};
use crate::error::AppError;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for rejected input.
pub const EXIT_VALIDATION: i32 = 2;
/// Exit code for failed work.
pub const EXIT_FAILURE: i32 = 3;

const DEFAULT_LIST_LIMIT: usize = 20;

/// Parsed command line.
#[derive(Debug, Parser)]
#[command(name = "kassia", about = "Offline Windows image customization pipeline")]
pub struct Cli {
    /// Build configuration file (YAML or JSON).
    #[arg(long, global = true, env = "KASSIA_CONFIG")]
    pub config: Option<PathBuf>,
    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "KASSIA_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
    /// `json` or `pretty`; inferred from the build profile when omitted.
    #[arg(long, global = true, env = "KASSIA_LOG_FORMAT")]
    pub log_format: Option<String>,
    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one build and print the final job.
    Build(BuildArgs),
    /// List jobs, newest first.
    Jobs(JobsArgs),
    /// Show one job.
    Job(JobArgs),
    /// Remove finished jobs older than a number of days.
    Prune(PruneArgs),
}

impl Command {
    /// Label used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Build(_) => "build",
            Self::Jobs(_) => "jobs",
            Self::Job(_) => "job",
            Self::Prune(_) => "prune",
        }
    }
}

/// Arguments of `kassia build`.
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Device identifier.
    #[arg(long)]
    pub device: String,
    /// Operating system identifier.
    #[arg(long = "os")]
    pub os_id: u32,
    /// Skip driver integration.
    #[arg(long)]
    pub skip_drivers: bool,
    /// Skip update integration.
    #[arg(long)]
    pub skip_updates: bool,
    /// Skip image inspection of the working copy.
    #[arg(long)]
    pub skip_validation: bool,
}

/// Arguments of `kassia jobs`.
#[derive(Debug, Args)]
pub struct JobsArgs {
    /// Only jobs in this status.
    #[arg(long)]
    pub status: Option<JobStatus>,
    /// Only jobs for this device.
    #[arg(long)]
    pub device: Option<String>,
    /// Maximum number of jobs.
    #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
    pub limit: usize,
}

/// Arguments of `kassia job`.
#[derive(Debug, Args)]
pub struct JobArgs {
    /// Job identifier.
    pub id: JobId,
    /// Include this many recent log entries.
    #[arg(long)]
    pub logs: Option<usize>,
}

/// Arguments of `kassia prune`.
#[derive(Debug, Args)]
pub struct PruneArgs {
    /// Minimum age in days of removed jobs.
    #[arg(long)]
    pub days: u32,
}

#[derive(Debug)]
enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

type CliResult<T> = Result<T, CliError>;

impl CliError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => EXIT_VALIDATION,
            Self::Failure(_) => EXIT_FAILURE,
        }
    }

    fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl From<AppError> for CliError {
    fn from(error: AppError) -> Self {
        let validation = matches!(
            error,
            AppError::Config { .. } | AppError::InvalidArgument { .. } | AppError::JobNotFound { .. }
        );
        let error = anyhow::Error::from(error);
        if validation {
            Self::validation(format!("{error:#}"))
        } else {
            Self::failure(error)
        }
    }
}

/// Run one parsed command, writing JSON results to `out`. Returns the exit code.
pub async fn execute<W: Write + Send>(cli: Cli, out: &mut W) -> i32 {
    let result: CliResult<()> = async {
        let config = load_config(cli.config.as_deref())?;
        let context = AppContext::open(config).await?;
        let outcome = run_command(&context, cli.command, out).await;
        context.close().await;
        outcome
    }
    .await;
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn run_command<W: Write + Send>(
    context: &AppContext,
    command: Command,
    out: &mut W,
) -> CliResult<()> {
    match command {
        Command::Build(args) => handle_build(context, args, out).await,
        Command::Jobs(args) => handle_jobs(context, args, out).await,
        Command::Job(args) => handle_job(context, args, out).await,
        Command::Prune(args) => handle_prune(context, &args, out).await,
    }
}

async fn handle_build<W: Write>(context: &AppContext, args: BuildArgs, out: &mut W) -> CliResult<()> {
    let request = BuildRequest::new(args.device, args.os_id).with_flags(JobFlags {
        skip_drivers: args.skip_drivers,
        skip_updates: args.skip_updates,
        skip_validation: args.skip_validation,
    });
    let job_id = context.manager.submit(request).await?;
    let job = context.manager.wait(job_id).await?;
    render(out, &job)?;
    if job.status == JobStatus::Completed {
        Ok(())
    } else {
        Err(CliError::failure(anyhow!(
            "build {job_id} {}: {}",
            job.status,
            job.error.as_deref().unwrap_or("no error recorded")
        )))
    }
}

async fn handle_jobs<W: Write>(context: &AppContext, args: JobsArgs, out: &mut W) -> CliResult<()> {
    if args.limit == 0 {
        return Err(CliError::validation("--limit must be at least 1"));
    }
    let filter = JobFilter {
        status: args.status,
        device: args.device,
        limit: Some(args.limit),
    };
    let jobs = context.manager.list(&filter).await?;
    render(out, &jobs)
}

async fn handle_job<W: Write>(context: &AppContext, args: JobArgs, out: &mut W) -> CliResult<()> {
    let job = context.manager.get(args.id).await?;
    match args.logs {
        Some(limit) => {
            let logs = context.manager.logs(args.id, limit).await?;
            render(out, &json!({ "job": job, "logs": logs }))
        }
        None => render(out, &job),
    }
}

async fn handle_prune<W: Write>(context: &AppContext, args: &PruneArgs, out: &mut W) -> CliResult<()> {
    if args.days == 0 {
        return Err(CliError::validation("--days must be at least 1"));
    }
    let cutoff = Utc::now() - Duration::days(i64::from(args.days));
    let removed = context.manager.prune_finished_before(cutoff).await?;
    render(out, &json!({ "removed": removed, "cutoff": cutoff }))
}

fn render<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|source| CliError::failure(AppError::Render { source }))?;
    writeln!(out, "{text}").map_err(|source| {
        CliError::failure(AppError::Io {
            operation: "stdout.write",
            path: None,
            source,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use anyhow::Result;
    use kassia_core::Job;
    use kassia_data::MemoryJobStore;
    use kassia_test_support::{CatalogFixture, ScriptedServicer};

    async fn context(fixture: &CatalogFixture) -> Result<AppContext> {
        Ok(AppContext::with_dependencies(
            fixture.config().clone(),
            Arc::new(MemoryJobStore::new()),
            Arc::new(ScriptedServicer::new()),
        )
        .await?)
    }

    #[test]
    fn parses_build_flags() -> Result<()> {
        let cli = Cli::try_parse_from([
            "kassia",
            "build",
            "--device",
            "X1",
            "--os",
            "10",
            "--skip-updates",
        ])?;
        let Command::Build(args) = cli.command else {
            anyhow::bail!("expected build command");
        };
        assert_eq!(args.device, "X1");
        assert_eq!(args.os_id, 10);
        assert!(args.skip_updates);
        assert!(!args.skip_drivers);
        Ok(())
    }

    #[test]
    fn parses_status_filter() -> Result<()> {
        let cli = Cli::try_parse_from(["kassia", "jobs", "--status", "failed"])?;
        let Command::Jobs(args) = cli.command else {
            anyhow::bail!("expected jobs command");
        };
        assert_eq!(args.status, Some(JobStatus::Failed));
        assert_eq!(args.limit, DEFAULT_LIST_LIMIT);
        Ok(())
    }

    #[tokio::test]
    async fn build_prints_completed_job() -> Result<()> {
        let fixture = CatalogFixture::new()?;
        fixture.device("X1", &[10], &[])?;
        fixture.base_image("10_base.wim")?;
        let context = context(&fixture).await?;

        let mut out = Vec::new();
        let command = Command::Build(BuildArgs {
            device: "X1".into(),
            os_id: 10,
            skip_drivers: false,
            skip_updates: false,
            skip_validation: false,
        });
        run_command(&context, command, &mut out)
            .await
            .map_err(|err| anyhow!(err.display_message()))?;
        context.close().await;

        let job: Job = serde_json::from_slice(&out)?;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_os_is_a_validation_error() -> Result<()> {
        let fixture = CatalogFixture::new()?;
        fixture.device("X1", &[10], &[])?;
        let context = context(&fixture).await?;

        let mut out = Vec::new();
        let command = Command::Build(BuildArgs {
            device: "X1".into(),
            os_id: 11,
            skip_drivers: false,
            skip_updates: false,
            skip_validation: false,
        });
        let Err(err) = run_command(&context, command, &mut out).await else {
            anyhow::bail!("unsupported os was accepted");
        };
        assert_eq!(err.exit_code(), EXIT_VALIDATION);
        assert!(out.is_empty());
        let jobs = context.manager.list(&JobFilter::default()).await?;
        assert!(jobs.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn prune_rejects_zero_days() -> Result<()> {
        let fixture = CatalogFixture::new()?;
        let context = context(&fixture).await?;
        let mut out = Vec::new();
        let Err(err) = handle_prune(&context, &PruneArgs { days: 0 }, &mut out).await else {
            anyhow::bail!("zero days accepted");
        };
        assert_eq!(err.exit_code(), EXIT_VALIDATION);
        Ok(())
    }
}
