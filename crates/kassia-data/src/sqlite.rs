//! SQLite-backed [`JobStore`].

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kassia_core::{Job, JobFilter, JobId, JobLogEntry, JobPatch, JobStore, StoreError, StoreResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::codec::{decode_job, decode_log, encode_json, encode_optional_time, encode_time};
use crate::error::{DataError, Result};

const SELECT_JOB: &str = r"
    SELECT id, device, os_id, status, current_stage, stage_number, total_stages,
           progress_percent, stage_detail, created_at, started_at, completed_at, error,
           results, flags, created_by
    FROM jobs
    WHERE id = ?1
";

const SELECT_JOBS: &str = r"
    SELECT id, device, os_id, status, current_stage, stage_number, total_stages,
           progress_percent, stage_detail, created_at, started_at, completed_at, error,
           results, flags, created_by
    FROM jobs
    WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR device = ?2)
    ORDER BY created_at DESC, rowid DESC
    LIMIT ?3
";

const INSERT_JOB: &str = r"
    INSERT INTO jobs (
        id, device, os_id, status, current_stage, stage_number, total_stages,
        progress_percent, stage_detail, created_at, started_at, completed_at, error,
        results, flags, created_by, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
";

const UPDATE_JOB: &str = r"
    UPDATE jobs
    SET status = ?2,
        current_stage = ?3,
        stage_number = ?4,
        progress_percent = ?5,
        stage_detail = ?6,
        started_at = ?7,
        completed_at = ?8,
        error = ?9,
        results = ?10,
        updated_at = ?11
    WHERE id = ?1 AND status NOT IN ('completed', 'failed', 'cancelled')
";

const INSERT_LOG: &str = r"
    INSERT INTO job_logs (job_id, logged_at, level, message, component, category)
    SELECT ?1, ?2, ?3, ?4, ?5, ?6
    WHERE EXISTS (SELECT 1 FROM jobs WHERE id = ?1)
";

const SELECT_LOG_TAIL: &str = r"
    SELECT logged_at, level, message, component, category
    FROM job_logs
    WHERE job_id = ?1
    ORDER BY id DESC
    LIMIT ?2
";

const DELETE_LOGS: &str = "DELETE FROM job_logs WHERE job_id = ?1";
const DELETE_JOB: &str = "DELETE FROM jobs WHERE id = ?1";

const PRUNE_LOGS: &str = r"
    DELETE FROM job_logs
    WHERE job_id IN (
        SELECT id FROM jobs
        WHERE status IN ('completed', 'failed', 'cancelled') AND created_at < ?1
    )
";

const PRUNE_JOBS: &str = r"
    DELETE FROM jobs
    WHERE status IN ('completed', 'failed', 'cancelled') AND created_at < ?1
";

/// Job store persisted in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating when missing) the database at `url` and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the url is invalid, the file cannot be opened, or migrations fail.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|source| DataError::InvalidUrl {
                url: url.to_string(),
                source,
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:");
        if !in_memory {
            ensure_parent(options.get_filename().to_path_buf()).await?;
        }

        // Each in-memory connection is a separate database.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|source| DataError::ConnectFailed {
                url: url.to_string(),
                source,
            })?;
        Self::new(pool).await
    }

    /// Wrap an existing pool, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_job(
        tx: &mut Transaction<'_, Sqlite>,
        id: JobId,
    ) -> StoreResult<Option<SqliteRow>> {
        sqlx::query(SELECT_JOB)
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|source| StoreError::backend("jobs.select", source))
    }
}

async fn ensure_parent(path: PathBuf) -> Result<()> {
    let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
        return Ok(());
    };
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| DataError::Io {
            path: parent.to_path_buf(),
            source,
        })
}

fn backend(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| StoreError::backend(operation, source)
}

fn limit_param(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &Job) -> StoreResult<()> {
        let result = sqlx::query(INSERT_JOB)
            .bind(job.id.to_string())
            .bind(&job.device)
            .bind(i64::from(job.os_id))
            .bind(job.status.as_str())
            .bind(job.current_stage.map(|stage| stage.as_str()))
            .bind(i64::from(job.stage_number))
            .bind(i64::from(job.total_stages))
            .bind(i64::from(job.progress_percent))
            .bind(job.stage_detail.as_deref())
            .bind(encode_time(job.created_at))
            .bind(encode_optional_time(job.started_at))
            .bind(encode_optional_time(job.completed_at))
            .bind(job.error.as_deref())
            .bind(encode_json("results", &job.results)?)
            .bind(encode_json("flags", &job.flags)?)
            .bind(&job.created_by)
            .bind(encode_time(Utc::now()))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                debug!(job_id = %job.id, "job inserted");
                Ok(())
            }
            Err(err)
                if err
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation()) =>
            {
                Err(StoreError::Duplicate { job_id: job.id })
            }
            Err(err) => Err(StoreError::backend("jobs.insert", err)),
        }
    }

    async fn update(&self, id: JobId, patch: &JobPatch) -> StoreResult<Job> {
        let mut tx = self.pool.begin().await.map_err(backend("jobs.begin"))?;
        let row = Self::fetch_job(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound { job_id: id })?;
        let mut job = decode_job(&row)?;
        if job.is_terminal() {
            debug!(job_id = %id, status = %job.status, "update to finished job ignored");
            return Ok(job);
        }
        job.apply(patch);

        let updated = sqlx::query(UPDATE_JOB)
            .bind(id.to_string())
            .bind(job.status.as_str())
            .bind(job.current_stage.map(|stage| stage.as_str()))
            .bind(i64::from(job.stage_number))
            .bind(i64::from(job.progress_percent))
            .bind(job.stage_detail.as_deref())
            .bind(encode_optional_time(job.started_at))
            .bind(encode_optional_time(job.completed_at))
            .bind(job.error.as_deref())
            .bind(encode_json("results", &job.results)?)
            .bind(encode_time(Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(backend("jobs.update"))?;
        if updated.rows_affected() == 0 {
            let row = Self::fetch_job(&mut tx, id)
                .await?
                .ok_or(StoreError::NotFound { job_id: id })?;
            job = decode_job(&row)?;
        }
        tx.commit().await.map_err(backend("jobs.commit"))?;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>> {
        let row = sqlx::query(SELECT_JOB)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("jobs.get"))?;
        row.as_ref().map(decode_job).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(SELECT_JOBS)
            .bind(filter.status.map(|status| status.as_str()))
            .bind(filter.device.as_deref())
            .bind(limit_param(filter.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(backend("jobs.list"))?;
        rows.iter().map(decode_job).collect()
    }

    async fn append_log(&self, id: JobId, entry: &JobLogEntry) -> StoreResult<()> {
        let inserted = sqlx::query(INSERT_LOG)
            .bind(id.to_string())
            .bind(encode_time(entry.timestamp))
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .bind(&entry.component)
            .bind(entry.category.as_deref())
            .execute(&self.pool)
            .await
            .map_err(backend("job_logs.insert"))?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::NotFound { job_id: id });
        }
        Ok(())
    }

    async fn logs(&self, id: JobId, limit: usize) -> StoreResult<Vec<JobLogEntry>> {
        let rows = sqlx::query(SELECT_LOG_TAIL)
            .bind(id.to_string())
            .bind(limit_param(Some(limit)))
            .fetch_all(&self.pool)
            .await
            .map_err(backend("job_logs.tail"))?;
        let mut entries = rows.iter().map(decode_log).collect::<StoreResult<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    async fn delete(&self, id: JobId) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend("jobs.begin"))?;
        sqlx::query(DELETE_LOGS)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend("job_logs.delete"))?;
        let removed = sqlx::query(DELETE_JOB)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend("jobs.delete"))?;
        tx.commit().await.map_err(backend("jobs.commit"))?;
        Ok(removed.rows_affected() > 0)
    }

    async fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = encode_time(cutoff);
        let mut tx = self.pool.begin().await.map_err(backend("jobs.begin"))?;
        sqlx::query(PRUNE_LOGS)
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(backend("job_logs.prune"))?;
        let removed = sqlx::query(PRUNE_JOBS)
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(backend("jobs.prune"))?;
        tx.commit().await.map_err(backend("jobs.commit"))?;
        debug!(removed = removed.rows_affected(), "pruned finished jobs");
        Ok(removed.rows_affected())
    }
}
