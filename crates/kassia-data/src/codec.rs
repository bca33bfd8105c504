//! Column encoding shared by the SQL store.

use chrono::{DateTime, SecondsFormat, Utc};
use kassia_core::{BuildStage, Job, JobFlags, JobLogEntry, LogLevel, StoreError, StoreResult};
use serde_json::{Map, Value};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

/// Fixed-width RFC 3339 so text ordering matches time ordering.
pub(crate) fn encode_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn encode_optional_time(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(encode_time)
}

fn decode_time(field: &'static str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| corrupt(field, value))
}

fn corrupt(field: &'static str, value: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        field,
        value: Some(value.into()),
    }
}

fn column<'r, T>(row: &'r SqliteRow, field: &'static str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(field)
        .map_err(|_| StoreError::Corrupt { field, value: None })
}

fn narrow<T: TryFrom<i64>>(field: &'static str, value: i64) -> StoreResult<T> {
    T::try_from(value).map_err(|_| corrupt(field, value.to_string()))
}

pub(crate) fn encode_json<T: serde::Serialize>(field: &'static str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|source| StoreError::backend(field, source))
}

/// Decode one row of the `jobs` table.
pub(crate) fn decode_job(row: &SqliteRow) -> StoreResult<Job> {
    let id: String = column(row, "id")?;
    let status: String = column(row, "status")?;
    let current_stage: Option<String> = column(row, "current_stage")?;
    let created_at: String = column(row, "created_at")?;
    let started_at: Option<String> = column(row, "started_at")?;
    let completed_at: Option<String> = column(row, "completed_at")?;
    let results: String = column(row, "results")?;
    let flags: String = column(row, "flags")?;

    Ok(Job {
        id: Uuid::parse_str(&id).map_err(|_| corrupt("id", id.clone()))?,
        device: column(row, "device")?,
        os_id: narrow("os_id", column(row, "os_id")?)?,
        status: status.parse()?,
        current_stage: current_stage
            .as_deref()
            .map(str::parse::<BuildStage>)
            .transpose()?,
        stage_number: narrow("stage_number", column(row, "stage_number")?)?,
        total_stages: narrow("total_stages", column(row, "total_stages")?)?,
        progress_percent: narrow("progress_percent", column(row, "progress_percent")?)?,
        stage_detail: column(row, "stage_detail")?,
        created_at: decode_time("created_at", &created_at)?,
        started_at: started_at
            .as_deref()
            .map(|value| decode_time("started_at", value))
            .transpose()?,
        completed_at: completed_at
            .as_deref()
            .map(|value| decode_time("completed_at", value))
            .transpose()?,
        error: column(row, "error")?,
        results: serde_json::from_str::<Map<String, Value>>(&results)
            .map_err(|_| corrupt("results", results.clone()))?,
        flags: serde_json::from_str::<JobFlags>(&flags).map_err(|_| corrupt("flags", flags.clone()))?,
        created_by: column(row, "created_by")?,
    })
}

/// Decode one row of the `job_logs` table.
pub(crate) fn decode_log(row: &SqliteRow) -> StoreResult<JobLogEntry> {
    let logged_at: String = column(row, "logged_at")?;
    let level: String = column(row, "level")?;
    Ok(JobLogEntry {
        timestamp: decode_time("logged_at", &logged_at)?,
        level: level.parse::<LogLevel>()?,
        message: column(row, "message")?,
        component: column(row, "component")?,
        category: column(row, "category")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoded_times_sort_lexically() {
        let earlier = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).single();
        let later = Utc.with_ymd_and_hms(2026, 11, 4, 5, 6, 7).single();
        let (Some(earlier), Some(later)) = (earlier, later) else {
            panic!("valid timestamps");
        };
        assert!(encode_time(earlier) < encode_time(later));
        assert_eq!(decode_time("t", &encode_time(earlier)).ok(), Some(earlier));
    }

    #[test]
    fn bad_time_is_corrupt() {
        assert!(matches!(
            decode_time("created_at", "yesterday"),
            Err(StoreError::Corrupt {
                field: "created_at",
                ..
            })
        ));
    }
}
