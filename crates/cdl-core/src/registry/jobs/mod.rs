//! Job and unit CRUD, split into read and write operations.

mod read;
mod write;

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{ErrorKind, JobError};
use crate::job::{Job, JobStatus, Priority, TransferUnit, UnitKind, UnitStatus};

fn error_from_columns(kind: Option<String>, message: Option<String>) -> Option<JobError> {
    let kind = ErrorKind::from_str(kind.as_deref()?)?;
    Some(JobError::new(kind, message.unwrap_or_default()))
}

fn error_columns(err: &Option<JobError>) -> (Option<&'static str>, Option<&str>) {
    match err {
        Some(e) => (Some(e.kind.as_str()), Some(e.message.as_str())),
        None => (None, None),
    }
}

fn opt_u64(v: Option<i64>) -> Option<u64> {
    v.map(|n| n.max(0) as u64)
}

/// Build a job (without units) from a `jobs` row.
fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    let headers_json: Option<String> = row.get("headers_json");
    let request_headers: HashMap<String, String> = headers_json
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str)
        .transpose()?
        .unwrap_or_default();

    let mut job = Job::new(
        row.get::<String, _>("user_id"),
        row.get::<String, _>("course_id"),
        row.get::<String, _>("course_title"),
        Priority::from_str(&priority).ok_or_else(|| anyhow!("unknown priority {:?}", priority))?,
        Vec::new(),
        row.get("created_at"),
    );
    job.id = row.get("id");
    job.status = JobStatus::from_str(&status).ok_or_else(|| anyhow!("unknown job status {:?}", status))?;
    job.request_headers = request_headers;
    job.started_at = row.get("started_at");
    job.completed_at = row.get("completed_at");
    job.last_error = error_from_columns(row.get("error_kind"), row.get("error_message"));
    Ok(job)
}

fn unit_from_row(row: &SqliteRow) -> Result<TransferUnit> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let destination: String = row.get("destination");
    let mut unit = TransferUnit::new(
        row.get::<i64, _>("seq") as u32,
        row.get::<String, _>("item_id"),
        row.get::<String, _>("title"),
        UnitKind::from_str(&kind).ok_or_else(|| anyhow!("unknown unit kind {:?}", kind))?,
        row.get::<String, _>("source_url"),
        PathBuf::from(destination),
        opt_u64(row.get("expected_size")),
        row.get::<i64, _>("max_attempts") as u32,
    );
    unit.id = row.get("id");
    unit.job_id = row.get("job_id");
    unit.status = UnitStatus::from_str(&status).ok_or_else(|| anyhow!("unknown unit status {:?}", status))?;
    unit.bytes_transferred = row.get::<i64, _>("bytes_transferred").max(0) as u64;
    unit.resume_cursor = row.get::<i64, _>("resume_cursor").max(0) as u64;
    unit.attempts = row.get::<i64, _>("attempts").max(0) as u32;
    unit.last_error = error_from_columns(row.get("error_kind"), row.get("error_message"));
    Ok(unit)
}
