//! Job read operations: get, list, unfinished.

use anyhow::Result;
use std::collections::HashMap;

use super::super::db::Registry;
use super::{job_from_row, unit_from_row};
use crate::job::{Job, JobId, TransferUnit};

const JOB_COLUMNS: &str = "id, user_id, course_id, course_title, status, priority, headers_json, \
                           created_at, started_at, completed_at, error_kind, error_message";

const UNIT_COLUMNS: &str = "id, job_id, seq, item_id, title, kind, source_url, destination, \
                            expected_size, status, bytes_transferred, resume_cursor, attempts, \
                            max_attempts, error_kind, error_message";

impl Registry {
    /// Fetch one job with its units, aggregates recomputed.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut job = job_from_row(&row)?;
        job.units = self.units_for(id).await?;
        job.recompute();
        Ok(Some(job))
    }

    async fn units_for(&self, job_id: JobId) -> Result<Vec<TransferUnit>> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM units WHERE job_id = ?1 ORDER BY seq ASC");
        let rows = sqlx::query(&sql).bind(job_id).fetch_all(&self.pool).await?;
        rows.iter().map(unit_from_row).collect()
    }

    /// List jobs (optionally for one user), oldest first, with units.
    pub async fn list_jobs(&self, user_id: Option<&str>) -> Result<Vec<Job>> {
        let rows = match user_id {
            Some(user) => {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = ?1 ORDER BY id ASC");
                sqlx::query(&sql).bind(user).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id ASC");
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        self.with_units(rows.iter().map(job_from_row).collect::<Result<_>>()?)
            .await
    }

    /// Jobs that are not terminal, oldest first. Used on engine start.
    pub async fn load_unfinished(&self) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status NOT IN ('completed', 'failed', 'cancelled') ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        self.with_units(rows.iter().map(job_from_row).collect::<Result<_>>()?)
            .await
    }

    async fn with_units(&self, mut jobs: Vec<Job>) -> Result<Vec<Job>> {
        if jobs.is_empty() {
            return Ok(jobs);
        }
        let sql = format!("SELECT {UNIT_COLUMNS} FROM units ORDER BY job_id ASC, seq ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut by_job: HashMap<JobId, Vec<TransferUnit>> = HashMap::new();
        for row in &rows {
            let unit = unit_from_row(row)?;
            by_job.entry(unit.job_id).or_default().push(unit);
        }
        for job in &mut jobs {
            job.units = by_job.remove(&job.id).unwrap_or_default();
            job.recompute();
        }
        Ok(jobs)
    }
}
