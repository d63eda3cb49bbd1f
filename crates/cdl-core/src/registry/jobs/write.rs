//! Job write operations: insert, update, progress, recovery.

use anyhow::Result;
use sqlx::SqliteConnection;

use super::super::db::{unix_timestamp, Registry};
use super::super::usage::count_downloads;
use super::error_columns;
use crate::job::{Job, JobId, TransferUnit, UnitId};
use crate::quota::DownloadCap;

async fn insert_below_cap(conn: &mut SqliteConnection, job: &mut Job, cap: DownloadCap) -> Result<Option<JobId>> {
    let since = unix_timestamp() - cap.period_secs;
    let used = count_downloads(&mut *conn, &job.user_id, since).await?;
    if used >= cap.limit {
        return Ok(None);
    }
    insert_rows(conn, job).await.map(Some)
}

async fn insert_rows(conn: &mut SqliteConnection, job: &mut Job) -> Result<JobId> {
    let now = unix_timestamp();
    let (error_kind, error_message) = error_columns(&job.last_error);
    let headers_json = if job.request_headers.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&job.request_headers)?)
    };

    let job_id = sqlx::query(
        r#"
        INSERT INTO jobs (
            user_id, course_id, course_title, status, priority, headers_json,
            created_at, started_at, completed_at, updated_at, error_kind, error_message
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&job.user_id)
    .bind(&job.course_id)
    .bind(&job.course_title)
    .bind(job.status.as_str())
    .bind(job.priority.as_str())
    .bind(headers_json)
    .bind(job.created_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(now)
    .bind(error_kind)
    .bind(error_message)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    for unit in &mut job.units {
        let (error_kind, error_message) = error_columns(&unit.last_error);
        unit.job_id = job_id;
        unit.destination = crate::paths::job_scoped(&unit.destination, job_id);
        unit.id = sqlx::query(
            r#"
            INSERT INTO units (
                job_id, seq, item_id, title, kind, source_url, destination,
                expected_size, status, bytes_transferred, resume_cursor,
                attempts, max_attempts, error_kind, error_message, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(job_id)
        .bind(unit.seq as i64)
        .bind(&unit.item_id)
        .bind(&unit.title)
        .bind(unit.kind.as_str())
        .bind(&unit.source_url)
        .bind(unit.destination.to_string_lossy().into_owned())
        .bind(unit.expected_size.map(|n| n as i64))
        .bind(unit.status.as_str())
        .bind(unit.bytes_transferred as i64)
        .bind(unit.resume_cursor as i64)
        .bind(unit.attempts as i64)
        .bind(unit.max_attempts as i64)
        .bind(error_kind)
        .bind(error_message)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    }

    job.id = job_id;
    Ok(job_id)
}

impl Registry {
    /// Insert a job and its units in one transaction. Assigns ids to `job` and
    /// its units, and moves each unit into the job's own `job-<id>` directory.
    pub async fn insert_job(&self, job: &mut Job) -> Result<JobId> {
        let mut tx = self.pool.begin().await?;
        let job_id = insert_rows(&mut tx, job).await?;
        tx.commit().await?;
        Ok(job_id)
    }

    /// [`insert_job`](Self::insert_job), unless the user already has `cap.limit`
    /// jobs in the cap's period. The count and the insert share one
    /// `BEGIN IMMEDIATE` transaction, so concurrent writers (in this process or
    /// another) queue behind it. `None` means the cap was reached.
    pub async fn insert_job_capped(&self, job: &mut Job, cap: Option<DownloadCap>) -> Result<Option<JobId>> {
        let Some(cap) = cap else {
            return self.insert_job(job).await.map(Some);
        };
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let inserted = insert_below_cap(&mut conn, job, cap).await;
        let end = if matches!(inserted, Ok(Some(_))) { "COMMIT" } else { "ROLLBACK" };
        if let Err(e) = sqlx::query(end).execute(&mut *conn).await {
            // Never hand a connection with an open transaction back to the pool.
            conn.close_on_drop();
            return Err(e.into());
        }
        inserted
    }

    /// Persist job-level fields (status, timestamps, last error).
    pub async fn update_job(&self, job: &Job) -> Result<()> {
        let (error_kind, error_message) = error_columns(&job.last_error);
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                started_at = ?2,
                completed_at = ?3,
                error_kind = ?4,
                error_message = ?5,
                updated_at = ?6
            WHERE id = ?7
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(error_kind)
        .bind(error_message)
        .bind(unix_timestamp())
        .bind(job.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist every mutable unit field.
    pub async fn update_unit(&self, unit: &TransferUnit) -> Result<()> {
        let (error_kind, error_message) = error_columns(&unit.last_error);
        sqlx::query(
            r#"
            UPDATE units
            SET status = ?1,
                expected_size = ?2,
                bytes_transferred = ?3,
                resume_cursor = ?4,
                attempts = ?5,
                max_attempts = ?6,
                error_kind = ?7,
                error_message = ?8,
                updated_at = ?9
            WHERE id = ?10
            "#,
        )
        .bind(unit.status.as_str())
        .bind(unit.expected_size.map(|n| n as i64))
        .bind(unit.bytes_transferred as i64)
        .bind(unit.resume_cursor as i64)
        .bind(unit.attempts as i64)
        .bind(unit.max_attempts as i64)
        .bind(error_kind)
        .bind(error_message)
        .bind(unix_timestamp())
        .bind(unit.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Durable progress checkpoint: only the byte counters of one unit.
    pub async fn update_unit_progress(&self, unit_id: UnitId, bytes: u64, cursor: u64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE units
            SET bytes_transferred = MAX(bytes_transferred, ?1),
                resume_cursor = ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(bytes as i64)
        .bind(cursor as i64)
        .bind(unix_timestamp())
        .bind(unit_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// After a crash or kill, jobs left Running go back to Queued and units
    /// left Downloading go back to Pending (their cursors are kept).
    /// Returns the number of jobs reset.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;
        let jobs = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued',
                updated_at = ?1
            WHERE status = 'running'
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query(
            r#"
            UPDATE units
            SET status = 'pending',
                updated_at = ?1
            WHERE status = 'downloading'
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(jobs)
    }
}
