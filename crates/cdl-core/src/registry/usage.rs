//! Per-user usage figures for the quota gate.

use anyhow::Result;
use sqlx::{Executor, Row, Sqlite};

use super::db::Registry;

pub(super) async fn count_downloads<'e, E>(executor: E, user_id: &str, since: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n
        FROM jobs
        WHERE user_id = ?1 AND created_at >= ?2
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_one(executor)
    .await?;
    let n: i64 = row.get("n");
    Ok(n.max(0) as u64)
}

impl Registry {
    /// Jobs the user submitted at or after `since` (unix seconds), whatever their outcome.
    pub async fn downloads_since(&self, user_id: &str, since: i64) -> Result<u64> {
        count_downloads(&self.pool, user_id, since).await
    }

    /// Bytes of finished files (completed or already on disk) across the user's jobs.
    pub async fn storage_used(&self, user_id: &str) -> Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(u.bytes_transferred), 0) AS bytes
            FROM units u
            JOIN jobs j ON j.id = u.job_id
            WHERE j.user_id = ?1 AND u.status IN ('completed', 'skipped')
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        let bytes: i64 = row.get("bytes");
        Ok(bytes.max(0) as u64)
    }
}
