//! SQLite-backed registry implementation.
//!
//! Handles connection, migrations, and timestamp helpers. Job and unit CRUD
//! lives in `jobs`; per-user usage queries in `usage`.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the job registry.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/cdl/jobs.db` on Linux.
#[derive(Clone)]
pub struct Registry {
    pub(crate) pool: Pool<Sqlite>,
    admissions: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Registry {
    fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            admissions: Arc::default(),
        }
    }

    /// Per-user admission turn. Holding it across the quota check and the
    /// insert keeps two submissions of one user from both passing the check.
    pub async fn admission_turn(&self, user_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.admissions.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(map.entry(user_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Open (or create) the default registry and run migrations.
    pub async fn open_default() -> Result<Self> {
        let db_path = crate::paths::default_db_path()?;
        Self::open_at(db_path).await
    }

    /// Open (or create) the registry at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let db = Registry::from_pool(pool);
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // - `headers_json` holds request headers the catalog attached to the course.
        // - Unit `error_kind` uses the snake_case `ErrorKind` names.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                course_title TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                headers_json TEXT,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                updated_at INTEGER NOT NULL,
                error_kind TEXT,
                error_message TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(id),
                seq INTEGER NOT NULL,
                item_id TEXT NOT NULL,
                title TEXT NOT NULL,
                kind TEXT NOT NULL,
                source_url TEXT NOT NULL,
                destination TEXT NOT NULL,
                expected_size INTEGER,
                status TEXT NOT NULL,
                bytes_transferred INTEGER NOT NULL DEFAULT 0,
                resume_cursor INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                error_kind TEXT,
                error_message TEXT,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS units_job ON units (job_id, seq);")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS jobs_user ON jobs (user_id, created_at);")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps and job records).
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
/// Open an in-memory registry for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<Registry> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = Registry::from_pool(pool);
    db.migrate().await?;
    Ok(db)
}
