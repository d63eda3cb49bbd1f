use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::{JobId, JobStatus, Priority, UnitId, UnitKind, UnitStatus, UserId};
use crate::error::JobError;

/// One file of a job: a single course item downloaded to `destination`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferUnit {
    pub id: UnitId,
    pub job_id: JobId,
    /// Position within the job (0-based); dispatch order inside the job.
    pub seq: u32,
    /// Catalog item id.
    pub item_id: String,
    pub title: String,
    pub kind: UnitKind,
    pub source_url: String,
    pub destination: PathBuf,
    /// None until the first response tells us (or the catalog knew it).
    pub expected_size: Option<u64>,
    pub status: UnitStatus,
    pub bytes_transferred: u64,
    /// Offset to resume from; valid only while the `.part` length equals it.
    pub resume_cursor: u64,
    /// Attempts made so far, across runs and operator retries.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<JobError>,
}

impl TransferUnit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        seq: u32,
        item_id: impl Into<String>,
        title: impl Into<String>,
        kind: UnitKind,
        source_url: impl Into<String>,
        destination: PathBuf,
        expected_size: Option<u64>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: 0,
            job_id: 0,
            seq,
            item_id: item_id.into(),
            title: title.into(),
            kind,
            source_url: source_url.into(),
            destination,
            expected_size,
            status: UnitStatus::Pending,
            bytes_transferred: 0,
            resume_cursor: 0,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    /// Retries used: every attempt after the first.
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Bytes this unit contributes to the job total.
    fn total_contribution(&self) -> u64 {
        match (self.status, self.expected_size) {
            (UnitStatus::Skipped, _) => self.bytes_transferred,
            (_, Some(n)) => n.max(self.bytes_transferred),
            (_, None) => self.bytes_transferred,
        }
    }
}

/// Counts and byte totals carried by every terminal job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobSummary {
    pub completed: u32,
    pub failed: u32,
    /// Subset of `completed`: encrypted items and files already on disk.
    pub skipped: u32,
    pub total: u32,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
}

/// One user's request to download a set of items from a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub course_id: String,
    pub course_title: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub units: Vec<TransferUnit>,
    /// Request headers the catalog attached to the course (e.g. a bearer token).
    #[serde(skip_serializing, default)]
    pub request_headers: HashMap<String, String>,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// False while any unfinished unit has an unknown length.
    pub size_known: bool,
    pub completed_items: u32,
    pub failed_items: u32,
    pub skipped_items: u32,
    pub retry_count: u32,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub last_error: Option<JobError>,
}

impl Job {
    pub fn new(
        user_id: impl Into<UserId>,
        course_id: impl Into<String>,
        course_title: impl Into<String>,
        priority: Priority,
        units: Vec<TransferUnit>,
        created_at: i64,
    ) -> Self {
        let mut job = Self {
            id: 0,
            user_id: user_id.into(),
            course_id: course_id.into(),
            course_title: course_title.into(),
            status: JobStatus::Pending,
            priority,
            units,
            request_headers: HashMap::new(),
            total_bytes: 0,
            downloaded_bytes: 0,
            size_known: false,
            completed_items: 0,
            failed_items: 0,
            skipped_items: 0,
            retry_count: 0,
            created_at,
            started_at: None,
            completed_at: None,
            last_error: None,
        };
        job.recompute();
        job
    }

    pub fn unit(&self, unit_id: UnitId) -> Option<&TransferUnit> {
        self.units.iter().find(|u| u.id == unit_id)
    }

    pub(crate) fn unit_mut(&mut self, unit_id: UnitId) -> Option<&mut TransferUnit> {
        self.units.iter_mut().find(|u| u.id == unit_id)
    }

    pub fn total_items(&self) -> u32 {
        self.units.len() as u32
    }

    /// First pending unit in sequence order that `exclude` does not reject.
    pub fn next_pending(&self, exclude: impl Fn(UnitId) -> bool) -> Option<&TransferUnit> {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Pending)
            .find(|u| !exclude(u.id))
    }

    /// Recompute aggregate counters from the units.
    pub fn recompute(&mut self) {
        let mut total_bytes = 0u64;
        let mut downloaded = 0u64;
        let mut size_known = true;
        let (mut completed, mut failed, mut skipped, mut retries) = (0u32, 0u32, 0u32, 0u32);

        for u in &self.units {
            total_bytes += u.total_contribution();
            downloaded += u.bytes_transferred;
            if u.expected_size.is_none() && !u.status.is_final() {
                size_known = false;
            }
            match u.status {
                UnitStatus::Completed => completed += 1,
                UnitStatus::Skipped => {
                    completed += 1;
                    skipped += 1;
                }
                UnitStatus::Failed => failed += 1,
                UnitStatus::Pending | UnitStatus::Downloading | UnitStatus::Paused => {}
            }
            retries += u.retry_count();
        }

        self.total_bytes = total_bytes;
        self.downloaded_bytes = downloaded;
        self.size_known = size_known;
        self.completed_items = completed;
        self.failed_items = failed;
        self.skipped_items = skipped;
        self.retry_count = retries;
    }

    /// Percent complete by bytes; 100 once the job completed.
    pub fn percentage(&self) -> f64 {
        if self.status == JobStatus::Completed {
            return 100.0;
        }
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            completed: self.completed_items,
            failed: self.failed_items,
            skipped: self.skipped_items,
            total: self.total_items(),
            total_bytes: self.total_bytes,
            downloaded_bytes: self.downloaded_bytes,
        }
    }
}
