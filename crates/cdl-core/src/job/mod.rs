//! Job and Transfer Unit data model.
//!
//! A job owns an ordered list of transfer units (one per selected course
//! item) and aggregates their progress. Transitions live in `state`; the
//! engine applies them while holding the job's lock.

mod live;
mod model;
mod progress;
mod state;

pub use live::{JobCell, JobHandle};
pub use model::{Job, JobSummary, TransferUnit};
pub use progress::ProgressStats;
pub use state::{UnitOutcome, UnitUpdate};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry row id of a job.
pub type JobId = i64;
/// Registry row id of a transfer unit.
pub type UnitId = i64;
/// Owning user, as known to the account service.
pub type UserId = String;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "paused" => JobStatus::Paused,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }

    /// Completed, Failed and Cancelled are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The scheduler may lease units from jobs in these states.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Affects dispatch order only; never preempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "low" => Priority::Low,
            "normal" => Priority::Normal,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => return None,
        })
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transfer unit downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Video,
    Subtitle,
    Attachment,
    Thumbnail,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Video => "video",
            UnitKind::Subtitle => "subtitle",
            UnitKind::Attachment => "attachment",
            UnitKind::Thumbnail => "thumbnail",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "video" => UnitKind::Video,
            "subtitle" => UnitKind::Subtitle,
            "attachment" => UnitKind::Attachment,
            "thumbnail" => UnitKind::Thumbnail,
            _ => return None,
        })
    }
}

/// Transfer unit lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Skipped,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Downloading => "downloading",
            UnitStatus::Paused => "paused",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => UnitStatus::Pending,
            "downloading" => UnitStatus::Downloading,
            "paused" => UnitStatus::Paused,
            "completed" => UnitStatus::Completed,
            "failed" => UnitStatus::Failed,
            "skipped" => UnitStatus::Skipped,
            _ => return None,
        })
    }

    /// Completed, Failed and Skipped are only left through an operator retry.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            UnitStatus::Completed | UnitStatus::Failed | UnitStatus::Skipped
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit fixture for tests: id = seq + 1, three attempts.
#[cfg(test)]
pub(crate) fn sample_unit(seq: u32, size: Option<u64>) -> TransferUnit {
    let mut u = TransferUnit::new(
        seq,
        format!("item-{seq}"),
        format!("Lecture {seq}"),
        UnitKind::Video,
        format!("http://example.test/{seq}"),
        std::path::PathBuf::from(format!("/tmp/{seq}.mp4")),
        size,
        3,
    );
    u.id = seq as i64 + 1;
    u
}
