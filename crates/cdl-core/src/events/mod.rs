//! Engine events and their fan-out.
//!
//! Every event carries the job id, owner and a per-job sequence number.
//! Sequence numbers are assigned while holding the job's lock, so they are
//! strictly increasing per job and a snapshot taken under the same lock has a
//! well-defined watermark. A job reloaded after the engine let go of it keeps
//! counting from above anything the bus has published.

mod bus;
mod coalesce;

pub use bus::{EventBus, EventStream, SubscriptionFilter};
pub use coalesce::ProgressGate;

use serde::Serialize;

use crate::error::JobError;
use crate::job::{Job, JobId, JobStatus, JobSummary, UnitId, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub job_id: JobId,
    pub user_id: UserId,
    pub seq: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl EngineEvent {
    /// Snapshot of `job`; later events with a higher `seq` are news to the subscriber.
    pub fn snapshot(job: Job, seq: u64) -> Self {
        let percentage = job.percentage();
        Self {
            job_id: job.id,
            user_id: job.user_id.clone(),
            seq,
            kind: EventKind::Snapshot {
                job: Box::new(job),
                percentage,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// Current state of the job, sent first to every new subscriber.
    Snapshot { job: Box<Job>, percentage: f64 },
    JobStarted,
    Progress(ProgressUpdate),
    ItemCompleted {
        unit_id: UnitId,
        item_id: String,
        bytes: u64,
        /// Encrypted item or file already on disk.
        skipped: bool,
    },
    ItemFailed {
        unit_id: UnitId,
        item_id: String,
        error: JobError,
    },
    JobPaused,
    JobResumed,
    JobCompleted { summary: JobSummary },
    JobFailed {
        summary: JobSummary,
        error: Option<JobError>,
    },
    JobCancelled { summary: JobSummary },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Snapshot { .. } => "snapshot",
            EventKind::JobStarted => "job_started",
            EventKind::Progress(_) => "progress",
            EventKind::ItemCompleted { .. } => "item_completed",
            EventKind::ItemFailed { .. } => "item_failed",
            EventKind::JobPaused => "job_paused",
            EventKind::JobResumed => "job_resumed",
            EventKind::JobCompleted { .. } => "job_completed",
            EventKind::JobFailed { .. } => "job_failed",
            EventKind::JobCancelled { .. } => "job_cancelled",
        }
    }

    /// Terminal events end a job's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::JobCompleted { .. } | EventKind::JobFailed { .. } | EventKind::JobCancelled { .. }
        )
    }
}

/// Job-level progress, optionally with the item that moved.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub percentage: f64,
    pub bytes: u64,
    /// None while some item's length is still unknown.
    pub total_bytes: Option<u64>,
    pub speed_bps: f64,
    pub eta_secs: Option<f64>,
    pub status: JobStatus,
    pub item: Option<ItemProgress>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemProgress {
    pub unit_id: UnitId,
    pub item_id: String,
    pub bytes: u64,
    pub total_bytes: Option<u64>,
}
