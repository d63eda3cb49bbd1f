//! Worker pool: each worker leases one unit at a time and runs it to an end state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::Shared;
use crate::config::CleanupPolicy;
use crate::control::Signal;
use crate::error::{ErrorKind, JobError};
use crate::events::EventKind;
use crate::job::{JobCell, JobHandle, JobStatus, UnitId, UnitOutcome, UnitStatus, UnitUpdate};
use crate::registry::unix_timestamp;
use crate::scheduler::Lease;
use crate::transfer::{self, ProgressSink, TransferContext, TransferTask};

pub(crate) async fn run_worker(shared: Arc<Shared>, worker: usize) {
    debug!(worker, "worker started");
    while let Some(lease) = shared.scheduler.next_lease().await {
        run_lease(&shared, &lease).await;
        shared.scheduler.release(&lease);
    }
    debug!(worker, "worker stopped");
}

async fn run_lease(shared: &Arc<Shared>, lease: &Lease) {
    let task = TransferTask::from(&lease.unit);
    let unit_id = task.unit_id;
    let attempts = task.attempts;
    debug!(job_id = lease.job.id, unit_id, url = %task.url, "transfer starting");

    let blocking = {
        let shared = Arc::clone(shared);
        let handle = Arc::clone(&lease.job);
        let headers = lease.headers.clone();
        tokio::task::spawn_blocking(move || {
            let signal = handle.signal();
            let settings = &shared.settings;
            let ctx = TransferContext {
                transport: shared.transport.as_ref(),
                limiter: &shared.limiter,
                signal: &signal,
                policy: &settings.retry,
                headers: &headers,
                chunk_size: settings.chunk_size,
                checkpoint_interval: settings.progress_interval,
                cleanup: settings.cancel_cleanup,
            };
            let mut sink = UnitSink {
                shared: &shared,
                handle: &handle,
                unit_id,
            };
            transfer::execute(&task, &ctx, &mut sink)
        })
    };
    let outcome = match blocking.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(job_id = lease.job.id, unit_id, error = %e, "transfer task died");
            UnitOutcome::Failed {
                error: JobError::new(ErrorKind::TransientNetwork, format!("transfer task died: {e}")),
                attempts: attempts + 1,
            }
        }
    };
    if let Some(orphan) = finish_unit(shared, &lease.job, unit_id, outcome) {
        remove_orphan(unit_id, &orphan).await;
    }
}

/// Delete a file whose unit was cancelled while it finished.
pub(crate) async fn remove_orphan(unit_id: UnitId, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(unit_id, path = %path.display(), "removed file finished after cancel"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(unit_id, path = %path.display(), error = %e, "could not remove file finished after cancel"),
    }
}

/// Routes a running transfer's reports into its job, the registry and the bus.
struct UnitSink<'a> {
    shared: &'a Shared,
    handle: &'a JobHandle,
    unit_id: UnitId,
}

impl ProgressSink for UnitSink<'_> {
    fn update(&mut self, update: UnitUpdate) {
        let shared = self.shared;
        let mut cell = self.handle.lock();
        let started = cell.job.apply_update(self.unit_id, update.clone(), unix_timestamp());
        if started {
            cell.start_run();
            shared.persist.job(&cell.job);
            cell.emit(&shared.bus, EventKind::JobStarted);
            info!(job_id = cell.job.id, "job started");
        }
        let Some(unit) = cell.job.unit(self.unit_id) else {
            return;
        };
        if unit.status.is_final() {
            return;
        }
        match update {
            UnitUpdate::Started { .. } | UnitUpdate::Length(_) => {
                shared.persist.unit(unit);
                cell.emit_progress(&shared.bus, Some(self.unit_id), true);
            }
            UnitUpdate::Progress(_) => {
                cell.emit_progress(&shared.bus, Some(self.unit_id), false);
            }
            UnitUpdate::Checkpoint(cursor) => {
                shared.persist.progress(self.unit_id, unit.bytes_transferred, cursor);
            }
            UnitUpdate::Retrying { attempts, error } => {
                shared.persist.unit(unit);
                warn!(
                    job_id = cell.job.id,
                    unit_id = self.unit_id,
                    attempts,
                    kind = %error.kind,
                    error = %error.message,
                    "transfer attempt failed; retrying"
                );
            }
        }
    }
}

/// Apply a transfer's end state, then settle the job if it was the last one.
///
/// A transfer can complete just as its job is cancelled, and cancel removes
/// only `.part` files. Under [`CleanupPolicy::Delete`] such a finished file is
/// returned for the caller to remove.
pub(crate) fn finish_unit(
    shared: &Shared,
    handle: &JobHandle,
    unit_id: UnitId,
    outcome: UnitOutcome,
) -> Option<PathBuf> {
    let mut cell = handle.lock();
    let now = unix_timestamp();
    let was_failed = cell.job.status == JobStatus::Failed;
    let completed = matches!(outcome, UnitOutcome::Completed { .. });
    let Some(status) = cell.job.apply_outcome(unit_id, outcome, now) else {
        debug!(job_id = handle.id, unit_id, "late transfer outcome ignored");
        let orphaned = completed
            && cell.job.status == JobStatus::Cancelled
            && shared.settings.cancel_cleanup == CleanupPolicy::Delete;
        if !orphaned {
            return None;
        }
        return cell.job.unit(unit_id).map(|u| u.destination.clone());
    };
    let Some(unit) = cell.job.unit(unit_id).cloned() else {
        return None;
    };
    shared.persist.unit(&unit);

    let aborted = !was_failed && cell.job.status == JobStatus::Failed;
    if aborted {
        handle.signal().set(Signal::Abort);
    }
    match status {
        UnitStatus::Completed | UnitStatus::Skipped => {
            info!(job_id = handle.id, unit_id, item = %unit.item_id, bytes = unit.bytes_transferred, "item finished");
            cell.emit(
                &shared.bus,
                EventKind::ItemCompleted {
                    unit_id,
                    item_id: unit.item_id.clone(),
                    bytes: unit.bytes_transferred,
                    skipped: status == UnitStatus::Skipped,
                },
            );
            cell.emit_progress(&shared.bus, None, true);
        }
        UnitStatus::Failed => {
            let error = unit
                .last_error
                .clone()
                .unwrap_or_else(|| JobError::new(ErrorKind::TransientNetwork, "unknown error"));
            warn!(job_id = handle.id, unit_id, item = %unit.item_id, kind = %error.kind, error = %error.message, "item failed");
            let event = EventKind::ItemFailed {
                unit_id,
                item_id: unit.item_id.clone(),
                error,
            };
            // An abort already made the job terminal; the item that caused it is still reported.
            if aborted {
                cell.publish(&shared.bus, event);
            } else {
                cell.emit(&shared.bus, event);
            }
        }
        UnitStatus::Pending | UnitStatus::Paused | UnitStatus::Downloading => {
            debug!(job_id = handle.id, unit_id, cursor = unit.resume_cursor, "transfer parked");
        }
    }

    if aborted {
        let ids: Vec<UnitId> = cell.job.units.iter().map(|u| u.id).collect();
        shared.persist.units(&cell.job, &ids);
        shared.persist.job(&cell.job);
        publish_terminal(shared, &mut cell);
    } else if cell.job.settle(now).is_some() {
        shared.persist.job(&cell.job);
        publish_terminal(shared, &mut cell);
    }
    None
}

/// Publish the job's terminal event (with its summary) and log it.
pub(crate) fn publish_terminal(shared: &Shared, cell: &mut JobCell) {
    let summary = cell.job.summary();
    let kind = match cell.job.status {
        JobStatus::Completed => EventKind::JobCompleted { summary },
        JobStatus::Failed => EventKind::JobFailed {
            summary,
            error: cell.job.last_error.clone(),
        },
        JobStatus::Cancelled => EventKind::JobCancelled { summary },
        other => {
            debug!(job_id = cell.job.id, status = %other, "job not terminal");
            return;
        }
    };
    info!(
        job_id = cell.job.id,
        status = %cell.job.status,
        completed = summary.completed,
        failed = summary.failed,
        total = summary.total,
        "job finished"
    );
    cell.emit(&shared.bus, kind);
}
