//! Transfer Unit execution: one file, resumable, with retries.
//!
//! `execute` is blocking and runs on a blocking worker thread. It reconciles
//! the `.part` file with the stored resume cursor, streams the body through
//! the rate limiter into the part file, retries transient failures with
//! backoff from the last durable offset, and stops at chunk boundaries when
//! the job is paused, cancelled or aborted.

mod attempt;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::CleanupPolicy;
use crate::control::{JobSignal, Stop};
use crate::error::{ErrorKind, JobError};
use crate::job::{TransferUnit, UnitId, UnitOutcome, UnitUpdate};
use crate::limiter::RateLimiter;
use crate::retry::{classify, FailureClass, RetryDecision, RetryPolicy, TransferError};
use crate::storage::{self, PartFile};
use crate::transport::{FetchError, Transport};

use attempt::AttemptSink;

/// Receives progress reports from a running transfer.
pub trait ProgressSink {
    fn update(&mut self, update: UnitUpdate);
}

/// Everything `execute` needs to know about the unit, copied at lease time.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub unit_id: UnitId,
    pub url: String,
    pub destination: PathBuf,
    pub expected_size: Option<u64>,
    pub resume_cursor: u64,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl From<&TransferUnit> for TransferTask {
    fn from(u: &TransferUnit) -> Self {
        Self {
            unit_id: u.id,
            url: u.source_url.clone(),
            destination: u.destination.clone(),
            expected_size: u.expected_size,
            resume_cursor: u.resume_cursor,
            attempts: u.attempts,
            max_attempts: u.max_attempts,
        }
    }
}

/// Shared collaborators and tunables for transfers.
pub struct TransferContext<'a> {
    pub transport: &'a dyn Transport,
    pub limiter: &'a RateLimiter,
    pub signal: &'a JobSignal,
    pub policy: &'a RetryPolicy,
    pub headers: &'a HashMap<String, String>,
    pub chunk_size: usize,
    /// Minimum time between fsync + cursor checkpoints.
    pub checkpoint_interval: Duration,
    pub cleanup: CleanupPolicy,
}

fn storage_failure(e: &std::io::Error, attempts: u32) -> UnitOutcome {
    UnitOutcome::Failed {
        error: JobError::new(ErrorKind::LocalStorage, e.to_string()),
        attempts,
    }
}

/// Run one transfer unit to a terminal (or parked) state.
///
/// The outcome's `attempts` counts attempts that completed or failed, so
/// parking and resuming a unit never uses up its retries.
pub fn execute(task: &TransferTask, ctx: &TransferContext<'_>, sink: &mut dyn ProgressSink) -> UnitOutcome {
    let mut attempts = task.attempts;

    if let Some(stop) = ctx.signal.check() {
        return stopped_before_start(stop, task, ctx);
    }

    if let Some(size) = task.expected_size {
        if task.resume_cursor == 0 && storage::already_complete(&task.destination, size) {
            tracing::debug!(unit = task.unit_id, path = %task.destination.display(), "already on disk; skipping");
            return UnitOutcome::Skipped { bytes: size };
        }
    }

    let mut part = match PartFile::open_for_resume(&task.destination, task.resume_cursor) {
        Ok(p) => p,
        Err(e) => return storage_failure(&e, attempts),
    };
    let mut expected = task.expected_size;
    sink.update(UnitUpdate::Started { offset: part.len() });

    loop {
        // Only attempts that finish or fail are charged; a pause, cancel or
        // abort hands the same count back.
        let attempt = attempts + 1;
        let offset = part.len();
        tracing::debug!(unit = task.unit_id, attempt, offset, "transfer attempt");

        let result = {
            let mut body = AttemptSink::new(&mut part, ctx, sink, &mut expected);
            body.run(&task.url)
        };

        let err = match result {
            Ok(()) => match expected {
                Some(n) if part.len() != n => TransferError::PartialTransfer {
                    expected: n,
                    received: part.len(),
                },
                _ => return finish(part, task, attempt),
            },
            Err(FetchError::Stopped(stop)) => return stopped(stop, part, task, ctx, sink, attempts),
            Err(FetchError::Failed(TransferError::Http(416)))
                if !part.is_empty() && expected == Some(part.len()) =>
            {
                tracing::debug!(unit = task.unit_id, "range not satisfiable at known size; part is complete");
                return finish(part, task, attempt);
            }
            Err(FetchError::Failed(e)) => e,
        };
        attempts = attempt;

        let class = classify(&err);
        tracing::warn!(unit = task.unit_id, attempt = attempts, error = %err, ?class, "transfer attempt failed");
        let error = JobError::new(class.error_kind(), err.to_string());
        if class == FailureClass::LocalStorage {
            return UnitOutcome::Failed { error, attempts };
        }
        if let Err(e) = part.sync() {
            return storage_failure(&e, attempts);
        }
        sink.update(UnitUpdate::Checkpoint(part.len()));

        match ctx.policy.decide(attempts, task.max_attempts, class) {
            RetryDecision::NoRetry => return UnitOutcome::Failed { error, attempts },
            RetryDecision::RetryAfter(delay) => {
                sink.update(UnitUpdate::Retrying { attempts, error });
                if let Some(stop) = ctx.signal.wait_timeout(delay) {
                    return stopped(stop, part, task, ctx, sink, attempts);
                }
            }
        }
    }
}

fn finish(part: PartFile, task: &TransferTask, attempts: u32) -> UnitOutcome {
    let bytes = part.len();
    match part.finalize(&task.destination) {
        Ok(()) => {
            tracing::info!(unit = task.unit_id, bytes, path = %task.destination.display(), "transfer complete");
            UnitOutcome::Completed { bytes, attempts }
        }
        Err(e) => storage_failure(&e, attempts),
    }
}

fn stopped(
    stop: Stop,
    mut part: PartFile,
    task: &TransferTask,
    ctx: &TransferContext<'_>,
    sink: &mut dyn ProgressSink,
    attempts: u32,
) -> UnitOutcome {
    match stop {
        Stop::Cancel if ctx.cleanup == CleanupPolicy::Delete => {
            if let Err(e) = part.discard() {
                tracing::warn!(unit = task.unit_id, error = %e, "failed to remove partial file");
            }
            UnitOutcome::Cancelled { attempts }
        }
        _ => {
            if let Err(e) = part.sync() {
                return storage_failure(&e, attempts);
            }
            let cursor = part.len();
            sink.update(UnitUpdate::Checkpoint(cursor));
            match stop {
                Stop::Pause => UnitOutcome::Paused { cursor, attempts },
                Stop::Cancel => UnitOutcome::Cancelled { attempts },
                Stop::Abort => UnitOutcome::Aborted { attempts },
            }
        }
    }
}

fn stopped_before_start(stop: Stop, task: &TransferTask, ctx: &TransferContext<'_>) -> UnitOutcome {
    match stop {
        Stop::Pause => UnitOutcome::Paused {
            cursor: task.resume_cursor,
            attempts: task.attempts,
        },
        Stop::Cancel => {
            if ctx.cleanup == CleanupPolicy::Delete {
                if let Err(e) = storage::discard_partial(&task.destination) {
                    tracing::warn!(unit = task.unit_id, error = %e, "failed to remove partial file");
                }
            }
            UnitOutcome::Cancelled {
                attempts: task.attempts,
            }
        }
        Stop::Abort => UnitOutcome::Aborted {
            attempts: task.attempts,
        },
    }
}

#[cfg(test)]
mod tests;
