//! Job and unit transitions.
//!
//! Every method here runs under the job's lock. Updates for units that are
//! already final (e.g. marked failed by a cancel while their worker was still
//! stopping) are ignored, so a unit's final state is set exactly once.

use super::{Job, JobStatus, UnitId, UnitStatus};
use crate::error::{EngineError, ErrorKind, JobError};

/// Non-terminal report from a running transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitUpdate {
    /// Transfer begins (or resumes) at `offset`.
    Started { offset: u64 },
    /// Length learned from the first response (None: server did not say).
    Length(Option<u64>),
    /// Bytes now in the part file.
    Progress(u64),
    /// Part file synced; `cursor` bytes are durable.
    Checkpoint(u64),
    /// Attempt `attempts` failed with a retryable error.
    Retrying { attempts: u32, error: JobError },
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Completed { bytes: u64, attempts: u32 },
    /// Destination already existed with the expected size, or the item is encrypted.
    Skipped { bytes: u64 },
    Failed { error: JobError, attempts: u32 },
    /// Stopped by a pause (or engine shutdown) with `cursor` bytes durable.
    Paused { cursor: u64, attempts: u32 },
    Cancelled { attempts: u32 },
    /// Stopped because the job was hard-failed.
    Aborted { attempts: u32 },
}

impl Job {
    fn invalid(&self, action: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            job_id: self.id,
            status: self.status,
            action,
        }
    }

    /// Move a freshly admitted job into the queue.
    pub fn enqueue(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Queued;
        }
    }

    /// Apply a progress report. Returns true if this report started the job.
    pub fn apply_update(&mut self, unit_id: UnitId, update: UnitUpdate, now: i64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let Some(unit) = self.unit_mut(unit_id) else {
            return false;
        };
        if unit.status.is_final() {
            return false;
        }

        let mut started = false;
        match update {
            UnitUpdate::Started { offset } => {
                unit.status = UnitStatus::Downloading;
                unit.bytes_transferred = offset;
                unit.resume_cursor = offset;
                started = true;
            }
            UnitUpdate::Length(len) => unit.expected_size = len,
            UnitUpdate::Progress(bytes) => {
                if unit.status == UnitStatus::Downloading {
                    unit.bytes_transferred = unit.bytes_transferred.max(bytes);
                }
            }
            UnitUpdate::Checkpoint(cursor) => unit.resume_cursor = cursor,
            UnitUpdate::Retrying { attempts, error } => {
                unit.attempts = unit.attempts.max(attempts);
                unit.last_error = Some(error);
            }
        }
        self.recompute();

        if started && self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
            if self.started_at.is_none() {
                self.started_at = Some(now);
            }
            return true;
        }
        false
    }

    /// Apply a transfer's end state. Returns the unit's new status, or None if ignored.
    ///
    /// A `LocalStorage` failure hard-aborts the whole job.
    pub fn apply_outcome(&mut self, unit_id: UnitId, outcome: UnitOutcome, now: i64) -> Option<UnitStatus> {
        let job_paused = self.status == JobStatus::Paused;
        let unit = self.unit_mut(unit_id)?;
        if unit.status.is_final() {
            return None;
        }
        // Cancel and abort fail every open unit themselves. A pending unit here
        // was reopened by a retry after the stop was requested.
        if matches!(outcome, UnitOutcome::Cancelled { .. } | UnitOutcome::Aborted { .. })
            && unit.status == UnitStatus::Pending
        {
            return None;
        }

        let mut abort_with = None;
        match outcome {
            UnitOutcome::Completed { bytes, attempts } => {
                unit.status = UnitStatus::Completed;
                unit.bytes_transferred = unit.bytes_transferred.max(bytes);
                unit.expected_size = Some(unit.bytes_transferred);
                unit.resume_cursor = unit.bytes_transferred;
                unit.attempts = attempts;
                unit.last_error = None;
            }
            UnitOutcome::Skipped { bytes } => {
                unit.status = UnitStatus::Skipped;
                unit.bytes_transferred = bytes;
                unit.resume_cursor = 0;
            }
            UnitOutcome::Failed { error, attempts } => {
                unit.status = UnitStatus::Failed;
                unit.attempts = attempts;
                if error.kind == ErrorKind::LocalStorage {
                    abort_with = Some(error.clone());
                }
                unit.last_error = Some(error);
            }
            UnitOutcome::Paused { cursor, attempts } => {
                // A resume may have raced the stop; then the unit is simply pending again.
                unit.status = if job_paused && unit.status == UnitStatus::Downloading {
                    UnitStatus::Paused
                } else {
                    UnitStatus::Pending
                };
                unit.resume_cursor = cursor;
                unit.bytes_transferred = unit.bytes_transferred.max(cursor);
                unit.attempts = attempts;
            }
            UnitOutcome::Cancelled { attempts } => {
                unit.status = UnitStatus::Failed;
                unit.attempts = attempts;
                unit.last_error = Some(JobError::new(ErrorKind::Cancelled, "job cancelled"));
            }
            UnitOutcome::Aborted { attempts } => {
                unit.status = UnitStatus::Failed;
                unit.attempts = attempts;
                unit.last_error = Some(JobError::new(ErrorKind::LocalStorage, "job aborted"));
            }
        }
        let status = unit.status;

        if let Some(error) = abort_with {
            self.abort(error, now);
        } else {
            self.recompute();
        }
        Some(status)
    }

    /// If every unit is final, move the job to its terminal state and return it.
    /// A job fails only when all of its items failed.
    pub fn settle(&mut self, now: i64) -> Option<JobStatus> {
        if self.status.is_terminal() || !self.units.iter().all(|u| u.status.is_final()) {
            return None;
        }
        self.recompute();
        let all_failed = self.failed_items == self.total_items() && self.total_items() > 0;
        if all_failed {
            self.status = JobStatus::Failed;
            if self.last_error.is_none() {
                self.last_error = self.units.iter().rev().find_map(|u| u.last_error.clone());
            }
        } else {
            self.status = JobStatus::Completed;
        }
        self.completed_at = Some(now);
        Some(self.status)
    }

    /// Hard-fail the job (e.g. destination unwritable). Returns the units it failed.
    pub fn abort(&mut self, error: JobError, now: i64) -> Vec<UnitId> {
        let mut failed = Vec::new();
        for unit in self.units.iter_mut().filter(|u| !u.status.is_final()) {
            unit.status = UnitStatus::Failed;
            unit.last_error = Some(JobError::new(
                error.kind,
                format!("job aborted: {}", error.message),
            ));
            failed.push(unit.id);
        }
        self.status = JobStatus::Failed;
        self.last_error = Some(error);
        self.completed_at = Some(now);
        self.recompute();
        failed
    }

    /// Stop admitting units; in-flight units park at their next chunk boundary.
    pub fn pause(&mut self) -> Result<(), EngineError> {
        match self.status {
            JobStatus::Pending | JobStatus::Queued | JobStatus::Running => {
                self.status = JobStatus::Paused;
                Ok(())
            }
            _ => Err(self.invalid("pause")),
        }
    }

    /// Return a paused job to the queue. Paused units become pending again.
    pub fn resume(&mut self) -> Result<Vec<UnitId>, EngineError> {
        if self.status != JobStatus::Paused {
            return Err(self.invalid("resume"));
        }
        self.status = if self.started_at.is_some() {
            JobStatus::Running
        } else {
            JobStatus::Queued
        };
        let mut resumed = Vec::new();
        for unit in self.units.iter_mut().filter(|u| u.status == UnitStatus::Paused) {
            unit.status = UnitStatus::Pending;
            resumed.push(unit.id);
        }
        Ok(resumed)
    }

    /// Cancel: terminal immediately. Unfinished units are failed with kind
    /// `Cancelled` so the summary adds up. Returns the units it failed.
    pub fn cancel(&mut self, now: i64) -> Result<Vec<UnitId>, EngineError> {
        if self.status.is_terminal() {
            return Err(self.invalid("cancel"));
        }
        let mut cancelled = Vec::new();
        for unit in self.units.iter_mut().filter(|u| !u.status.is_final()) {
            unit.status = UnitStatus::Failed;
            unit.last_error = Some(JobError::new(ErrorKind::Cancelled, "job cancelled"));
            cancelled.push(unit.id);
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        self.recompute();
        Ok(cancelled)
    }

    /// Reset failed units to pending, keeping their attempt counts and granting
    /// `extra_attempts` more. Reopens a finished job. Returns the reset units.
    pub fn retry_failed(&mut self, extra_attempts: u32) -> Result<Vec<UnitId>, EngineError> {
        let allowed = matches!(
            self.status,
            JobStatus::Queued
                | JobStatus::Running
                | JobStatus::Paused
                | JobStatus::Completed
                | JobStatus::Failed
        );
        if !allowed || self.failed_items == 0 {
            return Err(self.invalid("retry failed items"));
        }

        let mut reset = Vec::new();
        for unit in self.units.iter_mut().filter(|u| u.status == UnitStatus::Failed) {
            unit.status = UnitStatus::Pending;
            unit.max_attempts = unit.attempts + extra_attempts.max(1);
            unit.last_error = None;
            reset.push(unit.id);
        }
        if self.status.is_terminal() {
            self.status = JobStatus::Queued;
            self.completed_at = None;
            self.last_error = None;
        }
        self.recompute();
        Ok(reset)
    }
}
