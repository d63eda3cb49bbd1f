//! A job as held by the running engine: its state behind a lock, its control
//! signal, and the bookkeeping needed to publish ordered events.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{Job, JobId, ProgressStats, UnitId, UserId};
use crate::control::JobSignal;
use crate::events::{EngineEvent, EventBus, EventKind, ItemProgress, ProgressGate, ProgressUpdate};

pub struct JobHandle {
    pub id: JobId,
    pub user_id: UserId,
    state: Mutex<JobCell>,
    signal: Mutex<Arc<JobSignal>>,
}

/// Everything guarded by the job's lock.
pub struct JobCell {
    pub job: Job,
    /// Sequence number of the last event published for this job.
    pub seq: u64,
    progress_gate: ProgressGate,
    run_started: Instant,
    run_base: u64,
}

impl JobHandle {
    pub fn new(job: Job, progress_interval: Duration) -> Self {
        let run_base = job.downloaded_bytes;
        Self {
            id: job.id,
            user_id: job.user_id.clone(),
            state: Mutex::new(JobCell {
                job,
                seq: 0,
                progress_gate: ProgressGate::new(progress_interval),
                run_started: Instant::now(),
                run_base,
            }),
            signal: Mutex::new(Arc::new(JobSignal::new())),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, JobCell> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Control signal shared with this job's in-flight transfers.
    pub fn signal(&self) -> Arc<JobSignal> {
        Arc::clone(&self.signal.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Clone of the current job state.
    pub fn snapshot(&self) -> Job {
        self.lock().job.clone()
    }
}

impl JobCell {
    /// Publish an event with the next sequence number. Item and progress
    /// events are dropped once the job reached a terminal state.
    pub fn emit(&mut self, bus: &EventBus, kind: EventKind) {
        let late = matches!(
            kind,
            EventKind::Progress(_) | EventKind::ItemCompleted { .. } | EventKind::ItemFailed { .. }
        );
        if late && self.job.status.is_terminal() {
            return;
        }
        self.publish(bus, kind);
    }

    /// Publish unconditionally with the next sequence number.
    pub fn publish(&mut self, bus: &EventBus, kind: EventKind) {
        self.seq += 1;
        bus.publish(EngineEvent {
            job_id: self.job.id,
            user_id: self.job.user_id.clone(),
            seq: self.seq,
            kind,
        });
    }

    /// Snapshot event carrying the current sequence number as its watermark.
    pub fn snapshot_event(&self) -> EngineEvent {
        EngineEvent::snapshot(self.job.clone(), self.seq)
    }

    /// Restart rate and ETA measurement (job started or resumed).
    pub fn start_run(&mut self) {
        self.run_started = Instant::now();
        self.run_base = self.job.downloaded_bytes;
        self.progress_gate.reopen();
    }

    pub fn stats(&self) -> ProgressStats {
        ProgressStats {
            bytes_done: self.job.downloaded_bytes,
            bytes_this_run: self.job.downloaded_bytes.saturating_sub(self.run_base),
            total_bytes: self.job.total_bytes,
            elapsed_secs: self.run_started.elapsed().as_secs_f64(),
        }
    }

    /// Publish a progress event if the gate admits it (`force` always does).
    pub fn emit_progress(&mut self, bus: &EventBus, unit_id: Option<UnitId>, force: bool) {
        if !self.progress_gate.admit(Instant::now(), self.job.downloaded_bytes, force) {
            return;
        }
        let stats = self.stats();
        let item = unit_id.and_then(|id| self.job.unit(id)).map(|u| ItemProgress {
            unit_id: u.id,
            item_id: u.item_id.clone(),
            bytes: u.bytes_transferred,
            total_bytes: u.expected_size,
        });
        let update = ProgressUpdate {
            percentage: self.job.percentage(),
            bytes: self.job.downloaded_bytes,
            total_bytes: self.job.size_known.then_some(self.job.total_bytes),
            speed_bps: stats.bytes_per_sec(),
            eta_secs: stats.eta_secs(),
            status: self.job.status,
            item,
        };
        self.emit(bus, EventKind::Progress(update));
    }
}

impl JobHandle {
    /// Give the job a fresh signal. Used when a finished job is reopened,
    /// since a cancel or abort signal never clears on its own.
    pub fn rearm(&self) {
        let mut signal = self.signal.lock().unwrap_or_else(|p| p.into_inner());
        *signal = Arc::new(JobSignal::new());
    }
}
