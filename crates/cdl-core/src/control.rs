//! Per-job control signal for pause/cancel.
//!
//! Every job owns one `JobSignal`. Transfers check it at each chunk boundary,
//! while waiting for rate-limiter budget and during retry backoff. Control
//! operations on the engine flip the signal; blocked waiters wake immediately.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Requested state of a job's in-flight transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Run,
    /// Finish the current chunk, sync, and park with the resume cursor saved.
    Pause,
    /// Stop at the next chunk boundary; partial data is discarded per cleanup policy.
    Cancel,
    /// Stop at the next chunk boundary; the job was hard-failed (e.g. disk unwritable).
    Abort,
}

/// Reason a transfer stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Pause,
    Cancel,
    Abort,
}

impl Signal {
    fn stop(self) -> Option<Stop> {
        match self {
            Signal::Run => None,
            Signal::Pause => Some(Stop::Pause),
            Signal::Cancel => Some(Stop::Cancel),
            Signal::Abort => Some(Stop::Abort),
        }
    }
}

/// Shared control token for one job.
#[derive(Debug)]
pub struct JobSignal {
    state: Mutex<Signal>,
    changed: Condvar,
}

impl Default for JobSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSignal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Signal::Run),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Signal> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self) -> Signal {
        *self.lock()
    }

    /// Set a new signal and wake every waiter. Cancel and Abort are sticky:
    /// once set, later requests cannot clear them.
    pub fn set(&self, signal: Signal) {
        let mut state = self.lock();
        if matches!(*state, Signal::Cancel | Signal::Abort) {
            return;
        }
        *state = signal;
        self.changed.notify_all();
    }

    /// Returns `Some(stop)` if the job asked its transfers to stop.
    pub fn check(&self) -> Option<Stop> {
        self.get().stop()
    }

    /// Sleep for `timeout` unless a stop is requested first.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Stop> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(stop) = state.stop() {
                return Some(stop);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|p| p.into_inner());
            state = guard;
        }
    }
}
