//! Coalescing of a job's progress reports.
//!
//! Transfers report after every chunk; subscribers get at most one report per
//! interval per job, and none when the byte count has not moved. Lifecycle
//! reports (unit started, item finished) are forced through.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Mark {
    at: Instant,
    bytes: u64,
}

#[derive(Debug)]
pub struct ProgressGate {
    interval: Duration,
    last: Option<Mark>,
}

impl ProgressGate {
    pub const fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Whether a report of `bytes` at `now` goes out. Admitted reports
    /// (forced ones included) start a new interval.
    pub fn admit(&mut self, now: Instant, bytes: u64, force: bool) -> bool {
        let pass = force
            || match self.last {
                None => true,
                Some(mark) => bytes != mark.bytes && now.saturating_duration_since(mark.at) >= self.interval,
            };
        if pass {
            self.last = Some(Mark { at: now, bytes });
        }
        pass
    }

    /// Let the next report through (the job started or resumed).
    pub fn reopen(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(500);

    #[test]
    fn one_report_per_interval() {
        let t0 = Instant::now();
        let mut gate = ProgressGate::new(TICK);
        assert!(gate.admit(t0, 100, false));
        assert!(!gate.admit(t0 + Duration::from_millis(200), 300, false));
        assert!(gate.admit(t0 + TICK, 600, false));
        assert!(!gate.admit(t0 + TICK + Duration::from_millis(499), 900, false));
    }

    #[test]
    fn stalled_transfer_is_not_reported_again() {
        let t0 = Instant::now();
        let mut gate = ProgressGate::new(TICK);
        assert!(gate.admit(t0, 4_096, false));
        assert!(!gate.admit(t0 + TICK * 4, 4_096, false));
        assert!(gate.admit(t0 + TICK * 5, 8_192, false));
    }

    #[test]
    fn forced_reports_pass_and_restart_the_interval() {
        let t0 = Instant::now();
        let mut gate = ProgressGate::new(TICK);
        assert!(gate.admit(t0, 10, false));
        assert!(gate.admit(t0, 10, true));
        let later = t0 + Duration::from_millis(300);
        assert!(gate.admit(later, 20, true));
        assert!(!gate.admit(later + Duration::from_millis(400), 30, false));
    }

    #[test]
    fn reopen_lets_the_next_report_through() {
        let t0 = Instant::now();
        let mut gate = ProgressGate::new(TICK);
        assert!(gate.admit(t0, 10, false));
        gate.reopen();
        assert!(gate.admit(t0, 10, false));
    }
}
