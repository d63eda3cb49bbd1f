//! Job progress figures (percentage, rate, ETA).

/// Progress of one job since its current run started.
#[derive(Debug, Clone)]
pub struct ProgressStats {
    /// Bytes on disk for the whole job.
    pub bytes_done: u64,
    /// Bytes transferred since the run started (excludes resumed prefixes).
    pub bytes_this_run: u64,
    /// Total job size in bytes (may still grow while sizes are unknown).
    pub total_bytes: u64,
    /// Elapsed time since the run started (seconds).
    pub elapsed_secs: f64,
}

impl ProgressStats {
    /// Download rate in bytes per second (0 if elapsed is 0).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_this_run as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if rate is 0).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total_bytes.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.total_bytes as f64).min(1.0)
    }

    pub fn percentage(&self) -> f64 {
        self.fraction() * 100.0
    }
}
