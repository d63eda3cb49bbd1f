use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per transfer unit (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff.
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 2.0,
            max_delay_secs: 30,
        }
    }
}

/// What happens to `.part` files of a cancelled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    #[default]
    Delete,
    Keep,
}

/// Subscription limits used by the registry-backed quota collaborator.
/// A value of 0 means unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Jobs a user may submit per 30-day period.
    #[serde(default)]
    pub monthly_downloads: u64,
    /// Bytes a user may keep on disk.
    #[serde(default)]
    pub storage_bytes: u64,
}

/// `[logging]` section. `RUST_LOG` still wins over `filter` when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directives, e.g. `"info,cdl_core::transfer=debug"`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Log file (None = `cdl.log` in the XDG state directory).
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Global configuration loaded from `~/.config/cdl/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdlConfig {
    /// Size of the global worker pool (N).
    pub max_workers: usize,
    /// Concurrent transfers allowed per user (M, clamped to N).
    pub max_per_user: usize,
    /// Receive buffer size per transfer; each chunk is throttled and written as a unit.
    pub chunk_size_bytes: usize,
    /// Minimum interval between progress events for one job.
    pub progress_interval_ms: u64,
    /// Capacity of the event bus; slower subscribers lose the oldest events.
    pub event_buffer: usize,
    /// Cleanup of partial files when a job is cancelled.
    #[serde(default)]
    pub cancel_cleanup: CleanupPolicy,
    /// Root directory for downloads (None = current directory).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Optional bandwidth cap in bytes per second shared by all transfers (None = no cap).
    #[serde(default)]
    pub max_bytes_per_sec: Option<u64>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CdlConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_per_user: 2,
            chunk_size_bytes: 64 * 1024,
            progress_interval_ms: 500,
            event_buffer: 256,
            cancel_cleanup: CleanupPolicy::Delete,
            download_dir: None,
            max_bytes_per_sec: None,
            retry: None,
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CdlConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(|r| RetryPolicy {
                max_attempts: r.max_attempts.max(1),
                base_delay: Duration::from_secs_f64(r.base_delay_secs.max(0.0)),
                max_delay: Duration::from_secs(r.max_delay_secs),
            })
            .unwrap_or_default()
    }

    /// Worker pool size, at least one.
    pub fn workers(&self) -> usize {
        self.max_workers.max(1)
    }

    /// Per-user cap, clamped to `1..=workers()`.
    pub fn per_user(&self) -> usize {
        self.max_per_user.clamp(1, self.workers())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("cdl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<CdlConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = CdlConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: CdlConfig = toml::from_str(&data)?;
    Ok(cfg)
}
