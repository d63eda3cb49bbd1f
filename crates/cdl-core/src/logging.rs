//! `tracing` setup for the CLI: an append-only log file, or stderr when the
//! file cannot be opened.
//!
//! Filter precedence: `RUST_LOG`, then `[logging] filter` from the config,
//! then [`DEFAULT_FILTER`]. Transfers log per unit at debug level, so the
//! default keeps the engine's own crates one level more verbose than
//! everything else.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub const DEFAULT_FILTER: &str = "info,cdl=debug,cdl_core=debug";

/// Filter from the environment, else the configured directives, else the default.
/// Configured directives that do not parse fall back to the default.
pub fn filter_for(cfg: &LoggingConfig) -> EnvFilter {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return from_env;
    }
    cfg.filter
        .as_deref()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Where the log file goes: the configured path, else `<state dir>/cdl.log`.
pub fn log_path(cfg: &LoggingConfig) -> Result<PathBuf> {
    match &cfg.file {
        Some(path) => Ok(path.clone()),
        None => Ok(crate::paths::state_dir()?.join("cdl.log")),
    }
}

/// Install a subscriber writing to the log file. Returns the file's path.
/// Fails (installing nothing) if the file cannot be opened, so the caller
/// can fall back to [`init_stderr`].
pub fn init(cfg: &LoggingConfig) -> Result<PathBuf> {
    let path = log_path(cfg)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter_for(cfg))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install subscriber: {e}"))?;
    tracing::info!(path = %path.display(), "logging to file");
    Ok(path)
}

/// Install a stderr subscriber. A no-op if one is already installed.
pub fn init_stderr(cfg: &LoggingConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(cfg))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
