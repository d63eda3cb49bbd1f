//! `cdl pause|resume|cancel|retry <id>`.
//!
//! With an engine running, the command goes over the control socket.
//! Otherwise it is applied to the registry and takes effect on the next `cdl run`.

use anyhow::{Context, Result};
use cdl_core::config::{CdlConfig, CleanupPolicy};
use cdl_core::job::JobId;
use cdl_core::paths;
use cdl_core::registry::{unix_timestamp, Registry};
use cdl_core::storage;

use crate::cli::control_socket::{self, Action};

pub async fn run_control(registry: &Registry, cfg: &CdlConfig, action: Action, id: JobId) -> Result<()> {
    let socket_path = paths::default_control_socket_path()?;
    if control_socket::send(&socket_path, action, id).await? {
        println!("{} job {id}", past_tense(action));
        return Ok(());
    }
    apply_offline(registry, cfg, action, id).await?;
    println!("{} job {id} (no engine running)", past_tense(action));
    Ok(())
}

fn past_tense(action: Action) -> &'static str {
    match action {
        Action::Pause => "Paused",
        Action::Resume => "Resumed",
        Action::Cancel => "Cancelled",
        Action::Retry => "Retrying failed items of",
        Action::Load => "Loaded",
    }
}

/// Apply a control command straight to the registry.
pub async fn apply_offline(registry: &Registry, cfg: &CdlConfig, action: Action, id: JobId) -> Result<()> {
    let mut job = registry
        .get_job(id)
        .await?
        .with_context(|| format!("job {id} not found"))?;
    match action {
        Action::Pause => job.pause()?,
        Action::Resume => {
            job.resume()?;
        }
        Action::Cancel => {
            let cancelled = job.cancel(unix_timestamp())?;
            if cfg.cancel_cleanup == CleanupPolicy::Delete {
                for unit in job.units.iter().filter(|u| cancelled.contains(&u.id)) {
                    if let Err(e) = storage::discard_partial(&unit.destination) {
                        tracing::warn!(path = %unit.destination.display(), "could not remove partial file: {e}");
                    }
                }
            }
        }
        Action::Retry => {
            job.retry_failed(cfg.retry_policy().max_attempts)?;
        }
        Action::Load => {}
    }
    for unit in &job.units {
        registry.update_unit(unit).await?;
    }
    registry.update_job(&job).await?;
    tracing::info!(job_id = id, %action, status = %job.status, "control command applied to registry");
    Ok(())
}
