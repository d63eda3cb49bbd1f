//! `cdl submit` – admit a course job into the registry.

use anyhow::Result;
use cdl_core::catalog::ManifestCatalog;
use cdl_core::config::CdlConfig;
use cdl_core::engine::{admit_job, EngineSettings, SubmitRequest};
use cdl_core::paths;
use cdl_core::quota::RegistryAccountLimits;
use cdl_core::registry::Registry;
use std::path::Path;

use crate::cli::control_socket::{self, Action};

pub async fn run_submit(registry: &Registry, cfg: &CdlConfig, manifest: &Path, req: &SubmitRequest) -> Result<()> {
    let catalog = ManifestCatalog::load(manifest)?;
    let limits = RegistryAccountLimits::new(registry.clone(), cfg.limits.clone());
    let settings = EngineSettings::from_config(cfg);
    let job = admit_job(
        &catalog,
        &limits,
        registry,
        &settings.download_dir,
        settings.retry.max_attempts,
        req,
    )
    .await?;

    println!(
        "Submitted job {} for course {:?}: {} item(s)",
        job.id,
        job.course_title,
        job.total_items()
    );
    if job.units.iter().all(|u| u.status.is_final()) {
        println!("Nothing to download; every item was skipped.");
    }

    // A running engine picks the job up right away; otherwise the next `cdl run` does.
    if let Ok(path) = paths::default_control_socket_path() {
        match control_socket::send(&path, Action::Load, job.id).await {
            Ok(true) => tracing::debug!(job_id = job.id, "running engine notified"),
            Ok(false) => println!("No engine running; start one with `cdl run`."),
            Err(e) => tracing::warn!(job_id = job.id, "could not notify engine: {e:#}"),
        }
    }
    Ok(())
}
