//! `cdl run` – run the engine until Ctrl-C (or until idle).

use anyhow::Result;
use cdl_core::config::CdlConfig;
use cdl_core::engine::EngineSettings;
use cdl_core::events::{EngineEvent, EventKind, SubscriptionFilter};
use cdl_core::paths;
use cdl_core::quota::RegistryAccountLimits;
use cdl_core::registry::Registry;
use cdl_core::Engine;
use std::sync::Arc;

use crate::cli::control_socket;

const MIB: f64 = 1_048_576.0;

pub async fn run_engine(registry: Registry, cfg: &CdlConfig, until_idle: bool, json: bool) -> Result<()> {
    let settings = EngineSettings::from_config(cfg);
    let limits = Arc::new(RegistryAccountLimits::new(registry.clone(), cfg.limits.clone()));
    let engine = Engine::builder(settings, registry).limits(limits).start().await?;

    let socket_path = paths::default_control_socket_path()?;
    let listener = match control_socket::spawn_control_listener(engine.clone(), &socket_path) {
        Ok(handle) => {
            tracing::debug!(path = %socket_path.display(), "control socket listening");
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(path = %socket_path.display(), "control socket bind: {e:#}");
            None
        }
    };

    let mut events = engine.subscribe(SubscriptionFilter::All).await?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!("event serialization: {e}"),
                }
            } else {
                println!("{}", describe_event(&event));
            }
        }
    });

    if until_idle {
        tokio::select! {
            _ = engine.wait_idle() => tracing::info!("nothing left to download"),
            r = tokio::signal::ctrl_c() => r?,
        }
    } else {
        tokio::signal::ctrl_c().await?;
        println!("Shutting down; in-flight items resume on the next run.");
    }

    if let Some(handle) = listener {
        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }
    engine.shutdown().await;
    // Let the printer drain what the shutdown published.
    tokio::task::yield_now().await;
    printer.abort();
    Ok(())
}

/// One human-readable line per event.
pub fn describe_event(event: &EngineEvent) -> String {
    let job = event.job_id;
    match &event.kind {
        EventKind::Snapshot { job: snap, percentage } => format!(
            "job {job} [{}] {:.1}% of {:?} ({}/{} items)",
            snap.status,
            percentage,
            snap.course_title,
            snap.completed_items,
            snap.total_items()
        ),
        EventKind::JobStarted => format!("job {job} started"),
        EventKind::Progress(p) => {
            let total = p
                .total_bytes
                .map(|t| format!("{:.1}", t as f64 / MIB))
                .unwrap_or_else(|| "?".to_string());
            let eta = p
                .eta_secs
                .map(|s| format!("{:.0}s", s))
                .unwrap_or_else(|| "?".to_string());
            format!(
                "job {job} {:.1}%  {:.1} / {} MiB  {:.2} MiB/s  ETA {}",
                p.percentage,
                p.bytes as f64 / MIB,
                total,
                p.speed_bps / MIB,
                eta
            )
        }
        EventKind::ItemCompleted {
            item_id,
            skipped: true,
            ..
        } => format!("job {job} skipped {item_id}"),
        EventKind::ItemCompleted { item_id, bytes, .. } => {
            format!("job {job} finished {item_id} ({bytes} bytes)")
        }
        EventKind::ItemFailed { item_id, error, .. } => {
            format!("job {job} failed {item_id}: {} ({})", error.message, error.kind)
        }
        EventKind::JobPaused => format!("job {job} paused"),
        EventKind::JobResumed => format!("job {job} resumed"),
        EventKind::JobCompleted { summary } => format!(
            "job {job} completed: {} of {} items ({} skipped, {} failed)",
            summary.completed, summary.total, summary.skipped, summary.failed
        ),
        EventKind::JobFailed { summary, error } => format!(
            "job {job} failed: {} ({} of {} items failed)",
            error.as_ref().map(|e| e.message.as_str()).unwrap_or("every item failed"),
            summary.failed,
            summary.total
        ),
        EventKind::JobCancelled { summary } => format!(
            "job {job} cancelled ({} of {} items done)",
            summary.completed, summary.total
        ),
    }
}
