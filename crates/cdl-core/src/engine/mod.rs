//! Engine facade: submit jobs, control them, observe them.
//!
//! `Engine` owns the scheduler, the worker pool, the event bus and the
//! registry writer. Control operations take the job's lock, apply the
//! transition, queue the registry write and publish the event in that order,
//! so observers never see an event for a state the registry could not have.
//! Finished jobs leave the scheduler once idle; reads and control calls on
//! them go through the registry.

mod admit;
mod persist;
mod worker;


pub use admit::{admit_job, prepare_job, SubmitRequest};

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::catalog::{CourseCatalog, ManifestCatalog};
use crate::config::{CdlConfig, CleanupPolicy};
use crate::control::Signal;
use crate::error::{EngineError, SubmitError};
use crate::events::{EngineEvent, EventBus, EventKind, EventStream, SubscriptionFilter};
use crate::job::{Job, JobHandle, JobId};
use crate::limiter::RateLimiter;
use crate::quota::{AccountLimits, Unlimited};
use crate::registry::{unix_timestamp, Registry};
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::storage;
use crate::transport::{CurlTransport, Transport};

use persist::Persister;
use worker::publish_terminal;

/// Tunables the engine runs with (derived from [`CdlConfig`]).
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub workers: usize,
    pub per_user: usize,
    pub chunk_size: usize,
    pub progress_interval: Duration,
    pub event_buffer: usize,
    pub cancel_cleanup: CleanupPolicy,
    pub download_dir: PathBuf,
    pub max_bytes_per_sec: Option<u64>,
    pub retry: RetryPolicy,
}

impl EngineSettings {
    pub fn from_config(cfg: &CdlConfig) -> Self {
        Self {
            workers: cfg.workers(),
            per_user: cfg.per_user(),
            chunk_size: cfg.chunk_size_bytes.max(1024),
            progress_interval: cfg.progress_interval(),
            event_buffer: cfg.event_buffer.max(16),
            cancel_cleanup: cfg.cancel_cleanup,
            download_dir: cfg.download_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            max_bytes_per_sec: cfg.max_bytes_per_sec,
            retry: cfg.retry_policy(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&CdlConfig::default())
    }
}

/// State shared by the facade, the workers and the blocking transfers.
pub(crate) struct Shared {
    pub settings: EngineSettings,
    pub scheduler: Scheduler,
    pub bus: EventBus,
    pub registry: Registry,
    pub catalog: Arc<dyn CourseCatalog>,
    pub limits: Arc<dyn AccountLimits>,
    pub transport: Arc<dyn Transport>,
    pub limiter: RateLimiter,
    pub persist: Persister,
}

impl Shared {
    /// Start tracking `job`. Returns the tracked handle (an existing one wins).
    /// A finished job stays tracked until the caller retires it.
    fn track(&self, mut job: Job) -> Arc<JobHandle> {
        let before = job.status;
        job.enqueue();
        let settled = job.settle(unix_timestamp()).is_some();
        if job.status != before {
            self.persist.job(&job);
        }
        let handle = Arc::new(JobHandle::new(job, self.settings.progress_interval));
        handle.lock().seq = self.bus.published();
        let tracked = self.scheduler.insert(Arc::clone(&handle));
        if settled && Arc::ptr_eq(&tracked, &handle) {
            publish_terminal(self, &mut tracked.lock());
        }
        tracked
    }
}

struct Tasks {
    workers: JoinSet<()>,
    persist: JoinHandle<()>,
}

/// Builds an [`Engine`] around a registry, with pluggable collaborators.
pub struct EngineBuilder {
    settings: EngineSettings,
    registry: Registry,
    catalog: Option<Arc<dyn CourseCatalog>>,
    limits: Option<Arc<dyn AccountLimits>>,
    transport: Option<Arc<dyn Transport>>,
}

impl EngineBuilder {
    pub fn catalog(mut self, catalog: Arc<dyn CourseCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn limits(mut self, limits: Arc<dyn AccountLimits>) -> Self {
        self.limits = Some(limits);
        self
    }

    /// HTTP transport (default: libcurl).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Recover interrupted jobs from the registry and start the worker pool.
    pub async fn start(self) -> Result<Engine> {
        let settings = self.settings;
        let registry = self.registry;
        let recovered = registry
            .recover_interrupted()
            .await
            .context("recover interrupted jobs")?;
        let unfinished = registry
            .load_unfinished()
            .await
            .context("load unfinished jobs")?;

        let (persist, persist_task) = Persister::spawn(registry.clone());
        let shared = Arc::new(Shared {
            scheduler: Scheduler::new(settings.workers, settings.per_user),
            bus: EventBus::new(settings.event_buffer),
            limiter: RateLimiter::new(settings.max_bytes_per_sec),
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(ManifestCatalog::default())),
            limits: self.limits.unwrap_or_else(|| Arc::new(Unlimited)),
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(CurlTransport::new())),
            registry,
            persist,
            settings,
        });

        let loaded = unfinished.len();
        for job in unfinished {
            let id = shared.track(job).id;
            shared.scheduler.retire(id);
        }

        let mut workers = JoinSet::new();
        for worker in 0..shared.settings.workers {
            workers.spawn(worker::run_worker(Arc::clone(&shared), worker));
        }
        info!(
            workers = shared.settings.workers,
            per_user = shared.settings.per_user,
            recovered,
            loaded,
            "engine started"
        );

        Ok(Engine {
            shared,
            tasks: Arc::new(tokio::sync::Mutex::new(Some(Tasks {
                workers,
                persist: persist_task,
            }))),
        })
    }
}

/// Handle to a running engine. Clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
    tasks: Arc<tokio::sync::Mutex<Option<Tasks>>>,
}

impl Engine {
    pub fn builder(settings: EngineSettings, registry: Registry) -> EngineBuilder {
        EngineBuilder {
            settings,
            registry,
            catalog: None,
            limits: None,
            transport: None,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Admit a job (catalog, selection, quota) and queue it.
    pub async fn submit_job(&self, req: SubmitRequest) -> Result<JobId, SubmitError> {
        let shared = &self.shared;
        if shared.scheduler.is_closed() {
            return Err(SubmitError::Shutdown);
        }
        let job = admit_job(
            shared.catalog.as_ref(),
            shared.limits.as_ref(),
            &shared.registry,
            &shared.settings.download_dir,
            shared.settings.retry.max_attempts,
            &req,
        )
        .await?;
        let id = job.id;
        shared.track(job);
        // Every item may have been skipped already.
        shared.scheduler.retire(id);
        Ok(id)
    }

    /// Pick up a job recorded in the registry by another process (e.g. `cdl submit`).
    pub async fn load_job(&self, job_id: JobId) -> Result<(), EngineError> {
        self.control(job_id, |_, _| Ok(())).await
    }

    /// Tracked handle for `job_id`, loading it from the registry if needed.
    async fn handle(&self, job_id: JobId) -> Result<Arc<JobHandle>, EngineError> {
        if let Some(handle) = self.shared.scheduler.get(job_id) {
            return Ok(handle);
        }
        // A retired job's last writes may still be queued.
        self.shared.persist.flush().await;
        let job = self
            .shared
            .registry
            .get_job(job_id)
            .await?
            .ok_or(EngineError::NotFound(job_id))?;
        debug!(job_id, status = %job.status, "job loaded from registry");
        Ok(self.shared.track(job))
    }

    /// Run `op` on the job's handle, then retire the job if it is (still)
    /// finished, so control calls on old jobs do not pile up in the scheduler.
    async fn control<T>(
        &self,
        job_id: JobId,
        op: impl FnOnce(&Shared, &Arc<JobHandle>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let handle = self.handle(job_id).await?;
        let res = op(self.shared.as_ref(), &handle);
        self.shared.scheduler.retire(job_id);
        res
    }

    pub async fn pause_job(&self, job_id: JobId) -> Result<(), EngineError> {
        self.control(job_id, |shared, handle| {
            let mut cell = handle.lock();
            cell.job.pause()?;
            handle.signal().set(Signal::Pause);
            shared.persist.job(&cell.job);
            cell.emit(&shared.bus, EventKind::JobPaused);
            Ok(())
        })
        .await?;
        info!(job_id, "job paused");
        self.shared.scheduler.notify_changed();
        Ok(())
    }

    pub async fn resume_job(&self, job_id: JobId) -> Result<(), EngineError> {
        if self.shared.scheduler.is_closed() {
            return Err(EngineError::Shutdown);
        }
        self.control(job_id, |shared, handle| {
            let mut cell = handle.lock();
            let resumed = cell.job.resume()?;
            handle.signal().set(Signal::Run);
            cell.start_run();
            shared.persist.job(&cell.job);
            shared.persist.units(&cell.job, &resumed);
            cell.emit(&shared.bus, EventKind::JobResumed);
            Ok(())
        })
        .await?;
        info!(job_id, "job resumed");
        self.shared.scheduler.notify_changed();
        Ok(())
    }

    /// Cancel a job. It is `Cancelled` when this returns; in-flight units stop
    /// at their next chunk boundary.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<(), EngineError> {
        let partials: Vec<PathBuf> = self
            .control(job_id, |shared, handle| {
                let mut cell = handle.lock();
                let cancelled = cell.job.cancel(unix_timestamp())?;
                handle.signal().set(Signal::Cancel);
                shared.persist.units(&cell.job, &cancelled);
                shared.persist.job(&cell.job);
                publish_terminal(shared, &mut cell);
                Ok(match shared.settings.cancel_cleanup {
                    CleanupPolicy::Delete => cell
                        .job
                        .units
                        .iter()
                        .filter(|u| cancelled.contains(&u.id))
                        .map(|u| u.destination.clone())
                        .collect(),
                    CleanupPolicy::Keep => Vec::new(),
                })
            })
            .await?;
        self.shared.scheduler.notify_changed();

        if !partials.is_empty() {
            let removed = tokio::task::spawn_blocking(move || {
                for path in &partials {
                    if let Err(e) = storage::discard_partial(path) {
                        warn!(path = %path.display(), error = %e, "could not remove partial file");
                    }
                }
            })
            .await;
            if let Err(e) = removed {
                warn!(job_id, error = %e, "partial file cleanup task failed");
            }
        }
        Ok(())
    }

    /// Give failed items another round of attempts. Reopens a finished job.
    pub async fn retry_failed_items(&self, job_id: JobId) -> Result<(), EngineError> {
        if self.shared.scheduler.is_closed() {
            return Err(EngineError::Shutdown);
        }
        let reset = self
            .control(job_id, |shared, handle| {
                let mut cell = handle.lock();
                let was_terminal = cell.job.status.is_terminal();
                let reset = cell.job.retry_failed(shared.settings.retry.max_attempts)?;
                if was_terminal {
                    handle.rearm();
                }
                shared.persist.units(&cell.job, &reset);
                shared.persist.job(&cell.job);
                cell.emit_progress(&shared.bus, None, true);
                Ok(reset.len())
            })
            .await?;
        info!(job_id, items = reset, "retrying failed items");
        self.shared.scheduler.notify_changed();
        Ok(())
    }

    /// Event stream for a job or a user: one snapshot per matching tracked
    /// job, then live events newer than the snapshots. A job the engine no
    /// longer tracks is snapshotted from the registry.
    pub async fn subscribe(&self, filter: SubscriptionFilter) -> Result<EventStream, EngineError> {
        let shared = &self.shared;
        let rx = shared.bus.subscribe();
        let mut snapshots: Vec<EngineEvent> = shared
            .scheduler
            .handles()
            .iter()
            .filter(|h| filter.matches(h.id, &h.user_id))
            .map(|h| h.lock().snapshot_event())
            .collect();
        if let SubscriptionFilter::Job(job_id) = filter {
            if snapshots.is_empty() {
                // Taken after `rx`: a reloaded handle counts on from `published`.
                let watermark = shared.bus.published();
                if let Some(job) = self.stored_job(job_id).await? {
                    snapshots.push(EngineEvent::snapshot(job, watermark));
                }
            }
        }
        Ok(EventStream::new(rx, filter, snapshots))
    }

    /// The registry's copy of a job, after any queued writes for it landed.
    async fn stored_job(&self, job_id: JobId) -> Result<Option<Job>, EngineError> {
        self.shared.persist.flush().await;
        Ok(self.shared.registry.get_job(job_id).await?)
    }

    /// Current state of a job (live if tracked, else from the registry).
    pub async fn job(&self, job_id: JobId) -> Result<Option<Job>, EngineError> {
        if let Some(handle) = self.shared.scheduler.get(job_id) {
            return Ok(Some(handle.snapshot()));
        }
        self.stored_job(job_id).await
    }

    /// Jobs (optionally of one user), oldest first, live state where tracked.
    pub async fn list_jobs(&self, user_id: Option<&str>) -> Result<Vec<Job>, EngineError> {
        self.shared.persist.flush().await;
        let mut jobs = self.shared.registry.list_jobs(user_id).await?;
        for job in &mut jobs {
            if let Some(handle) = self.shared.scheduler.get(job.id) {
                *job = handle.snapshot();
            }
        }
        Ok(jobs)
    }

    /// Resolve once no unit is running and nothing is waiting to run.
    pub async fn wait_idle(&self) {
        self.shared.scheduler.wait_idle().await;
    }

    /// Wait until every state change so far is in the registry.
    pub async fn flush(&self) {
        self.shared.persist.flush().await;
    }

    /// Stop the worker pool. In-flight units park with their cursors saved
    /// and resume on the next start. Idempotent.
    pub async fn shutdown(&self) {
        let Some(mut tasks) = self.tasks.lock().await.take() else {
            return;
        };
        let shared = &self.shared;
        shared.scheduler.close();
        for handle in shared.scheduler.handles() {
            let active = !handle.lock().job.status.is_terminal();
            if active {
                handle.signal().set(Signal::Pause);
            }
        }
        while let Some(res) = tasks.workers.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "worker task failed");
            }
        }
        shared.persist.flush().await;
        tasks.persist.abort();
        info!("engine shut down");
    }
}
