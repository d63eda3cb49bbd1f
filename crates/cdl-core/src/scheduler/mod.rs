//! Dispatch of transfer units to the worker pool.
//!
//! The scheduler tracks every live job and hands out leases: one lease is one
//! unit running on one worker. It enforces the global worker count and the
//! per-user cap; workers block in `next_lease` until something is runnable.
//! A finished job is dropped once its last lease is back; from then on the
//! registry is its record.
//!
//! Lock order: the dispatch lock is taken before any job lock, never after.

mod choose;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::trace;

use crate::job::{JobHandle, JobId, TransferUnit, UnitId, UserId};
use choose::Candidate;

/// A unit leased to a worker. Return it with [`Scheduler::release`].
pub struct Lease {
    pub job: Arc<JobHandle>,
    pub unit: TransferUnit,
    pub headers: HashMap<String, String>,
}

#[derive(Default)]
struct DispatchState {
    jobs: BTreeMap<JobId, Arc<JobHandle>>,
    per_user: HashMap<UserId, usize>,
    in_flight: HashMap<UnitId, JobId>,
    running: usize,
    closed: bool,
}

impl DispatchState {
    /// Drop `job_id` if it is finished and none of its units is leased.
    fn retire(&mut self, job_id: JobId) -> bool {
        if self.in_flight.values().any(|j| *j == job_id) {
            return false;
        }
        let finished = self
            .jobs
            .get(&job_id)
            .is_some_and(|h| h.lock().job.status.is_terminal());
        if finished {
            self.jobs.remove(&job_id);
            trace!(job_id, tracked = self.jobs.len(), "finished job retired");
        }
        finished
    }
}

pub struct Scheduler {
    state: Mutex<DispatchState>,
    workers: usize,
    per_user: usize,
    wake: Notify,
    idle: Notify,
}

impl Scheduler {
    pub fn new(workers: usize, per_user: usize) -> Self {
        Self {
            state: Mutex::new(DispatchState::default()),
            workers: workers.max(1),
            per_user: per_user.max(1),
            wake: Notify::new(),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Track a job. If one with the same id is already tracked, that handle
    /// is kept and returned.
    pub fn insert(&self, handle: Arc<JobHandle>) -> Arc<JobHandle> {
        let tracked = Arc::clone(self.lock().jobs.entry(handle.id).or_insert(handle));
        self.notify_changed();
        tracked
    }

    pub fn get(&self, job_id: JobId) -> Option<Arc<JobHandle>> {
        self.lock().jobs.get(&job_id).cloned()
    }

    /// Stop tracking `job_id` if it is finished with nothing in flight.
    pub fn retire(&self, job_id: JobId) -> bool {
        self.lock().retire(job_id)
    }

    /// All tracked jobs in id order.
    pub fn handles(&self) -> Vec<Arc<JobHandle>> {
        self.lock().jobs.values().cloned().collect()
    }

    /// Units currently leased, overall and for one user.
    pub fn running(&self) -> usize {
        self.lock().running
    }

    pub fn running_for(&self, user_id: &str) -> usize {
        self.lock().per_user.get(user_id).copied().unwrap_or(0)
    }

    /// Something may have become runnable (or finished); wake waiting workers
    /// and idle waiters so they re-check.
    pub fn notify_changed(&self) {
        self.wake.notify_waiters();
        self.idle.notify_waiters();
    }

    /// Stop handing out leases. Waiting workers return None.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify_changed();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn try_lease(&self) -> Option<Lease> {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.closed || st.running >= self.workers {
            return None;
        }

        let mut candidates = Vec::new();
        let mut units = Vec::new();
        for handle in st.jobs.values() {
            let cell = handle.lock();
            if !cell.job.status.is_dispatchable() {
                continue;
            }
            let in_flight = &st.in_flight;
            if let Some(unit) = cell.job.next_pending(|id| in_flight.contains_key(&id)) {
                candidates.push(Candidate {
                    job_id: handle.id,
                    user_id: &handle.user_id,
                    priority: cell.job.priority,
                });
                units.push((Arc::clone(handle), unit.clone(), cell.job.request_headers.clone()));
            }
        }

        let per_user = &st.per_user;
        let idx = choose::pick(
            &candidates,
            |user| per_user.get(user).copied().unwrap_or(0),
            self.per_user,
        )?;
        drop(candidates);
        let (job, unit, headers) = units.swap_remove(idx);

        st.in_flight.insert(unit.id, job.id);
        st.running += 1;
        *st.per_user.entry(job.user_id.clone()).or_insert(0) += 1;
        trace!(job_id = job.id, unit_id = unit.id, running = st.running, "unit leased");
        Some(Lease { job, unit, headers })
    }

    /// Wait for the next runnable unit. None once the scheduler is closed.
    pub async fn next_lease(&self) -> Option<Lease> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return None;
            }
            if let Some(lease) = self.try_lease() {
                return Some(lease);
            }
            notified.await;
        }
    }

    /// Return a finished lease's slot. The job is retired if this was its
    /// last lease and it has finished.
    pub fn release(&self, lease: &Lease) {
        {
            let mut st = self.lock();
            if st.in_flight.remove(&lease.unit.id).is_some() {
                st.running = st.running.saturating_sub(1);
                if let Some(n) = st.per_user.get_mut(&lease.job.user_id) {
                    *n = n.saturating_sub(1);
                    if *n == 0 {
                        st.per_user.remove(&lease.job.user_id);
                    }
                }
            }
            st.retire(lease.job.id);
        }
        self.notify_changed();
    }

    /// No unit is running and no tracked job has one waiting to run.
    pub fn is_idle(&self) -> bool {
        let st = self.lock();
        if st.running > 0 {
            return false;
        }
        !st.jobs.values().any(|h| {
            let cell = h.lock();
            cell.job.status.is_dispatchable() && cell.job.next_pending(|_| false).is_some()
        })
    }

    /// Resolve once [`Self::is_idle`] holds (or the scheduler closes with nothing running).
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() || (self.is_closed() && self.running() == 0) {
                return;
            }
            notified.await;
        }
    }
}
