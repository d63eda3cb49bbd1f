//! Ordered write-behind to the registry.
//!
//! Workers and control operations run under job locks and must not wait on
//! SQLite, so they queue writes here. One task applies them in order, which
//! keeps a unit's rows consistent with the order its transitions happened.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::job::{Job, TransferUnit, UnitId};
use crate::registry::Registry;

pub(crate) enum Persist {
    Job(Box<Job>),
    Unit(Box<TransferUnit>),
    Progress { unit_id: UnitId, bytes: u64, cursor: u64 },
    /// Acknowledged once every earlier write was applied.
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub(crate) struct Persister {
    tx: mpsc::UnboundedSender<Persist>,
}

impl Persister {
    pub fn spawn(registry: Registry) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(registry, rx));
        (Self { tx }, handle)
    }

    fn send(&self, msg: Persist) {
        if self.tx.send(msg).is_err() {
            warn!("registry writer stopped; dropping update");
        }
    }

    pub fn job(&self, job: &Job) {
        self.send(Persist::Job(Box::new(job.clone())));
    }

    pub fn unit(&self, unit: &TransferUnit) {
        self.send(Persist::Unit(Box::new(unit.clone())));
    }

    /// Queue every unit in `ids` (looked up in `job`).
    pub fn units(&self, job: &Job, ids: &[UnitId]) {
        for unit in job.units.iter().filter(|u| ids.contains(&u.id)) {
            self.unit(unit);
        }
    }

    pub fn progress(&self, unit_id: UnitId, bytes: u64, cursor: u64) {
        self.send(Persist::Progress {
            unit_id,
            bytes,
            cursor,
        });
    }

    /// Wait until every write queued so far reached the registry.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Persist::Flush(tx));
        let _ = rx.await;
    }
}

async fn run(registry: Registry, mut rx: mpsc::UnboundedReceiver<Persist>) {
    while let Some(msg) = rx.recv().await {
        let result = match msg {
            Persist::Job(job) => registry.update_job(&job).await,
            Persist::Unit(unit) => registry.update_unit(&unit).await,
            Persist::Progress {
                unit_id,
                bytes,
                cursor,
            } => registry.update_unit_progress(unit_id, bytes, cursor).await,
            Persist::Flush(ack) => {
                let _ = ack.send(());
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %format!("{e:#}"), "registry write failed");
        }
    }
}
