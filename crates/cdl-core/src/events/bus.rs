//! Broadcast fan-out to any number of observers.
//!
//! Publishing never waits on subscribers: the channel is bounded and a
//! subscriber that falls behind loses its oldest events (it can always
//! resubscribe for a fresh snapshot).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::debug;

use super::EngineEvent;
use crate::job::{JobId, UserId};

/// Which events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    Job(JobId),
    User(UserId),
    /// Every job (operator console).
    All,
}

impl SubscriptionFilter {
    pub fn matches(&self, job_id: JobId, user_id: &str) -> bool {
        match self {
            SubscriptionFilter::Job(id) => *id == job_id,
            SubscriptionFilter::User(u) => u == user_id,
            SubscriptionFilter::All => true,
        }
    }
}

pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Fan an event out to current subscribers. Never blocks.
    pub fn publish(&self, event: EngineEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event);
        }
    }

    /// Events published so far. No job's sequence number is above it, so a
    /// handle that starts counting here never repeats one.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Raw receiver. Subscribe before taking snapshots so no event falls in between.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

/// Filtered event stream: snapshots first, then live events newer than them.
pub struct EventStream {
    rx: broadcast::Receiver<EngineEvent>,
    filter: SubscriptionFilter,
    /// Per job: sequence number the snapshot reflected.
    watermarks: HashMap<JobId, u64>,
    backlog: VecDeque<EngineEvent>,
    lagged: u64,
}

impl EventStream {
    /// `rx` must have been created before `snapshots` were taken.
    pub fn new(
        rx: broadcast::Receiver<EngineEvent>,
        filter: SubscriptionFilter,
        snapshots: Vec<EngineEvent>,
    ) -> Self {
        let watermarks = snapshots.iter().map(|e| (e.job_id, e.seq)).collect();
        Self {
            rx,
            filter,
            watermarks,
            backlog: snapshots.into(),
            lagged: 0,
        }
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    /// Events dropped because this subscriber fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    fn wanted(&self, event: &EngineEvent) -> bool {
        if !self.filter.matches(event.job_id, &event.user_id) {
            return false;
        }
        match self.watermarks.get(&event.job_id) {
            Some(mark) => event.seq > *mark,
            None => true,
        }
    }

    /// Next event, or None once the engine has shut down.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wanted(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, filter = ?self.filter, "event subscriber lagged");
                    self.lagged += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is ready, without waiting.
    pub fn try_next(&mut self) -> Option<EngineEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wanted(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.lagged += n,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn ev(job_id: JobId, user: &str, seq: u64, kind: EventKind) -> EngineEvent {
        EngineEvent {
            job_id,
            user_id: user.to_string(),
            seq,
            kind,
        }
    }

    #[tokio::test]
    async fn snapshot_first_then_newer_events_only() {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        // Published after subscribing but already reflected in the snapshot.
        bus.publish(ev(1, "ana", 4, EventKind::JobStarted));
        let snapshot = ev(1, "ana", 4, EventKind::JobPaused);
        let mut stream = EventStream::new(rx, SubscriptionFilter::Job(1), vec![snapshot]);
        bus.publish(ev(1, "ana", 5, EventKind::JobResumed));

        assert_eq!(stream.next().await.unwrap().seq, 4);
        let live = stream.next().await.unwrap();
        assert_eq!(live.seq, 5);
        assert_eq!(live.kind.name(), "job_resumed");
        assert!(stream.try_next().is_none());
    }

    #[tokio::test]
    async fn filters_by_user() {
        let bus = EventBus::new(16);
        let mut stream = EventStream::new(bus.subscribe(), SubscriptionFilter::User("ana".into()), vec![]);
        bus.publish(ev(1, "bob", 1, EventKind::JobStarted));
        bus.publish(ev(2, "ana", 1, EventKind::JobStarted));
        let got = stream.next().await.unwrap();
        assert_eq!((got.job_id, got.user_id.as_str()), (2, "ana"));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(4);
        let mut stream = EventStream::new(bus.subscribe(), SubscriptionFilter::Job(1), vec![]);
        for seq in 1..=20 {
            bus.publish(ev(1, "ana", seq, EventKind::JobStarted));
        }
        let first = stream.next().await.unwrap();
        assert!(first.seq > 1);
        assert!(stream.lagged() > 0);
    }

    #[tokio::test]
    async fn closed_bus_ends_stream() {
        let bus = EventBus::new(4);
        let mut stream = EventStream::new(bus.subscribe(), SubscriptionFilter::Job(1), vec![]);
        drop(bus);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn publish_counts_events_even_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(ev(1, "ana", 1, EventKind::JobStarted));
        bus.publish(ev(2, "bob", 1, EventKind::JobStarted));
        assert_eq!(bus.published(), 2);
        let mut stream = EventStream::new(bus.subscribe(), SubscriptionFilter::All, vec![]);
        assert!(stream.try_next().is_none());
    }
}
