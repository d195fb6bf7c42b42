//! Programmatic barriers and the registry the processing loop reads from.

use contracts::{Barrier, BarrierStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Barrier driven by explicit calls
#[derive(Debug)]
pub struct ManualBarrier {
    id: String,
    status: watch::Sender<BarrierStatus>,
}

impl ManualBarrier {
    /// Create with an initial status
    pub fn new(id: impl Into<String>, initial: BarrierStatus) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            id: id.into(),
            status,
        }
    }

    /// Open, keeping the flushable flag
    pub fn open(&self) {
        self.status.send_modify(|s| *s = BarrierStatus::open(s.flushable));
        debug!(barrier_id = %self.id, "Barrier opened");
    }

    /// Close, keeping the flushable flag
    pub fn close(&self) {
        self.status.send_modify(|s| *s = BarrierStatus::closed(s.flushable));
        debug!(barrier_id = %self.id, "Barrier closed");
    }

    /// Change whether a flush may bypass this barrier
    pub fn set_flushable(&self, flushable: bool) {
        self.status.send_modify(|s| s.flushable = flushable);
    }

    /// Replace the whole status
    pub fn set(&self, status: BarrierStatus) {
        self.status.send_replace(status);
    }

    /// Current status
    pub fn current(&self) -> BarrierStatus {
        *self.status.borrow()
    }
}

impl Barrier for ManualBarrier {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> watch::Receiver<BarrierStatus> {
        self.status.subscribe()
    }
}

/// Barriers known to the host, keyed by id
#[derive(Default, Clone)]
pub struct BarrierRegistry {
    barriers: BTreeMap<String, Arc<dyn Barrier>>,
}

impl BarrierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a barrier; returns the previous one with that id
    pub fn register(&mut self, barrier: Arc<dyn Barrier>) -> Option<Arc<dyn Barrier>> {
        self.barriers.insert(barrier.id().to_string(), barrier)
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<dyn Barrier>> {
        self.barriers.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Barrier>> {
        self.barriers.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.barriers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Drain every registered barrier
    pub fn into_barriers(self) -> impl Iterator<Item = Arc<dyn Barrier>> {
        self.barriers.into_values()
    }
}

impl std::fmt::Debug for BarrierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.barriers.keys()).finish()
    }
}
