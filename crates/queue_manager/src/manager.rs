//! QueueManager - per-destination queues plus in-flight bookkeeping.

use contracts::{Clock, Dispatch, EventBus, ProcessorId, QueueSettings, CONSENT_QUEUE_ID};
use metrics::{counter, gauge};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::{DispatchStore, QueueError};

/// Queue change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// New entries were persisted for these destinations
    Enqueued { destinations: Vec<ProcessorId> },
    /// Entries were removed for these destinations
    Deleted { destinations: Vec<ProcessorId> },
}

impl QueueEvent {
    pub fn destinations(&self) -> &[ProcessorId] {
        match self {
            Self::Enqueued { destinations } | Self::Deleted { destinations } => destinations,
        }
    }
}

#[derive(Default)]
struct StoreOutcome {
    inserted: bool,
    evicted: bool,
    error: Option<QueueError>,
}

/// Owns the store and the in-flight sets.
///
/// Invariant: every in-flight id is persisted for the same destination.
/// Ids leave the in-flight set when their entry is deleted, evicted,
/// expired or purged by reconciliation, or when released back to the queue.
pub struct QueueManager {
    store: Box<dyn DispatchStore>,
    inflight: HashMap<ProcessorId, HashSet<String>>,
    settings: watch::Receiver<QueueSettings>,
    limits: QueueSettings,
    clock: Arc<dyn Clock>,
    events: EventBus<QueueEvent>,
}

impl QueueManager {
    /// Create a manager over `store`, taking limits from `settings`
    pub fn new(
        store: Box<dyn DispatchStore>,
        mut settings: watch::Receiver<QueueSettings>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limits = *settings.borrow_and_update();
        Self {
            store,
            inflight: HashMap::new(),
            settings,
            limits,
            clock,
            events: EventBus::new(),
        }
    }

    /// Queue change notifications
    pub fn events(&self) -> &EventBus<QueueEvent> {
        &self.events
    }

    /// Limits currently in force
    pub fn limits(&self) -> QueueSettings {
        self.limits
    }

    /// Persist every dispatch for every destination.
    ///
    /// Already-queued ids are skipped. A failing destination does not stop
    /// the others; the first failure is returned after all were attempted.
    #[instrument(level = "debug", skip_all, fields(dispatches = dispatches.len(), destinations = destinations.len()))]
    pub fn store_dispatches(
        &mut self,
        dispatches: &[Dispatch],
        destinations: &[ProcessorId],
    ) -> Result<(), QueueError> {
        self.refresh_limits();
        self.purge_expired();

        let now = self.clock.now();
        let mut first_error = None;
        let mut enqueued = Vec::new();
        let mut deleted = Vec::new();

        for destination in destinations {
            let outcome = self.store_for(destination, dispatches, now);
            if outcome.inserted {
                enqueued.push(destination.clone());
            }
            if outcome.evicted {
                deleted.push(destination.clone());
            }
            if outcome.inserted || outcome.evicted {
                self.record_size(destination);
            }
            if let Some(e) = outcome.error {
                warn!(processor = %destination, error = %e, "Failed to store dispatches");
                first_error.get_or_insert(e);
            }
        }

        if !enqueued.is_empty() {
            self.events.publish(&QueueEvent::Enqueued {
                destinations: enqueued,
            });
        }
        if !deleted.is_empty() {
            self.events.publish(&QueueEvent::Deleted {
                destinations: deleted,
            });
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Insert for one destination, then enforce its max size.
    ///
    /// Entries inserted before a failure stay persisted and are reported.
    fn store_for(
        &mut self,
        destination: &ProcessorId,
        dispatches: &[Dispatch],
        now: chrono::DateTime<chrono::Utc>,
    ) -> StoreOutcome {
        let mut outcome = StoreOutcome::default();
        for dispatch in dispatches {
            match self.store.insert(destination, dispatch, now) {
                Ok(added) => outcome.inserted |= added,
                Err(e) => {
                    outcome.error = Some(e);
                    break;
                }
            }
        }
        match self.evict(destination) {
            Ok(evicted) => outcome.evicted = evicted,
            Err(e) => {
                outcome.error.get_or_insert(e);
            }
        }
        outcome
    }

    /// Dequeue up to `limit` (or all) entries for `destination`, oldest
    /// first, marking them in-flight.
    #[instrument(level = "debug", skip(self), fields(processor = %destination))]
    pub fn dequeue_dispatches(
        &mut self,
        destination: &ProcessorId,
        limit: Option<usize>,
    ) -> Result<Vec<Dispatch>, QueueError> {
        self.refresh_limits();
        self.purge_expired();

        if limit == Some(0) {
            return Ok(Vec::new());
        }

        let not_before = self.limits.expiry_cutoff(self.clock.now());
        let inflight = self.inflight.entry(destination.clone()).or_default();
        let rows = self
            .store
            .query(destination, limit, inflight, not_before)?;

        inflight.extend(rows.iter().map(|row| row.dispatch.id.clone()));
        gauge!("dispatch_router_inflight", "processor" => destination.to_string())
            .set(inflight.len() as f64);

        Ok(rows.into_iter().map(|row| row.dispatch).collect())
    }

    /// Delete `ids` for `destination` from the store and the in-flight set
    #[instrument(level = "debug", skip(self, ids), fields(processor = %destination, count = ids.len()))]
    pub fn delete_dispatches(
        &mut self,
        ids: &[String],
        destination: &ProcessorId,
    ) -> Result<(), QueueError> {
        let removed = self.store.delete(destination, ids)?;
        let mut affected = !removed.is_empty();
        if let Some(inflight) = self.inflight.get_mut(destination) {
            for id in ids {
                affected |= inflight.remove(id);
            }
        }
        if affected {
            self.record_size(destination);
            self.events.publish(&QueueEvent::Deleted {
                destinations: vec![destination.clone()],
            });
        }
        Ok(())
    }

    /// Return `ids` to the queued state without touching the store
    pub fn release_inflight(&mut self, ids: &[String], destination: &ProcessorId) {
        let Some(inflight) = self.inflight.get_mut(destination) else {
            return;
        };
        for id in ids {
            inflight.remove(id);
        }
        gauge!("dispatch_router_inflight", "processor" => destination.to_string())
            .set(inflight.len() as f64);
    }

    /// Delete everything queued or in flight for `destination`
    pub fn delete_all_dispatches(&mut self, destination: &ProcessorId) -> Result<(), QueueError> {
        let removed = self.store.delete_all(destination)?;
        let inflight = self.inflight.remove(destination).unwrap_or_default();
        if !removed.is_empty() || !inflight.is_empty() {
            debug!(processor = %destination, removed = removed.len(), "Queue cleared");
            self.record_size(destination);
            self.events.publish(&QueueEvent::Deleted {
                destinations: vec![destination.clone()],
            });
        }
        Ok(())
    }

    /// Purge queues of destinations no longer in `active`.
    ///
    /// The consent queue is never purged here.
    pub fn update_destinations(&mut self, active: &[ProcessorId]) -> Result<(), QueueError> {
        let active: HashSet<&str> = active.iter().map(|id| id.as_str()).collect();
        let stale: BTreeSet<ProcessorId> = self
            .store
            .destinations()?
            .into_iter()
            .chain(self.inflight.keys().cloned())
            .filter(|id| !id.is_reserved() && !active.contains(id.as_str()))
            .collect();

        for destination in stale {
            debug!(processor = %destination, "Purging queue of removed destination");
            self.delete_all_dispatches(&destination)?;
        }
        Ok(())
    }

    /// Persisted entries for `destination`, including in-flight ones
    pub fn queue_size(&self, destination: &str) -> usize {
        self.store.count(destination).unwrap_or_else(|e| {
            warn!(processor = destination, error = %e, "Failed to count queue");
            0
        })
    }

    /// Entries currently in flight for `destination`
    pub fn inflight_count(&self, destination: &str) -> usize {
        self.inflight.get(destination).map_or(0, HashSet::len)
    }

    /// Whether `id` is in flight for `destination`
    pub fn is_inflight(&self, destination: &str, id: &str) -> bool {
        self.inflight
            .get(destination)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Entries parked while consent is undecided
    pub fn consent_queue_size(&self) -> usize {
        self.queue_size(CONSENT_QUEUE_ID)
    }

    /// Apply new limits if the settings stream changed since last use
    fn refresh_limits(&mut self) {
        if !self.settings.has_changed().unwrap_or(false) {
            return;
        }
        let limits = *self.settings.borrow_and_update();
        if limits == self.limits {
            return;
        }
        debug!(
            max_queue_size = limits.max_queue_size,
            expiration_seconds = limits.expiration_seconds,
            "Queue limits updated"
        );
        self.limits = limits;

        let destinations = match self.store.destinations() {
            Ok(destinations) => destinations,
            Err(e) => {
                warn!(error = %e, "Failed to list destinations for eviction");
                return;
            }
        };
        let mut deleted = Vec::new();
        for destination in destinations {
            match self.evict(&destination) {
                Ok(true) => {
                    self.record_size(&destination);
                    deleted.push(destination);
                }
                Ok(false) => {}
                Err(e) => warn!(processor = %destination, error = %e, "Eviction failed"),
            }
        }
        if !deleted.is_empty() {
            self.events.publish(&QueueEvent::Deleted {
                destinations: deleted,
            });
        }
    }

    /// Enforce max size for one destination; true if anything was evicted
    fn evict(&mut self, destination: &ProcessorId) -> Result<bool, QueueError> {
        let evicted = self.store.evict(destination, self.limits.max_queue_size)?;
        if evicted.is_empty() {
            return Ok(false);
        }
        if let Some(inflight) = self.inflight.get_mut(destination) {
            for id in &evicted {
                inflight.remove(id);
            }
        }
        debug!(processor = %destination, evicted = evicted.len(), "Evicted oldest dispatches");
        counter!("dispatch_router_queue_evicted_total", "processor" => destination.to_string())
            .increment(evicted.len() as u64);
        Ok(true)
    }

    fn purge_expired(&mut self) {
        let not_before = self.limits.expiry_cutoff(self.clock.now());
        let purged = match self.store.purge_expired(not_before) {
            Ok(purged) => purged,
            Err(e) => {
                warn!(error = %e, "Failed to purge expired dispatches");
                return;
            }
        };
        if purged.is_empty() {
            return;
        }

        let mut destinations = BTreeSet::new();
        for (destination, id) in purged {
            if let Some(inflight) = self.inflight.get_mut(&destination) {
                inflight.remove(&id);
            }
            destinations.insert(destination);
        }
        counter!("dispatch_router_queue_expired_total").increment(destinations.len() as u64);
        for destination in &destinations {
            self.record_size(destination);
        }
        self.events.publish(&QueueEvent::Deleted {
            destinations: destinations.into_iter().collect(),
        });
    }

    fn record_size(&self, destination: &ProcessorId) {
        gauge!("dispatch_router_queue_size", "processor" => destination.to_string())
            .set(self.queue_size(destination) as f64);
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("limits", &self.limits)
            .field("inflight", &self.inflight)
            .finish_non_exhaustive()
    }
}
