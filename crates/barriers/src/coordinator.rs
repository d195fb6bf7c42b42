//! BarrierCoordinator - folds scoped barrier states into one gate per processor.

use contracts::{ActivityState, BarrierSettings, BarrierStatus, EventBus, ProcessorId};
use metrics::counter;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

/// Emitted when a processor's gate flips
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateChange {
    pub destination: ProcessorId,
    pub open: bool,
}

/// Gate state for every known destination.
///
/// A gate is open unless some in-scope, registered barrier is closed and not
/// ignored for that destination. Barriers named in scopes but never
/// registered do not gate.
///
/// Every mutator returns only gates whose value differs from the last
/// emitted one and publishes the same changes on [`Self::events`].
///
/// # Flush
///
/// A flush ignores, per destination with queued entries, every closed
/// flushable barrier in scope. A barrier stays ignored while it remains
/// flushable, even if it opens and closes again in between; it stops being
/// ignored when it reports `flushable = false`. The whole session for a
/// destination ends when its queue drains.
#[derive(Debug, Default)]
pub struct BarrierCoordinator {
    scoped: Vec<BarrierSettings>,
    statuses: HashMap<String, BarrierStatus>,
    destinations: Vec<ProcessorId>,
    ignored: HashMap<ProcessorId, HashSet<String>>,
    gates: HashMap<ProcessorId, bool>,
    queue_sizes: HashMap<ProcessorId, usize>,
    flush_watermark: Option<usize>,
    events: EventBus<GateChange>,
}

impl BarrierCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate change notifications
    pub fn events(&self) -> &EventBus<GateChange> {
        &self.events
    }

    /// Current gate for `destination`
    pub fn is_open(&self, destination: &str) -> bool {
        self.compute(destination)
    }

    /// Barrier ids currently ignored for `destination`
    pub fn ignored(&self, destination: &str) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .ignored
            .get(destination)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Whether a flush session is active for `destination`
    pub fn is_flushing(&self, destination: &str) -> bool {
        self.ignored
            .get(destination)
            .is_some_and(|set| !set.is_empty())
    }

    /// Replace the scoped barrier list
    #[instrument(level = "debug", skip_all, fields(count = scoped.len()))]
    pub fn update_scoped_barriers(&mut self, scoped: Vec<BarrierSettings>) -> Vec<GateChange> {
        for setting in &scoped {
            if !self.statuses.contains_key(&setting.barrier_id) {
                warn!(
                    barrier_id = %setting.barrier_id,
                    "Scoped barrier is not registered, treating as absent"
                );
            }
        }
        self.scoped = scoped;

        // Ignored barriers must still be in scope for their destination.
        let scoped = &self.scoped;
        for (destination, ids) in &mut self.ignored {
            ids.retain(|id| {
                scoped
                    .iter()
                    .any(|s| s.barrier_id == *id && s.scopes.includes(destination))
            });
        }
        self.recompute()
    }

    /// Replace the destination set, forgetting removed destinations
    pub fn update_destinations(&mut self, destinations: Vec<ProcessorId>) -> Vec<GateChange> {
        let keep: HashSet<&ProcessorId> = destinations.iter().collect();
        self.ignored.retain(|id, _| keep.contains(id));
        self.gates.retain(|id, _| keep.contains(id));
        self.queue_sizes.retain(|id, _| keep.contains(id));
        self.destinations = destinations;
        self.recompute()
    }

    /// Record a barrier's status (also registers unknown barriers)
    #[instrument(level = "debug", skip(self))]
    pub fn on_barrier_status(&mut self, barrier_id: &str, status: BarrierStatus) -> Vec<GateChange> {
        self.statuses.insert(barrier_id.to_string(), status);
        if !status.flushable {
            self.stop_ignoring(barrier_id);
        }
        self.recompute()
    }

    /// Forget a barrier; it no longer gates anything
    pub fn remove_barrier(&mut self, barrier_id: &str) -> Vec<GateChange> {
        self.statuses.remove(barrier_id);
        self.stop_ignoring(barrier_id);
        self.recompute()
    }

    /// Start a flush session for every destination with queued entries
    #[instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> Vec<GateChange> {
        let pending: Vec<ProcessorId> = self
            .destinations
            .iter()
            .filter(|id| self.queue_size(id) > 0)
            .cloned()
            .collect();
        for destination in &pending {
            self.start_flush(destination);
        }
        self.recompute()
    }

    /// Any activity transition triggers a flush
    pub fn on_activity(&mut self, state: ActivityState) -> Vec<GateChange> {
        debug!(?state, "Activity transition, flushing");
        self.flush()
    }

    /// Record a destination's queue size.
    ///
    /// Zero ends its flush session; reaching the flush watermark while the
    /// gate is closed starts one.
    pub fn on_queue_size(&mut self, destination: &ProcessorId, size: usize) -> Vec<GateChange> {
        self.queue_sizes.insert(destination.clone(), size);
        if size == 0 {
            if self.ignored.remove(destination).is_some_and(|set| !set.is_empty()) {
                info!(processor = %destination, "Flush complete");
            }
        } else if self.watermark_reached(size) && !self.compute(destination) {
            debug!(processor = %destination, size, "Flush watermark reached");
            self.start_flush(destination);
        }
        self.recompute()
    }

    /// Set or clear the flush watermark and check it immediately
    pub fn set_flush_watermark(&mut self, watermark: Option<usize>) -> Vec<GateChange> {
        self.flush_watermark = watermark;
        let reached: Vec<ProcessorId> = self
            .destinations
            .iter()
            .filter(|id| self.watermark_reached(self.queue_size(id)) && !self.compute(id))
            .cloned()
            .collect();
        for destination in &reached {
            self.start_flush(destination);
        }
        self.recompute()
    }

    fn queue_size(&self, destination: &str) -> usize {
        self.queue_sizes.get(destination).copied().unwrap_or(0)
    }

    fn watermark_reached(&self, size: usize) -> bool {
        self.flush_watermark
            .is_some_and(|watermark| watermark > 0 && size >= watermark)
    }

    fn start_flush(&mut self, destination: &ProcessorId) {
        let flushable: Vec<String> = self
            .in_scope(destination)
            .filter(|id| {
                self.statuses
                    .get(*id)
                    .is_some_and(|status| !status.is_open() && status.flushable)
            })
            .map(str::to_string)
            .collect();
        if flushable.is_empty() {
            return;
        }
        debug!(processor = %destination, barriers = ?flushable, "Flush started");
        counter!("dispatch_router_flush_total", "processor" => destination.to_string())
            .increment(1);
        self.ignored
            .entry(destination.clone())
            .or_default()
            .extend(flushable);
    }

    fn stop_ignoring(&mut self, barrier_id: &str) {
        for ids in self.ignored.values_mut() {
            ids.remove(barrier_id);
        }
        self.ignored.retain(|_, ids| !ids.is_empty());
    }

    fn in_scope<'a>(&'a self, destination: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.scoped
            .iter()
            .filter(move |s| s.scopes.includes(destination))
            .map(|s| s.barrier_id.as_str())
    }

    fn compute(&self, destination: &str) -> bool {
        let ignored = self.ignored.get(destination);
        self.in_scope(destination).all(|id| match self.statuses.get(id) {
            None => true,
            Some(status) if status.is_open() => true,
            Some(_) => ignored.is_some_and(|set| set.contains(id)),
        })
    }

    fn recompute(&mut self) -> Vec<GateChange> {
        let mut changes = Vec::new();
        for destination in &self.destinations {
            let open = self.compute(destination);
            if self.gates.get(destination) != Some(&open) {
                changes.push(GateChange {
                    destination: destination.clone(),
                    open,
                });
            }
        }
        for change in &changes {
            self.gates.insert(change.destination.clone(), change.open);
            debug!(processor = %change.destination, open = change.open, "Gate changed");
            self.events.publish(change);
        }
        changes
    }
}
