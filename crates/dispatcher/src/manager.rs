//! DispatchManager - routes tracked events into per-processor queues and
//! redelivers them while gates allow.
//!
//! Everything here is synchronous and owned by the processing loop. Worker
//! outcomes come back as [`DeliveryReport`]s through
//! [`DispatchManager::on_delivery_report`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use barriers::{BarrierCoordinator, GateChange};
use contracts::{
    ActivityState, BarrierStatus, Clock, ConsentDecision, CoreSettings, Dispatch,
    MappingOperation, ProcessorId, ProcessorType, QueueSettings, Subscription,
};
use load_rules::LoadRuleEngine;
use mappings::MappingEngine;
use parking_lot::Mutex;
use queue_manager::{DispatchStore, QueueEvent, QueueManager};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::consent::{ConsentGate, ConsentVerdict};
use crate::handle::{DeliverError, DeliveryOutcome, DeliveryReport, ProcessorHandle};
use crate::metrics::MetricsSnapshot;
use crate::processors::create_processor_handle;
use crate::track::{DropReason, TrackOutcome, TrackResult};
use crate::transform::{DispatchScope, Transformer, TransformerCoordinator};

/// Ceiling on in-flight dispatches per processor
pub const MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Spawned from `processors` settings
    Configured,
    /// Registered by the host
    Programmatic,
}

struct ProcessorEntry {
    handle: ProcessorHandle,
    origin: Origin,
}

/// Per-processor view returned by [`DispatchManager::stats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorStats {
    pub id: ProcessorId,
    pub enabled: bool,
    pub gate_open: bool,
    pub queue_size: usize,
    pub inflight: usize,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchStats {
    pub processors: Vec<ProcessorStats>,
    pub consent_queue: usize,
}

impl DispatchStats {
    /// Nothing queued, parked or waiting in a worker
    pub fn is_drained(&self) -> bool {
        self.consent_queue == 0
            && self
                .processors
                .iter()
                .all(|p| p.queue_size == 0 && p.metrics.pending_batches == 0)
    }

    pub fn processor(&self, id: &str) -> Option<&ProcessorStats> {
        self.processors.iter().find(|p| p.id == id)
    }
}

pub struct DispatchManager {
    processors: Vec<ProcessorEntry>,
    disabled: HashSet<ProcessorId>,
    dispatch_limits: HashMap<ProcessorId, usize>,
    mappings: HashMap<ProcessorId, Vec<MappingOperation>>,
    rules: LoadRuleEngine,
    mapper: MappingEngine,
    transformers: TransformerCoordinator,
    consent: ConsentGate,
    queue: QueueManager,
    barriers: BarrierCoordinator,
    queue_events: Arc<Mutex<Vec<QueueEvent>>>,
    _queue_subscription: Subscription,
    queue_settings: watch::Sender<QueueSettings>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
    retired: Vec<ProcessorHandle>,
    stopped: bool,
}

impl DispatchManager {
    /// `consent_enabled` is whether a consent provider feeds decisions
    pub fn new(
        store: Box<dyn DispatchStore>,
        clock: Arc<dyn Clock>,
        reports: mpsc::UnboundedSender<DeliveryReport>,
        consent_enabled: bool,
    ) -> Self {
        let (queue_settings, queue_settings_rx) = watch::channel(QueueSettings::default());
        let queue = QueueManager::new(store, queue_settings_rx, clock);

        let queue_events = Arc::new(Mutex::new(Vec::new()));
        let inbox = Arc::clone(&queue_events);
        let queue_subscription = queue
            .events()
            .subscribe(move |event: &QueueEvent| inbox.lock().push(event.clone()));

        Self {
            processors: Vec::new(),
            disabled: HashSet::new(),
            dispatch_limits: HashMap::new(),
            mappings: HashMap::new(),
            rules: LoadRuleEngine::new(),
            mapper: MappingEngine::new(),
            transformers: TransformerCoordinator::with_builtins(),
            consent: ConsentGate::new(consent_enabled),
            queue,
            barriers: BarrierCoordinator::new(),
            queue_events,
            _queue_subscription: queue_subscription,
            queue_settings,
            reports,
            retired: Vec::new(),
            stopped: false,
        }
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn barriers(&self) -> &BarrierCoordinator {
        &self.barriers
    }

    /// Registered processors that are not disabled, in registration order
    pub fn destinations(&self) -> Vec<ProcessorId> {
        self.processors
            .iter()
            .map(|entry| entry.handle.id())
            .filter(|id| !self.disabled.contains(*id))
            .cloned()
            .collect()
    }

    pub fn register_transformer(&mut self, transformer: Box<dyn Transformer>) {
        self.transformers.register(transformer);
    }

    /// Register a host-provided processor, replacing one with the same id
    #[instrument(level = "debug", skip_all, fields(processor = %handle.id()))]
    pub fn register_processor(&mut self, handle: ProcessorHandle) {
        let id = handle.id().clone();
        self.insert_processor(handle, Origin::Programmatic);
        let changes = self.reconcile_destinations();
        self.settle(changes);
        self.redeliver(&id);
    }

    fn insert_processor(&mut self, handle: ProcessorHandle, origin: Origin) {
        let entry = ProcessorEntry { handle, origin };
        match self
            .processors
            .iter_mut()
            .find(|e| e.handle.id() == entry.handle.id())
        {
            Some(existing) => {
                info!(processor = %entry.handle.id(), "Replacing processor");
                let old = std::mem::replace(existing, entry);
                self.retired.push(old.handle);
            }
            None => {
                info!(processor = %entry.handle.id(), origin = ?origin, "Processor registered");
                self.processors.push(entry);
            }
        }
    }

    /// Apply a new settings snapshot
    #[instrument(level = "debug", skip_all, fields(processors = settings.processors.len()))]
    pub fn apply_settings(&mut self, settings: &CoreSettings) {
        self.rules.apply_settings(settings);
        self.mappings = settings
            .processors
            .iter()
            .filter_map(|p| p.mappings.clone().map(|ops| (p.id.clone(), ops)))
            .collect();
        self.dispatch_limits = settings
            .processors
            .iter()
            .filter_map(|p| p.dispatch_limit.map(|limit| (p.id.clone(), limit)))
            .collect();
        self.disabled = settings
            .processors
            .iter()
            .filter(|p| !p.enabled)
            .map(|p| p.id.clone())
            .collect();
        self.transformers
            .update_settings(settings.transformations.clone());
        self.consent.update_settings(settings.consent.clone());
        self.queue_settings.send_replace(settings.queue);

        self.sync_configured_processors(settings);

        let mut changes = self
            .barriers
            .update_scoped_barriers(settings.barriers.clone());
        changes.extend(self.barriers.set_flush_watermark(settings.flush_watermark));
        changes.extend(self.reconcile_destinations());

        debug!(
            destinations = self.destinations().len(),
            disabled = self.disabled.len(),
            "Settings applied"
        );
        self.settle(changes);
        self.redeliver_all();
        self.reroute_parked();
    }

    /// Spawn newly configured built-ins and retire removed ones
    fn sync_configured_processors(&mut self, settings: &CoreSettings) {
        let configured: HashSet<&str> = settings
            .processors
            .iter()
            .filter(|p| p.processor_type != ProcessorType::External)
            .map(|p| p.id.as_str())
            .collect();

        let (keep, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.processors)
            .into_iter()
            .partition(|e| {
                e.origin == Origin::Programmatic || configured.contains(e.handle.id().as_str())
            });
        self.processors = keep;
        for entry in removed {
            info!(processor = %entry.handle.id(), "Configured processor removed");
            self.retired.push(entry.handle);
        }

        for processor in &settings.processors {
            if processor.processor_type == ProcessorType::External
                || self.processors.iter().any(|e| e.handle.id() == &processor.id)
            {
                continue;
            }
            match create_processor_handle(processor, self.reports.clone()) {
                Ok(Some(handle)) => self.insert_processor(handle, Origin::Configured),
                Ok(None) => {}
                Err(e) => warn!(processor = %processor.id, error = %e, "Failed to create processor"),
            }
        }
    }

    /// Align queue and barrier destination sets with the active processors
    fn reconcile_destinations(&mut self) -> Vec<GateChange> {
        let active = self.destinations();
        if let Err(e) = self.queue.update_destinations(&active) {
            warn!(error = %e, "Failed to reconcile queue destinations");
        }
        let mut changes = self.barriers.update_destinations(active.clone());
        for destination in &active {
            let size = self.queue.queue_size(destination);
            changes.extend(self.barriers.on_queue_size(destination, size));
        }
        changes
    }

    /// Route one event; exactly one result per call
    #[instrument(level = "debug", skip_all, fields(dispatch_id = %dispatch.id, event = %dispatch.name))]
    pub fn track(&mut self, dispatch: Dispatch) -> TrackResult {
        let result = match self.consent.verdict() {
            ConsentVerdict::Disabled => self.route(dispatch, None),
            ConsentVerdict::Granted(decision) => self.route(dispatch, Some(&decision)),
            ConsentVerdict::Pending => self.park(dispatch),
            ConsentVerdict::Blocked => {
                debug!(dispatch_id = %dispatch.id, "Consent declined, dispatch dropped");
                TrackResult::dropped(dispatch)
            }
        };
        record_result(&result);
        result
    }

    /// Hold an event in the consent queue until a decision arrives
    fn park(&mut self, dispatch: Dispatch) -> TrackResult {
        let consent_queue = ProcessorId::consent_queue();
        match self
            .queue
            .store_dispatches(std::slice::from_ref(&dispatch), std::slice::from_ref(&consent_queue))
        {
            Ok(()) => {
                debug!(dispatch_id = %dispatch.id, "Dispatch parked until consent is decided");
                self.settle(Vec::new());
                TrackResult::postponed(dispatch)
            }
            Err(e) => {
                warn!(dispatch_id = %dispatch.id, error = %e, "Failed to park dispatch");
                let mut result = TrackResult::dropped(dispatch);
                result.dropped_by.push((consent_queue, DropReason::Storage));
                result
            }
        }
    }

    fn route(&mut self, dispatch: Dispatch, decision: Option<&ConsentDecision>) -> TrackResult {
        let mut dropped_by = Vec::new();
        let mut candidates = Vec::new();
        for destination in self.destinations() {
            if !self.rules.rules_allow(&destination, &dispatch.payload) {
                dropped_by.push((destination, DropReason::LoadRules));
            } else if decision.is_some_and(|d| !self.consent.is_consented(d, &destination)) {
                dropped_by.push((destination, DropReason::Consent));
            } else {
                candidates.push(destination);
            }
        }

        let mut event = dispatch;
        if let Some(decision) = decision {
            ConsentGate::annotate(decision, &mut event.payload);
        }

        let Some(event) = self
            .transformers
            .apply(event.clone(), &DispatchScope::AfterCollectors)
        else {
            dropped_by.extend(
                candidates
                    .into_iter()
                    .map(|id| (id, DropReason::Transformation)),
            );
            return TrackResult {
                dispatch: event,
                outcome: TrackOutcome::Dropped,
                accepted_by: Vec::new(),
                dropped_by,
            };
        };

        let mut accepted_by = Vec::new();
        for destination in candidates {
            let scope = DispatchScope::Processor(destination.clone());
            let Some(scoped) = self.transformers.apply(event.clone(), &scope) else {
                dropped_by.push((destination, DropReason::Transformation));
                continue;
            };
            let outgoing = match self.mappings.get(&destination) {
                Some(operations) => self.mapper.apply(operations, &scoped),
                None => scoped,
            };

            match self.queue.store_dispatches(
                std::slice::from_ref(&outgoing),
                std::slice::from_ref(&destination),
            ) {
                Ok(()) => accepted_by.push(destination),
                Err(e) => {
                    warn!(processor = %destination, dispatch_id = %event.id, error = %e, "Failed to store dispatch");
                    dropped_by.push((destination, DropReason::Storage));
                }
            }
        }

        self.settle(Vec::new());
        for destination in &accepted_by {
            self.redeliver(destination);
        }

        let outcome = if accepted_by.is_empty() {
            TrackOutcome::Dropped
        } else {
            TrackOutcome::Accepted { postponed: false }
        };
        TrackResult {
            dispatch: event,
            outcome,
            accepted_by,
            dropped_by,
        }
    }

    /// Delete the reported ids; success and failure both end the delivery
    #[instrument(
        level = "debug",
        skip_all,
        fields(processor = %report.processor_id, count = report.dispatch_ids.len())
    )]
    pub fn on_delivery_report(&mut self, report: DeliveryReport) {
        let success = report.outcome == DeliveryOutcome::Delivered;
        observability::record_delivery(&report.processor_id, report.dispatch_ids.len(), success);
        if let DeliveryOutcome::Failed(reason) = &report.outcome {
            warn!(
                processor = %report.processor_id,
                dispatches = report.dispatch_ids.len(),
                reason = %reason,
                "Delivery failed, dispatches dropped"
            );
        }

        if let Err(e) = self
            .queue
            .delete_dispatches(&report.dispatch_ids, &report.processor_id)
        {
            warn!(processor = %report.processor_id, error = %e, "Failed to delete delivered dispatches");
        }
        self.settle(Vec::new());
        self.redeliver(&report.processor_id);
    }

    pub fn on_barrier_status(&mut self, barrier_id: &str, status: BarrierStatus) {
        let changes = self.barriers.on_barrier_status(barrier_id, status);
        self.settle(changes);
    }

    pub fn remove_barrier(&mut self, barrier_id: &str) {
        let changes = self.barriers.remove_barrier(barrier_id);
        self.settle(changes);
    }

    pub fn flush(&mut self) {
        let changes = self.barriers.flush();
        self.settle(changes);
    }

    pub fn on_activity(&mut self, state: ActivityState) {
        let changes = self.barriers.on_activity(state);
        self.settle(changes);
    }

    /// Record a consent decision and re-route parked events
    pub fn on_consent_decision(&mut self, decision: Option<ConsentDecision>) {
        self.consent.update_decision(decision);
        self.reroute_parked();
    }

    fn reroute_parked(&mut self) {
        let verdict = self.consent.verdict();
        if verdict == ConsentVerdict::Pending || self.queue.consent_queue_size() == 0 {
            return;
        }

        let consent_queue = ProcessorId::consent_queue();
        let parked = match self.queue.dequeue_dispatches(&consent_queue, None) {
            Ok(parked) => parked,
            Err(e) => {
                warn!(error = %e, "Failed to read consent queue");
                return;
            }
        };
        let ids: Vec<String> = parked.iter().map(|d| d.id.clone()).collect();
        if let Err(e) = self.queue.delete_dispatches(&ids, &consent_queue) {
            warn!(error = %e, "Failed to clear consent queue");
        }
        info!(count = parked.len(), verdict = ?verdict, "Re-routing parked dispatches");

        for dispatch in parked {
            let result = match &verdict {
                ConsentVerdict::Granted(decision) => self.route(dispatch, Some(decision)),
                ConsentVerdict::Disabled => self.route(dispatch, None),
                ConsentVerdict::Blocked | ConsentVerdict::Pending => {
                    info!(dispatch_id = %dispatch.id, "Consent declined, parked dispatch dropped");
                    TrackResult::dropped(dispatch)
                }
            };
            record_result(&result);
        }
    }

    /// Stop handing out new batches; in-flight deliveries still report
    pub fn stop(&mut self) {
        self.stopped = true;
        info!("Dispatch manager stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Handles replaced or removed since the last call
    pub fn take_retired(&mut self) -> Vec<ProcessorHandle> {
        std::mem::take(&mut self.retired)
    }

    /// Every handle, registered or retired, for shutdown
    pub fn take_handles(&mut self) -> Vec<ProcessorHandle> {
        let mut handles = self.take_retired();
        handles.extend(self.processors.drain(..).map(|e| e.handle));
        handles
    }

    pub fn stats(&self) -> DispatchStats {
        let processors = self
            .processors
            .iter()
            .map(|entry| {
                let id = entry.handle.id().clone();
                ProcessorStats {
                    enabled: !self.disabled.contains(&id),
                    gate_open: self.barriers.is_open(&id),
                    queue_size: self.queue.queue_size(&id),
                    inflight: self.queue.inflight_count(&id),
                    metrics: entry.handle.metrics().snapshot(),
                    id,
                }
            })
            .collect();
        DispatchStats {
            processors,
            consent_queue: self.queue.consent_queue_size(),
        }
    }

    /// Feed queue changes to the barriers and redeliver until quiet
    fn settle(&mut self, mut changes: Vec<GateChange>) {
        loop {
            let events = std::mem::take(&mut *self.queue_events.lock());
            let mut touched = BTreeSet::new();
            for destination in events.iter().flat_map(QueueEvent::destinations) {
                if !destination.is_reserved() && self.is_active(destination) {
                    touched.insert(destination.clone());
                }
            }
            for destination in &touched {
                let size = self.queue.queue_size(destination);
                changes.extend(self.barriers.on_queue_size(destination, size));
            }

            for change in changes.drain(..) {
                observability::record_gate(&change.destination, change.open);
                if change.open {
                    touched.insert(change.destination);
                }
            }
            if touched.is_empty() {
                break;
            }
            for destination in &touched {
                self.redeliver(destination);
            }
        }
    }

    fn redeliver_all(&mut self) {
        for destination in self.destinations() {
            self.redeliver(&destination);
        }
    }

    fn is_active(&self, destination: &str) -> bool {
        !self.disabled.contains(destination)
            && self.processors.iter().any(|e| e.handle.id() == destination)
    }

    fn batch_limit(&self, entry: &ProcessorEntry) -> usize {
        self.dispatch_limits
            .get(entry.handle.id())
            .copied()
            .or(entry.handle.options().dispatch_limit)
            .unwrap_or(MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER)
            .clamp(1, MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER)
    }

    /// Dequeue what the in-flight ceiling and the worker queue allow and
    /// hand it to the worker
    fn redeliver(&mut self, destination: &ProcessorId) {
        if self.stopped || !self.is_active(destination) || !self.barriers.is_open(destination) {
            return;
        }
        let Some((limit, free_slots)) = self
            .processors
            .iter()
            .find(|e| e.handle.id() == destination)
            .map(|entry| (self.batch_limit(entry), entry.handle.free_slots()))
        else {
            return;
        };
        let available = MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER
            .saturating_sub(self.queue.inflight_count(destination))
            .min(free_slots.saturating_mul(limit));
        if available == 0 {
            return;
        }

        let dispatches = match self.queue.dequeue_dispatches(destination, Some(available)) {
            Ok(dispatches) => dispatches,
            Err(e) => {
                warn!(processor = %destination, error = %e, "Failed to dequeue dispatches");
                return;
            }
        };
        if dispatches.is_empty() {
            return;
        }

        let mut busy = Vec::new();
        let mut closed = Vec::new();
        if let Some(entry) = self
            .processors
            .iter()
            .find(|e| e.handle.id() == destination)
        {
            debug!(processor = %destination, count = dispatches.len(), limit, "Redelivering");
            let mut remaining = dispatches.into_iter().peekable();
            while remaining.peek().is_some() {
                let batch: Vec<Dispatch> = remaining.by_ref().take(limit).collect();
                match entry.handle.try_deliver(batch) {
                    Ok(()) => {}
                    Err(DeliverError::Busy(batch)) => busy.extend(batch.into_iter().map(|d| d.id)),
                    Err(DeliverError::Closed(batch)) => {
                        closed.extend(batch.into_iter().map(|d| d.id))
                    }
                }
            }
        }

        if !busy.is_empty() {
            debug!(processor = %destination, count = busy.len(), "Worker busy, dispatches stay queued");
            self.queue.release_inflight(&busy, destination);
        }
        if !closed.is_empty() {
            warn!(processor = %destination, count = closed.len(), "Worker closed, dispatches dropped");
            observability::record_delivery(destination, closed.len(), false);
            if let Err(e) = self.queue.delete_dispatches(&closed, destination) {
                warn!(processor = %destination, error = %e, "Failed to delete rejected dispatches");
            }
        }
    }
}

impl std::fmt::Debug for DispatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchManager")
            .field("destinations", &self.destinations())
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

fn record_result(result: &TrackResult) {
    observability::record_track_outcome(result.outcome.as_str());
    for (processor, reason) in &result.dropped_by {
        observability::record_processor_drop(processor, reason.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        BarrierScope, BarrierSettings, Condition, ConditionOperator, ConsentPurpose,
        ConsentSettings, ContractError, DataObject, DecisionType, DispatchProcessor, ManualClock,
        ProcessorSettings, Rule, TransformationScope, TransformationSettings,
    };
    use queue_manager::InMemoryDispatchStore;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::Notify;

    use crate::handle::ProcessorOptions;

    #[derive(Default)]
    struct Recorded {
        batches: Mutex<Vec<Vec<Dispatch>>>,
    }

    impl Recorded {
        fn names(&self) -> Vec<String> {
            self.batches
                .lock()
                .iter()
                .flatten()
                .map(|d| d.name.clone())
                .collect()
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().iter().map(Vec::len).collect()
        }
    }

    struct RecordingProcessor {
        id: String,
        recorded: Arc<Recorded>,
        hold: Option<Arc<Notify>>,
        fail: bool,
    }

    impl DispatchProcessor for RecordingProcessor {
        fn id(&self) -> &str {
            &self.id
        }

        async fn deliver(&mut self, dispatches: &[Dispatch]) -> Result<(), ContractError> {
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            self.recorded.batches.lock().push(dispatches.to_vec());
            if self.fail {
                return Err(ContractError::processor_delivery(&self.id, "rejected"));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    struct Fixture {
        manager: DispatchManager,
        reports: mpsc::UnboundedReceiver<DeliveryReport>,
        reports_tx: mpsc::UnboundedSender<DeliveryReport>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new(consent_enabled: bool) -> Self {
            let (reports_tx, reports) = mpsc::unbounded_channel();
            let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
            let manager = DispatchManager::new(
                Box::new(InMemoryDispatchStore::new()),
                clock.clone(),
                reports_tx.clone(),
                consent_enabled,
            );
            Self {
                manager,
                reports,
                reports_tx,
                clock,
            }
        }

        fn register(&mut self, id: &str, dispatch_limit: Option<usize>) -> Arc<Recorded> {
            self.register_with(id, dispatch_limit, None, false)
        }

        fn register_with(
            &mut self,
            id: &str,
            dispatch_limit: Option<usize>,
            hold: Option<Arc<Notify>>,
            fail: bool,
        ) -> Arc<Recorded> {
            let recorded = Arc::new(Recorded::default());
            let processor = RecordingProcessor {
                id: id.to_string(),
                recorded: Arc::clone(&recorded),
                hold,
                fail,
            };
            let options = ProcessorOptions {
                queue_capacity: 64,
                dispatch_limit,
            };
            let handle = ProcessorHandle::spawn(processor, options, self.reports_tx.clone());
            self.manager.register_processor(handle);
            recorded
        }

        fn register_sized(&mut self, id: &str, options: ProcessorOptions) -> Arc<Recorded> {
            let recorded = Arc::new(Recorded::default());
            let processor = RecordingProcessor {
                id: id.to_string(),
                recorded: Arc::clone(&recorded),
                hold: None,
                fail: false,
            };
            let handle = ProcessorHandle::spawn(processor, options, self.reports_tx.clone());
            self.manager.register_processor(handle);
            recorded
        }

        /// Feed `n` delivery reports back into the manager
        async fn pump(&mut self, n: usize) {
            for _ in 0..n {
                let report = self.reports.recv().await.unwrap();
                self.manager.on_delivery_report(report);
            }
        }
    }

    fn event(name: &str, payload: Value) -> Dispatch {
        match payload {
            Value::Object(map) => Dispatch::new(name, map),
            _ => Dispatch::new(name, DataObject::new()),
        }
    }

    fn id(s: &str) -> ProcessorId {
        ProcessorId::from(s)
    }

    fn gated_settings(barrier: &str) -> CoreSettings {
        CoreSettings {
            barriers: vec![BarrierSettings::new(barrier, BarrierScope::All)],
            ..CoreSettings::default()
        }
    }

    #[tokio::test]
    async fn delivers_and_clears_queue() {
        let mut fixture = Fixture::new(false);
        let recorded = fixture.register("collect", None);

        let result = fixture.manager.track(event("view", json!({"page": "home"})));
        assert_eq!(result.outcome, TrackOutcome::Accepted { postponed: false });
        assert_eq!(result.accepted_by, vec![id("collect")]);
        assert_eq!(fixture.manager.queue().inflight_count("collect"), 1);

        fixture.pump(1).await;
        assert_eq!(recorded.names(), vec!["view"]);
        assert_eq!(fixture.manager.queue().queue_size("collect"), 0);
        assert_eq!(fixture.manager.queue().inflight_count("collect"), 0);
    }

    #[tokio::test]
    async fn no_destinations_drops() {
        let mut fixture = Fixture::new(false);
        let result = fixture.manager.track(event("view", json!({})));
        assert_eq!(result.outcome, TrackOutcome::Dropped);
        assert!(result.dropped_by.is_empty());
    }

    #[tokio::test]
    async fn load_rules_exclude_destinations() {
        let mut fixture = Fixture::new(false);
        let purchases = fixture.register("purchases", None);
        let everything = fixture.register("everything", None);

        let mut settings = CoreSettings::default();
        settings.load_rules.insert(
            "is_purchase".to_string(),
            Rule::Leaf(Condition::new("event", ConditionOperator::Equals, "purchase")),
        );
        let mut rule_settings = ProcessorSettings::new("purchases", ProcessorType::External);
        rule_settings.rules = Some(Rule::Leaf("is_purchase".to_string()));
        settings.processors.push(rule_settings);
        fixture.manager.apply_settings(&settings);

        let view = fixture.manager.track(event("view", json!({"event": "view"})));
        assert_eq!(view.accepted_by, vec![id("everything")]);
        assert_eq!(view.drop_reason("purchases"), Some(DropReason::LoadRules));

        let purchase = fixture
            .manager
            .track(event("purchase", json!({"event": "purchase"})));
        assert_eq!(purchase.accepted_by, vec![id("purchases"), id("everything")]);

        fixture.pump(3).await;
        assert_eq!(purchases.names(), vec!["purchase"]);
        assert_eq!(everything.names(), vec!["view", "purchase"]);
    }

    #[tokio::test]
    async fn closed_barrier_queues_until_open() {
        let mut fixture = Fixture::new(false);
        let recorded = fixture.register("collect", Some(2));
        fixture.manager.apply_settings(&gated_settings("batching"));
        fixture
            .manager
            .on_barrier_status("batching", BarrierStatus::closed(true));

        for i in 0..5 {
            fixture.manager.track(event(&format!("e{i}"), json!({})));
        }
        assert_eq!(fixture.manager.queue().queue_size("collect"), 5);
        assert_eq!(fixture.manager.queue().inflight_count("collect"), 0);

        fixture
            .manager
            .on_barrier_status("batching", BarrierStatus::open(true));
        fixture.pump(3).await;

        assert_eq!(recorded.names(), vec!["e0", "e1", "e2", "e3", "e4"]);
        assert_eq!(recorded.batch_sizes(), vec![2, 2, 1]);
        assert_eq!(fixture.manager.queue().queue_size("collect"), 0);
    }

    #[tokio::test]
    async fn busy_worker_keeps_dispatches_queued() {
        let mut fixture = Fixture::new(false);
        let recorded = fixture.register_sized(
            "narrow",
            ProcessorOptions {
                queue_capacity: 1,
                dispatch_limit: Some(1),
            },
        );

        for i in 0..3 {
            let result = fixture.manager.track(event(&format!("e{i}"), json!({})));
            assert_eq!(result.accepted_by, vec![id("narrow")]);
        }
        assert_eq!(fixture.manager.queue().queue_size("narrow"), 3);
        assert_eq!(fixture.manager.queue().inflight_count("narrow"), 1);

        fixture.pump(3).await;
        assert_eq!(recorded.names(), vec!["e0", "e1", "e2"]);
        assert_eq!(recorded.batch_sizes(), vec![1, 1, 1]);
        assert_eq!(fixture.manager.queue().queue_size("narrow"), 0);
        assert_eq!(fixture.manager.queue().inflight_count("narrow"), 0);
    }

    #[tokio::test]
    async fn inflight_ceiling_is_respected() {
        let mut fixture = Fixture::new(false);
        let hold = Arc::new(Notify::new());
        fixture.register_with("slow", None, Some(Arc::clone(&hold)), false);
        fixture.manager.apply_settings(&gated_settings("batching"));
        fixture
            .manager
            .on_barrier_status("batching", BarrierStatus::closed(true));

        for i in 0..60 {
            fixture.manager.track(event(&format!("e{i}"), json!({})));
        }
        fixture
            .manager
            .on_barrier_status("batching", BarrierStatus::open(true));

        assert_eq!(
            fixture.manager.queue().inflight_count("slow"),
            MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER
        );
        assert_eq!(fixture.manager.queue().queue_size("slow"), 60);

        fixture.manager.track(event("late", json!({})));
        assert_eq!(
            fixture.manager.queue().inflight_count("slow"),
            MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER
        );

        hold.notify_one();
        fixture.pump(1).await;
        assert_eq!(fixture.manager.queue().queue_size("slow"), 11);
        assert_eq!(fixture.manager.queue().inflight_count("slow"), 11);
    }

    #[tokio::test]
    async fn failed_delivery_is_dropped() {
        let mut fixture = Fixture::new(false);
        let recorded = fixture.register_with("flaky", None, None, true);

        fixture.manager.track(event("view", json!({})));
        fixture.pump(1).await;

        assert_eq!(recorded.names(), vec!["view"]);
        assert_eq!(fixture.manager.queue().queue_size("flaky"), 0);
        let stats = fixture.manager.stats();
        assert_eq!(stats.processor("flaky").unwrap().metrics.failure_count, 1);
    }

    #[tokio::test]
    async fn mappings_and_transformations_shape_payload() {
        let mut fixture = Fixture::new(false);
        let mapped = fixture.register("mapped", None);
        let raw = fixture.register("raw", None);

        let mut settings = CoreSettings::default();
        let mut mapped_settings = ProcessorSettings::new("mapped", ProcessorType::External);
        mapped_settings.mappings = Some(vec![MappingOperation::from_reference("app", "application")]);
        settings.processors.push(mapped_settings);
        settings.transformations.push(TransformationSettings {
            id: "add-app".to_string(),
            transformer_id: "merge_data".to_string(),
            scopes: vec![TransformationScope::AfterCollectors],
            configuration: json!({"app": "demo"}),
        });
        fixture.manager.apply_settings(&settings);

        let result = fixture.manager.track(event("view", json!({"page": "home"})));
        assert_eq!(result.dispatch.payload["app"], json!("demo"));
        fixture.pump(2).await;

        let mapped_payload = mapped.batches.lock()[0][0].payload.clone();
        assert_eq!(Value::Object(mapped_payload), json!({"application": "demo"}));
        let raw_payload = raw.batches.lock()[0][0].payload.clone();
        assert_eq!(Value::Object(raw_payload), json!({"page": "home", "app": "demo"}));
    }

    #[tokio::test]
    async fn after_collectors_drop_excludes_everyone() {
        let mut fixture = Fixture::new(false);
        fixture.register("collect", None);

        let mut settings = CoreSettings::default();
        settings.transformations.push(TransformationSettings {
            id: "no-heartbeat".to_string(),
            transformer_id: "drop_events".to_string(),
            scopes: vec![TransformationScope::AfterCollectors],
            configuration: json!({"event_names": ["heartbeat"]}),
        });
        fixture.manager.apply_settings(&settings);

        let result = fixture.manager.track(event("heartbeat", json!({})));
        assert_eq!(result.outcome, TrackOutcome::Dropped);
        assert_eq!(result.drop_reason("collect"), Some(DropReason::Transformation));
    }

    fn consent_settings() -> CoreSettings {
        CoreSettings {
            consent: Some(ConsentSettings {
                tealium_purpose_id: "tealium".to_string(),
                purposes: vec![
                    ConsentPurpose {
                        purpose_id: "analytics".to_string(),
                        processor_ids: vec![id("collect")],
                    },
                    ConsentPurpose {
                        purpose_id: "ads".to_string(),
                        processor_ids: vec![id("ads")],
                    },
                ],
            }),
            ..CoreSettings::default()
        }
    }

    #[tokio::test]
    async fn undecided_consent_parks_then_routes() {
        let mut fixture = Fixture::new(true);
        let collect = fixture.register("collect", None);
        let ads = fixture.register("ads", None);
        fixture.manager.apply_settings(&consent_settings());

        let parked = fixture.manager.track(event("view", json!({})));
        assert_eq!(parked.outcome, TrackOutcome::Accepted { postponed: true });
        assert_eq!(fixture.manager.queue().consent_queue_size(), 1);

        fixture.manager.on_consent_decision(Some(ConsentDecision::new(
            DecisionType::Explicit,
            ["tealium", "analytics"],
        )));
        assert_eq!(fixture.manager.queue().consent_queue_size(), 0);
        fixture.pump(1).await;

        assert_eq!(collect.names(), vec!["view"]);
        assert!(ads.names().is_empty());
        let payload = &collect.batches.lock()[0][0].payload;
        assert_eq!(payload["consent_type"], json!("explicit"));
        assert_eq!(payload["purposes_with_consent_all"], json!(["analytics", "tealium"]));
    }

    #[tokio::test]
    async fn explicit_decline_drops_original() {
        let mut fixture = Fixture::new(true);
        fixture.register("collect", None);
        let mut settings = consent_settings();
        settings.transformations.push(TransformationSettings {
            id: "add-app".to_string(),
            transformer_id: "merge_data".to_string(),
            scopes: vec![TransformationScope::AfterCollectors],
            configuration: json!({"app": "demo"}),
        });
        fixture.manager.apply_settings(&settings);
        fixture
            .manager
            .on_consent_decision(Some(ConsentDecision::new(DecisionType::Explicit, ["ads"])));

        let original = event("view", json!({"page": "home"}));
        let result = fixture.manager.track(original.clone());
        assert_eq!(result.outcome, TrackOutcome::Dropped);
        assert_eq!(result.dispatch, original);
        assert_eq!(fixture.manager.queue().consent_queue_size(), 0);
    }

    #[tokio::test]
    async fn disabling_processor_purges_its_queue() {
        let mut fixture = Fixture::new(false);
        fixture.register("collect", None);
        fixture.manager.apply_settings(&gated_settings("batching"));
        fixture
            .manager
            .on_barrier_status("batching", BarrierStatus::closed(false));
        fixture.manager.track(event("view", json!({})));
        assert_eq!(fixture.manager.queue().queue_size("collect"), 1);

        let mut settings = gated_settings("batching");
        let mut disabled = ProcessorSettings::new("collect", ProcessorType::External);
        disabled.enabled = false;
        settings.processors.push(disabled);
        fixture.manager.apply_settings(&settings);

        assert!(fixture.manager.destinations().is_empty());
        assert_eq!(fixture.manager.queue().queue_size("collect"), 0);
        let stats = fixture.manager.stats();
        assert!(!stats.processor("collect").unwrap().enabled);
    }

    #[tokio::test]
    async fn flush_drains_then_closes_again() {
        let mut fixture = Fixture::new(false);
        let recorded = fixture.register("collect", None);
        fixture.manager.apply_settings(&gated_settings("batching"));
        fixture
            .manager
            .on_barrier_status("batching", BarrierStatus::closed(true));

        fixture.manager.track(event("a", json!({})));
        fixture.manager.track(event("b", json!({})));
        fixture.manager.flush();
        assert!(fixture.manager.barriers().is_flushing("collect"));
        fixture.pump(1).await;

        assert_eq!(recorded.names(), vec!["a", "b"]);
        assert!(!fixture.manager.barriers().is_flushing("collect"));
        assert!(!fixture.manager.barriers().is_open("collect"));

        fixture.manager.track(event("c", json!({})));
        assert_eq!(fixture.manager.queue().queue_size("collect"), 1);
        assert_eq!(fixture.manager.queue().inflight_count("collect"), 0);
    }

    #[tokio::test]
    async fn expired_entries_are_not_delivered() {
        let mut fixture = Fixture::new(false);
        let recorded = fixture.register("collect", None);
        let mut settings = gated_settings("batching");
        settings.queue.expiration_seconds = 60;
        fixture.manager.apply_settings(&settings);
        fixture
            .manager
            .on_barrier_status("batching", BarrierStatus::closed(true));

        fixture.manager.track(event("old", json!({})));
        fixture.clock.advance(chrono::Duration::seconds(120));
        fixture.manager.track(event("fresh", json!({})));
        fixture
            .manager
            .on_barrier_status("batching", BarrierStatus::open(true));
        fixture.pump(1).await;

        assert_eq!(recorded.names(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn stop_halts_new_dequeues() {
        let mut fixture = Fixture::new(false);
        fixture.register("collect", None);
        fixture.manager.stop();

        let result = fixture.manager.track(event("view", json!({})));
        assert!(result.outcome.is_accepted());
        assert_eq!(fixture.manager.queue().inflight_count("collect"), 0);
        assert_eq!(fixture.manager.queue().queue_size("collect"), 1);

        for handle in fixture.manager.take_handles() {
            handle.shutdown().await;
        }
    }
}
