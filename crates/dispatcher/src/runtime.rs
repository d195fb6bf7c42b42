//! DispatchLoop - the single task that owns the [`DispatchManager`]
//!
//! Every input (tracked events, barrier and consent changes, activity,
//! delivery reports, settings) arrives over a channel and is applied in
//! order on this task. [`DispatchHandle`] is the cloneable front door.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use barriers::BarrierRegistry;
use contracts::{
    ActivityState, Barrier, BarrierStatus, Clock, ConsentDecision, ConsentProvider, CoreSettings,
    Dispatch, DispatchProcessor, Subscription, SystemClock,
};
use queue_manager::{DispatchStore, InMemoryDispatchStore};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::DispatcherError;
use crate::handle::{DeliveryReport, ProcessorHandle, ProcessorOptions};
use crate::manager::{DispatchManager, DispatchStats};
use crate::track::TrackResult;
use crate::transform::Transformer;

/// Input to the processing loop
pub enum Command {
    Track {
        dispatch: Dispatch,
        reply: Option<oneshot::Sender<TrackResult>>,
    },
    Flush,
    Activity(ActivityState),
    BarrierStatus {
        barrier_id: String,
        status: BarrierStatus,
    },
    ConsentDecision(Option<ConsentDecision>),
    RegisterBarrier(Arc<dyn Barrier>),
    RegisterProcessor(ProcessorHandle),
    Stats {
        reply: oneshot::Sender<DispatchStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Track { dispatch, .. } => write!(f, "Track({})", dispatch.id),
            Self::Flush => write!(f, "Flush"),
            Self::Activity(state) => write!(f, "Activity({state:?})"),
            Self::BarrierStatus { barrier_id, status } => {
                write!(f, "BarrierStatus({barrier_id}, {status:?})")
            }
            Self::ConsentDecision(decision) => write!(f, "ConsentDecision({decision:?})"),
            Self::RegisterBarrier(barrier) => write!(f, "RegisterBarrier({})", barrier.id()),
            Self::RegisterProcessor(handle) => write!(f, "RegisterProcessor({})", handle.id()),
            Self::Stats { .. } => write!(f, "Stats"),
            Self::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

type ProcessorFactory = Box<dyn FnOnce(mpsc::UnboundedSender<DeliveryReport>) -> ProcessorHandle + Send>;

/// Builder wiring collaborators into a [`DispatchLoop`]
pub struct DispatchLoopBuilder {
    settings: watch::Receiver<CoreSettings>,
    store: Box<dyn DispatchStore>,
    clock: Arc<dyn Clock>,
    consent: Option<Arc<dyn ConsentProvider>>,
    activity: Option<broadcast::Receiver<ActivityState>>,
    barriers: BarrierRegistry,
    processors: Vec<ProcessorFactory>,
    transformers: Vec<Box<dyn Transformer>>,
}

impl DispatchLoopBuilder {
    /// Start from a settings stream; defaults to an in-memory store and the
    /// system clock
    pub fn new(settings: watch::Receiver<CoreSettings>) -> Self {
        Self {
            settings,
            store: Box::new(InMemoryDispatchStore::new()),
            clock: Arc::new(SystemClock),
            consent: None,
            activity: None,
            barriers: BarrierRegistry::new(),
            processors: Vec::new(),
            transformers: Vec::new(),
        }
    }

    pub fn store(mut self, store: Box<dyn DispatchStore>) -> Self {
        self.store = store;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn consent_provider(mut self, provider: Arc<dyn ConsentProvider>) -> Self {
        self.consent = Some(provider);
        self
    }

    pub fn activity(mut self, activity: broadcast::Receiver<ActivityState>) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn barrier(mut self, barrier: Arc<dyn Barrier>) -> Self {
        self.barriers.register(barrier);
        self
    }

    pub fn barriers(mut self, registry: BarrierRegistry) -> Self {
        for barrier in registry.into_barriers() {
            self.barriers.register(barrier);
        }
        self
    }

    /// Register a host processor; its worker is spawned by [`Self::build`]
    pub fn processor<P>(mut self, processor: P, options: ProcessorOptions) -> Self
    where
        P: DispatchProcessor + 'static,
    {
        self.processors.push(Box::new(move |reports| {
            ProcessorHandle::spawn(processor, options, reports)
        }));
        self
    }

    pub fn transformer(mut self, transformer: Box<dyn Transformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// Build the loop and its handle; must run inside a tokio runtime
    #[instrument(name = "dispatch_loop_build", skip(self))]
    pub fn build(mut self) -> (DispatchLoop, DispatchHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();

        let mut manager = DispatchManager::new(
            self.store,
            self.clock,
            reports_tx.clone(),
            self.consent.is_some(),
        );
        for transformer in self.transformers {
            manager.register_transformer(transformer);
        }
        for factory in self.processors {
            manager.register_processor(factory(reports_tx.clone()));
        }
        let initial = self.settings.borrow_and_update().clone();
        manager.apply_settings(&initial);

        let dispatch_loop = DispatchLoop {
            manager,
            commands: commands_rx,
            commands_weak: commands_tx.downgrade(),
            reports: reports_rx,
            settings: self.settings,
            pending_barriers: self.barriers,
            consent: self.consent,
            activity: self.activity,
            barrier_watches: HashMap::new(),
            sources: Vec::new(),
        };
        let handle = DispatchHandle {
            commands: commands_tx,
            reports: reports_tx,
        };
        (dispatch_loop, handle)
    }

    /// Build and spawn the loop
    pub fn spawn(self) -> (DispatchHandle, JoinHandle<()>) {
        let (dispatch_loop, handle) = self.build();
        (handle, dispatch_loop.spawn())
    }
}

/// The processing loop. Ends on [`Command::Shutdown`] or when every
/// [`DispatchHandle`] is dropped.
pub struct DispatchLoop {
    manager: DispatchManager,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_weak: mpsc::WeakUnboundedSender<Command>,
    reports: mpsc::UnboundedReceiver<DeliveryReport>,
    settings: watch::Receiver<CoreSettings>,
    pending_barriers: BarrierRegistry,
    consent: Option<Arc<dyn ConsentProvider>>,
    activity: Option<broadcast::Receiver<ActivityState>>,
    barrier_watches: HashMap<String, (Arc<dyn Barrier>, Subscription)>,
    sources: Vec<Subscription>,
}

impl DispatchLoop {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    #[instrument(name = "dispatch_loop_run", skip(self))]
    pub async fn run(mut self) {
        self.attach_sources();
        info!(
            destinations = self.manager.destinations().len(),
            barriers = self.barrier_watches.len(),
            "Dispatch loop started"
        );

        let mut settings_open = true;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let ControlFlow::Break(reply) = self.handle_command(command) {
                            self.shutdown().await;
                            let _ = reply.send(());
                            return;
                        }
                    }
                    None => break,
                },
                Some(report) = self.reports.recv() => {
                    self.manager.on_delivery_report(report);
                }
                changed = self.settings.changed(), if settings_open => match changed {
                    Ok(()) => {
                        let settings = self.settings.borrow_and_update().clone();
                        info!(processors = settings.processors.len(), "Settings updated");
                        self.manager.apply_settings(&settings);
                    }
                    Err(_) => {
                        debug!("Settings stream closed, keeping last settings");
                        settings_open = false;
                    }
                },
            }
            self.retire_processors();
        }

        info!("All dispatch handles dropped");
        self.shutdown().await;
    }

    /// Apply one command; `Break` carries the shutdown acknowledgement
    fn handle_command(&mut self, command: Command) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            Command::Track { dispatch, reply } => {
                let result = self.manager.track(dispatch);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::Flush => self.manager.flush(),
            Command::Activity(state) => self.manager.on_activity(state),
            Command::BarrierStatus { barrier_id, status } => {
                self.manager.on_barrier_status(&barrier_id, status);
            }
            Command::ConsentDecision(decision) => self.manager.on_consent_decision(decision),
            Command::RegisterBarrier(barrier) => self.watch_barrier(barrier),
            Command::RegisterProcessor(handle) => self.manager.register_processor(handle),
            Command::Stats { reply } => {
                let _ = reply.send(self.manager.stats());
            }
            Command::Shutdown { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    /// Bridge barriers, consent and activity into commands
    fn attach_sources(&mut self) {
        let registry = std::mem::take(&mut self.pending_barriers);
        for barrier in registry.into_barriers() {
            self.watch_barrier(barrier);
        }

        if let Some(provider) = self.consent.take() {
            let mut decisions = provider.decision();
            let initial = decisions.borrow_and_update().clone();
            self.manager.on_consent_decision(initial);

            let commands = self.commands_weak.clone();
            let task = tokio::spawn(async move {
                while decisions.changed().await.is_ok() {
                    let decision = decisions.borrow_and_update().clone();
                    let Some(tx) = commands.upgrade() else { break };
                    if tx.send(Command::ConsentDecision(decision)).is_err() {
                        break;
                    }
                }
            });
            self.sources.push(Subscription::from_task(task));
        }

        if let Some(mut activity) = self.activity.take() {
            let commands = self.commands_weak.clone();
            let task = tokio::spawn(async move {
                loop {
                    let state = match activity.recv().await {
                        Ok(state) => state,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Activity stream lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    let Some(tx) = commands.upgrade() else { break };
                    if tx.send(Command::Activity(state)).is_err() {
                        break;
                    }
                }
            });
            self.sources.push(Subscription::from_task(task));
        }
    }

    /// Apply the current status now and forward later changes
    fn watch_barrier(&mut self, barrier: Arc<dyn Barrier>) {
        let barrier_id = barrier.id().to_string();
        let mut status = barrier.status();
        let initial = *status.borrow_and_update();
        self.manager.on_barrier_status(&barrier_id, initial);

        let commands = self.commands_weak.clone();
        let forwarded_id = barrier_id.clone();
        let task = tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let next = *status.borrow_and_update();
                let Some(tx) = commands.upgrade() else { break };
                let command = Command::BarrierStatus {
                    barrier_id: forwarded_id.clone(),
                    status: next,
                };
                if tx.send(command).is_err() {
                    break;
                }
            }
        });

        let watch = (barrier, Subscription::from_task(task));
        if self.barrier_watches.insert(barrier_id.clone(), watch).is_some() {
            debug!(barrier_id = %barrier_id, "Barrier replaced");
        }
    }

    fn retire_processors(&mut self) {
        for handle in self.manager.take_retired() {
            tokio::spawn(handle.shutdown());
        }
    }

    #[instrument(name = "dispatch_loop_shutdown", skip(self))]
    async fn shutdown(&mut self) {
        self.manager.stop();
        self.sources.clear();
        self.barrier_watches.clear();

        let handles = self.manager.take_handles();
        info!(processors = handles.len(), "Shutting down processor workers");
        for handle in handles {
            handle.shutdown().await;
        }
        info!("Dispatch loop shutdown complete");
    }
}

/// Cloneable entry point into a running [`DispatchLoop`]
#[derive(Clone)]
pub struct DispatchHandle {
    commands: mpsc::UnboundedSender<Command>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
}

impl DispatchHandle {
    /// Track an event and wait for its routing result
    pub async fn track(&self, dispatch: Dispatch) -> Result<TrackResult, DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Track {
            dispatch,
            reply: Some(reply),
        })?;
        Ok(rx.await?)
    }

    /// Track without waiting for the result
    pub fn track_and_forget(&self, dispatch: Dispatch) -> Result<(), DispatcherError> {
        self.commands.send(Command::Track {
            dispatch,
            reply: None,
        })?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), DispatcherError> {
        self.commands.send(Command::Flush)?;
        Ok(())
    }

    pub fn activity(&self, state: ActivityState) -> Result<(), DispatcherError> {
        self.commands.send(Command::Activity(state))?;
        Ok(())
    }

    pub fn register_barrier(&self, barrier: Arc<dyn Barrier>) -> Result<(), DispatcherError> {
        self.commands.send(Command::RegisterBarrier(barrier))?;
        Ok(())
    }

    /// Spawn a worker for `processor` and add it as a destination
    pub fn register_processor<P>(
        &self,
        processor: P,
        options: ProcessorOptions,
    ) -> Result<(), DispatcherError>
    where
        P: DispatchProcessor + 'static,
    {
        let handle = ProcessorHandle::spawn(processor, options, self.reports.clone());
        self.commands.send(Command::RegisterProcessor(handle))?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<DispatchStats, DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Stats { reply })?;
        Ok(rx.await?)
    }

    /// Stop dequeuing and wait for workers to finish accepted batches
    pub async fn shutdown(&self) -> Result<(), DispatcherError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Shutdown { reply })?;
        Ok(rx.await?)
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}
