//! # Dispatcher
//!
//! Event routing core.
//!
//! Responsible for:
//! - Routing tracked dispatches through load rules, consent, transformations
//!   and mappings into per-processor queues
//! - Redelivering queued dispatches while barrier gates allow, within the
//!   in-flight ceiling
//! - Isolating slow processors on their own worker tasks
//!
//! ```ignore
//! let (handle, task) = DispatchLoopBuilder::new(settings_rx)
//!     .processor(my_processor, ProcessorOptions::default())
//!     .barrier(connectivity)
//!     .spawn();
//! let result = handle.track(Dispatch::new("view", payload)).await?;
//! ```

pub mod consent;
pub mod error;
pub mod handle;
pub mod manager;
pub mod metrics;
pub mod processors;
pub mod runtime;
pub mod track;
pub mod transform;

pub use consent::{ConsentGate, ConsentVerdict};
pub use contracts::{Dispatch, DispatchProcessor};
pub use error::DispatcherError;
pub use handle::{DeliverError, DeliveryOutcome, DeliveryReport, ProcessorHandle, ProcessorOptions};
pub use manager::{
    DispatchManager, DispatchStats, ProcessorStats, MAXIMUM_INFLIGHT_EVENTS_PER_DISPATCHER,
};
pub use metrics::{MetricsSnapshot, ProcessorMetrics};
pub use processors::{create_processor_handle, FileProcessor, FileProcessorConfig, LogProcessor};
pub use runtime::{Command, DispatchHandle, DispatchLoop, DispatchLoopBuilder};
pub use track::{DropReason, TrackOutcome, TrackResult};
pub use transform::{
    DispatchScope, DropEventsTransformer, MergeDataTransformer, Transformer,
    TransformerCoordinator,
};
