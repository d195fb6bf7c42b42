//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Data Model
//! - [`Dispatch`] carries a JSON object payload ([`DataObject`])
//! - Destinations are identified by [`ProcessorId`]
//! - Load rules ([`Rule`], [`Condition`]) and mappings ([`MappingOperation`])
//!   are plain data; their engines live in `load_rules` and `mappings`
//! - [`CoreSettings`] is the single configuration object streamed into the core

mod accessor;
mod barrier;
mod bus;
mod consent;
mod dispatch;
mod error;
mod lifecycle;
mod mapping;
mod processor;
mod processor_id;
mod rule;
mod settings;

pub use accessor::VariableAccessor;
pub use barrier::*;
pub use bus::{EventBus, Subscription};
pub use consent::*;
pub use dispatch::*;
pub use error::*;
pub use lifecycle::*;
pub use mapping::MappingOperation;
pub use processor::{DispatchProcessor, LocalDispatchProcessor};
pub use processor_id::{ProcessorId, CONSENT_QUEUE_ID};
pub use rule::*;
pub use settings::*;
