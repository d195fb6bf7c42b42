//! # Barriers
//!
//! Delivery gating. Each barrier exposes `{open|closed, flushable}`; the
//! [`BarrierCoordinator`] folds the barriers scoped to a processor into a
//! single open/closed gate and runs flush sessions.

mod coordinator;
mod manual;

pub use coordinator::{BarrierCoordinator, GateChange};
pub use manual::{BarrierRegistry, ManualBarrier};
