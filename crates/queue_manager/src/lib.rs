//! # Queue Manager
//!
//! Durable per-destination FIFO queues with bounded size and age, and the
//! in-flight bookkeeping that keeps a dispatch from being handed to the same
//! processor twice.
//!
//! Persistence sits behind [`DispatchStore`]; [`InMemoryDispatchStore`] is
//! the reference implementation.

mod error;
mod manager;
mod store;

pub use error::QueueError;
pub use manager::{QueueEvent, QueueManager};
pub use store::{DispatchStore, InMemoryDispatchStore, QueuedDispatch};
