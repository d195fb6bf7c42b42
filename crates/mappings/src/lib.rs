//! # Mappings
//!
//! Per-processor payload reshaping. Stateless: the output depends only on
//! the operation list and the input dispatch.

mod engine;

pub use engine::MappingEngine;
