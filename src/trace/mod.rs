//! Shared trace data types.
//!
//! Ingestion writes these records, the stores persist them and the timeline
//! reads them back. Sharing one set of types keeps the write and read paths
//! consistent.
//!
//! # Module Organization
//!
//! - [`models`]: Record structs for the six trace tables
//! - [`constants`]: Info keys, batch sizes and buffer capacities

pub mod constants;
pub mod models;

// Re-export commonly used types
pub use constants::*;
pub use models::*;
