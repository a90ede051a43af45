//! Capture side of the tracer.
//!
//! Runs inside the traced program and turns instrumentation callbacks into a
//! trace stream.
//!
//! - [`correlator`]: [`Correlator`], the callback sink
//! - [`config`]: [`CaptureConfig`] and its filter types
//! - [`threads`]: synthetic thread ids

pub mod config;
pub mod correlator;
pub mod threads;

pub use config::{parse_list, AddressRange, CaptureConfig, IdRange, InstructionFilter};
pub use correlator::{CaptureInfo, CaptureSummary, Correlator};
pub use threads::ThreadTable;
