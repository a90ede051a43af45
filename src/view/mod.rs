//! Spatial-temporal view of a reconstructed trace.
//!
//! - [`event`]: the [`Event`] type produced by the timeline
//! - [`index`]: [`TraceIndex`], page blocks and compacted regions
//! - [`viewport`]: [`Viewport`] navigation, hit-testing and drawing geometry
//! - [`loader`]: [`IndexLoader`], background index building

pub mod event;
pub mod index;
pub mod loader;
pub mod viewport;

pub use event::{Event, EventKind, MAX_ORIGIN_IDS};
pub use index::{MemoryBlock, Region, TraceIndex, PAGE_SIZE};
pub use loader::{IndexLoader, LoadState};
pub use viewport::{Direction, Rect, RegionMarker, Viewport, ZoomAxes, POINTER_MAX_SIZE};
