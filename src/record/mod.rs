//! Record sinks and sources.
//!
//! [`RecordCollector`] is what ingestion writes into; [`TraceSource`] is what
//! the timeline reads back from. Both the in-memory collector and the SQLite
//! store implement the pair.

pub mod collector;

use anyhow::Result;

use crate::protocol::AccessMode;
use crate::trace::{InstructionRecord, MemoryAccessRecord};

pub use collector::{InMemoryCollector, RecordCollector};

/// Keyset-paginated read access to a stored trace.
///
/// Every call returns at most `limit` records with an id strictly greater
/// than `after_id`, in increasing id order. An empty page means the cursor
/// is exhausted.
pub trait TraceSource {
    fn instructions_after(&self, after_id: u64, limit: usize) -> Result<Vec<InstructionRecord>>;

    fn accesses_after(
        &self,
        kind: AccessMode,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<MemoryAccessRecord>>;
}

impl<T: TraceSource + ?Sized> TraceSource for &T {
    fn instructions_after(&self, after_id: u64, limit: usize) -> Result<Vec<InstructionRecord>> {
        (**self).instructions_after(after_id, limit)
    }

    fn accesses_after(
        &self,
        kind: AccessMode,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<MemoryAccessRecord>> {
        (**self).accesses_after(kind, after_id, limit)
    }
}
