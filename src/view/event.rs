//! Unified runtime event shared by the timeline and the index.

use smallvec::SmallVec;

use crate::protocol::AccessMode;
use crate::trace::{InstructionRecord, MemoryAccessRecord};

/// Most record ids a merged access event can carry.
pub const MAX_ORIGIN_IDS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Read,
    Write,
    ReadWrite,
    Instruction,
    /// Synthetic selection produced by a pointer drag.
    Pointer,
    Unknown,
}

impl EventKind {
    pub fn from_access(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Read => EventKind::Read,
            AccessMode::Write => EventKind::Write,
        }
    }

    pub fn is_access(self) -> bool {
        matches!(
            self,
            EventKind::Read | EventKind::Write | EventKind::ReadWrite
        )
    }

    /// Kind of two merged accesses.
    pub fn union(self, other: EventKind) -> EventKind {
        match (self, other) {
            (a, b) if a == b => a,
            (a, b) if a.is_access() && b.is_access() => EventKind::ReadWrite,
            _ => EventKind::Unknown,
        }
    }
}

/// One drawable item: an instruction or a (possibly merged) memory access.
///
/// # Fields
/// - `time`: Position on the time axis, one step per executed instruction
/// - `address`: First byte covered
/// - `size`: Byte count, may be 0
/// - `ids`: Ids of the records this event came from, at most [`MAX_ORIGIN_IDS`]
/// - `kind`: What the event represents
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub time: u64,
    pub address: u64,
    pub size: u64,
    pub ids: SmallVec<[u64; MAX_ORIGIN_IDS]>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(time: u64, address: u64, size: u64, kind: EventKind, id: u64) -> Self {
        let mut ids = SmallVec::new();
        ids.push(id);
        Self {
            time,
            address,
            size,
            ids,
            kind,
        }
    }

    pub fn instruction(time: u64, record: &InstructionRecord) -> Self {
        Self::new(
            time,
            record.ip,
            record.size(),
            EventKind::Instruction,
            record.id,
        )
    }

    pub fn access(time: u64, record: &MemoryAccessRecord) -> Self {
        Self::new(
            time,
            record.addr,
            record.size(),
            EventKind::from_access(record.kind),
            record.id,
        )
    }

    /// A pointer selection carries no record ids.
    pub fn pointer(time: u64, address: u64, size: u64) -> Self {
        Self {
            time,
            address,
            size,
            ids: SmallVec::new(),
            kind: EventKind::Pointer,
        }
    }

    /// One past the last byte covered.
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }

    pub fn overlaps(&self, other: &Event) -> bool {
        !(self.end() <= other.address || other.end() <= self.address)
    }

    /// First origin record id.
    pub fn origin(&self) -> Option<u64> {
        self.ids.first().copied()
    }
}
