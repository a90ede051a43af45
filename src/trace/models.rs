//! Trace record structs shared by ingestion, the stores and the timeline.
//!
//! These structs are the canonical shape of a persisted trace. Every backend
//! (in-memory or SQLite) stores exactly these fields, and the timeline reads
//! them back through [`crate::record::TraceSource`].

use crate::protocol::AccessMode;

/// Key/value metadata recorded at the start of a capture.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct InfoRecord {
    pub key: String,
    pub value: String,
}

/// A library mapped into the traced process.
///
/// # Fields
/// - `name`: Path or soname as reported by the loader
/// - `base`: First mapped address
/// - `end`: Last mapped address
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LibRecord {
    pub name: String,
    pub base: u64,
    pub end: u64,
}

/// One executed basic block, created once per exec message.
///
/// # Fields
/// - `id`: Block id, monotonic in capture order starting at 1
/// - `addr`: Normalized address of the first instruction
/// - `addr_end`: Address of the last code byte (`addr + size - 1`)
/// - `size`: Code size in bytes
/// - `thread_id`: Synthetic id of the executing thread
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BasicBlockRecord {
    pub id: u64,
    pub addr: u64,
    pub addr_end: u64,
    pub size: u64,
    pub thread_id: u64,
}

/// A single executed instruction.
///
/// # Fields
/// - `id`: Instruction id, shares its counter with memory access ids
/// - `bbl_id`: Owning block (references `BasicBlockRecord.id`)
/// - `ip`: Normalized instruction address
/// - `disassembly`: Disassembler text, empty when no disassembler applied
/// - `opcode`: Raw instruction bytes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstructionRecord {
    pub id: u64,
    pub bbl_id: u64,
    pub ip: u64,
    pub disassembly: String,
    pub opcode: Vec<u8>,
}

impl InstructionRecord {
    pub fn size(&self) -> u64 {
        self.opcode.len() as u64
    }
}

/// A memory read or write attributed to one instruction.
///
/// # Fields
/// - `id`: Access id, allocated from the instruction counter
/// - `ins_id`: Issuing instruction (references `InstructionRecord.id`)
/// - `ip`: Address of the issuing instruction
/// - `kind`: Read or write
/// - `addr`: First accessed byte
/// - `data`: Bytes read or written
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryAccessRecord {
    pub id: u64,
    pub ins_id: u64,
    pub ip: u64,
    pub kind: AccessMode,
    pub addr: u64,
    pub data: Vec<u8>,
}

impl MemoryAccessRecord {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Last accessed byte. Equal to `addr` for empty accesses.
    pub fn addr_end(&self) -> u64 {
        self.addr.wrapping_add(self.size().saturating_sub(1))
    }

    /// Little-endian scalar interpretation of `data`.
    pub fn value(&self) -> Option<u64> {
        scalar_value(&self.data)
    }
}

/// Lifetime of one traced thread.
///
/// # Fields
/// - `thread_id`: Synthetic id `(creation counter << 32) | handle`
/// - `start_bbl_id`: Last block id when the thread was created (0 if none)
/// - `exit_bbl_id`: Last block id when the thread exited, `None` until then
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadRecord {
    pub thread_id: u64,
    pub start_bbl_id: u64,
    pub exit_bbl_id: Option<u64>,
}

/// Container for a whole trace held in memory.
#[derive(Debug, Default)]
pub struct TraceData {
    pub infos: Vec<InfoRecord>,
    pub libs: Vec<LibRecord>,
    pub basic_blocks: Vec<BasicBlockRecord>,
    pub instructions: Vec<InstructionRecord>,
    pub memory_accesses: Vec<MemoryAccessRecord>,
    pub threads: Vec<ThreadRecord>,
}

/// Interpret 1, 2, 4 or 8 bytes as a little-endian integer.
pub fn scalar_value(data: &[u8]) -> Option<u64> {
    match data.len() {
        1 => Some(data[0] as u64),
        2 => Some(u16::from_le_bytes([data[0], data[1]]) as u64),
        4 => Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as u64),
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(data);
            Some(u64::from_le_bytes(bytes))
        }
        _ => None,
    }
}

/// Format an address the way the store persists it (`0x%016x`).
pub fn format_address(address: u64) -> String {
    format!("{address:#018x}")
}

/// Parse an address stored by [`format_address`]. The `0x` prefix is optional.
pub fn parse_address(s: &str) -> Option<u64> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).ok()
}

/// Format a scalar value zero-padded to the access width.
pub fn format_value(value: u64, size: usize) -> String {
    format!("0x{value:0width$x}", width = size * 2)
}
