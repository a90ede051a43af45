//! RecordCollector trait for streaming trace records to storage.
//!
//! Ingestion produces records one at a time in capture order. Implementations
//! can buffer them and write to storage (e.g. SQLite) when thresholds are
//! reached.

use anyhow::{bail, Result};

use super::TraceSource;
use crate::protocol::AccessMode;
use crate::trace::{
    BasicBlockRecord, InfoRecord, InstructionRecord, LibRecord, MemoryAccessRecord, ThreadRecord,
    TraceData,
};

/// Trait for collecting trace records during ingestion.
///
/// Records arrive with their ids already assigned. Implementations must keep
/// them in arrival order; the timeline relies on id order matching capture
/// order.
///
/// # Example
///
/// ```ignore
/// let mut collector = SqliteWriter::create(path, CommitMode::SingleTransaction, DEFAULT_BATCH_SIZE)?;
/// collector.add_info(InfoRecord { key: "ARCH".into(), value: "AMD64".into() })?;
/// collector.add_basic_block(block)?;
/// // ... add more records ...
/// collector.finish()?;
/// ```
pub trait RecordCollector {
    /// Add an info record.
    fn add_info(&mut self, record: InfoRecord) -> Result<()>;

    /// Add a library record.
    fn add_lib(&mut self, record: LibRecord) -> Result<()>;

    /// Add a basic block record.
    fn add_basic_block(&mut self, record: BasicBlockRecord) -> Result<()>;

    /// Add an instruction record. Its block must already have been added.
    fn add_instruction(&mut self, record: InstructionRecord) -> Result<()>;

    /// Add a memory access record. Its instruction must already have been added.
    fn add_memory_access(&mut self, record: MemoryAccessRecord) -> Result<()>;

    /// Add a thread record.
    fn add_thread(&mut self, record: ThreadRecord) -> Result<()>;

    /// Record a thread exit.
    ///
    /// Returns `false` when no thread with that id exists or its exit was
    /// already recorded; an exit block id is never overwritten.
    fn set_thread_exit(&mut self, thread_id: u64, exit_bbl_id: u64) -> Result<bool>;

    /// Flush any buffered records to storage.
    fn flush(&mut self) -> Result<()>;

    /// Finish writing and close the store.
    fn finish(self) -> Result<()>;
}

/// A simple in-memory collector that stores all records in `TraceData`.
///
/// Used by tests and for small traces that are reconstructed right away;
/// it is also a [`TraceSource`].
#[derive(Default)]
pub struct InMemoryCollector {
    data: TraceData,
}

impl InMemoryCollector {
    /// Create a new in-memory collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the collected data.
    pub fn into_data(self) -> TraceData {
        self.data
    }

    /// Get a reference to the collected data.
    pub fn data(&self) -> &TraceData {
        &self.data
    }
}

impl RecordCollector for InMemoryCollector {
    fn add_info(&mut self, record: InfoRecord) -> Result<()> {
        self.data.infos.push(record);
        Ok(())
    }

    fn add_lib(&mut self, record: LibRecord) -> Result<()> {
        self.data.libs.push(record);
        Ok(())
    }

    fn add_basic_block(&mut self, record: BasicBlockRecord) -> Result<()> {
        self.data.basic_blocks.push(record);
        Ok(())
    }

    fn add_instruction(&mut self, record: InstructionRecord) -> Result<()> {
        if self.data.basic_blocks.last().map(|b| b.id) != Some(record.bbl_id) {
            bail!(
                "instruction {} references block {} which is not the current block",
                record.id,
                record.bbl_id
            );
        }
        self.data.instructions.push(record);
        Ok(())
    }

    fn add_memory_access(&mut self, record: MemoryAccessRecord) -> Result<()> {
        let known = self
            .data
            .instructions
            .binary_search_by_key(&record.ins_id, |i| i.id)
            .is_ok();
        if !known {
            bail!(
                "memory access {} references unknown instruction {}",
                record.id,
                record.ins_id
            );
        }
        self.data.memory_accesses.push(record);
        Ok(())
    }

    fn add_thread(&mut self, record: ThreadRecord) -> Result<()> {
        self.data.threads.push(record);
        Ok(())
    }

    fn set_thread_exit(&mut self, thread_id: u64, exit_bbl_id: u64) -> Result<bool> {
        match self
            .data
            .threads
            .iter_mut()
            .find(|t| t.thread_id == thread_id && t.exit_bbl_id.is_none())
        {
            Some(thread) => {
                thread.exit_bbl_id = Some(exit_bbl_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn flush(&mut self) -> Result<()> {
        // In-memory collector doesn't need to flush
        Ok(())
    }

    fn finish(self) -> Result<()> {
        // Nothing to do for in-memory collector
        Ok(())
    }
}

impl TraceSource for InMemoryCollector {
    fn instructions_after(&self, after_id: u64, limit: usize) -> Result<Vec<InstructionRecord>> {
        let instructions = &self.data.instructions;
        let start = instructions.partition_point(|i| i.id <= after_id);
        Ok(instructions[start..].iter().take(limit).cloned().collect())
    }

    fn accesses_after(
        &self,
        kind: AccessMode,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<MemoryAccessRecord>> {
        let accesses = &self.data.memory_accesses;
        let start = accesses.partition_point(|a| a.id <= after_id);
        Ok(accesses[start..]
            .iter()
            .filter(|a| a.kind == kind)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: u64) -> BasicBlockRecord {
        BasicBlockRecord {
            id,
            addr: 0x1000,
            addr_end: 0x1000,
            size: 1,
            thread_id: 0,
        }
    }

    fn ins(id: u64, bbl_id: u64) -> InstructionRecord {
        InstructionRecord {
            id,
            bbl_id,
            ip: 0x1000,
            disassembly: "nop".into(),
            opcode: vec![0x90],
        }
    }

    fn access(id: u64, ins_id: u64, kind: AccessMode) -> MemoryAccessRecord {
        MemoryAccessRecord {
            id,
            ins_id,
            ip: 0x1000,
            kind,
            addr: 0x2000,
            data: vec![0; 4],
        }
    }

    #[test]
    fn test_rejects_dangling_references() {
        let mut collector = InMemoryCollector::new();
        assert!(collector.add_instruction(ins(1, 1)).is_err());
        collector.add_basic_block(block(1)).unwrap();
        collector.add_instruction(ins(1, 1)).unwrap();
        assert!(collector
            .add_memory_access(access(2, 7, AccessMode::Read))
            .is_err());
        collector
            .add_memory_access(access(2, 1, AccessMode::Read))
            .unwrap();
    }

    #[test]
    fn test_thread_exit_is_set_once() {
        let mut collector = InMemoryCollector::new();
        collector
            .add_thread(ThreadRecord {
                thread_id: (1 << 32) | 5,
                start_bbl_id: 0,
                exit_bbl_id: None,
            })
            .unwrap();
        assert!(collector.set_thread_exit((1 << 32) | 5, 4).unwrap());
        assert!(!collector.set_thread_exit((1 << 32) | 5, 9).unwrap());
        assert!(!collector.set_thread_exit(42, 9).unwrap());
        assert_eq!(collector.data().threads[0].exit_bbl_id, Some(4));
    }

    #[test]
    fn test_keyset_pages() {
        let mut collector = InMemoryCollector::new();
        collector.add_basic_block(block(1)).unwrap();
        collector.add_instruction(ins(1, 1)).unwrap();
        collector
            .add_memory_access(access(2, 1, AccessMode::Read))
            .unwrap();
        collector
            .add_memory_access(access(3, 1, AccessMode::Write))
            .unwrap();
        collector.add_instruction(ins(4, 1)).unwrap();
        collector
            .add_memory_access(access(5, 4, AccessMode::Read))
            .unwrap();
        collector.add_instruction(ins(6, 1)).unwrap();

        let page = collector.instructions_after(0, 2).unwrap();
        assert_eq!(page.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 4]);
        let page = collector.instructions_after(4, 2).unwrap();
        assert_eq!(page.iter().map(|i| i.id).collect::<Vec<_>>(), vec![6]);

        let reads = collector.accesses_after(AccessMode::Read, 0, 10).unwrap();
        assert_eq!(reads.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2, 5]);
        let reads = collector.accesses_after(AccessMode::Read, 2, 10).unwrap();
        assert_eq!(reads.iter().map(|a| a.id).collect::<Vec<_>>(), vec![5]);
        let writes = collector.accesses_after(AccessMode::Write, 0, 10).unwrap();
        assert_eq!(writes.len(), 1);
    }
}
