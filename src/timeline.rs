//! Reconstruction of one time-ordered event sequence from stored records.
//!
//! Three forward-only cursors walk instructions, reads and writes in id
//! order. Instructions are grouped by basic block; the accesses of a block
//! are pulled alongside it and each one is emitted right before the first
//! instruction whose id is not lower than its owner's, sharing that
//! instruction's time. Reads and writes due at the same instruction are
//! merged in id order.
//!
//! The sequence is finite and cannot be resumed. Build a new [`Timeline`] to
//! replay it; the result is identical.

use std::collections::VecDeque;

use anyhow::Result;

use crate::protocol::AccessMode;
use crate::record::TraceSource;
use crate::trace::{InstructionRecord, MemoryAccessRecord};
use crate::view::Event;

/// Records fetched per keyset page.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

trait Keyed {
    fn key(&self) -> u64;
}

impl Keyed for InstructionRecord {
    fn key(&self) -> u64 {
        self.id
    }
}

impl Keyed for MemoryAccessRecord {
    fn key(&self) -> u64 {
        self.id
    }
}

/// Keyset-paginated cursor. Fetches `id > last ORDER BY id LIMIT page`.
struct Cursor<T> {
    page: VecDeque<T>,
    last_id: u64,
    page_size: usize,
    exhausted: bool,
}

impl<T: Keyed> Cursor<T> {
    fn new(page_size: usize) -> Self {
        Self {
            page: VecDeque::new(),
            last_id: 0,
            page_size,
            exhausted: false,
        }
    }

    fn fill<F>(&mut self, fetch: F) -> Result<()>
    where
        F: FnOnce(u64, usize) -> Result<Vec<T>>,
    {
        if self.page.is_empty() && !self.exhausted {
            let records = fetch(self.last_id, self.page_size)?;
            match records.last() {
                Some(last) => self.last_id = last.key(),
                None => self.exhausted = true,
            }
            self.page.extend(records);
        }
        Ok(())
    }

    fn peek<F>(&mut self, fetch: F) -> Result<Option<&T>>
    where
        F: FnOnce(u64, usize) -> Result<Vec<T>>,
    {
        self.fill(fetch)?;
        Ok(self.page.front())
    }

    fn pop<F>(&mut self, fetch: F) -> Result<Option<T>>
    where
        F: FnOnce(u64, usize) -> Result<Vec<T>>,
    {
        self.fill(fetch)?;
        Ok(self.page.pop_front())
    }
}

/// Lazy iterator of [`Event`]s in increasing time order.
///
/// Stops after the first error.
pub struct Timeline<S: TraceSource> {
    source: S,
    instructions: Cursor<InstructionRecord>,
    reads: Cursor<MemoryAccessRecord>,
    writes: Cursor<MemoryAccessRecord>,

    block: VecDeque<InstructionRecord>,
    block_reads: VecDeque<MemoryAccessRecord>,
    block_writes: VecDeque<MemoryAccessRecord>,

    ready: VecDeque<Event>,
    time: u64,
    failed: bool,
}

impl<S: TraceSource> Timeline<S> {
    pub fn new(source: S) -> Self {
        Self::with_page_size(source, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(source: S, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            source,
            instructions: Cursor::new(page_size),
            reads: Cursor::new(page_size),
            writes: Cursor::new(page_size),
            block: VecDeque::new(),
            block_reads: VecDeque::new(),
            block_writes: VecDeque::new(),
            ready: VecDeque::new(),
            time: 0,
            failed: false,
        }
    }

    /// Time the next instruction will get.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Queue the events of one instruction. Returns `false` once every
    /// instruction has been emitted.
    fn advance(&mut self) -> Result<bool> {
        if self.block.is_empty() {
            self.load_block()?;
        }
        let Some(ins) = self.block.pop_front() else {
            return Ok(false);
        };

        let time = self.time;
        let due = |queue: &VecDeque<MemoryAccessRecord>| {
            queue
                .front()
                .filter(|access| access.ins_id <= ins.id)
                .map(|access| access.id)
        };
        loop {
            let queue = match (due(&self.block_reads), due(&self.block_writes)) {
                (Some(read), Some(write)) if write < read => &mut self.block_writes,
                (Some(_), _) => &mut self.block_reads,
                (None, Some(_)) => &mut self.block_writes,
                (None, None) => break,
            };
            if let Some(access) = queue.pop_front() {
                self.ready.push_back(Event::access(time, &access));
            }
        }
        self.ready.push_back(Event::instruction(time, &ins));
        self.time += 1;
        Ok(true)
    }

    /// Pull every instruction of the next basic block, then the reads and
    /// writes issued by them.
    fn load_block(&mut self) -> Result<()> {
        let source = &self.source;
        let Some(first) = self
            .instructions
            .pop(|after, limit| source.instructions_after(after, limit))?
        else {
            return Ok(());
        };
        let bbl_id = first.bbl_id;
        self.block.push_back(first);

        loop {
            match self
                .instructions
                .peek(|after, limit| source.instructions_after(after, limit))?
            {
                Some(next) if next.bbl_id == bbl_id => {}
                _ => break,
            }
            if let Some(next) = self
                .instructions
                .pop(|after, limit| source.instructions_after(after, limit))?
            {
                self.block.push_back(next);
            }
        }

        let last_id = self.block.back().map_or(0, |ins| ins.id);
        pull_accesses(
            &mut self.reads,
            &mut self.block_reads,
            last_id,
            |after, limit| source.accesses_after(AccessMode::Read, after, limit),
        )?;
        pull_accesses(
            &mut self.writes,
            &mut self.block_writes,
            last_id,
            |after, limit| source.accesses_after(AccessMode::Write, after, limit),
        )?;
        Ok(())
    }
}

fn pull_accesses<F>(
    cursor: &mut Cursor<MemoryAccessRecord>,
    queue: &mut VecDeque<MemoryAccessRecord>,
    last_ins_id: u64,
    fetch: F,
) -> Result<()>
where
    F: Fn(u64, usize) -> Result<Vec<MemoryAccessRecord>>,
{
    loop {
        match cursor.peek(&fetch)? {
            Some(access) if access.ins_id <= last_ins_id => {}
            _ => return Ok(()),
        }
        if let Some(access) = cursor.pop(&fetch)? {
            queue.push_back(access);
        }
    }
}

impl<S: TraceSource> Iterator for Timeline<S> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(Ok(event));
            }
            if self.failed {
                return None;
            }
            match self.advance() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
