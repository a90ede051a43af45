//! Builds correlated trace records from a message stream.
//!
//! The [`Ingestor`] consumes messages in stream order and writes info, lib,
//! block, instruction, memory access and thread records into any
//! [`RecordCollector`]. Memory messages precede the exec message of their
//! run, so they are buffered until that exec arrives and then attached to the
//! matching instruction.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::disasm::{Arch, Disassembler, RunDecoder};
use crate::protocol::{
    ExecMessage, MemoryMessage, ProtocolError, ThreadEvent, ThreadMessage, TraceMessage,
    TraceReader, DEFAULT_MAX_FRAME_LEN,
};
use crate::record::RecordCollector;
use crate::sqlite::CommitMode;
use crate::trace::{
    BasicBlockRecord, InfoRecord, InstructionRecord, LibRecord, MemoryAccessRecord, ThreadRecord,
    ARCH_KEY, DEFAULT_ACCESS_BUFFER_CAPACITY, DEFAULT_BATCH_SIZE,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open trace {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to decode trace: {0}")]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Ingestion settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Initial size of the memory message buffer. It doubles when full.
    pub access_buffer_capacity: usize,

    /// Frames longer than this are rejected before allocation.
    pub max_frame_len: u64,

    /// Rows buffered by the SQLite writer before a bulk insert.
    pub batch_size: usize,

    pub commit_mode: CommitMode,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            access_buffer_capacity: DEFAULT_ACCESS_BUFFER_CAPACITY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            batch_size: DEFAULT_BATCH_SIZE,
            commit_mode: CommitMode::SingleTransaction,
        }
    }
}

impl IngestConfig {
    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read ingest config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse ingest config {}", path.display()))
    }
}

/// Record counts and diagnostics for one ingested trace.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub messages: u64,
    pub infos: u64,
    pub libs: u64,
    pub basic_blocks: u64,
    pub instructions: u64,
    pub memory_accesses: u64,
    pub threads: u64,
    pub thread_exits: u64,
    pub diagnostics: Diagnostics,
}

impl IngestReport {
    /// True when disassembly disagreed with the trace at least once.
    #[must_use]
    pub fn suspect(&self) -> bool {
        self.diagnostics.is_suspect()
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "messages:        {}", self.messages)?;
        writeln!(f, "info:            {}", self.infos)?;
        writeln!(f, "libraries:       {}", self.libs)?;
        writeln!(f, "basic blocks:    {}", self.basic_blocks)?;
        writeln!(f, "instructions:    {}", self.instructions)?;
        writeln!(f, "memory accesses: {}", self.memory_accesses)?;
        writeln!(f, "threads:         {}", self.threads)?;
        writeln!(f, "leaked accesses: {}", self.diagnostics.leaked_accesses())?;
        write!(f, "suspect:         {}", self.suspect())
    }
}

/// Streaming trace ingestion into a [`RecordCollector`].
///
/// Block ids and instruction/access ids come from two separate counters,
/// both starting at 1. Instructions and accesses share one counter so an
/// access id always falls between its instruction's id and the next one.
pub struct Ingestor<C: RecordCollector> {
    collector: C,
    decoder: RunDecoder,
    pending: Vec<MemoryMessage>,
    pending_capacity: usize,
    next_bbl_id: u64,
    next_record_id: u64,
    last_bbl_id: u64,
    report: IngestReport,
}

impl<C: RecordCollector> Ingestor<C> {
    pub fn new(collector: C, config: &IngestConfig) -> Self {
        let pending_capacity = config.access_buffer_capacity.max(1);
        Self {
            collector,
            decoder: RunDecoder::default(),
            pending: Vec::with_capacity(pending_capacity),
            pending_capacity,
            next_bbl_id: 1,
            next_record_id: 1,
            last_bbl_id: 0,
            report: IngestReport::default(),
        }
    }

    /// Replace the default x86 disassembler.
    pub fn with_disassembler(mut self, backend: Box<dyn Disassembler>) -> Self {
        let arch = self.decoder.arch().clone();
        self.decoder = RunDecoder::new(backend);
        self.decoder.set_arch(arch);
        self
    }

    pub fn report(&self) -> &IngestReport {
        &self.report
    }

    /// Consume every message of `reader`. Stops at the first protocol error.
    pub fn ingest<R: Read>(&mut self, reader: &mut TraceReader<R>) -> Result<(), IngestError> {
        while let Some(msg) = reader.next_message()? {
            self.process(msg)?;
        }
        Ok(())
    }

    pub fn process(&mut self, msg: TraceMessage) -> Result<(), IngestError> {
        self.report.messages += 1;
        match msg {
            TraceMessage::Info(info) => {
                if info.key == ARCH_KEY {
                    self.decoder.set_arch(Arch::parse(&info.value));
                }
                self.collector.add_info(InfoRecord {
                    key: info.key,
                    value: info.value,
                })?;
                self.report.infos += 1;
            }
            TraceMessage::Lib(lib) => {
                self.collector.add_lib(LibRecord {
                    name: lib.name,
                    base: lib.base,
                    end: lib.end,
                })?;
                self.report.libs += 1;
            }
            TraceMessage::Memory(access) => self.buffer_access(access),
            TraceMessage::Exec(exec) => self.on_exec(exec)?,
            TraceMessage::Thread(thread) => self.on_thread(thread)?,
        }
        Ok(())
    }

    /// Flush the collector and return it with the final report.
    ///
    /// Memory messages still buffered have no exec message left to attach to
    /// and are reported as a leak.
    pub fn finish(mut self) -> Result<(C, IngestReport), IngestError> {
        if !self.pending.is_empty() {
            let exec_id = self.pending[0].exec_id;
            let leaked = self.pending.len();
            self.pending.clear();
            self.report
                .diagnostics
                .push(Diagnostic::CorrelationLeak { exec_id, leaked });
        }
        self.collector.flush()?;
        info!(
            "Ingested {} blocks, {} instructions, {} memory accesses",
            self.report.basic_blocks, self.report.instructions, self.report.memory_accesses
        );
        Ok((self.collector, self.report))
    }

    fn buffer_access(&mut self, access: MemoryMessage) {
        if self.pending.len() >= self.pending_capacity {
            self.pending_capacity *= 2;
            self.pending
                .reserve(self.pending_capacity - self.pending.len());
            self.report.diagnostics.push(Diagnostic::BufferGrown {
                capacity: self.pending_capacity,
            });
        }
        self.pending.push(access);
    }

    fn on_exec(&mut self, exec: ExecMessage) -> Result<(), IngestError> {
        let arch = self.decoder.arch().clone();
        let bbl_id = self.next_bbl_id;
        self.next_bbl_id += 1;
        self.last_bbl_id = bbl_id;

        let addr = exec
            .addresses
            .first()
            .map(|a| arch.normalize_address(*a))
            .unwrap_or(0);
        let size = exec.code.len() as u64;
        self.collector.add_basic_block(BasicBlockRecord {
            id: bbl_id,
            addr,
            addr_end: addr.wrapping_add(size.saturating_sub(1)),
            size,
            thread_id: exec.thread_id,
        })?;
        self.report.basic_blocks += 1;

        let decoded = self.decoder.decode(&exec, &mut self.report.diagnostics);

        let mut by_address: HashMap<u64, Vec<usize>> = HashMap::new();
        for (idx, access) in self.pending.iter().enumerate() {
            by_address
                .entry(arch.normalize_address(access.ins_address))
                .or_default()
                .push(idx);
        }
        let mut accesses: Vec<Option<MemoryMessage>> =
            std::mem::take(&mut self.pending).into_iter().map(Some).collect();

        for ins in decoded {
            let ins_id = self.next_record_id;
            self.next_record_id += 1;
            let ip = ins.address;
            self.collector.add_instruction(InstructionRecord {
                id: ins_id,
                bbl_id,
                ip,
                disassembly: ins.text,
                opcode: ins.bytes,
            })?;
            self.report.instructions += 1;

            let Some(indices) = by_address.remove(&ip) else {
                continue;
            };
            for idx in indices {
                let Some(access) = accesses[idx].take() else {
                    continue;
                };
                let id = self.next_record_id;
                self.next_record_id += 1;
                self.collector.add_memory_access(MemoryAccessRecord {
                    id,
                    ins_id,
                    ip,
                    kind: access.mode,
                    addr: access.start_address,
                    data: access.data,
                })?;
                self.report.memory_accesses += 1;
            }
        }

        let leaked = accesses.iter().filter(|a| a.is_some()).count();
        if leaked > 0 {
            self.report.diagnostics.push(Diagnostic::CorrelationLeak {
                exec_id: exec.exec_id,
                leaked,
            });
        }
        Ok(())
    }

    fn on_thread(&mut self, thread: ThreadMessage) -> Result<(), IngestError> {
        match thread.event {
            ThreadEvent::Create => {
                self.collector.add_thread(ThreadRecord {
                    thread_id: thread.thread_id,
                    start_bbl_id: self.last_bbl_id,
                    exit_bbl_id: None,
                })?;
                self.report.threads += 1;
            }
            ThreadEvent::Exit => {
                if self
                    .collector
                    .set_thread_exit(thread.thread_id, self.last_bbl_id)?
                {
                    self.report.thread_exits += 1;
                } else {
                    debug!(
                        "Ignoring exit of thread {:#x} with no open record",
                        thread.thread_id
                    );
                }
            }
        }
        Ok(())
    }
}

/// Ingest one trace file into `collector` and finish it.
///
/// On error the collector is dropped without being finished, so a store
/// that commits on finish keeps nothing from this file.
pub fn ingest_file<C: RecordCollector>(
    path: &Path,
    collector: C,
    config: &IngestConfig,
) -> Result<IngestReport, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = TraceReader::with_max_frame_len(BufReader::new(file), config.max_frame_len);
    let mut ingestor = Ingestor::new(collector, config);
    ingestor.ingest(&mut reader)?;
    let (collector, report) = ingestor.finish()?;
    collector.finish()?;
    Ok(report)
}
