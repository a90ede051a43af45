//! Turns instrumentation callbacks into framed trace messages.
//!
//! The host calls [`Correlator`] once per executed instruction and once per
//! memory access, from any thread. Instructions are grouped into contiguous
//! runs; when a run ends it is written as one exec message, preceded by the
//! memory messages of the accesses its instructions issued.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::config::{AddressRange, CaptureConfig, InstructionFilter};
use super::threads::ThreadTable;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::disasm::Arch;
use crate::protocol::{
    AccessMode, ExecMessage, FramingError, InfoMessage, LibMessage, MemoryMessage, ProtocolError,
    ThreadEvent, ThreadMessage, TraceMessage, TraceWriter,
};
use crate::trace::{ARCH_KEY, ARGS_KEY, CAPTURE_VERSION_KEY, PROGRAM_KEY};

/// Description of the traced program, written as info messages.
#[derive(Debug, Clone, Default)]
pub struct CaptureInfo {
    pub arch: String,
    pub program: String,
    pub args: Vec<String>,
}

/// Message counts and diagnostics for a finished capture.
#[derive(Debug, Default)]
pub struct CaptureSummary {
    pub info_messages: u64,
    pub lib_messages: u64,
    pub exec_messages: u64,
    pub memory_messages: u64,
    pub thread_messages: u64,
    pub instructions: u64,
    pub bytes_written: u64,
    pub diagnostics: Diagnostics,
}

/// Thread-safe capture front end.
///
/// All state lives behind one lock that is held for a single callback.
pub struct Correlator<W: Write> {
    state: Mutex<CaptureState<W>>,
}

impl<W: Write> Correlator<W> {
    pub fn new(writer: W, config: CaptureConfig) -> Self {
        Self {
            state: Mutex::new(CaptureState::new(TraceWriter::new(writer), config)),
        }
    }

    /// Write the info messages that open every trace.
    pub fn start(&self, info: &CaptureInfo) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        state.arch = Arch::parse(&info.arch);
        let entries = [
            (CAPTURE_VERSION_KEY, env!("CARGO_PKG_VERSION").to_string()),
            (ARCH_KEY, info.arch.clone()),
            (PROGRAM_KEY, info.program.clone()),
            (ARGS_KEY, info.args.join(" ")),
        ];
        for (key, value) in entries {
            state.emit(&TraceMessage::Info(InfoMessage {
                key: key.to_string(),
                value,
            }))?;
            state.summary.info_messages += 1;
        }
        Ok(())
    }

    /// Record a mapped library. Library instruction filters naming it are
    /// resolved to its address range.
    pub fn on_library_loaded(&self, name: &str, base: u64, end: u64) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        state.resolve_library_filters(name, base, end);
        state.emit(&TraceMessage::Lib(LibMessage {
            base,
            end,
            name: name.to_string(),
        }))?;
        state.summary.lib_messages += 1;
        Ok(())
    }

    pub fn on_instruction(&self, address: u64, bytes: &[u8]) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        state.push_instruction(address, bytes)
    }

    pub fn on_memory_access(
        &self,
        ins_address: u64,
        mode: AccessMode,
        start: u64,
        data: &[u8],
    ) {
        let mut state = self.state.lock();
        state.push_access(ins_address, mode, start, data);
    }

    /// Returns the synthetic id assigned to the new thread.
    pub fn on_thread_created(&self, handle: u32) -> Result<u64, ProtocolError> {
        let mut state = self.state.lock();
        let thread_id = state.threads.create(handle);
        state.emit_thread(thread_id, ThreadEvent::Create)?;
        Ok(thread_id)
    }

    pub fn on_thread_exited(&self, handle: u32) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        let thread_id = state.threads.lookup(handle);
        state.emit_thread(thread_id, ThreadEvent::Exit)
    }

    /// Switch the thread stamped on later exec messages. A pending run
    /// belongs to the previous thread and is flushed first.
    pub fn on_thread_started(&self, handle: u32) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        if state.threads.lookup(handle) != state.threads.current() {
            state.flush_run()?;
        }
        state.threads.start(handle);
        Ok(())
    }

    /// Flush the pending run and hand back the writer.
    pub fn finish(self) -> Result<(W, CaptureSummary), ProtocolError> {
        let mut state = self.state.into_inner();
        state.flush_run()?;
        state.leak_remaining();
        state.writer.flush()?;
        state.summary.bytes_written = state.writer.bytes_written();
        info!(
            "Capture finished: {} exec, {} memory, {} thread messages",
            state.summary.exec_messages, state.summary.memory_messages, state.summary.thread_messages
        );
        Ok((state.writer.into_inner(), state.summary))
    }
}

impl Correlator<std::io::BufWriter<std::fs::File>> {
    /// Create a correlator writing to a new trace file.
    pub fn create(path: &Path, config: CaptureConfig) -> anyhow::Result<Self> {
        use anyhow::Context;
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create trace file {}", path.display()))?;
        Ok(Self::new(std::io::BufWriter::new(file), config))
    }
}

#[derive(Debug, Default)]
struct PendingRun {
    addresses: Vec<u64>,
    lengths: Vec<u8>,
    code: Vec<u8>,
    /// Normalized address right after the last instruction.
    next: u64,
}

impl PendingRun {
    fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[derive(Debug)]
struct BufferedAccess {
    exec_id: u64,
    ins_address: u64,
    mode: AccessMode,
    start: u64,
    data: Vec<u8>,
}

struct CaptureState<W: Write> {
    writer: TraceWriter<W>,
    config: CaptureConfig,
    arch: Arch,
    instruction_ranges: Vec<AddressRange>,
    pending_libraries: Vec<String>,
    run: PendingRun,
    accesses: Vec<BufferedAccess>,
    access_capacity: usize,
    exec_id: u64,
    threads: ThreadTable,
    summary: CaptureSummary,
}

impl<W: Write> CaptureState<W> {
    fn new(writer: TraceWriter<W>, config: CaptureConfig) -> Self {
        let mut instruction_ranges = Vec::new();
        let mut pending_libraries = Vec::new();
        for filter in &config.instruction_filters {
            match filter {
                InstructionFilter::Range(range) => instruction_ranges.push(*range),
                InstructionFilter::Library(name) => pending_libraries.push(name.clone()),
            }
        }
        let access_capacity = config.access_buffer_capacity.max(1);
        Self {
            writer,
            arch: Arch::Unknown(String::new()),
            instruction_ranges,
            pending_libraries,
            run: PendingRun::default(),
            accesses: Vec::with_capacity(access_capacity),
            access_capacity,
            exec_id: 0,
            threads: ThreadTable::new(),
            summary: CaptureSummary::default(),
            config,
        }
    }

    fn emit(&mut self, msg: &TraceMessage) -> Result<(), ProtocolError> {
        self.writer.write_message(msg)
    }

    fn emit_thread(&mut self, thread_id: u64, event: ThreadEvent) -> Result<(), ProtocolError> {
        let msg = TraceMessage::Thread(ThreadMessage {
            exec_id: self.exec_id,
            thread_id,
            event,
        });
        self.emit(&msg)?;
        self.summary.thread_messages += 1;
        Ok(())
    }

    fn resolve_library_filters(&mut self, name: &str, base: u64, end: u64) {
        let file_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(name);
        let before = self.pending_libraries.len();
        self.pending_libraries
            .retain(|filter| filter != name && filter != file_name);
        if self.pending_libraries.len() != before {
            info!("Filtering {} from {:#018x} to {:#018x}", name, base, end);
            self.instruction_ranges.push(AddressRange::new(base, end));
        }
    }

    fn keeps_instruction(&self, address: u64) -> bool {
        if self.config.instruction_filters.is_empty() {
            return true;
        }
        self.instruction_ranges.iter().any(|r| r.contains(address))
    }

    fn keeps_access(&self, mode: AccessMode, start: u64) -> bool {
        let enabled = match mode {
            AccessMode::Read => self.config.trace_reads,
            AccessMode::Write => self.config.trace_writes,
        };
        enabled
            && (self.config.memory_filters.is_empty()
                || self.config.memory_filters.iter().any(|r| r.contains(start)))
    }

    fn keeps_exec(&self, exec_id: u64) -> bool {
        self.config.exec_filters.is_empty()
            || self.config.exec_filters.iter().any(|r| r.contains(exec_id))
    }

    fn push_instruction(&mut self, address: u64, bytes: &[u8]) -> Result<(), ProtocolError> {
        let normalized = self.arch.normalize_address(address);
        if !self.keeps_instruction(normalized) {
            return Ok(());
        }
        let length =
            u8::try_from(bytes.len()).map_err(|_| FramingError::InstructionTooLong(bytes.len()))?;

        let discontinuous = !self.run.is_empty() && self.run.next != normalized;
        let full = self.run.addresses.len() >= self.config.max_run_instructions
            || self.run.code.len() + bytes.len() > self.config.max_run_code_bytes;
        if discontinuous || full {
            self.flush_run()?;
        }

        self.run.addresses.push(address);
        self.run.lengths.push(length);
        self.run.code.extend_from_slice(bytes);
        self.run.next = normalized.wrapping_add(length as u64);
        self.summary.instructions += 1;
        Ok(())
    }

    fn push_access(&mut self, ins_address: u64, mode: AccessMode, start: u64, data: &[u8]) {
        // accesses of filtered-out instructions would never find their run
        if !self.keeps_instruction(self.arch.normalize_address(ins_address))
            || !self.keeps_access(mode, start)
        {
            return;
        }
        if self.accesses.len() >= self.access_capacity {
            self.access_capacity *= 2;
            self.accesses
                .reserve(self.access_capacity - self.accesses.len());
            self.summary.diagnostics.push(Diagnostic::BufferGrown {
                capacity: self.access_capacity,
            });
        }
        self.accesses.push(BufferedAccess {
            exec_id: self.exec_id,
            ins_address,
            mode,
            start,
            data: data.to_vec(),
        });
    }

    /// Write the pending run and the accesses its instructions issued.
    fn flush_run(&mut self) -> Result<(), ProtocolError> {
        if self.run.is_empty() {
            return Ok(());
        }
        let run = std::mem::take(&mut self.run);
        let exec_id = self.exec_id;
        let keep = self.keeps_exec(exec_id);

        // Index buffered accesses by normalized issuing address; each list
        // stays in capture order.
        let mut by_address: HashMap<u64, Vec<usize>> = HashMap::new();
        for (idx, access) in self.accesses.iter().enumerate() {
            by_address
                .entry(self.arch.normalize_address(access.ins_address))
                .or_default()
                .push(idx);
        }

        let mut consumed = vec![false; self.accesses.len()];
        let mut matched = Vec::new();
        for address in &run.addresses {
            let normalized = self.arch.normalize_address(*address);
            if let Some(indices) = by_address.remove(&normalized) {
                for idx in indices {
                    consumed[idx] = true;
                    matched.push(idx);
                }
            }
        }

        let leaked = consumed.iter().filter(|c| !**c).count();
        let mut accesses: Vec<Option<BufferedAccess>> =
            std::mem::take(&mut self.accesses).into_iter().map(Some).collect();

        if keep {
            for idx in matched {
                let Some(access) = accesses[idx].take() else {
                    continue;
                };
                self.emit(&TraceMessage::Memory(MemoryMessage {
                    exec_id: access.exec_id,
                    ins_address: access.ins_address,
                    mode: access.mode,
                    start_address: access.start,
                    data: access.data,
                }))?;
                self.summary.memory_messages += 1;
            }

            if self.config.trace_instructions {
                let count = run.addresses.len();
                self.emit(&TraceMessage::Exec(ExecMessage {
                    exec_id,
                    thread_id: self.threads.current(),
                    addresses: run.addresses,
                    lengths: run.lengths,
                    code: run.code,
                }))?;
                self.summary.exec_messages += 1;
                debug!("Flushed exec {} with {} instructions", exec_id, count);
            }
        }

        if leaked > 0 {
            self.summary
                .diagnostics
                .push(Diagnostic::CorrelationLeak { exec_id, leaked });
        }
        self.exec_id += 1;
        Ok(())
    }

    fn leak_remaining(&mut self) {
        if !self.accesses.is_empty() {
            let leaked = self.accesses.len();
            self.accesses.clear();
            self.summary.diagnostics.push(Diagnostic::CorrelationLeak {
                exec_id: self.exec_id,
                leaked,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageType, TraceReader};

    fn decode(bytes: Vec<u8>) -> Vec<TraceMessage> {
        TraceReader::new(bytes.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn x86_correlator(config: CaptureConfig) -> Correlator<Vec<u8>> {
        let correlator = Correlator::new(Vec::new(), config);
        correlator
            .start(&CaptureInfo {
                arch: "AMD64".into(),
                program: "/bin/true".into(),
                args: vec!["--help".into()],
            })
            .unwrap();
        correlator
    }

    fn kinds(messages: &[TraceMessage]) -> Vec<MessageType> {
        messages.iter().map(TraceMessage::message_type).collect()
    }

    #[test]
    fn test_start_writes_info() {
        let correlator = x86_correlator(CaptureConfig::default());
        let (bytes, summary) = correlator.finish().unwrap();
        let messages = decode(bytes);
        assert_eq!(summary.info_messages, 4);
        assert_eq!(
            messages[0],
            TraceMessage::Info(InfoMessage {
                key: CAPTURE_VERSION_KEY.into(),
                value: env!("CARGO_PKG_VERSION").into(),
            })
        );
        assert_eq!(
            messages[1],
            TraceMessage::Info(InfoMessage {
                key: ARCH_KEY.into(),
                value: "AMD64".into(),
            })
        );
    }

    #[test]
    fn test_contiguous_run_and_discontinuity() {
        let correlator = x86_correlator(CaptureConfig::default());
        correlator.on_instruction(0x1000, &[0x90]).unwrap();
        correlator.on_instruction(0x1001, &[0x48, 0x89, 0xd8]).unwrap();
        // jump target starts a new run
        correlator.on_instruction(0x2000, &[0xc3]).unwrap();
        let (bytes, summary) = correlator.finish().unwrap();
        let messages = decode(bytes);

        assert_eq!(summary.exec_messages, 2);
        let execs: Vec<&ExecMessage> = messages
            .iter()
            .filter_map(|m| match m {
                TraceMessage::Exec(e) => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(execs[0].exec_id, 0);
        assert_eq!(execs[0].addresses, vec![0x1000, 0x1001]);
        assert_eq!(execs[0].lengths, vec![1, 3]);
        assert_eq!(execs[0].code, vec![0x90, 0x48, 0x89, 0xd8]);
        assert_eq!(execs[1].exec_id, 1);
        assert_eq!(execs[1].addresses, vec![0x2000]);
    }

    #[test]
    fn test_run_capacity_bound() {
        let config = CaptureConfig {
            max_run_instructions: 2,
            ..Default::default()
        };
        let correlator = x86_correlator(config);
        for i in 0..5 {
            correlator.on_instruction(0x1000 + i, &[0x90]).unwrap();
        }
        let (_, summary) = correlator.finish().unwrap();
        assert_eq!(summary.exec_messages, 3);
        assert_eq!(summary.instructions, 5);
    }

    #[test]
    fn test_memory_emitted_before_exec() {
        let correlator = x86_correlator(CaptureConfig::default());
        correlator.on_instruction(0x1000, &[0x8b, 0x07]).unwrap();
        correlator.on_memory_access(0x1000, AccessMode::Read, 0x7000, &[1, 2, 3, 4]);
        correlator.on_instruction(0x1002, &[0x89, 0x07]).unwrap();
        correlator.on_memory_access(0x1002, AccessMode::Write, 0x7000, &[5, 6, 7, 8]);
        let (bytes, summary) = correlator.finish().unwrap();
        let messages = decode(bytes);

        assert_eq!(
            kinds(&messages[4..]),
            vec![MessageType::Memory, MessageType::Memory, MessageType::Exec]
        );
        match &messages[4] {
            TraceMessage::Memory(m) => {
                assert_eq!(m.mode, AccessMode::Read);
                assert_eq!(m.exec_id, 0);
                assert_eq!(m.data, vec![1, 2, 3, 4]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(summary.memory_messages, 2);
        assert!(summary.diagnostics.is_empty());
    }

    #[test]
    fn test_unmatched_access_leaks() {
        let correlator = x86_correlator(CaptureConfig::default());
        correlator.on_instruction(0x1000, &[0x90]).unwrap();
        correlator.on_memory_access(0x5555, AccessMode::Read, 0x7000, &[0]);
        correlator.on_instruction(0x3000, &[0x90]).unwrap();
        let (_, summary) = correlator.finish().unwrap();
        assert_eq!(summary.memory_messages, 0);
        assert_eq!(summary.diagnostics.leaked_accesses(), 1);
        assert!(matches!(
            summary.diagnostics.iter().next(),
            Some(Diagnostic::CorrelationLeak { exec_id: 0, leaked: 1 })
        ));
    }

    #[test]
    fn test_access_buffer_doubles() {
        let config = CaptureConfig {
            access_buffer_capacity: 2,
            ..Default::default()
        };
        let correlator = x86_correlator(config);
        correlator.on_instruction(0x1000, &[0x90]).unwrap();
        for i in 0..5 {
            correlator.on_memory_access(0x1000, AccessMode::Write, 0x7000 + i, &[0]);
        }
        let (_, summary) = correlator.finish().unwrap();
        // nothing dropped, two growths: 2 -> 4 -> 8
        assert_eq!(summary.memory_messages, 5);
        let grown: Vec<_> = summary
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::BufferGrown { .. }))
            .collect();
        assert_eq!(grown.len(), 2);
        assert_eq!(grown[1], &Diagnostic::BufferGrown { capacity: 8 });
    }

    #[test]
    fn test_thumb_addresses_compare_normalized() {
        let correlator = Correlator::new(Vec::new(), CaptureConfig::default());
        correlator
            .start(&CaptureInfo {
                arch: "ARM".into(),
                ..Default::default()
            })
            .unwrap();
        correlator.on_instruction(0x8001, &[0x00, 0xbf]).unwrap();
        correlator.on_memory_access(0x8000, AccessMode::Read, 0x100, &[1]);
        correlator.on_instruction(0x8003, &[0x00, 0xbf]).unwrap();
        let (bytes, summary) = correlator.finish().unwrap();
        let messages = decode(bytes);

        assert_eq!(summary.exec_messages, 1);
        assert_eq!(summary.memory_messages, 1);
        let exec = messages.iter().find_map(|m| match m {
            TraceMessage::Exec(e) => Some(e.clone()),
            _ => None,
        });
        // the raw first address keeps the mode bit
        assert_eq!(exec.unwrap().addresses, vec![0x8001, 0x8003]);
    }

    #[test]
    fn test_thread_lifecycle_messages() {
        let correlator = x86_correlator(CaptureConfig::default());
        let id = correlator.on_thread_created(3).unwrap();
        correlator.on_thread_started(3).unwrap();
        correlator.on_instruction(0x1000, &[0x90]).unwrap();
        correlator.on_thread_exited(3).unwrap();
        let (bytes, summary) = correlator.finish().unwrap();
        let messages = decode(bytes);

        assert_eq!(id, (1 << 32) | 3);
        assert_eq!(summary.thread_messages, 2);
        let exec = messages.iter().find_map(|m| match m {
            TraceMessage::Exec(e) => Some(e.thread_id),
            _ => None,
        });
        assert_eq!(exec, Some(id));
        assert!(messages.contains(&TraceMessage::Thread(ThreadMessage {
            exec_id: 0,
            thread_id: id,
            event: ThreadEvent::Exit,
        })));
    }

    #[test]
    fn test_thread_switch_flushes_run() {
        let correlator = x86_correlator(CaptureConfig::default());
        correlator.on_thread_created(1).unwrap();
        correlator.on_thread_created(2).unwrap();
        correlator.on_thread_started(1).unwrap();
        correlator.on_instruction(0x1000, &[0x90]).unwrap();
        correlator.on_thread_started(2).unwrap();
        correlator.on_instruction(0x1001, &[0x90]).unwrap();
        let (_, summary) = correlator.finish().unwrap();
        assert_eq!(summary.exec_messages, 2);
    }

    #[test]
    fn test_filters() {
        let config = CaptureConfig {
            instruction_filters: vec![InstructionFilter::Library("libfoo.so".into())],
            memory_filters: vec![AddressRange::new(0x7000, 0x7fff)],
            trace_writes: false,
            ..Default::default()
        };
        let correlator = x86_correlator(config);
        // not yet resolved, so nothing is kept
        correlator.on_instruction(0x4000, &[0x90]).unwrap();
        correlator
            .on_library_loaded("/usr/lib/libfoo.so", 0x4000, 0x4fff)
            .unwrap();
        correlator.on_instruction(0x4000, &[0x90]).unwrap();
        correlator.on_memory_access(0x4000, AccessMode::Read, 0x7000, &[1]);
        correlator.on_memory_access(0x4000, AccessMode::Read, 0x9000, &[1]);
        correlator.on_memory_access(0x4000, AccessMode::Write, 0x7000, &[1]);
        let (_, summary) = correlator.finish().unwrap();
        assert_eq!(summary.instructions, 1);
        assert_eq!(summary.exec_messages, 1);
        assert_eq!(summary.memory_messages, 1);
        assert_eq!(summary.lib_messages, 1);
    }

    #[test]
    fn test_filtered_instruction_accesses_are_not_leaked() {
        let config = CaptureConfig {
            instruction_filters: vec!["0x1000-0x1fff".parse().unwrap()],
            ..Default::default()
        };
        let correlator = x86_correlator(config);
        correlator.on_instruction(0x9000, &[0x8b, 0x07]).unwrap();
        correlator.on_memory_access(0x9000, AccessMode::Read, 0x7000, &[1, 2, 3, 4]);
        correlator.on_instruction(0x1000, &[0x8b, 0x07]).unwrap();
        correlator.on_memory_access(0x1000, AccessMode::Read, 0x7000, &[1, 2, 3, 4]);
        let (_, summary) = correlator.finish().unwrap();
        assert!(summary.diagnostics.is_empty());
        assert_eq!(summary.instructions, 1);
        assert_eq!(summary.memory_messages, 1);
    }

    #[test]
    fn test_exec_filter_skips_runs() {
        let config = CaptureConfig {
            exec_filters: vec!["1-1".parse().unwrap()],
            ..Default::default()
        };
        let correlator = x86_correlator(config);
        correlator.on_instruction(0x1000, &[0x90]).unwrap();
        correlator.on_instruction(0x2000, &[0x90]).unwrap();
        correlator.on_instruction(0x3000, &[0x90]).unwrap();
        let (bytes, summary) = correlator.finish().unwrap();
        assert_eq!(summary.exec_messages, 1);
        let exec_ids: Vec<u64> = decode(bytes)
            .iter()
            .filter_map(|m| match m {
                TraceMessage::Exec(e) => Some(e.exec_id),
                _ => None,
            })
            .collect();
        assert_eq!(exec_ids, vec![1]);
    }

    #[test]
    fn test_concurrent_callbacks() {
        use std::sync::Arc;
        use std::thread;

        let correlator = Arc::new(x86_correlator(CaptureConfig::default()));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let correlator = Arc::clone(&correlator);
                thread::spawn(move || {
                    for i in 0..100u64 {
                        let address = 0x10000 * (t + 1) + i * 0x10;
                        correlator.on_instruction(address, &[0x90]).unwrap();
                        correlator.on_memory_access(address, AccessMode::Read, 0x7000, &[0]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let correlator = Arc::try_unwrap(correlator).ok().unwrap();
        let (bytes, summary) = correlator.finish().unwrap();
        // every frame decodes cleanly
        let messages = decode(bytes);
        assert_eq!(summary.instructions, 400);
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.message_type() == MessageType::Exec)
                .count() as u64,
            summary.exec_messages
        );
    }
}
