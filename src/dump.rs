//! Human-readable rendering of a raw trace stream.
//!
//! One line per message, prefixed by its kind:
//!
//! ```text
//! [!] ARCH: AMD64
//! [L] Loaded /lib/libc.so.6 from 0x00007f0000000000 to 0x00007f00001fffff
//! [B] EXEC_ID: 0 THREAD_ID: 0000000100000001 START_ADDRESS: 0000000000401000 END_ADDRESS: 0000000000401002
//! [I] 0000000000401000: mov eax,[rdi]
//! [M] EXEC_ID: 0 INS_ADDRESS: 0000000000401000 START_ADDRESS: 00007ffd00000000 LENGTH: 4 MODE: R DATA: 78563412
//! [T] EXEC_ID: 0 THREAD_ID: 0000000100000001 TYPE: THREAD_CREATE
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::diagnostics::Diagnostics;
use crate::disasm::{Arch, RunDecoder};
use crate::protocol::{ThreadEvent, TraceMessage, TraceReader};
use crate::trace::ARCH_KEY;

#[derive(Debug, Default)]
pub struct DumpSummary {
    pub messages: u64,
    pub diagnostics: Diagnostics,
}

/// Renders messages one at a time, disassembling exec runs on the way.
#[derive(Default)]
pub struct TextDumper {
    decoder: RunDecoder,
    summary: DumpSummary,
}

impl TextDumper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_message<W: Write>(&mut self, msg: &TraceMessage, out: &mut W) -> io::Result<()> {
        self.summary.messages += 1;
        match msg {
            TraceMessage::Info(info) => {
                if info.key == ARCH_KEY {
                    self.decoder.set_arch(Arch::parse(&info.value));
                }
                writeln!(out, "[!] {}: {}", info.key, info.value)
            }
            TraceMessage::Lib(lib) => writeln!(
                out,
                "[L] Loaded {} from {:#018x} to {:#018x}",
                lib.name, lib.base, lib.end
            ),
            TraceMessage::Exec(exec) => {
                let arch = self.decoder.arch().clone();
                let first = exec.addresses.first().copied().unwrap_or(0);
                let last = exec.addresses.last().copied().unwrap_or(0);
                writeln!(
                    out,
                    "[B] EXEC_ID: {} THREAD_ID: {:016x} START_ADDRESS: {:016x} END_ADDRESS: {:016x}",
                    exec.exec_id,
                    exec.thread_id,
                    arch.normalize_address(first),
                    arch.normalize_address(last)
                )?;
                for ins in self.decoder.decode(exec, &mut self.summary.diagnostics) {
                    writeln!(out, "[I] {:016x}: {}", ins.address, ins.text)?;
                }
                Ok(())
            }
            TraceMessage::Memory(access) => writeln!(
                out,
                "[M] EXEC_ID: {} INS_ADDRESS: {:016x} START_ADDRESS: {:016x} LENGTH: {} MODE: {} DATA: {}",
                access.exec_id,
                access.ins_address,
                access.start_address,
                access.data.len(),
                access.mode.as_str(),
                hex::encode(&access.data)
            ),
            TraceMessage::Thread(thread) => writeln!(
                out,
                "[T] EXEC_ID: {} THREAD_ID: {:016x} TYPE: {}",
                thread.exec_id,
                thread.thread_id,
                match thread.event {
                    ThreadEvent::Create => "THREAD_CREATE",
                    ThreadEvent::Exit => "THREAD_EXIT",
                }
            ),
        }
    }

    pub fn finish(self) -> DumpSummary {
        self.summary
    }
}

/// Dump every message of `reader` into `out`.
pub fn dump_trace<R: Read, W: Write>(
    reader: &mut TraceReader<R>,
    out: &mut W,
) -> Result<DumpSummary> {
    let mut dumper = TextDumper::new();
    while let Some(msg) = reader.next_message()? {
        dumper
            .write_message(&msg, out)
            .context("Failed to write dump")?;
    }
    out.flush().context("Failed to flush dump")?;
    let summary = dumper.finish();
    info!("Dumped {} messages", summary.messages);
    Ok(summary)
}

/// Dump the trace file at `path`.
pub fn dump_file<W: Write>(path: &Path, max_frame_len: u64, out: &mut W) -> Result<DumpSummary> {
    let file =
        File::open(path).with_context(|| format!("Failed to open trace {}", path.display()))?;
    let mut reader = TraceReader::with_max_frame_len(BufReader::new(file), max_frame_len);
    dump_trace(&mut reader, out).with_context(|| format!("Failed to dump {}", path.display()))
}
