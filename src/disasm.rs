//! Disassembly seam used by ingestion.
//!
//! Ingestion only needs `(base address, bytes) -> instructions`. The x86
//! family is decoded with iced-x86; other architectures fall back to the
//! length table carried by each exec message.

use std::fmt;

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::protocol::ExecMessage;

/// Architecture announced by the `ARCH` info message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Arm64,
    Ppc64,
    Mips32,
    Unknown(String),
}

impl Arch {
    pub fn parse(s: &str) -> Self {
        match s {
            "X86" => Arch::X86,
            "AMD64" => Arch::X86_64,
            "ARM" => Arch::Arm,
            "ARM64" => Arch::Arm64,
            "PPC64" => Arch::Ppc64,
            "MIPS32" => Arch::Mips32,
            other => Arch::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Arch::X86 => "X86",
            Arch::X86_64 => "AMD64",
            Arch::Arm => "ARM",
            Arch::Arm64 => "ARM64",
            Arch::Ppc64 => "PPC64",
            Arch::Mips32 => "MIPS32",
            Arch::Unknown(s) => s,
        }
    }

    /// Architectures that encode the instruction set in the low PC bit.
    pub fn has_mode_bit(&self) -> bool {
        matches!(self, Arch::Arm)
    }

    /// Strip the mode bit so addresses can be stored and compared.
    pub fn normalize_address(&self, address: u64) -> u64 {
        if self.has_mode_bit() {
            address & !1
        } else {
            address
        }
    }

    /// Execution mode of the run starting at `address` (before normalization).
    pub fn mode_for(&self, address: u64) -> ExecMode {
        if self.has_mode_bit() && address & 1 == 1 {
            ExecMode::Thumb
        } else {
            ExecMode::Native
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    #[default]
    Native,
    Thumb,
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub address: u64,
    pub length: usize,
    pub text: String,
    pub bytes: Vec<u8>,
}

pub trait Disassembler {
    fn supports(&self, arch: &Arch) -> bool;

    /// Decode `code` as consecutive instructions starting at `base`.
    ///
    /// Decoding stops at the first invalid instruction, so a short result is
    /// how callers detect a failure.
    fn disassemble(
        &mut self,
        arch: &Arch,
        mode: ExecMode,
        base: u64,
        code: &[u8],
    ) -> Vec<DecodedInstruction>;
}

/// x86 / x86-64 disassembler producing Intel syntax.
pub struct IcedDisassembler {
    formatter: IntelFormatter,
}

impl IcedDisassembler {
    pub fn new() -> Self {
        Self {
            formatter: IntelFormatter::new(),
        }
    }
}

impl Default for IcedDisassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Disassembler for IcedDisassembler {
    fn supports(&self, arch: &Arch) -> bool {
        matches!(arch, Arch::X86 | Arch::X86_64)
    }

    fn disassemble(
        &mut self,
        arch: &Arch,
        _mode: ExecMode,
        base: u64,
        code: &[u8],
    ) -> Vec<DecodedInstruction> {
        let bitness = match arch {
            Arch::X86 => 32,
            Arch::X86_64 => 64,
            _ => return Vec::new(),
        };

        let mut decoder = Decoder::with_ip(bitness, code, base, DecoderOptions::NONE);
        let mut instr = Instruction::default();
        let mut out = Vec::new();
        while decoder.can_decode() {
            decoder.decode_out(&mut instr);
            if instr.is_invalid() {
                break;
            }
            let start = (instr.ip() - base) as usize;
            let mut text = String::new();
            self.formatter.format(&instr, &mut text);
            out.push(DecodedInstruction {
                address: instr.ip(),
                length: instr.len(),
                text,
                bytes: code[start..start + instr.len()].to_vec(),
            });
        }
        out
    }
}

/// Split a run using its recorded instruction lengths, without decoding.
pub fn split_by_lengths(addresses: &[u64], lengths: &[u8], code: &[u8]) -> Vec<DecodedInstruction> {
    let mut out = Vec::with_capacity(addresses.len());
    let mut offset = 0usize;
    for (address, len) in addresses.iter().zip(lengths) {
        let len = *len as usize;
        let Some(bytes) = code.get(offset..offset + len) else {
            break;
        };
        out.push(DecodedInstruction {
            address: *address,
            length: len,
            text: String::new(),
            bytes: bytes.to_vec(),
        });
        offset += len;
    }
    out
}

/// Decodes exec messages for the architecture announced by the trace.
pub struct RunDecoder {
    arch: Arch,
    backend: Box<dyn Disassembler>,
    reported_unknown: bool,
}

impl RunDecoder {
    pub fn new(backend: Box<dyn Disassembler>) -> Self {
        Self {
            arch: Arch::Unknown(String::new()),
            backend,
            reported_unknown: false,
        }
    }

    pub fn set_arch(&mut self, arch: Arch) {
        self.arch = arch;
        self.reported_unknown = false;
    }

    pub fn arch(&self) -> &Arch {
        &self.arch
    }

    /// Normalize and decode one run.
    ///
    /// A count different from the message's instruction count is recorded as
    /// a [`Diagnostic::DisassemblyMismatch`]; the decoded instructions are
    /// still returned.
    pub fn decode(
        &mut self,
        exec: &ExecMessage,
        diagnostics: &mut Diagnostics,
    ) -> Vec<DecodedInstruction> {
        let Some(first) = exec.addresses.first() else {
            return Vec::new();
        };
        let mode = self.arch.mode_for(*first);
        let addresses: Vec<u64> = exec
            .addresses
            .iter()
            .map(|a| self.arch.normalize_address(*a))
            .collect();

        let decoded = if self.backend.supports(&self.arch) {
            self.backend
                .disassemble(&self.arch, mode, addresses[0], &exec.code)
        } else {
            if !self.reported_unknown {
                diagnostics.push(Diagnostic::UnknownArchitecture {
                    arch: self.arch.to_string(),
                });
                self.reported_unknown = true;
            }
            split_by_lengths(&addresses, &exec.lengths, &exec.code)
        };

        if decoded.len() != exec.instruction_count() {
            diagnostics.push(Diagnostic::DisassemblyMismatch {
                exec_id: exec.exec_id,
                expected: exec.instruction_count(),
                decoded: decoded.len(),
            });
        }
        decoded
    }
}

impl Default for RunDecoder {
    fn default() -> Self {
        Self::new(Box::new(IcedDisassembler::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_parse() {
        assert_eq!(Arch::parse("AMD64"), Arch::X86_64);
        assert_eq!(Arch::parse("ARM"), Arch::Arm);
        assert_eq!(Arch::parse("RISCV"), Arch::Unknown("RISCV".into()));
        assert_eq!(Arch::X86_64.to_string(), "AMD64");
    }

    #[test]
    fn test_thumb_mode_bit() {
        assert_eq!(Arch::Arm.mode_for(0x8001), ExecMode::Thumb);
        assert_eq!(Arch::Arm.mode_for(0x8000), ExecMode::Native);
        assert_eq!(Arch::Arm.normalize_address(0x8001), 0x8000);
        // only Arm carries the bit
        assert_eq!(Arch::X86_64.normalize_address(0x8001), 0x8001);
        assert_eq!(Arch::X86_64.mode_for(0x8001), ExecMode::Native);
    }

    #[test]
    fn test_iced_x86_64() {
        // push rbp; mov rbp, rsp; ret
        let code = [0x55, 0x48, 0x89, 0xe5, 0xc3];
        let mut dis = IcedDisassembler::new();
        let insns = dis.disassemble(&Arch::X86_64, ExecMode::Native, 0x401000, &code);
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[0].address, 0x401000);
        assert_eq!(insns[0].text, "push rbp");
        assert_eq!(insns[1].address, 0x401001);
        assert_eq!(insns[1].length, 3);
        assert_eq!(insns[1].bytes, vec![0x48, 0x89, 0xe5]);
        assert_eq!(insns[2].text, "ret");
    }

    #[test]
    fn test_iced_stops_on_truncated_instruction() {
        // mov eax, imm32 with the immediate cut short
        let code = [0x90, 0xb8, 0x01];
        let mut dis = IcedDisassembler::new();
        let insns = dis.disassemble(&Arch::X86, ExecMode::Native, 0x1000, &code);
        assert_eq!(insns.len(), 1);
    }

    fn exec(addresses: Vec<u64>, lengths: Vec<u8>, code: Vec<u8>) -> ExecMessage {
        ExecMessage {
            exec_id: 7,
            thread_id: 0,
            addresses,
            lengths,
            code,
        }
    }

    #[test]
    fn test_run_decoder_mismatch() {
        let mut decoder = RunDecoder::default();
        decoder.set_arch(Arch::X86_64);
        let mut diags = Diagnostics::new();
        // declares three instructions but the bytes hold two
        let run = exec(vec![0x1000, 0x1001, 0x1002], vec![1, 1, 1], vec![0x90, 0xc3]);
        let insns = decoder.decode(&run, &mut diags);
        assert_eq!(insns.len(), 2);
        assert!(diags.is_suspect());
    }

    #[test]
    fn test_run_decoder_unknown_arch_uses_lengths() {
        let mut decoder = RunDecoder::default();
        decoder.set_arch(Arch::Arm);
        let mut diags = Diagnostics::new();
        let run = exec(vec![0x8001, 0x8003], vec![2, 2], vec![0x00, 0xbf, 0x00, 0xbf]);
        let insns = decoder.decode(&run, &mut diags);
        let again = decoder.decode(&run, &mut diags);
        assert_eq!(insns, again);
        assert_eq!(insns[0].address, 0x8000);
        assert_eq!(insns[1].address, 0x8002);
        // reported once, and not a mismatch
        assert_eq!(diags.len(), 1);
        assert!(!diags.is_suspect());
    }

    #[test]
    fn test_split_by_lengths() {
        let insns = split_by_lengths(&[0x10, 0x14], &[4, 2], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[1].bytes, vec![5, 6]);
        assert!(insns[1].text.is_empty());
    }
}
