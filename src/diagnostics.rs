//! Non-fatal conditions raised while capturing or ingesting a trace.
//!
//! None of these stop processing. They are collected so a caller can decide
//! whether a trace is trustworthy, and each one is logged as it happens.

use std::fmt;

/// A recoverable problem found while processing a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The disassembler produced a different number of instructions than the
    /// exec message declared.
    DisassemblyMismatch {
        exec_id: u64,
        expected: usize,
        decoded: usize,
    },
    /// Memory accesses that did not match any instruction of the run they
    /// were buffered for.
    CorrelationLeak { exec_id: u64, leaked: usize },
    /// An access buffer reached its capacity and was doubled.
    BufferGrown { capacity: usize },
    /// No disassembler is available for the trace architecture.
    UnknownArchitecture { arch: String },
}

impl Diagnostic {
    /// Diagnostics that make the resulting trace suspect.
    pub fn marks_suspect(&self) -> bool {
        matches!(self, Diagnostic::DisassemblyMismatch { .. })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DisassemblyMismatch {
                exec_id,
                expected,
                decoded,
            } => write!(
                f,
                "disassembly mismatch at exec {exec_id}: expected {expected} instructions, decoded {decoded}"
            ),
            Diagnostic::CorrelationLeak { exec_id, leaked } => {
                write!(f, "{leaked} memory accesses leaked at exec {exec_id}")
            }
            Diagnostic::BufferGrown { capacity } => {
                write!(f, "memory access buffer grown to {capacity} entries")
            }
            Diagnostic::UnknownArchitecture { arch } => {
                write!(f, "no disassembler for architecture '{arch}'")
            }
        }
    }
}

/// Accumulated diagnostics for one capture or ingestion run.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic and log it.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::BufferGrown { .. } => tracing::debug!("{diagnostic}"),
            _ => tracing::warn!("{diagnostic}"),
        }
        self.entries.push(diagnostic);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// True once any diagnostic that taints the trace has been recorded.
    #[must_use]
    pub fn is_suspect(&self) -> bool {
        self.entries.iter().any(Diagnostic::marks_suspect)
    }

    /// Total number of memory accesses lost to correlation leaks.
    pub fn leaked_accesses(&self) -> usize {
        self.entries
            .iter()
            .map(|d| match d {
                Diagnostic::CorrelationLeak { leaked, .. } => *leaked,
                _ => 0,
            })
            .sum()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}
