//! Shared constants for trace processing.

/// Info key announcing the traced architecture.
pub const ARCH_KEY: &str = "ARCH";

/// Info key announcing the traced program.
pub const PROGRAM_KEY: &str = "PROGRAM";

/// Info key carrying the traced program's arguments.
pub const ARGS_KEY: &str = "ARGS";

/// Info key written by this crate's capture side.
pub const CAPTURE_VERSION_KEY: &str = "MEMTRACE_VERSION";

/// A store is a valid trace only if some info key ends with this suffix.
pub const VERSION_KEY_SUFFIX: &str = "_VERSION";

/// Number of block/instruction/access rows buffered before a bulk insert.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Initial capacity of the memory access buffers (doubled on overflow).
pub const DEFAULT_ACCESS_BUFFER_CAPACITY: usize = 128;
