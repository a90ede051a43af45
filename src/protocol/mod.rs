//! Binary trace wire protocol shared by the capture side and ingestion.
//!
//! - [`message`]: the [`TraceMessage`] sum type and its encoding
//! - [`codec`]: [`TraceReader`] / [`TraceWriter`] over `Read` / `Write`

pub mod codec;
pub mod message;

use std::io;

use thiserror::Error;

pub use codec::{TraceReader, TraceWriter, DEFAULT_MAX_FRAME_LEN};
pub use message::{
    AccessMode, ExecMessage, InfoMessage, LibMessage, MemoryMessage, MessageType, ThreadEvent,
    ThreadMessage, TraceMessage,
};

/// A frame whose declared size does not match its content.
///
/// Framing errors are always fatal: the reader cannot know where the next
/// frame starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("{kind:?} message declares length {declared} but encodes {actual} bytes")]
    LengthMismatch {
        kind: MessageType,
        declared: u64,
        actual: u64,
    },
    #[error("{kind:?} payload is shorter than its fields (declared length {declared})")]
    PayloadOverrun { kind: MessageType, declared: u64 },
    #[error("frame length {0} is shorter than the frame header")]
    ShortFrame(u64),
    #[error("frame length {length} exceeds the limit of {limit} bytes")]
    Oversized { length: u64, limit: u64 },
    #[error("stream ended inside a {0:?} frame")]
    Truncated(MessageType),
    #[error("invalid memory access mode {0}")]
    InvalidAccessMode(u8),
    #[error("invalid thread event {0}")]
    InvalidThreadEvent(u8),
    #[error("unterminated string in {0:?} message")]
    UnterminatedString(MessageType),
    #[error("string in {0:?} message is not valid UTF-8")]
    InvalidUtf8(MessageType),
    #[error("exec message has {addresses} addresses but {lengths} lengths")]
    LengthTableMismatch { addresses: usize, lengths: usize },
    #[error("string contains an interior NUL byte")]
    InteriorNul,
    #[error("instruction of {0} bytes does not fit the exec length table")]
    InstructionTooLong(usize),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("unrecognized message type {0}")]
    UnrecognizedMessageType(u8),
    #[error("trace I/O error: {0}")]
    Io(#[from] io::Error),
}
