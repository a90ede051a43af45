//! Trace message definitions and their binary encoding.
//!
//! Every frame is a 1-byte type tag, an 8-byte little-endian length and a
//! payload. The length counts the whole frame including the 9 header bytes,
//! so the fixed-size part of each message is easy to check against it.

use std::io::Write;

use super::{FramingError, ProtocolError};

/// Size of the tag + length header that starts every frame.
pub const FRAME_HEADER_SIZE: u64 = 9;
/// Header plus base, end for a library message.
pub const LIB_FIXED_SIZE: u64 = 25;
/// Header plus exec id, thread id, instruction count and code length.
pub const EXEC_FIXED_SIZE: u64 = 41;
/// Header plus exec id, instruction address, mode, start address and length.
pub const MEMORY_FIXED_SIZE: u64 = 42;
/// Thread messages have no variable part.
pub const THREAD_FRAME_SIZE: u64 = 26;

/// Leading type byte of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Info = 0,
    Lib = 1,
    Exec = 2,
    Memory = 3,
    Thread = 4,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MessageType::Info),
            1 => Some(MessageType::Lib),
            2 => Some(MessageType::Exec),
            3 => Some(MessageType::Memory),
            4 => Some(MessageType::Thread),
            _ => None,
        }
    }
}

/// Direction of a memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AccessMode {
    Read = 0,
    Write = 1,
}

impl AccessMode {
    pub fn from_byte(byte: u8) -> Result<Self, FramingError> {
        match byte {
            0 => Ok(AccessMode::Read),
            1 => Ok(AccessMode::Write),
            other => Err(FramingError::InvalidAccessMode(other)),
        }
    }

    /// Single-letter form used by the store (`R` / `W`).
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "R",
            AccessMode::Write => "W",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "R" => Some(AccessMode::Read),
            "W" => Some(AccessMode::Write),
            _ => None,
        }
    }
}

/// Thread lifecycle transition carried by a `Thread` message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ThreadEvent {
    Create = 0,
    Exit = 1,
}

impl ThreadEvent {
    pub fn from_byte(byte: u8) -> Result<Self, FramingError> {
        match byte {
            0 => Ok(ThreadEvent::Create),
            1 => Ok(ThreadEvent::Exit),
            other => Err(FramingError::InvalidThreadEvent(other)),
        }
    }
}

/// Free-form key/value metadata (capture version, architecture, program...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfoMessage {
    pub key: String,
    pub value: String,
}

/// A library mapped into the traced process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibMessage {
    pub base: u64,
    pub end: u64,
    pub name: String,
}

/// One contiguous run of executed instructions.
///
/// `addresses` and `lengths` are parallel arrays; `code` is the concatenation
/// of every instruction's raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecMessage {
    pub exec_id: u64,
    pub thread_id: u64,
    pub addresses: Vec<u64>,
    pub lengths: Vec<u8>,
    pub code: Vec<u8>,
}

impl ExecMessage {
    pub fn instruction_count(&self) -> usize {
        self.addresses.len()
    }
}

/// A single memory access attributed to the instruction at `ins_address`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryMessage {
    pub exec_id: u64,
    pub ins_address: u64,
    pub mode: AccessMode,
    pub start_address: u64,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadMessage {
    pub exec_id: u64,
    pub thread_id: u64,
    pub event: ThreadEvent,
}

/// A decoded trace frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceMessage {
    Info(InfoMessage),
    Lib(LibMessage),
    Exec(ExecMessage),
    Memory(MemoryMessage),
    Thread(ThreadMessage),
}

impl TraceMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            TraceMessage::Info(_) => MessageType::Info,
            TraceMessage::Lib(_) => MessageType::Lib,
            TraceMessage::Exec(_) => MessageType::Exec,
            TraceMessage::Memory(_) => MessageType::Memory,
            TraceMessage::Thread(_) => MessageType::Thread,
        }
    }

    /// Value of the frame's length field, header included.
    pub fn encoded_len(&self) -> u64 {
        match self {
            TraceMessage::Info(m) => {
                FRAME_HEADER_SIZE + m.key.len() as u64 + 1 + m.value.len() as u64 + 1
            }
            TraceMessage::Lib(m) => LIB_FIXED_SIZE + m.name.len() as u64 + 1,
            TraceMessage::Exec(m) => {
                EXEC_FIXED_SIZE + 9 * m.addresses.len() as u64 + m.code.len() as u64
            }
            TraceMessage::Memory(m) => MEMORY_FIXED_SIZE + m.data.len() as u64,
            TraceMessage::Thread(_) => THREAD_FRAME_SIZE,
        }
    }

    /// Serialize the whole frame into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FramingError> {
        let len = self.encoded_len();
        let mut buf = Vec::with_capacity(len as usize);
        buf.push(self.message_type() as u8);
        buf.extend_from_slice(&len.to_le_bytes());

        match self {
            TraceMessage::Info(m) => {
                put_cstr(&mut buf, &m.key)?;
                put_cstr(&mut buf, &m.value)?;
            }
            TraceMessage::Lib(m) => {
                buf.extend_from_slice(&m.base.to_le_bytes());
                buf.extend_from_slice(&m.end.to_le_bytes());
                put_cstr(&mut buf, &m.name)?;
            }
            TraceMessage::Exec(m) => {
                if m.addresses.len() != m.lengths.len() {
                    return Err(FramingError::LengthTableMismatch {
                        addresses: m.addresses.len(),
                        lengths: m.lengths.len(),
                    });
                }
                buf.extend_from_slice(&m.exec_id.to_le_bytes());
                buf.extend_from_slice(&m.thread_id.to_le_bytes());
                buf.extend_from_slice(&(m.addresses.len() as u64).to_le_bytes());
                buf.extend_from_slice(&(m.code.len() as u64).to_le_bytes());
                for address in &m.addresses {
                    buf.extend_from_slice(&address.to_le_bytes());
                }
                buf.extend_from_slice(&m.lengths);
                buf.extend_from_slice(&m.code);
            }
            TraceMessage::Memory(m) => {
                buf.extend_from_slice(&m.exec_id.to_le_bytes());
                buf.extend_from_slice(&m.ins_address.to_le_bytes());
                buf.push(m.mode as u8);
                buf.extend_from_slice(&m.start_address.to_le_bytes());
                buf.extend_from_slice(&(m.data.len() as u64).to_le_bytes());
                buf.extend_from_slice(&m.data);
            }
            TraceMessage::Thread(m) => {
                buf.extend_from_slice(&m.exec_id.to_le_bytes());
                buf.extend_from_slice(&m.thread_id.to_le_bytes());
                buf.push(m.event as u8);
            }
        }

        if buf.len() as u64 != len {
            return Err(FramingError::LengthMismatch {
                kind: self.message_type(),
                declared: len,
                actual: buf.len() as u64,
            });
        }
        Ok(buf)
    }

    /// Write one frame with a single `write_all` call.
    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(())
    }
}

fn put_cstr(buf: &mut Vec<u8>, s: &str) -> Result<(), FramingError> {
    if s.as_bytes().contains(&0) {
        return Err(FramingError::InteriorNul);
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}
