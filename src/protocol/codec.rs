//! Streaming reader and writer for trace frames.
//!
//! The reader never tries to resynchronize: once a frame fails to decode the
//! position of every following frame is unknown, so the error is returned and
//! the reader stops yielding messages.

use std::io::{self, Read, Write};

use super::message::{
    ExecMessage, InfoMessage, LibMessage, MemoryMessage, MessageType, ThreadMessage,
    TraceMessage, EXEC_FIXED_SIZE, FRAME_HEADER_SIZE, MEMORY_FIXED_SIZE,
    THREAD_FRAME_SIZE,
};
use super::{AccessMode, FramingError, ProtocolError, ThreadEvent};

/// Frames above this size are rejected before any allocation happens.
pub const DEFAULT_MAX_FRAME_LEN: u64 = 1 << 30;

/// Decodes trace frames from any byte source.
pub struct TraceReader<R> {
    reader: R,
    max_frame_len: u64,
    frames_read: u64,
    bytes_read: u64,
    failed: bool,
}

impl<R: Read> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_len(reader, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(reader: R, max_frame_len: u64) -> Self {
        Self {
            reader,
            max_frame_len,
            frames_read: 0,
            bytes_read: 0,
            failed: false,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
    pub fn next_message(&mut self) -> Result<Option<TraceMessage>, ProtocolError> {
        if self.failed {
            return Ok(None);
        }
        match self.read_frame() {
            Ok(msg) => Ok(msg),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn read_frame(&mut self) -> Result<Option<TraceMessage>, ProtocolError> {
        let mut tag = [0u8; 1];
        loop {
            match self.reader.read(&mut tag) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let kind = MessageType::from_tag(tag[0])
            .ok_or(ProtocolError::UnrecognizedMessageType(tag[0]))?;

        let mut len_bytes = [0u8; 8];
        read_exact_or_truncated(&mut self.reader, &mut len_bytes, kind)?;
        let length = u64::from_le_bytes(len_bytes);

        if length < FRAME_HEADER_SIZE {
            return Err(FramingError::ShortFrame(length).into());
        }
        if length > self.max_frame_len {
            return Err(FramingError::Oversized {
                length,
                limit: self.max_frame_len,
            }
            .into());
        }

        let mut payload = vec![0u8; (length - FRAME_HEADER_SIZE) as usize];
        read_exact_or_truncated(&mut self.reader, &mut payload, kind)?;

        let msg = decode_payload(kind, length, &payload)?;
        self.frames_read += 1;
        self.bytes_read += length;
        Ok(Some(msg))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<TraceMessage, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().transpose()
    }
}

fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    kind: MessageType,
) -> Result<(), ProtocolError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Framing(FramingError::Truncated(kind))
        } else {
            ProtocolError::Io(e)
        }
    })
}

/// Bounds-checked little-endian reads over one frame's payload.
struct Payload<'a> {
    kind: MessageType,
    declared: u64,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Payload<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FramingError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(FramingError::PayloadOverrun {
                kind: self.kind,
                declared: self.declared,
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FramingError> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, FramingError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    fn cstr(&mut self) -> Result<String, FramingError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(FramingError::UnterminatedString(self.kind))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| FramingError::InvalidUtf8(self.kind))?
            .to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    /// Every byte of the payload must have been consumed.
    fn finish(&self) -> Result<(), FramingError> {
        if self.pos != self.buf.len() {
            return Err(FramingError::LengthMismatch {
                kind: self.kind,
                declared: self.declared,
                actual: FRAME_HEADER_SIZE + self.pos as u64,
            });
        }
        Ok(())
    }
}

fn check_length(kind: MessageType, declared: u64, expected: Option<u64>) -> Result<(), FramingError> {
    match expected {
        Some(expected) if expected == declared => Ok(()),
        Some(expected) => Err(FramingError::LengthMismatch {
            kind,
            declared,
            actual: expected,
        }),
        None => Err(FramingError::LengthMismatch {
            kind,
            declared,
            actual: u64::MAX,
        }),
    }
}

fn decode_payload(kind: MessageType, length: u64, buf: &[u8]) -> Result<TraceMessage, FramingError> {
    let mut p = Payload {
        kind,
        declared: length,
        buf,
        pos: 0,
    };

    let msg = match kind {
        MessageType::Info => {
            let key = p.cstr()?;
            let value = p.cstr()?;
            TraceMessage::Info(InfoMessage { key, value })
        }
        MessageType::Lib => {
            let base = p.u64()?;
            let end = p.u64()?;
            let name = p.cstr()?;
            TraceMessage::Lib(LibMessage { base, end, name })
        }
        MessageType::Exec => {
            let exec_id = p.u64()?;
            let thread_id = p.u64()?;
            let count = p.u64()?;
            let code_len = p.u64()?;
            let expected = count
                .checked_mul(9)
                .and_then(|n| n.checked_add(EXEC_FIXED_SIZE))
                .and_then(|n| n.checked_add(code_len));
            check_length(kind, length, expected)?;

            let count = count as usize;
            let addresses = (0..count).map(|_| p.u64()).collect::<Result<Vec<_>, _>>()?;
            let lengths = p.take(count)?.to_vec();
            let code = p.take(code_len as usize)?.to_vec();
            TraceMessage::Exec(ExecMessage {
                exec_id,
                thread_id,
                addresses,
                lengths,
                code,
            })
        }
        MessageType::Memory => {
            let exec_id = p.u64()?;
            let ins_address = p.u64()?;
            let mode = AccessMode::from_byte(p.u8()?)?;
            let start_address = p.u64()?;
            let data_len = p.u64()?;
            check_length(kind, length, data_len.checked_add(MEMORY_FIXED_SIZE))?;
            let data = p.take(data_len as usize)?.to_vec();
            TraceMessage::Memory(MemoryMessage {
                exec_id,
                ins_address,
                mode,
                start_address,
                data,
            })
        }
        MessageType::Thread => {
            check_length(kind, length, Some(THREAD_FRAME_SIZE))?;
            let exec_id = p.u64()?;
            let thread_id = p.u64()?;
            let event = ThreadEvent::from_byte(p.u8()?)?;
            TraceMessage::Thread(ThreadMessage {
                exec_id,
                thread_id,
                event,
            })
        }
    };

    p.finish()?;
    Ok(msg)
}

/// Encodes trace frames onto any byte sink.
pub struct TraceWriter<W> {
    writer: W,
    frames_written: u64,
    bytes_written: u64,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames_written: 0,
            bytes_written: 0,
        }
    }

    pub fn write_message(&mut self, msg: &TraceMessage) -> Result<(), ProtocolError> {
        msg.encode(&mut self.writer)?;
        self.frames_written += 1;
        self.bytes_written += msg.encoded_len();
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
