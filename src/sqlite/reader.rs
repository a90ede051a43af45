//! Read-only access to an ingested store.
//!
//! [`TraceStore`] validates that a database really is a memtrace store, then
//! serves metadata, statistics, textual event descriptions, memory dumps and
//! the keyset cursors the timeline pages through.

use std::fmt;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;

use super::StoreError;
use crate::protocol::AccessMode;
use crate::record::TraceSource;
use crate::trace::{
    format_address, parse_address, InfoRecord, InstructionRecord, LibRecord, MemoryAccessRecord,
    ThreadRecord, ARCH_KEY, VERSION_KEY_SUFFIX,
};
use crate::view::{Event, EventKind, POINTER_MAX_SIZE};

const EVENT_NOT_FOUND: &str = "Event not found in database.\n\n";

/// Row counts of a store.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TraceStats {
    pub arch: Option<String>,
    pub libraries: u64,
    pub basic_blocks: u64,
    pub instructions: u64,
    pub reads: u64,
    pub writes: u64,
    pub threads: u64,
}

impl fmt::Display for TraceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "arch:         {}",
            self.arch.as_deref().unwrap_or("unknown")
        )?;
        writeln!(f, "libraries:    {}", self.libraries)?;
        writeln!(f, "basic blocks: {}", self.basic_blocks)?;
        writeln!(f, "instructions: {}", self.instructions)?;
        writeln!(f, "reads:        {}", self.reads)?;
        writeln!(f, "writes:       {}", self.writes)?;
        write!(f, "threads:      {}", self.threads)
    }
}

/// A validated connection to a memtrace store.
pub struct TraceStore {
    conn: Connection,
}

impl TraceStore {
    /// Open `path` read-only.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::Connection(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Connection(format!("cannot open {}: {e}", path.display())))?;
        Self::from_connection(conn)
    }

    /// Wrap an already open connection, e.g. one returned by
    /// [`SqliteWriter::close`](super::SqliteWriter::close).
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let keys: Vec<String> = conn
            .prepare("SELECT key FROM info")
            .and_then(|mut stmt| {
                let keys = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>();
                keys
            })
            .map_err(|e| StoreError::Connection(format!("no info table: {e}")))?;

        if !keys.iter().any(|key| key.ends_with(VERSION_KEY_SUFFIX)) {
            return Err(StoreError::Connection(
                "info table has no version key".to_string(),
            ));
        }
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Every info pair in insertion order.
    pub fn metadata(&self) -> Result<Vec<InfoRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM info ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(InfoRecord {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn info(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM info WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn libraries(&self) -> Result<Vec<LibRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT rowid, name, base, end FROM lib ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut libs = Vec::new();
        for row in rows {
            let (rowid, name, base, end) = row?;
            libs.push(LibRecord {
                name,
                base: address_of("lib", rowid as u64, &base)?,
                end: address_of("lib", rowid as u64, &end)?,
            });
        }
        Ok(libs)
    }

    pub fn threads(&self) -> Result<Vec<ThreadRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT thread_id, start_bbl_id, exit_bbl_id FROM thread ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(ThreadRecord {
                thread_id: row.get::<_, i64>(0)? as u64,
                start_bbl_id: row.get::<_, i64>(1)? as u64,
                exit_bbl_id: row.get::<_, Option<i64>>(2)?.map(|id| id as u64),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn stats(&self) -> Result<TraceStats, StoreError> {
        let count = |sql: &str| -> Result<u64, StoreError> {
            Ok(self.conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };
        Ok(TraceStats {
            arch: self.info(ARCH_KEY)?,
            libraries: count("SELECT COUNT(*) FROM lib")?,
            basic_blocks: count("SELECT COUNT(*) FROM bbl")?,
            instructions: count("SELECT COUNT(*) FROM ins")?,
            reads: count("SELECT COUNT(*) FROM mem WHERE kind = 'R'")?,
            writes: count("SELECT COUNT(*) FROM mem WHERE kind = 'W'")?,
            threads: count("SELECT COUNT(*) FROM thread")?,
        })
    }

    pub fn instruction(&self, id: u64) -> Result<Option<InstructionRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, bbl_id, ip, disassembly, opcode_hex FROM ins WHERE id = ?1",
                [id as i64],
                raw_instruction,
            )
            .optional()?;
        row.map(RawInstruction::into_record).transpose()
    }

    pub fn memory_access(&self, id: u64) -> Result<Option<MemoryAccessRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, ins_id, ip, kind, addr, data_hex FROM mem WHERE id = ?1",
                [id as i64],
                raw_access,
            )
            .optional()?;
        row.map(RawAccess::into_record).transpose()
    }

    /// `column: value` lines for one instruction row, then a blank line.
    pub fn describe_instruction(&self, id: u64) -> Result<String, StoreError> {
        let mut out = String::new();
        if !self.describe_row("SELECT * FROM ins WHERE id = ?1", id, &[], &mut out)? {
            return Ok(EVENT_NOT_FOUND.to_string());
        }
        Ok(out)
    }

    /// Text shown for a selected event.
    ///
    /// Accesses show the instruction that issued the first origin followed by
    /// each access row.
    pub fn describe_event(&self, event: &Event) -> Result<String, StoreError> {
        match event.kind {
            EventKind::Instruction => match event.origin() {
                Some(id) => self.describe_instruction(id),
                None => Ok(EVENT_NOT_FOUND.to_string()),
            },
            EventKind::Read | EventKind::Write | EventKind::ReadWrite => {
                let Some(first) = event.origin() else {
                    return Ok(EVENT_NOT_FOUND.to_string());
                };
                let ins_id: Option<i64> = self
                    .conn
                    .query_row("SELECT ins_id FROM mem WHERE id = ?1", [first as i64], |row| {
                        row.get(0)
                    })
                    .optional()?;
                let Some(ins_id) = ins_id else {
                    return Ok(EVENT_NOT_FOUND.to_string());
                };
                let mut out = self.describe_instruction(ins_id as u64)?;
                for id in &event.ids {
                    if !self.describe_row(
                        "SELECT * FROM mem WHERE id = ?1",
                        *id,
                        &["ins_id"],
                        &mut out,
                    )? {
                        out.push_str(EVENT_NOT_FOUND);
                    }
                }
                Ok(out)
            }
            EventKind::Pointer => self.memory_dump(event.address, event.size, event.time),
            EventKind::Unknown => Ok("Unknown event type.\n".to_string()),
        }
    }

    /// Reconstruct `size` bytes at `address` as they were after the
    /// instruction executed at `time`.
    ///
    /// The most recent access wins for each byte; bytes never accessed up to
    /// that point print as `??`. `size` is capped at [`POINTER_MAX_SIZE`].
    pub fn memory_dump(&self, address: u64, size: u64, time: u64) -> Result<String, StoreError> {
        let size = size.min(POINTER_MAX_SIZE);
        let ins_id = self.instruction_at_time(time)?;
        let last = address.saturating_add(size.saturating_sub(1));

        let mut bytes: Vec<Option<u8>> = vec![None; size as usize];
        let mut missing = bytes.len();

        if size > 0 {
            let mut stmt = self.conn.prepare(
                "SELECT id, addr, data_hex FROM mem
                 WHERE ins_id <= ?1 AND addr <= ?2 AND addr_end >= ?3
                 ORDER BY ins_id DESC, kind DESC",
            )?;
            let mut rows = stmt.query(params![
                ins_id as i64,
                format_address(last),
                format_address(address)
            ])?;
            while let Some(row) = rows.next()? {
                if missing == 0 {
                    break;
                }
                let id = row.get::<_, i64>(0)? as u64;
                let start = address_of("mem", id, &row.get::<_, String>(1)?)?;
                let data = hex::decode(row.get::<_, String>(2)?).map_err(|e| {
                    StoreError::Corrupt {
                        table: "mem",
                        id,
                        reason: e.to_string(),
                    }
                })?;
                for (offset, byte) in data.iter().enumerate() {
                    let Some(at) = start.checked_add(offset as u64) else {
                        break;
                    };
                    if at < address || at > last {
                        continue;
                    }
                    let slot = &mut bytes[(at - address) as usize];
                    if slot.is_none() {
                        *slot = Some(*byte);
                        missing -= 1;
                    }
                }
            }
        }

        let data: String = bytes
            .iter()
            .map(|b| match b {
                Some(b) => format!("{b:02x}"),
                None => "??".to_string(),
            })
            .collect();
        Ok(format!(
            "address : {address:#018x}\nsize : {size}\ndata : {data}\n"
        ))
    }

    /// Id of the instruction executed at timeline position `time`, or the
    /// last one if the trace is shorter.
    fn instruction_at_time(&self, time: u64) -> Result<u64, StoreError> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM ins ORDER BY id LIMIT 1 OFFSET ?1",
                [time.min(i64::MAX as u64) as i64],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Ok(id as u64),
            None => {
                let max: Option<i64> =
                    self.conn
                        .query_row("SELECT MAX(id) FROM ins", [], |row| row.get(0))?;
                Ok(max.unwrap_or(0) as u64)
            }
        }
    }

    fn describe_row(
        &self,
        sql: &str,
        id: u64,
        skip: &[&str],
        out: &mut String,
    ) -> Result<bool, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query([id as i64])?;
        let Some(row) = rows.next()? else {
            return Ok(false);
        };
        for (i, name) in names.iter().enumerate() {
            if skip.contains(&name.as_str()) {
                continue;
            }
            let value: Value = row.get(i)?;
            out.push_str(&format!("{name}: {}\n", value_to_string(value)));
        }
        out.push('\n');
        Ok(true)
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => hex::encode(b),
    }
}

fn address_of(table: &'static str, id: u64, text: &str) -> Result<u64, StoreError> {
    parse_address(text).ok_or_else(|| StoreError::Corrupt {
        table,
        id,
        reason: format!("bad address '{text}'"),
    })
}

struct RawInstruction {
    id: u64,
    bbl_id: u64,
    ip: String,
    disassembly: String,
    opcode_hex: String,
}

fn raw_instruction(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawInstruction> {
    Ok(RawInstruction {
        id: row.get::<_, i64>(0)? as u64,
        bbl_id: row.get::<_, i64>(1)? as u64,
        ip: row.get(2)?,
        disassembly: row.get(3)?,
        opcode_hex: row.get(4)?,
    })
}

impl RawInstruction {
    fn into_record(self) -> Result<InstructionRecord, StoreError> {
        let opcode = hex::decode(&self.opcode_hex).map_err(|e| StoreError::Corrupt {
            table: "ins",
            id: self.id,
            reason: e.to_string(),
        })?;
        Ok(InstructionRecord {
            id: self.id,
            bbl_id: self.bbl_id,
            ip: address_of("ins", self.id, &self.ip)?,
            disassembly: self.disassembly,
            opcode,
        })
    }
}

struct RawAccess {
    id: u64,
    ins_id: u64,
    ip: String,
    kind: String,
    addr: String,
    data_hex: String,
}

fn raw_access(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAccess> {
    Ok(RawAccess {
        id: row.get::<_, i64>(0)? as u64,
        ins_id: row.get::<_, i64>(1)? as u64,
        ip: row.get(2)?,
        kind: row.get(3)?,
        addr: row.get(4)?,
        data_hex: row.get(5)?,
    })
}

impl RawAccess {
    fn into_record(self) -> Result<MemoryAccessRecord, StoreError> {
        let kind = AccessMode::parse(&self.kind).ok_or_else(|| StoreError::Corrupt {
            table: "mem",
            id: self.id,
            reason: format!("bad access kind '{}'", self.kind),
        })?;
        let data = hex::decode(&self.data_hex).map_err(|e| StoreError::Corrupt {
            table: "mem",
            id: self.id,
            reason: e.to_string(),
        })?;
        Ok(MemoryAccessRecord {
            id: self.id,
            ins_id: self.ins_id,
            ip: address_of("mem", self.id, &self.ip)?,
            kind,
            addr: address_of("mem", self.id, &self.addr)?,
            data,
        })
    }
}

impl TraceSource for TraceStore {
    fn instructions_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<InstructionRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, bbl_id, ip, disassembly, opcode_hex FROM ins
             WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![after_id as i64, limit as i64], raw_instruction)?;
        let mut records = Vec::with_capacity(limit);
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    fn accesses_after(
        &self,
        kind: AccessMode,
        after_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryAccessRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, ins_id, ip, kind, addr, data_hex FROM mem
             WHERE kind = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![kind.as_str(), after_id as i64, limit as i64],
            raw_access,
        )?;
        let mut records = Vec::with_capacity(limit);
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordCollector;
    use crate::sqlite::{CommitMode, SqliteWriter};
    use crate::trace::{BasicBlockRecord, CAPTURE_VERSION_KEY};

    /// One block at 0x401000 with two instructions:
    /// ins 1 reads 4 bytes at 0x7000 (mem 2), ins 3 writes 2 bytes at 0x7002 (mem 4).
    fn sample_store() -> TraceStore {
        let mut writer = SqliteWriter::open_in_memory(CommitMode::SingleTransaction, 100).unwrap();
        writer
            .add_info(InfoRecord {
                key: CAPTURE_VERSION_KEY.to_string(),
                value: "0.1.0".to_string(),
            })
            .unwrap();
        writer
            .add_info(InfoRecord {
                key: ARCH_KEY.to_string(),
                value: "AMD64".to_string(),
            })
            .unwrap();
        writer
            .add_lib(LibRecord {
                name: "a.out".to_string(),
                base: 0x400000,
                end: 0x401fff,
            })
            .unwrap();
        writer
            .add_basic_block(BasicBlockRecord {
                id: 1,
                addr: 0x401000,
                addr_end: 0x401004,
                size: 5,
                thread_id: 1,
            })
            .unwrap();
        writer
            .add_instruction(InstructionRecord {
                id: 1,
                bbl_id: 1,
                ip: 0x401000,
                disassembly: "mov eax,[rdi]".to_string(),
                opcode: vec![0x8b, 0x07],
            })
            .unwrap();
        writer
            .add_memory_access(MemoryAccessRecord {
                id: 2,
                ins_id: 1,
                ip: 0x401000,
                kind: AccessMode::Read,
                addr: 0x7000,
                data: vec![0x11, 0x22, 0x33, 0x44],
            })
            .unwrap();
        writer
            .add_instruction(InstructionRecord {
                id: 3,
                bbl_id: 1,
                ip: 0x401002,
                disassembly: "mov [rsi],ax".to_string(),
                opcode: vec![0x66, 0x89, 0x06],
            })
            .unwrap();
        writer
            .add_memory_access(MemoryAccessRecord {
                id: 4,
                ins_id: 3,
                ip: 0x401002,
                kind: AccessMode::Write,
                addr: 0x7002,
                data: vec![0xaa, 0xbb],
            })
            .unwrap();
        writer
            .add_thread(ThreadRecord {
                thread_id: (1 << 32) | 1,
                start_bbl_id: 0,
                exit_bbl_id: None,
            })
            .unwrap();
        TraceStore::from_connection(writer.close().unwrap()).unwrap()
    }

    #[test]
    fn test_rejects_non_trace_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(
            TraceStore::from_connection(conn),
            Err(StoreError::Connection(_))
        ));

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE info (key TEXT, value TEXT); INSERT INTO info VALUES ('ARCH', 'X86');")
            .unwrap();
        let err = TraceStore::from_connection(conn).err().unwrap();
        assert!(err.to_string().starts_with("invalid trace"));
    }

    #[test]
    fn test_open_missing_file() {
        let err = TraceStore::open(Path::new("/nonexistent/trace.db"))
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Connection(_)));
    }

    #[test]
    fn test_metadata_and_stats() {
        let store = sample_store();
        let keys: Vec<String> = store.metadata().unwrap().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["MEMTRACE_VERSION", "ARCH"]);

        let stats = store.stats().unwrap();
        assert_eq!(stats.arch.as_deref(), Some("AMD64"));
        assert_eq!(stats.basic_blocks, 1);
        assert_eq!(stats.instructions, 2);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.threads, 1);

        let libs = store.libraries().unwrap();
        assert_eq!(libs[0].base, 0x400000);
        assert_eq!(store.threads().unwrap()[0].exit_bbl_id, None);
    }

    #[test]
    fn test_record_lookup() {
        let store = sample_store();
        let ins = store.instruction(3).unwrap().unwrap();
        assert_eq!(ins.ip, 0x401002);
        assert_eq!(ins.opcode, vec![0x66, 0x89, 0x06]);
        assert!(store.instruction(2).unwrap().is_none());

        let access = store.memory_access(4).unwrap().unwrap();
        assert_eq!(access.kind, AccessMode::Write);
        assert_eq!(access.data, vec![0xaa, 0xbb]);
    }

    #[test]
    fn test_keyset_pages() {
        let store = sample_store();
        let first = store.instructions_after(0, 1).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, 1);
        let second = store.instructions_after(first[0].id, 1).unwrap();
        assert_eq!(second[0].id, 3);
        assert!(store.instructions_after(3, 10).unwrap().is_empty());

        let writes = store.accesses_after(AccessMode::Write, 0, 10).unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].id, 4);
    }

    #[test]
    fn test_describe_instruction() {
        let store = sample_store();
        let text = store.describe_instruction(1).unwrap();
        assert!(text.starts_with("id: 1\nbbl_id: 1\nip: 0x0000000000401000\n"));
        assert!(text.contains("disassembly: mov eax,[rdi]\n"));
        assert!(text.ends_with("opcode_hex: 8b07\n\n"));
        assert_eq!(
            store.describe_instruction(99).unwrap(),
            "Event not found in database.\n\n"
        );
    }

    #[test]
    fn test_describe_access_event() {
        let store = sample_store();
        let event = Event::new(0, 0x7000, 4, EventKind::Read, 2);
        let text = store.describe_event(&event).unwrap();
        assert!(text.starts_with("id: 1\n"));
        assert!(text.contains("id: 2\n"));
        assert!(text.contains("value_hex: 0x44332211\n"));
        assert!(!text.contains("ins_id"));

        let unknown = Event::new(0, 0, 1, EventKind::Unknown, 1);
        assert_eq!(
            store.describe_event(&unknown).unwrap(),
            "Unknown event type.\n"
        );
    }

    #[test]
    fn test_memory_dump_latest_access_wins() {
        let store = sample_store();

        // after the first instruction only the read is visible
        let dump = store.memory_dump(0x6ffe, 8, 0).unwrap();
        assert_eq!(
            dump,
            "address : 0x0000000000006ffe\nsize : 8\ndata : ????11223344????\n"
        );

        // the write at time 1 overrides bytes 0x7002..0x7004
        let dump = store.memory_dump(0x7000, 4, 1).unwrap();
        assert!(dump.ends_with("data : 1122aabb\n"));

        // times past the end use the last instruction
        assert_eq!(store.memory_dump(0x7000, 4, 50).unwrap(), dump);
    }

    #[test]
    fn test_memory_dump_size_is_capped() {
        let store = sample_store();
        let dump = store.memory_dump(0x7000, u64::MAX / 4, 1).unwrap();
        let expected_data = format!("1122aabb{}", "??".repeat(POINTER_MAX_SIZE as usize - 4));
        assert_eq!(
            dump,
            format!("address : 0x0000000000007000\nsize : {POINTER_MAX_SIZE}\ndata : {expected_data}\n")
        );
    }

    #[test]
    fn test_pointer_event_renders_dump() {
        let store = sample_store();
        let text = store
            .describe_event(&Event::pointer(1, 0x7003, 2))
            .unwrap();
        assert_eq!(text, "address : 0x0000000000007003\nsize : 2\ndata : bb??\n");
    }
}
