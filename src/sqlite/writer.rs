//! SQLite writer implementation for trace records
//!
//! This module implements `SqliteWriter`, which writes ingested records to a
//! SQLite database using the schema defined in `schema.rs`. Block,
//! instruction and access rows are buffered and bulk inserted per batch.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use serde::Deserialize;
use tracing::debug;

use crate::record::RecordCollector;
use crate::trace::{
    format_address, format_value, BasicBlockRecord, InfoRecord, InstructionRecord, LibRecord,
    MemoryAccessRecord, ThreadRecord, DEFAULT_BATCH_SIZE,
};

/// When ingested rows become visible to readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// One transaction for the whole trace, committed by `finish`.
    #[default]
    SingleTransaction,
    /// Commit at every batch boundary.
    Batched,
}

/// SQLite record collector
///
/// # Transaction Management
///
/// A transaction is opened on creation. In [`CommitMode::SingleTransaction`]
/// it stays open until `finish`, so a failed ingestion leaves nothing behind.
/// In [`CommitMode::Batched`] each batch commits and a new transaction
/// begins, followed by a passive WAL checkpoint.
///
/// Batches always insert blocks, then instructions, then accesses, so every
/// foreign key points at a row that already exists.
pub struct SqliteWriter {
    conn: Connection,
    mode: CommitMode,
    batch_size: usize,

    blocks: Vec<BasicBlockRecord>,
    instructions: Vec<InstructionRecord>,
    accesses: Vec<MemoryAccessRecord>,

    batches_written: u64,
}

impl SqliteWriter {
    /// Create a new store at `path`.
    ///
    /// Fails if the file already exists.
    pub fn create(path: &Path, mode: CommitMode, batch_size: usize) -> Result<Self> {
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        Self::with_connection(conn, mode, batch_size)
    }

    /// Create a store in memory, mostly for tests.
    pub fn open_in_memory(mode: CommitMode, batch_size: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open SQLite database")?;
        Self::with_connection(conn, mode, batch_size)
    }

    fn with_connection(conn: Connection, mode: CommitMode, batch_size: usize) -> Result<Self> {
        crate::sqlite::create_schema(&conn).context("Failed to create SQLite schema")?;

        conn.execute_batch("BEGIN TRANSACTION")
            .context("Failed to begin transaction")?;

        let batch_size = if batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        Ok(Self {
            conn,
            mode,
            batch_size,
            blocks: Vec::with_capacity(batch_size),
            instructions: Vec::with_capacity(batch_size),
            accesses: Vec::with_capacity(batch_size),
            batches_written: 0,
        })
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }

    fn buffered(&self) -> usize {
        self.blocks.len() + self.instructions.len() + self.accesses.len()
    }

    fn maybe_write_batch(&mut self) -> Result<()> {
        if self.buffered() >= self.batch_size {
            self.write_batch()?;
        }
        Ok(())
    }

    /// Insert every buffered row, blocks first.
    fn write_batch(&mut self) -> Result<()> {
        if self.buffered() == 0 {
            return Ok(());
        }
        let (blocks, instructions, accesses) =
            (self.blocks.len(), self.instructions.len(), self.accesses.len());

        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO bbl (id, addr, addr_end, size, thread_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for block in self.blocks.drain(..) {
                stmt.execute(params![
                    block.id as i64,
                    format_address(block.addr),
                    format_address(block.addr_end),
                    block.size as i64,
                    block.thread_id as i64,
                ])
                .with_context(|| format!("Failed to insert bbl {}", block.id))?;
            }
        }

        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO ins (id, bbl_id, ip, disassembly, opcode_hex) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for ins in self.instructions.drain(..) {
                stmt.execute(params![
                    ins.id as i64,
                    ins.bbl_id as i64,
                    format_address(ins.ip),
                    ins.disassembly,
                    hex::encode(&ins.opcode),
                ])
                .with_context(|| format!("Failed to insert ins {}", ins.id))?;
            }
        }

        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO mem (id, ins_id, ip, kind, addr, addr_end, size, data_hex, value_hex)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for access in self.accesses.drain(..) {
                let value_hex = access
                    .value()
                    .map(|value| format_value(value, access.data.len()));
                stmt.execute(params![
                    access.id as i64,
                    access.ins_id as i64,
                    format_address(access.ip),
                    access.kind.as_str(),
                    format_address(access.addr),
                    format_address(access.addr_end()),
                    access.size() as i64,
                    hex::encode(&access.data),
                    value_hex,
                ])
                .with_context(|| format!("Failed to insert mem {}", access.id))?;
            }
        }

        self.batches_written += 1;
        if self.mode == CommitMode::Batched {
            self.conn
                .execute_batch("COMMIT; BEGIN TRANSACTION")
                .context("Failed to commit batch")?;
            self.conn
                .execute_batch("PRAGMA wal_checkpoint(PASSIVE)")
                .context("Failed to checkpoint WAL")?;
        }
        debug!(
            "Wrote batch {}: {} blocks, {} instructions, {} accesses",
            self.batches_written, blocks, instructions, accesses
        );
        Ok(())
    }

    /// Commit everything and hand back the connection.
    pub fn close(mut self) -> Result<Connection> {
        self.write_batch()?;
        self.conn
            .execute_batch("COMMIT")
            .context("Failed to commit transaction")?;

        // Final checkpoint
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")
            .context("Failed to perform final WAL checkpoint")?;
        Ok(self.conn)
    }
}

impl RecordCollector for SqliteWriter {
    fn add_info(&mut self, record: InfoRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO info (key, value) VALUES (?1, ?2)",
                params![record.key, record.value],
            )
            .context("Failed to insert info")?;
        Ok(())
    }

    fn add_lib(&mut self, record: LibRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO lib (name, base, end) VALUES (?1, ?2, ?3)",
                params![
                    record.name,
                    format_address(record.base),
                    format_address(record.end)
                ],
            )
            .context("Failed to insert lib")?;
        Ok(())
    }

    fn add_basic_block(&mut self, record: BasicBlockRecord) -> Result<()> {
        self.blocks.push(record);
        self.maybe_write_batch()
    }

    fn add_instruction(&mut self, record: InstructionRecord) -> Result<()> {
        self.instructions.push(record);
        self.maybe_write_batch()
    }

    fn add_memory_access(&mut self, record: MemoryAccessRecord) -> Result<()> {
        self.accesses.push(record);
        self.maybe_write_batch()
    }

    fn add_thread(&mut self, record: ThreadRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO thread (thread_id, start_bbl_id, exit_bbl_id) VALUES (?1, ?2, ?3)",
                params![
                    record.thread_id as i64,
                    record.start_bbl_id as i64,
                    record.exit_bbl_id.map(|id| id as i64)
                ],
            )
            .context("Failed to insert thread")?;
        Ok(())
    }

    fn set_thread_exit(&mut self, thread_id: u64, exit_bbl_id: u64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE thread SET exit_bbl_id = ?2 WHERE thread_id = ?1 AND exit_bbl_id IS NULL",
                params![thread_id as i64, exit_bbl_id as i64],
            )
            .context("Failed to update thread exit")?;
        Ok(changed > 0)
    }

    fn flush(&mut self) -> Result<()> {
        self.write_batch()
    }

    fn finish(self) -> Result<()> {
        self.close().map(|_| ())
    }
}
