/// SQL schema for memtrace stores
///
/// Six tables mirror the trace records: `info`, `lib`, `bbl`, `ins` (child of
/// `bbl`), `mem` (child of `ins`) and `thread`. Addresses are stored as
/// fixed-width `0x%016x` text so lexical and numeric order agree.

pub const SCHEMA_VERSION: i32 = 1;

/// SQL schema for memtrace stores
pub const SCHEMA_SQL: &str = r#"
-- ============================================================================
-- SQLite Configuration and Optimizations
-- ============================================================================

-- Enforce write-ahead logging for better concurrency
PRAGMA journal_mode = WAL;

-- Normal synchronous mode is safe with WAL and much faster
PRAGMA synchronous = NORMAL;

-- 64MB cache for better performance
PRAGMA cache_size = -64000;

-- Keep temp tables in memory
PRAGMA temp_store = MEMORY;

-- Enable foreign key constraints
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Schema Version Tracking
-- ============================================================================

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    description TEXT
);

INSERT INTO schema_version (version, description)
VALUES (1, 'Initial schema');

-- ============================================================================
-- Trace Metadata
-- ============================================================================

-- Capture key/value pairs (MEMTRACE_VERSION, ARCH, PROGRAM, ARGS, ...)
CREATE TABLE IF NOT EXISTS info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lib (
    name TEXT NOT NULL,
    base TEXT NOT NULL,
    end TEXT NOT NULL
);

-- ============================================================================
-- Execution
-- ============================================================================

-- One row per exec message
CREATE TABLE IF NOT EXISTS bbl (
    id INTEGER PRIMARY KEY,
    addr TEXT NOT NULL,
    addr_end TEXT NOT NULL,
    size INTEGER NOT NULL,
    thread_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ins (
    id INTEGER PRIMARY KEY,
    bbl_id INTEGER NOT NULL,
    ip TEXT NOT NULL,
    disassembly TEXT NOT NULL,
    opcode_hex TEXT NOT NULL,
    FOREIGN KEY (bbl_id) REFERENCES bbl(id)
);

CREATE INDEX idx_ins_bbl ON ins(bbl_id);

-- ============================================================================
-- Memory Accesses
-- ============================================================================

-- Ids share a counter with ins, so ins_id < id for every row
CREATE TABLE IF NOT EXISTS mem (
    id INTEGER PRIMARY KEY,
    ins_id INTEGER NOT NULL,
    ip TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('R', 'W')),
    addr TEXT NOT NULL,
    addr_end TEXT NOT NULL,
    size INTEGER NOT NULL,
    data_hex TEXT NOT NULL,
    value_hex TEXT,
    FOREIGN KEY (ins_id) REFERENCES ins(id)
);

CREATE INDEX idx_mem_ins ON mem(ins_id);

-- Keyset pagination over one access kind
CREATE INDEX idx_mem_kind_id ON mem(kind, id);

-- ============================================================================
-- Threads
-- ============================================================================

CREATE TABLE IF NOT EXISTS thread (
    thread_id INTEGER NOT NULL,
    start_bbl_id INTEGER NOT NULL,
    exit_bbl_id INTEGER
);

CREATE INDEX idx_thread_id ON thread(thread_id);
"#;

/// Creates the complete schema in the provided SQLite connection
///
/// # Arguments
/// * `conn` - SQLite connection to create the schema in
///
/// # Returns
/// * `Ok(())` on success
/// * `Err` if schema creation fails
pub fn create_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
