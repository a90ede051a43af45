/// SQLite store for memtrace records
///
/// [`SqliteWriter`] is the ingestion backend and [`TraceStore`] the validated
/// read-only view used by the timeline, the viewer and the CLI.
pub mod reader;
pub mod schema;
pub mod writer;

use thiserror::Error;

pub use reader::{TraceStats, TraceStore};
pub use schema::{create_schema, SCHEMA_SQL, SCHEMA_VERSION};
pub use writer::{CommitMode, SqliteWriter};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The file is not a memtrace store.
    #[error("invalid trace: {0}")]
    Connection(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt {table} row {id}: {reason}")]
    Corrupt {
        table: &'static str,
        id: u64,
        reason: String,
    },
}
