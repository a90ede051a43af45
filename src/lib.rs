//! memtrace library - capture, storage and exploration of instruction and
//! memory access traces.
//!
//! # Modules
//!
//! - [`protocol`] - Binary trace wire format
//! - [`capture`] - Correlator embedded in the traced program
//! - [`disasm`] - Architecture handling and disassembly
//! - [`ingest`] - Trace stream to stored records
//! - [`sqlite`] - SQLite store writer and reader
//! - [`timeline`] - Stored records back to one time-ordered event sequence
//! - [`view`] - Spatial-temporal index and viewport
//! - [`dump`] - Text rendering of a raw trace
//!
//! # Example
//!
//! ```no_run
//! use memtrace::ingest::{ingest_file, IngestConfig};
//! use memtrace::sqlite::{CommitMode, SqliteWriter, TraceStore};
//! use memtrace::timeline::Timeline;
//! use std::path::Path;
//!
//! let config = IngestConfig::default();
//! let writer = SqliteWriter::create(Path::new("trace.db"), CommitMode::SingleTransaction, config.batch_size)?;
//! ingest_file(Path::new("trace.bin"), writer, &config)?;
//!
//! let store = TraceStore::open(Path::new("trace.db"))?;
//! for event in Timeline::new(&store) {
//!     println!("{:?}", event?);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod capture;
pub mod diagnostics;
pub mod disasm;
pub mod dump;
pub mod ingest;
pub mod protocol;
pub mod record;
pub mod sqlite;
pub mod timeline;
pub mod trace;
pub mod view;

// Re-export for convenience
pub use capture::{CaptureConfig, Correlator};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use ingest::{ingest_file, IngestConfig, IngestError, IngestReport, Ingestor};
pub use protocol::{ProtocolError, TraceMessage, TraceReader, TraceWriter};
pub use record::{InMemoryCollector, RecordCollector, TraceSource};
pub use sqlite::{SqliteWriter, StoreError, TraceStore};
pub use timeline::Timeline;
pub use view::{Event, EventKind, IndexLoader, TraceIndex, Viewport};
