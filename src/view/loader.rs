//! Background index building.
//!
//! A producer thread opens the store, replays its timeline and sends events
//! in chunks over an ordered channel. The consumer side owns the
//! [`TraceIndex`] and inserts whatever has arrived on each [`poll`].
//!
//! [`poll`]: IndexLoader::poll

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use super::event::Event;
use super::index::TraceIndex;
use super::viewport::Viewport;
use crate::record::TraceSource;
use crate::sqlite::TraceStore;
use crate::timeline::Timeline;

/// Events per channel message.
pub const CHUNK_SIZE: usize = 4096;

enum LoadMessage {
    Events(Vec<Event>),
    Done,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

pub struct IndexLoader {
    receiver: Receiver<LoadMessage>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    index: TraceIndex,
    state: LoadState,
}

impl IndexLoader {
    /// Start loading from the source returned by `open`, which runs on the
    /// producer thread.
    pub fn spawn<S, F>(open: F) -> Result<Self>
    where
        S: TraceSource,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let producer_cancel = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("index-loader".to_string())
            .spawn(move || {
                let source = match open() {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = sender.send(LoadMessage::Failed(format!("{e:#}")));
                        return;
                    }
                };

                let mut chunk = Vec::with_capacity(CHUNK_SIZE);
                for event in Timeline::new(&source) {
                    if producer_cancel.load(Ordering::Relaxed) {
                        debug!("Index loading cancelled");
                        return;
                    }
                    match event {
                        Ok(event) => chunk.push(event),
                        Err(e) => {
                            let _ = sender.send(LoadMessage::Failed(format!("{e:#}")));
                            return;
                        }
                    }
                    if chunk.len() == CHUNK_SIZE {
                        let full = std::mem::replace(&mut chunk, Vec::with_capacity(CHUNK_SIZE));
                        if sender.send(LoadMessage::Events(full)).is_err() {
                            return;
                        }
                    }
                }
                if !chunk.is_empty() && sender.send(LoadMessage::Events(chunk)).is_err() {
                    return;
                }
                let _ = sender.send(LoadMessage::Done);
            })
            .context("Failed to spawn index loader thread")?;

        Ok(Self {
            receiver,
            cancel,
            handle: Some(handle),
            index: TraceIndex::new(),
            state: LoadState::Loading,
        })
    }

    /// Load a SQLite store from `path`.
    pub fn open_store(path: PathBuf) -> Result<Self> {
        Self::spawn(move || Ok(TraceStore::open(&path)?))
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// The index built so far. Regions are only valid once loading is done.
    pub fn index(&self) -> &TraceIndex {
        &self.index
    }

    /// Insert everything received so far without blocking.
    ///
    /// When the last chunk arrives regions are compacted and `viewport` is
    /// zoomed to the overview.
    pub fn poll(&mut self, viewport: &mut Viewport) -> &LoadState {
        while self.state == LoadState::Loading {
            match self.receiver.try_recv() {
                Ok(message) => self.handle_message(message, viewport),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.state = LoadState::Failed("index loader exited early".to_string());
                }
            }
        }
        &self.state
    }

    /// Block until loading ends and return the finished index.
    pub fn wait(mut self, viewport: &mut Viewport) -> Result<TraceIndex> {
        while self.state == LoadState::Loading {
            match self.receiver.recv() {
                Ok(message) => self.handle_message(message, viewport),
                Err(_) => {
                    self.state = LoadState::Failed("index loader exited early".to_string());
                }
            }
        }
        match &self.state {
            LoadState::Ready => Ok(std::mem::take(&mut self.index)),
            LoadState::Failed(reason) => bail!("Failed to load trace: {reason}"),
            LoadState::Loading => bail!("Trace loading did not finish"),
        }
    }

    /// Ask the producer to stop. Already received events stay in the index.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    fn handle_message(&mut self, message: LoadMessage, viewport: &mut Viewport) {
        match message {
            LoadMessage::Events(events) => {
                for event in events {
                    self.index.insert(event);
                }
            }
            LoadMessage::Done => {
                self.index.compact_regions();
                viewport.zoom_to_overview(&self.index);
                info!(
                    "Indexed {} events in {} blocks, {} regions",
                    self.index.event_count(),
                    self.index.blocks().len(),
                    self.index.regions().len()
                );
                self.state = LoadState::Ready;
            }
            LoadMessage::Failed(reason) => {
                self.state = LoadState::Failed(reason);
            }
        }
    }
}

impl Drop for IndexLoader {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::protocol::AccessMode;
    use crate::record::{InMemoryCollector, RecordCollector};
    use crate::trace::{BasicBlockRecord, InstructionRecord, MemoryAccessRecord};

    fn collector(blocks: u64) -> InMemoryCollector {
        let mut c = InMemoryCollector::new();
        let mut id = 1;
        for bbl in 1..=blocks {
            c.add_basic_block(BasicBlockRecord {
                id: bbl,
                addr: 0x400000,
                addr_end: 0x400001,
                size: 2,
                thread_id: 1,
            })
            .unwrap();
            c.add_instruction(InstructionRecord {
                id,
                bbl_id: bbl,
                ip: 0x400000,
                disassembly: "mov [rax],ecx".to_string(),
                opcode: vec![0x89, 0x08],
            })
            .unwrap();
            c.add_memory_access(MemoryAccessRecord {
                id: id + 1,
                ins_id: id,
                ip: 0x400000,
                kind: AccessMode::Write,
                addr: 0x7000 + bbl * 4,
                data: vec![0; 4],
            })
            .unwrap();
            id += 2;
        }
        c
    }

    #[test]
    fn test_wait_builds_index() {
        let source = collector(10);
        let loader = IndexLoader::spawn(move || Ok(source)).unwrap();
        let mut viewport = Viewport::new(0x2000, 9);
        let index = loader.wait(&mut viewport).unwrap();

        assert_eq!(index.event_count(), 20);
        assert_eq!(index.total_time(), 9);
        assert_eq!(index.regions().len(), 2);
        assert_eq!(index.total_bytes(), 0x2000);
        assert_eq!(viewport.address_zoom(), 1.0);
        assert_eq!(viewport.time_zoom(), 1.0);
    }

    #[test]
    fn test_poll_reaches_ready() {
        let source = collector(CHUNK_SIZE as u64);
        let mut loader = IndexLoader::spawn(move || Ok(source)).unwrap();
        let mut viewport = Viewport::new(100, 100);

        let deadline = Instant::now() + Duration::from_secs(30);
        while *loader.poll(&mut viewport) == LoadState::Loading {
            assert!(Instant::now() < deadline, "loader did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*loader.state(), LoadState::Ready);
        assert_eq!(loader.index().event_count(), 2 * CHUNK_SIZE as u64);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let loader =
            IndexLoader::spawn(|| -> Result<InMemoryCollector> { bail!("no such trace") }).unwrap();
        let mut viewport = Viewport::new(100, 100);
        let err = loader.wait(&mut viewport).unwrap_err();
        assert!(err.to_string().contains("no such trace"));
    }

    #[test]
    fn test_missing_store() {
        let loader = IndexLoader::open_store(PathBuf::from("/nonexistent/trace.db")).unwrap();
        let mut viewport = Viewport::new(100, 100);
        let err = loader.wait(&mut viewport).unwrap_err();
        assert!(err.to_string().contains("invalid trace"));
    }

    #[test]
    fn test_drop_while_loading() {
        let source = collector(3 * CHUNK_SIZE as u64);
        let loader = IndexLoader::spawn(move || Ok(source)).unwrap();
        loader.cancel();
        drop(loader);
    }
}
