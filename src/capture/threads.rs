//! Synthetic thread ids for the capture side.
//!
//! Host thread handles are reused once a thread exits, so every created
//! thread gets `(creation counter << 32) | handle`. The counter starts at 1,
//! which keeps synthetic ids distinct from raw handles.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ThreadTable {
    created: u32,
    ids: HashMap<u32, u64>,
    current: u64,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a fresh synthetic id to `handle` and return it.
    pub fn create(&mut self, handle: u32) -> u64 {
        self.created = self.created.wrapping_add(1);
        let id = ((self.created as u64) << 32) | handle as u64;
        self.ids.insert(handle, id);
        id
    }

    /// Synthetic id of `handle`, or the raw handle if it was never created.
    pub fn lookup(&self, handle: u32) -> u64 {
        self.ids.get(&handle).copied().unwrap_or(handle as u64)
    }

    /// Switch the running thread. Returns the id now stamped on exec messages.
    pub fn start(&mut self, handle: u32) -> u64 {
        self.current = self.lookup(handle);
        self.current
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn created(&self) -> u32 {
        self.created
    }
}
