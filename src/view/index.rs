//! Address-compacted, time-ordered index of trace events.
//!
//! Events are bucketed into page-aligned [`MemoryBlock`]s kept sorted by
//! address. Runs of adjacent pages form [`Region`]s, which are laid out back
//! to back on the display axis so unmapped gaps take no space.

use super::event::{Event, MAX_ORIGIN_IDS};

pub const PAGE_SIZE: u64 = 0x1000;
const PAGE_MASK: u64 = !(PAGE_SIZE - 1);

/// One page of address space and the events that touched it, in time order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    pub address: u64,
    pub display_address: u64,
    pub starts_region: bool,
    pub events: Vec<Event>,
}

impl MemoryBlock {
    fn new(address: u64) -> Self {
        Self {
            address,
            display_address: 0,
            starts_region: false,
            events: Vec::new(),
        }
    }

    pub fn end(&self) -> u64 {
        self.address.saturating_add(PAGE_SIZE)
    }

    /// Append `event`, folding it into an overlapping access of the same
    /// time when that access still has room for another origin id.
    fn push(&mut self, event: Event) {
        if event.kind.is_access() {
            for candidate in self.events.iter_mut().rev() {
                if candidate.time != event.time {
                    break;
                }
                if !candidate.kind.is_access() || !candidate.overlaps(&event) {
                    continue;
                }
                if candidate.ids.len() + event.ids.len() > MAX_ORIGIN_IDS {
                    break;
                }
                let end = candidate.end().max(event.end());
                candidate.kind = candidate.kind.union(event.kind);
                candidate.address = candidate.address.min(event.address);
                candidate.size = end - candidate.address;
                candidate.ids.extend(event.ids);
                return;
            }
        }
        self.events.push(event);
    }
}

/// A maximal run of contiguous blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub address: u64,
    pub size: u64,
    pub display_address: u64,
}

impl Region {
    fn contains(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.size
    }

    fn contains_display(&self, address: u64) -> bool {
        address >= self.display_address && address - self.display_address < self.size
    }
}

#[derive(Debug, Default)]
pub struct TraceIndex {
    blocks: Vec<MemoryBlock>,
    regions: Vec<Region>,
    total_bytes: u64,
    total_time: u64,
    events: u64,
}

impl TraceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event. Events must arrive in non-decreasing time order.
    ///
    /// An event crossing page boundaries is split into one piece per page.
    /// Regions are not updated until [`compact_regions`](Self::compact_regions).
    pub fn insert(&mut self, event: Event) {
        self.total_time = self.total_time.max(event.time);
        self.events += 1;

        if event.size == 0 {
            self.insert_in_page(event);
            return;
        }

        let mut rest = event;
        loop {
            let page = rest.address & PAGE_MASK;
            let last = rest.address.saturating_add(rest.size - 1);
            if last & PAGE_MASK == page {
                self.insert_in_page(rest);
                return;
            }
            let next_page = page + PAGE_SIZE;
            let head_size = next_page - rest.address;
            let mut head = rest.clone();
            head.size = head_size;
            self.insert_in_page(head);
            rest.address = next_page;
            rest.size -= head_size;
        }
    }

    fn insert_in_page(&mut self, event: Event) {
        let page = event.address & PAGE_MASK;
        let idx = match self.blocks.binary_search_by_key(&page, |b| b.address) {
            Ok(idx) => idx,
            Err(idx) => {
                self.blocks.insert(idx, MemoryBlock::new(page));
                idx
            }
        };
        self.blocks[idx].push(event);
    }

    /// Rebuild regions and display addresses from the current blocks.
    pub fn compact_regions(&mut self) {
        self.regions.clear();
        let mut display = 0u64;
        for block in &mut self.blocks {
            match self.regions.last_mut() {
                Some(region) if region.address.saturating_add(region.size) == block.address => {
                    region.size += PAGE_SIZE;
                    block.starts_region = false;
                }
                _ => {
                    self.regions.push(Region {
                        address: block.address,
                        size: PAGE_SIZE,
                        display_address: display,
                    });
                    block.starts_region = true;
                }
            }
            block.display_address = display;
            display += PAGE_SIZE;
        }
        self.total_bytes = self
            .regions
            .last()
            .map_or(0, |r| r.display_address + r.size);
    }

    pub fn real_to_display(&self, address: u64) -> Option<u64> {
        let idx = self
            .regions
            .partition_point(|r| r.address.saturating_add(r.size) <= address);
        let region = self.regions.get(idx)?;
        region
            .contains(address)
            .then(|| address - region.address + region.display_address)
    }

    pub fn display_to_real(&self, address: u64) -> Option<u64> {
        let idx = self
            .regions
            .partition_point(|r| r.display_address + r.size <= address);
        let region = self.regions.get(idx)?;
        region
            .contains_display(address)
            .then(|| address - region.display_address + region.address)
    }

    pub fn is_mapped(&self, address: u64) -> bool {
        self.real_to_display(address).is_some()
    }

    /// First event, in address then time order, intersecting the inclusive
    /// address range `[min_address, max_address]` within `[min_time, max_time]`.
    pub fn find_event(
        &self,
        min_address: u64,
        max_address: u64,
        min_time: u64,
        max_time: u64,
    ) -> Option<&Event> {
        let start = self.blocks.partition_point(|b| b.end() <= min_address);
        for block in &self.blocks[start..] {
            if max_address < block.address {
                break;
            }
            let first = block.events.partition_point(|e| e.time < min_time);
            for event in &block.events[first..] {
                if max_time < event.time {
                    break;
                }
                if event.address <= max_address && min_address < event.end() {
                    return Some(event);
                }
            }
        }
        None
    }

    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Display extent of all regions.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Largest event time seen.
    pub fn total_time(&self) -> u64 {
        self.total_time
    }

    /// Events inserted, before splitting and merging.
    pub fn event_count(&self) -> u64 {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
