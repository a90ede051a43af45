//! Screen-space navigation over a [`TraceIndex`].
//!
//! The horizontal axis is the compacted display address, the vertical axis
//! is time. `address_zoom` is pixels per byte and `time_zoom` pixels per time
//! step. All pixel inputs are relative to the top-left corner of the view.

use super::event::{Event, EventKind};
use super::index::{TraceIndex, PAGE_SIZE};

/// Largest synthetic pointer selection, in bytes.
pub const POINTER_MAX_SIZE: u64 = 1024;

/// Fraction of the view moved by one keyboard step.
pub const KEY_STEP: f64 = 0.05;

/// Drags shorter than this on either axis are treated as clicks.
pub const CLICK_SLOP: i64 = 10;

const WHEEL_DIVISOR: f64 = 2000.0;
const WHEEL_MAX_FACTOR: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Axes affected by wheel zoom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZoomAxes {
    #[default]
    Both,
    Address,
    Time,
}

impl ZoomAxes {
    fn address(self) -> bool {
        matches!(self, ZoomAxes::Both | ZoomAxes::Address)
    }

    fn time(self) -> bool {
        matches!(self, ZoomAxes::Both | ZoomAxes::Time)
    }
}

/// One event as drawn, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub kind: EventKind,
}

/// Left edge of a visible region and the real address it starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionMarker {
    pub x: u32,
    pub address: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    view_address: u64,
    view_time: u64,
    address_zoom: f64,
    time_zoom: f64,
    width: u32,
    height: u32,
    border: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            view_address: 0,
            view_time: 0,
            address_zoom: 1.0,
            time_zoom: 1.0,
            width,
            height,
            border: 0,
        }
    }

    /// Display address at the left edge.
    pub fn view_address(&self) -> u64 {
        self.view_address
    }

    /// Time at the top edge.
    pub fn view_time(&self) -> u64 {
        self.view_time
    }

    pub fn address_zoom(&self) -> f64 {
        self.address_zoom
    }

    pub fn time_zoom(&self) -> f64 {
        self.time_zoom
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Extra pixels drawn around every event.
    pub fn border(&self) -> u32 {
        self.border
    }

    pub fn grow_border(&mut self) {
        self.border += 1;
    }

    pub fn shrink_border(&mut self) {
        self.border = self.border.saturating_sub(1);
    }

    pub fn pan_address(&mut self, delta: i64) {
        self.view_address = saturating_offset(self.view_address, delta);
    }

    pub fn pan_time(&mut self, delta: i64) {
        self.view_time = saturating_offset(self.view_time, delta);
    }

    /// Move the left edge to a real address. Returns `false`, leaving the
    /// view unchanged, if the address lies outside every region.
    pub fn set_address(&mut self, index: &TraceIndex, address: u64) -> bool {
        match index.real_to_display(address) {
            Some(display) => {
                self.view_address = display;
                true
            }
            None => false,
        }
    }

    pub fn set_time(&mut self, time: u64) {
        self.view_time = time;
    }

    /// Fit the whole index into the view.
    pub fn zoom_to_overview(&mut self, index: &TraceIndex) {
        self.view_address = 0;
        self.view_time = 0;
        self.update_zoom(index);
    }

    /// Change the view size. The zoom only follows while in overview.
    pub fn resize(&mut self, index: &TraceIndex, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        if self.view_address == 0 && self.view_time == 0 {
            self.update_zoom(index);
        }
    }

    fn update_zoom(&mut self, index: &TraceIndex) {
        self.address_zoom = match index.total_bytes() {
            0 => 1.0,
            bytes => self.width as f64 / bytes as f64,
        };
        self.time_zoom = match index.total_time() {
            0 => 1.0,
            time => self.height as f64 / time as f64,
        };
    }

    /// Zoom around the cursor at `(x, y)` by a wheel delta.
    pub fn zoom_wheel(&mut self, x: f64, y: f64, dx: f64, dy: f64, axes: ZoomAxes) {
        let f = ((dy + dx) / WHEEL_DIVISOR).clamp(-WHEEL_MAX_FACTOR, WHEEL_MAX_FACTOR);
        if axes.address() {
            self.pan_address((x / self.address_zoom * (2.0 * f) / (1.0 + f)) as i64);
            self.address_zoom *= (1.0 + f) / (1.0 - f);
        }
        if axes.time() {
            self.pan_time((y / self.time_zoom * (2.0 * f) / (1.0 + f)) as i64);
            self.time_zoom *= (1.0 + f) / (1.0 - f);
        }
    }

    pub fn step(&mut self, direction: Direction) {
        let address_step = (self.width as f64 * KEY_STEP / self.address_zoom) as i64;
        let time_step = (self.height as f64 * KEY_STEP / self.time_zoom) as i64;
        match direction {
            Direction::Up => self.pan_time(-time_step),
            Direction::Down => self.pan_time(time_step),
            Direction::Left => self.pan_address(-address_step),
            Direction::Right => self.pan_address(address_step),
        }
    }

    /// Pan by a pointer drag from `(last_x, last_y)` to `(x, y)`.
    pub fn drag_by(&mut self, last_x: f64, last_y: f64, x: f64, y: f64) {
        self.pan_address(((last_x - x) / self.address_zoom) as i64);
        self.pan_time(((last_y - y) / self.time_zoom) as i64);
    }

    /// Zoom so the dragged rectangle fills the view. Returns `false` for a
    /// rectangle too small to be intentional.
    pub fn zoom_rect_in(&mut self, x0: i64, y0: i64, x1: i64, y1: i64) -> bool {
        let Some((dx, dy)) = drag_extent(x0, y0, x1, y1) else {
            return false;
        };
        self.pan_address((x0.min(x1) as f64 / self.address_zoom) as i64);
        self.pan_time((y0.min(y1) as f64 / self.time_zoom) as i64);
        self.address_zoom *= self.width as f64 / dx;
        self.time_zoom *= self.height as f64 / dy;
        true
    }

    /// Zoom so the current view fits inside the dragged rectangle.
    pub fn zoom_rect_out(&mut self, x0: i64, y0: i64, x1: i64, y1: i64) -> bool {
        let Some((dx, dy)) = drag_extent(x0, y0, x1, y1) else {
            return false;
        };
        self.address_zoom *= dx / self.width as f64;
        self.time_zoom *= dy / self.height as f64;
        self.pan_address(-((x0.min(x1) as f64 / self.address_zoom) as i64));
        self.pan_time(-((y0.min(y1) as f64 / self.time_zoom) as i64));
        true
    }

    fn display_at(&self, x: f64) -> u64 {
        to_u64(self.view_address as f64 + x / self.address_zoom)
    }

    fn time_at(&self, y: f64) -> u64 {
        to_u64(self.view_time as f64 + y / self.time_zoom)
    }

    /// Real address (if mapped) and time under a screen point.
    pub fn position_at(&self, index: &TraceIndex, x: f64, y: f64) -> (Option<u64>, u64) {
        (index.display_to_real(self.display_at(x)), self.time_at(y))
    }

    /// Event under a screen point, widened by the border.
    pub fn query_at<'a>(&self, index: &'a TraceIndex, x: f64, y: f64) -> Option<&'a Event> {
        let half = (self.border / 2) as f64;
        let lead = self.border as f64 - half;

        let min_address = index.display_to_real(self.display_at(x - lead))?;
        let max_address = index
            .display_to_real(self.display_at(x + half))
            .unwrap_or(u64::MAX);
        let min_time = self.time_at(y - lead);
        let max_time = self.time_at(y + half);
        index.find_event(min_address, max_address, min_time, max_time)
    }

    /// Pointer selection for a horizontal drag from `start` to `(x, _)`.
    ///
    /// The selection covers at most [`POINTER_MAX_SIZE`] bytes ending (or
    /// starting) at the drag origin and is trimmed to the mapped page at its
    /// far end. The time is taken from the drag origin.
    pub fn pointer_event(
        &self,
        index: &TraceIndex,
        start_x: f64,
        start_y: f64,
        x: f64,
    ) -> Option<Event> {
        let address = index.display_to_real(self.display_at(x))?;
        let start = index.display_to_real(self.display_at(start_x))?;

        let (mut pointer_address, mut size);
        if address < start {
            if start - address >= POINTER_MAX_SIZE {
                pointer_address = start + 1 - POINTER_MAX_SIZE;
                size = POINTER_MAX_SIZE;
            } else {
                pointer_address = address;
                size = start + 1 - address;
            }
            if !index.is_mapped(pointer_address) {
                let skip = PAGE_SIZE - (pointer_address & (PAGE_SIZE - 1));
                size = size.saturating_sub(skip);
                pointer_address += skip;
            }
        } else {
            pointer_address = start;
            size = if address - start >= POINTER_MAX_SIZE {
                POINTER_MAX_SIZE
            } else {
                address + 1 - start
            };
            let end = pointer_address.saturating_add(size);
            if !index.is_mapped(end) {
                size = size.saturating_sub(end & (PAGE_SIZE - 1));
            }
        }

        Some(Event::pointer(
            self.time_at(start_y),
            pointer_address,
            size,
        ))
    }

    /// Rectangles for every event inside the view, the pointer first when
    /// it is visible.
    pub fn visible_events(&self, index: &TraceIndex, pointer: Option<&Event>) -> Vec<Rect> {
        let window_address = (self.width as f64 / self.address_zoom) as u64;
        let window_time = (self.height as f64 / self.time_zoom) as u64;
        let last_time = self.view_time.saturating_add(window_time);
        let last_address = self.view_address.saturating_add(window_address);

        let mut rects = Vec::new();
        if let Some(pointer) = pointer {
            if pointer.time >= self.view_time && pointer.time < last_time {
                rects.extend(self.event_rect(index, pointer, window_address));
            }
        }

        for block in index.blocks() {
            if block.display_address > last_address {
                break;
            }
            if block.display_address + PAGE_SIZE <= self.view_address {
                continue;
            }
            for event in &block.events {
                if event.time > last_time {
                    break;
                }
                if event.time >= self.view_time {
                    rects.extend(self.event_rect(index, event, window_address));
                }
            }
        }
        rects
    }

    /// Left edges of the regions starting inside the view.
    pub fn region_markers(&self, index: &TraceIndex) -> Vec<RegionMarker> {
        let window_address = (self.width as f64 / self.address_zoom) as u64;
        let last_address = self.view_address.saturating_add(window_address);
        index
            .blocks()
            .iter()
            .take_while(|b| b.display_address <= last_address)
            .filter(|b| b.starts_region && b.display_address >= self.view_address)
            .map(|b| RegionMarker {
                x: ((b.display_address - self.view_address) as f64 * self.address_zoom) as u32,
                address: b.address,
            })
            .collect()
    }

    fn event_rect(&self, index: &TraceIndex, event: &Event, window_address: u64) -> Option<Rect> {
        let mut display = index.real_to_display(event.address)?;
        let mut masked = 0;
        if display.saturating_add(event.size) < self.view_address
            || display > self.view_address.saturating_add(window_address)
        {
            return None;
        }
        if display < self.view_address {
            masked = self.view_address - display;
            display = 0;
        } else {
            display -= self.view_address;
        }

        let mut x = (display as f64 * self.address_zoom) as u32;
        let mut y = (event.time.saturating_sub(self.view_time) as f64 * self.time_zoom) as u32;
        let mut width = (((event.size.saturating_sub(masked)) as f64 * self.address_zoom) as u32).max(1);
        let mut height = (self.time_zoom as u32).max(1);

        let half = self.border / 2;
        if x < half {
            width += self.border - half + x;
            x = 0;
        } else {
            width += self.border;
            x -= half;
        }
        if y < half {
            height += self.border - half + y;
            y = 0;
        } else {
            height += self.border;
            y -= half;
        }

        Some(Rect {
            x,
            y,
            width,
            height,
            kind: event.kind,
        })
    }
}

fn saturating_offset(value: u64, delta: i64) -> u64 {
    if delta < 0 {
        value.saturating_sub(delta.unsigned_abs())
    } else {
        value.saturating_add(delta as u64)
    }
}

fn to_u64(value: f64) -> u64 {
    if value <= 0.0 {
        0
    } else {
        value as u64
    }
}

fn drag_extent(x0: i64, y0: i64, x1: i64, y1: i64) -> Option<(f64, f64)> {
    let dx = (x0 - x1).abs();
    let dy = (y0 - y1).abs();
    if dx < CLICK_SLOP || dy < CLICK_SLOP {
        return None;
    }
    Some((dx as f64, dy as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(events: &[(u64, u64, u64, EventKind)]) -> TraceIndex {
        let mut index = TraceIndex::new();
        for (id, (time, address, size, kind)) in events.iter().enumerate() {
            index.insert(Event::new(*time, *address, *size, *kind, id as u64 + 1));
        }
        index.compact_regions();
        index
    }

    #[test]
    fn test_pan_saturates() {
        let mut view = Viewport::new(100, 100);
        view.pan_address(5);
        view.pan_address(-10);
        assert_eq!(view.view_address(), 0);

        view.pan_time(i64::MAX);
        view.pan_time(i64::MAX);
        view.pan_time(i64::MAX);
        assert_eq!(view.view_time(), u64::MAX);
    }

    #[test]
    fn test_overview_zoom() {
        let index = index_with(&[
            (0, 0x1000, 4, EventKind::Read),
            (100, 0x5000, 4, EventKind::Write),
        ]);
        let mut view = Viewport::new(0x2000, 50);
        view.pan_address(12);
        view.zoom_to_overview(&index);
        assert_eq!(view.view_address(), 0);
        assert_eq!(view.address_zoom(), 1.0);
        assert_eq!(view.time_zoom(), 0.5);

        let mut empty_view = Viewport::new(300, 50);
        empty_view.zoom_to_overview(&TraceIndex::new());
        assert_eq!(empty_view.address_zoom(), 1.0);
        assert_eq!(empty_view.time_zoom(), 1.0);
    }

    #[test]
    fn test_resize_follows_only_in_overview() {
        let index = index_with(&[(10, 0x1000, 4, EventKind::Read)]);
        let mut view = Viewport::new(0x1000, 10);
        view.zoom_to_overview(&index);
        view.resize(&index, 0x2000, 20);
        assert_eq!(view.address_zoom(), 2.0);
        assert_eq!(view.time_zoom(), 2.0);

        view.set_time(3);
        view.resize(&index, 0x1000, 10);
        assert_eq!(view.address_zoom(), 2.0);
        assert_eq!(view.size(), (0x1000, 10));
    }

    #[test]
    fn test_set_address_maps_through_regions() {
        let index = index_with(&[
            (0, 0x1000, 4, EventKind::Read),
            (0, 0x5000, 4, EventKind::Read),
        ]);
        let mut view = Viewport::new(100, 100);
        assert!(view.set_address(&index, 0x5010));
        assert_eq!(view.view_address(), 0x1010);
        assert!(!view.set_address(&index, 0x3000));
        assert_eq!(view.view_address(), 0x1010);
    }

    #[test]
    fn test_rect_zoom() {
        let mut view = Viewport::new(100, 100);
        assert!(!view.zoom_rect_in(10, 20, 15, 70));
        assert!(view.zoom_rect_in(60, 20, 10, 70));
        assert_eq!(view.view_address(), 10);
        assert_eq!(view.view_time(), 20);
        assert_eq!(view.address_zoom(), 2.0);
        assert_eq!(view.time_zoom(), 2.0);

        assert!(view.zoom_rect_out(10, 20, 60, 70));
        assert_eq!(view.address_zoom(), 1.0);
        assert_eq!(view.time_zoom(), 1.0);
        assert_eq!(view.view_address(), 0);
        assert_eq!(view.view_time(), 0);
    }

    #[test]
    fn test_wheel_zoom() {
        let mut view = Viewport::new(100, 100);
        view.zoom_wheel(55.0, 0.0, 0.0, 200.0, ZoomAxes::Address);
        assert_eq!(view.view_address(), 10);
        assert!((view.address_zoom() - 1.1 / 0.9).abs() < 1e-9);
        assert_eq!(view.time_zoom(), 1.0);

        view.zoom_wheel(0.0, 55.0, 0.0, 200.0, ZoomAxes::Time);
        assert_eq!(view.view_time(), 10);
    }

    #[test]
    fn test_keyboard_and_drag() {
        let mut view = Viewport::new(200, 100);
        view.step(Direction::Right);
        view.step(Direction::Down);
        assert_eq!((view.view_address(), view.view_time()), (10, 5));
        view.step(Direction::Left);
        view.step(Direction::Left);
        assert_eq!(view.view_address(), 0);

        view.drag_by(50.0, 50.0, 20.0, 40.0);
        assert_eq!((view.view_address(), view.view_time()), (30, 15));

        view.grow_border();
        view.grow_border();
        assert_eq!(view.border(), 2);
        view.shrink_border();
        view.shrink_border();
        view.shrink_border();
        assert_eq!(view.border(), 0);
    }

    #[test]
    fn test_hit_test() {
        let index = index_with(&[(5, 0x100a, 4, EventKind::Read)]);
        let view = Viewport::new(100, 100);

        let hit = view.query_at(&index, 10.0, 5.0).unwrap();
        assert_eq!(hit.address, 0x100a);
        assert!(view.query_at(&index, 20.0, 5.0).is_none());
        assert!(view.query_at(&index, 10.0, 6.0).is_none());

        // a border widens the probe
        let mut wide = view.clone();
        wide.grow_border();
        wide.grow_border();
        wide.grow_border();
        wide.grow_border();
        assert!(view.query_at(&index, 15.0, 5.0).is_none());
        assert!(wide.query_at(&index, 15.0, 5.0).is_some());

        let (address, time) = view.position_at(&index, 3.0, 7.0);
        assert_eq!(address, Some(0x1003));
        assert_eq!(time, 7);
    }

    #[test]
    fn test_visible_events_clip_and_border() {
        let index = index_with(&[
            (0, 0x1000, 4, EventKind::Read),
            (1, 0x1010, 2, EventKind::Instruction),
            (500, 0x1010, 2, EventKind::Instruction),
        ]);
        let mut view = Viewport::new(100, 100);
        view.pan_address(2);

        let rects = view.visible_events(&index, None);
        assert_eq!(
            rects,
            vec![
                Rect {
                    x: 0,
                    y: 0,
                    width: 2,
                    height: 1,
                    kind: EventKind::Read
                },
                Rect {
                    x: 14,
                    y: 1,
                    width: 2,
                    height: 1,
                    kind: EventKind::Instruction
                },
            ]
        );

        view.grow_border();
        view.grow_border();
        let rects = view.visible_events(&index, None);
        assert_eq!((rects[0].x, rects[0].width, rects[0].height), (0, 3, 2));
        assert_eq!((rects[1].x, rects[1].y, rects[1].width), (13, 0, 4));
    }

    #[test]
    fn test_visible_pointer() {
        let index = index_with(&[(0, 0x1000, 4, EventKind::Read)]);
        let view = Viewport::new(100, 100);
        let pointer = Event::pointer(3, 0x1020, 8);
        let rects = view.visible_events(&index, Some(&pointer));
        assert_eq!(rects[0].kind, EventKind::Pointer);
        assert_eq!((rects[0].x, rects[0].y, rects[0].width), (0x20, 3, 8));

        let late = Event::pointer(1000, 0x1020, 8);
        assert_eq!(view.visible_events(&index, Some(&late)).len(), 1);
    }

    #[test]
    fn test_region_markers() {
        let index = index_with(&[
            (0, 0x1000, 4, EventKind::Read),
            (0, 0x2000, 4, EventKind::Read),
            (0, 0x9000, 4, EventKind::Read),
        ]);
        let view = Viewport::new(0x3000, 10);
        assert_eq!(
            view.region_markers(&index),
            vec![
                RegionMarker {
                    x: 0,
                    address: 0x1000
                },
                RegionMarker {
                    x: 0x2000,
                    address: 0x9000
                },
            ]
        );
    }

    #[test]
    fn test_pointer_selection() {
        let index = index_with(&[
            (0, 0x1000, 4, EventKind::Read),
            (0, 0x5000, 4, EventKind::Read),
        ]);
        let view = Viewport::new(0x2000, 100);

        let forward = view.pointer_event(&index, 16.0, 4.0, 32.0).unwrap();
        assert_eq!((forward.address, forward.size, forward.time), (0x1010, 0x11, 4));

        let backward = view.pointer_event(&index, 32.0, 4.0, 16.0).unwrap();
        assert_eq!((backward.address, backward.size), (0x1010, 0x11));

        let clamped = view.pointer_event(&index, 0.0, 0.0, 2000.0).unwrap();
        assert_eq!((clamped.address, clamped.size), (0x1000, POINTER_MAX_SIZE));

        // backwards across the gap: trimmed to the page of the drag origin
        let trimmed = view.pointer_event(&index, 4352.0, 0.0, 4080.0).unwrap();
        assert_eq!((trimmed.address, trimmed.size), (0x5000, 0x101));

        assert!(view.pointer_event(&index, 0.0, 0.0, 0x3000 as f64).is_none());
    }
}
