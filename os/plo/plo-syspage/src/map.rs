//! # Memory Maps
//!
//! A map is a named physical range with a bump cursor (`top`). Reservations
//! that intersect the map are kept clipped, sorted and merged, so the
//! collision check of a write is a single scan.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use plo_info::attributes::MapAttributes;
use plo_memory::PhysicalAddress;

/// A reserved byte range `[start, end)`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Entry {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

impl Entry {
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn intersects(&self, start: PhysicalAddress, end: PhysicalAddress) -> bool {
        self.start < end && start < self.end
    }

    #[must_use]
    pub fn contains(&self, addr: PhysicalAddress) -> bool {
        self.start <= addr && addr < self.end
    }
}

/// A named memory map.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    pub(crate) name: String,
    pub(crate) id: u8,
    pub(crate) start: PhysicalAddress,
    pub(crate) end: PhysicalAddress,
    pub(crate) attr: MapAttributes,
    pub(crate) top: PhysicalAddress,
    pub(crate) entries: Vec<Entry>,
}

impl MemoryMap {
    pub(crate) fn new(
        name: &str,
        id: u8,
        start: PhysicalAddress,
        end: PhysicalAddress,
        attr: MapAttributes,
    ) -> Self {
        Self {
            name: String::from(name),
            id,
            start,
            end,
            attr,
            top: start,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.end
    }

    #[must_use]
    pub const fn attr(&self) -> MapAttributes {
        self.attr
    }

    #[must_use]
    pub const fn top(&self) -> PhysicalAddress {
        self.top
    }

    /// Reserved ranges inside this map, sorted and non-adjacent.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    #[must_use]
    pub fn free_size(&self) -> u64 {
        self.end.as_u64() - self.top.as_u64()
    }

    #[must_use]
    pub fn overlaps(&self, start: PhysicalAddress, end: PhysicalAddress) -> bool {
        self.start < end && start < self.end
    }

    #[must_use]
    pub fn contains(&self, addr: PhysicalAddress) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Record the part of `entry` that falls into this map and push `top`
    /// past any reservation covering it.
    pub(crate) fn absorb(&mut self, entry: Entry) {
        let start = entry.start.max(self.start);
        let end = entry.end.min(self.end);
        if start >= end {
            return;
        }

        let mut merged = Entry::new(start, end);
        self.entries.retain(|e| {
            if e.start <= merged.end && merged.start <= e.end {
                merged.start = merged.start.min(e.start);
                merged.end = merged.end.max(e.end);
                false
            } else {
                true
            }
        });
        let pos = self
            .entries
            .iter()
            .position(|e| e.start > merged.start)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, merged);

        self.skip_reserved();
    }

    /// Advance `top` while it sits inside a reservation.
    pub(crate) fn skip_reserved(&mut self) {
        let top = &mut self.top;
        while let Some(e) = self.entries.iter().find(|e| e.contains(*top)) {
            *top = e.end;
        }
    }

    /// First reservation colliding with `[top, top + len)`.
    pub(crate) fn collision(&self, len: u64) -> Option<Entry> {
        let end = self.top + len;
        self.entries
            .iter()
            .find(|e| e.intersects(self.top, end))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    fn map() -> MemoryMap {
        MemoryMap::new("ddr", 0, pa(0x1000), pa(0x9000), MapAttributes::read_exec())
    }

    #[test]
    fn absorb_clips_and_merges() {
        let mut m = map();
        m.absorb(Entry::new(pa(0x0), pa(0x800)));
        assert!(m.entries().is_empty());

        m.absorb(Entry::new(pa(0x3000), pa(0x4000)));
        m.absorb(Entry::new(pa(0x8800), pa(0xa000)));
        m.absorb(Entry::new(pa(0x4000), pa(0x5000)));
        assert_eq!(
            m.entries(),
            &[
                Entry::new(pa(0x3000), pa(0x5000)),
                Entry::new(pa(0x8800), pa(0x9000))
            ]
        );
        assert_eq!(m.top(), pa(0x1000));
    }

    #[test]
    fn reservation_at_front_moves_top() {
        let mut m = map();
        m.absorb(Entry::new(pa(0x2000), pa(0x3000)));
        m.absorb(Entry::new(pa(0x800), pa(0x2000)));
        assert_eq!(m.top(), pa(0x3000));
        assert_eq!(m.entries(), &[Entry::new(pa(0x1000), pa(0x3000))]);
    }

    #[test]
    fn collision_is_found() {
        let mut m = map();
        m.absorb(Entry::new(pa(0x1800), pa(0x1900)));
        assert_eq!(m.collision(0x800), None);
        assert_eq!(m.collision(0x801), Some(Entry::new(pa(0x1800), pa(0x1900))));
    }
}
