extern crate alloc;

use crate::{MemoryError, PhysicalAddress, PhysicalMemory};
use alloc::vec;
use alloc::vec::Vec;

/// Hosted stand-in for physical memory: a set of owned, non-overlapping
/// byte windows, each starting at a fixed physical address.
///
/// Accesses that are not fully contained in a single window fail.
#[derive(Debug, Default)]
pub struct WindowMemory {
    windows: Vec<(PhysicalAddress, Vec<u8>)>,
    writes: usize,
}

impl WindowMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Back `[base, base + len)` with zeroed bytes.
    #[must_use]
    pub fn with_window(mut self, base: u64, len: usize) -> Self {
        self.windows.push((PhysicalAddress::new(base), vec![0; len]));
        self
    }

    /// Number of successful [`PhysicalMemory::write`] calls so far.
    #[must_use]
    pub const fn write_count(&self) -> usize {
        self.writes
    }

    /// Borrow `len` bytes at `addr`.
    ///
    /// # Panics
    /// Panics if the range is not backed; intended for test assertions.
    #[must_use]
    pub fn bytes(&self, addr: u64, len: usize) -> &[u8] {
        let (window, offset) = self
            .locate(PhysicalAddress::new(addr), len)
            .expect("range is not backed by a window");
        &self.windows[window].1[offset..offset + len]
    }

    fn locate(&self, addr: PhysicalAddress, len: usize) -> Option<(usize, usize)> {
        self.windows.iter().enumerate().find_map(|(i, (base, data))| {
            let offset = usize::try_from(addr.distance_from(*base)?).ok()?;
            let end = offset.checked_add(len)?;
            (end <= data.len()).then_some((i, offset))
        })
    }
}

impl PhysicalMemory for WindowMemory {
    fn write(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<(), MemoryError> {
        let (window, offset) = self
            .locate(addr, data.len())
            .ok_or(MemoryError::OutOfRange { addr, len: data.len() })?;
        self.windows[window].1[offset..offset + data.len()].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }

    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> Result<(), MemoryError> {
        let (window, offset) = self
            .locate(addr, buf.len())
            .ok_or(MemoryError::OutOfRange { addr, len: buf.len() })?;
        buf.copy_from_slice(&self.windows[window].1[offset..offset + buf.len()]);
        Ok(())
    }
}
