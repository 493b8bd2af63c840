//! # RAM Storage Backend
//!
//! Serves images that already sit in CPU-addressable memory: an initrd
//! placed by an earlier stage, a memory-mapped NOR window, or a test buffer.
//! Each minor is one region with a fixed CPU address, so the backend can
//! answer [`Device::map`] requests with execute-in-place addresses.

extern crate alloc;

use crate::device::{Device, MapRequest, Mapping};
use crate::PhfsError;
use alloc::vec::Vec;
use plo_info::attributes::MapAttributes;
use plo_memory::PhysicalAddress;

struct Region<B> {
    base: PhysicalAddress,
    attrs: MapAttributes,
    bytes: B,
}

/// Memory-backed storage device.
pub struct RamStorage<B> {
    regions: Vec<Region<B>>,
    syncs: usize,
}

impl<B> Default for RamStorage<B> {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            syncs: 0,
        }
    }
}

impl<B> RamStorage<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the next minor: `bytes` visible to the CPU at `base` with `attrs`.
    #[must_use]
    pub fn with_region(mut self, base: PhysicalAddress, attrs: MapAttributes, bytes: B) -> Self {
        self.regions.push(Region { base, attrs, bytes });
        self
    }

    /// Number of regions (minors) served.
    #[must_use]
    pub fn minors(&self) -> u32 {
        u32::try_from(self.regions.len()).unwrap_or(u32::MAX)
    }

    /// Number of `sync` calls received.
    #[must_use]
    pub const fn sync_count(&self) -> usize {
        self.syncs
    }

    fn region(&mut self, minor: u32) -> Result<&mut Region<B>, PhfsError> {
        self.regions.get_mut(minor as usize).ok_or(PhfsError::Io)
    }
}

impl<B> Device for RamStorage<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    fn init(&mut self, minor: u32) -> Result<(), PhfsError> {
        self.region(minor).map(|_| ())
    }

    fn done(&mut self, _minor: u32) -> Result<(), PhfsError> {
        Ok(())
    }

    fn read(
        &mut self,
        minor: u32,
        offs: u64,
        buf: &mut [u8],
        _timeout_ms: u32,
    ) -> Result<usize, PhfsError> {
        let bytes = self.region(minor)?.bytes.as_ref();
        let start = usize::try_from(offs).map_err(|_| PhfsError::Io)?;
        if start >= bytes.len() {
            return Ok(0);
        }
        let len = buf.len().min(bytes.len() - start);
        buf[..len].copy_from_slice(&bytes[start..start + len]);
        Ok(len)
    }

    fn write(&mut self, minor: u32, offs: u64, buf: &[u8]) -> Result<usize, PhfsError> {
        let bytes = self.region(minor)?.bytes.as_mut();
        let start = usize::try_from(offs).map_err(|_| PhfsError::Io)?;
        if start >= bytes.len() {
            return Ok(0);
        }
        let len = buf.len().min(bytes.len() - start);
        bytes[start..start + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn erase(&mut self, minor: u32, offs: u64, len: u64, _flags: u32) -> Result<u64, PhfsError> {
        let bytes = self.region(minor)?.bytes.as_mut();
        let start = usize::try_from(offs).map_err(|_| PhfsError::Io)?;
        let len = usize::try_from(len).map_err(|_| PhfsError::Io)?;
        let end = start.saturating_add(len).min(bytes.len());
        if start >= end {
            return Ok(0);
        }
        bytes[start..end].fill(0xff);
        Ok((end - start) as u64)
    }

    fn sync(&mut self, minor: u32) -> Result<(), PhfsError> {
        self.region(minor)?;
        self.syncs += 1;
        Ok(())
    }

    fn map(&mut self, minor: u32, req: &MapRequest) -> Result<Mapping, PhfsError> {
        let region = self.region(minor)?;
        if !req.mode.is_subset_of(region.attrs) || !req.mode.is_subset_of(req.map_attr) {
            return Err(PhfsError::IncompatibleMode);
        }

        let len = region.bytes.as_ref().len() as u64;
        let in_device = req.offs.checked_add(req.size).is_some_and(|end| end <= len);
        let Some(addr) = region.base.checked_add(req.offs) else {
            return Ok(Mapping::NotMappable);
        };
        let in_map = addr.distance_from(req.map_start).is_some_and(|rel| {
            rel.checked_add(req.size)
                .is_some_and(|end| end <= req.map_size)
        });

        if in_device && in_map {
            Ok(Mapping::Mappable(addr))
        } else {
            Ok(Mapping::NotMappable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flash() -> RamStorage<Vec<u8>> {
        let attrs = MapAttributes::parse_letters("rx").unwrap();
        RamStorage::new().with_region(PhysicalAddress::new(0x6000_0000), attrs, (0..=255).collect())
    }

    fn request(offs: u64, size: u64, mode: &str, map: (u64, u64), map_attr: &str) -> MapRequest {
        MapRequest {
            offs,
            size,
            mode: MapAttributes::parse_letters(mode).unwrap(),
            map_start: PhysicalAddress::new(map.0),
            map_size: map.1,
            map_attr: MapAttributes::parse_letters(map_attr).unwrap(),
        }
    }

    #[test]
    fn reads_are_clamped_to_region() {
        let mut dev = flash();
        let mut buf = [0u8; 8];
        assert_eq!(dev.read(0, 252, &mut buf, 0).unwrap(), 4);
        assert_eq!(&buf[..4], &[252, 253, 254, 255]);
        assert_eq!(dev.read(0, 256, &mut buf, 0).unwrap(), 0);
        assert_eq!(dev.read(1, 0, &mut buf, 0), Err(PhfsError::Io));
    }

    #[test]
    fn map_inside_destination_is_mappable() {
        let mut dev = flash();
        let m = dev
            .map(0, &request(0x10, 0x20, "rx", (0x6000_0000, 0x1000), "rx"))
            .unwrap();
        assert_eq!(m, Mapping::Mappable(PhysicalAddress::new(0x6000_0010)));
    }

    #[test]
    fn map_outside_destination_needs_copy() {
        let mut dev = flash();
        let m = dev
            .map(0, &request(0, 0x20, "rx", (0x8000_0000, 0x1000), "rwx"))
            .unwrap();
        assert_eq!(m, Mapping::NotMappable);
    }

    #[test]
    fn map_with_incompatible_mode_fails() {
        let mut dev = flash();
        assert_eq!(
            dev.map(0, &request(0, 0x20, "rw", (0x6000_0000, 0x1000), "rwx")),
            Err(PhfsError::IncompatibleMode)
        );
        assert_eq!(
            dev.map(0, &request(0, 0x20, "rx", (0x6000_0000, 0x1000), "r")),
            Err(PhfsError::IncompatibleMode)
        );
    }

    #[test]
    fn erase_fills_with_ones() {
        let mut dev = flash();
        assert_eq!(dev.erase(0, 250, 100, 0).unwrap(), 6);
        let mut buf = [0u8; 6];
        dev.read(0, 250, &mut buf, 0).unwrap();
        assert_eq!(buf, [0xff; 6]);
    }
}
