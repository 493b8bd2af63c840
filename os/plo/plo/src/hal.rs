//! # Board Interface
//!
//! Everything board specific the core needs: console, physical memory,
//! the attribute policy of `map`, the kernel address translation and the
//! final jump.

use core::fmt;
use plo_elf::ProgramHeader;
use plo_info::attributes::MapAttributes;
use plo_memory::{PhysicalAddress, PhysicalMemory};

pub trait Hal {
    /// Console for command output and diagnostic dumps.
    fn console(&mut self) -> &mut dyn fmt::Write;

    /// Physical memory the loaders write into.
    fn memory(&mut self) -> &mut dyn PhysicalMemory;

    /// Resolve the attribute argument of `map`.
    fn map_attributes(&self, attrs: &str) -> Option<MapAttributes> {
        MapAttributes::parse_letters(attrs)
    }

    /// Physical address a kernel segment is placed at.
    fn kernel_address(&self, ph: &ProgramHeader) -> PhysicalAddress {
        PhysicalAddress::new(plo_elf::paddr(ph))
    }

    /// Kernel file requested from framed devices by a bare `kernel`.
    fn kernel_name(&self) -> &'static str {
        "phoenix.elf"
    }

    /// Code, data and stack of the running loader; reserved at start.
    fn loader_footprint(&self) -> Option<(PhysicalAddress, u64)> {
        None
    }

    /// Default syspage location; `syspage <address>` overrides it.
    fn syspage_address(&self) -> Option<PhysicalAddress> {
        None
    }

    /// Jump to the kernel. Does not return on hardware; hosted
    /// implementations record the call and return.
    fn launch(&mut self, entry: PhysicalAddress, syspage: PhysicalAddress);
}
