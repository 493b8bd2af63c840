use crate::PhysicalAddress;
use core::ptr;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error("The range {addr}+{len:#x} is not backed by accessible memory")]
    OutOfRange { addr: PhysicalAddress, len: usize },
    #[error("The address {0} does not fit the CPU pointer width")]
    AddressWidth(PhysicalAddress),
}

/// Byte-granular access to physical memory.
///
/// Implementations must either transfer the whole range or fail without
/// a partial transfer being reported as success.
pub trait PhysicalMemory {
    /// Copy `data` to `addr`.
    ///
    /// # Errors
    /// Returns [`MemoryError`] if the range is not writable.
    fn write(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<(), MemoryError>;

    /// Fill `buf` from `addr`.
    ///
    /// # Errors
    /// Returns [`MemoryError`] if the range is not readable.
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> Result<(), MemoryError>;
}

/// Direct pointer access to identity-mapped physical memory.
pub struct RawMemory {
    _private: (),
}

impl RawMemory {
    /// # Safety
    /// Physical memory must be identity mapped (or the MMU disabled) and the
    /// caller must only hand out addresses that belong to RAM the loader owns.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn pointer(addr: PhysicalAddress, len: usize) -> Result<usize, MemoryError> {
        let start = usize::try_from(addr.as_u64()).map_err(|_| MemoryError::AddressWidth(addr))?;
        start
            .checked_add(len)
            .ok_or(MemoryError::OutOfRange { addr, len })?;
        Ok(start)
    }
}

impl PhysicalMemory for RawMemory {
    fn write(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<(), MemoryError> {
        let dst = Self::pointer(addr, data.len())? as *mut u8;
        // SAFETY: guaranteed by the contract of `RawMemory::new`.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> Result<(), MemoryError> {
        let src = Self::pointer(addr, buf.len())? as *const u8;
        // SAFETY: guaranteed by the contract of `RawMemory::new`.
        unsafe {
            ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}
