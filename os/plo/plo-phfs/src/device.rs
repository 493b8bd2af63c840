//! # Backend Devices
//!
//! Every transport (UART, USB CDC, NOR/NAND flash, RAM disk) implements
//! [`Device`] once per major number and serves all of its minors. The
//! [`DeviceManager`] probes them and routes calls by `(major, minor)`.

extern crate alloc;

use crate::PhfsError;
use alloc::boxed::Box;
use alloc::vec::Vec;
use log::{debug, warn};
use plo_info::attributes::MapAttributes;
use plo_memory::PhysicalAddress;

/// Backend class.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Major {
    Uart = 0,
    Usb = 1,
    Storage = 2,
    Tty = 3,
    Ram = 4,
    NandData = 5,
    NandMeta = 6,
    NandRaw = 7,
}

impl Major {
    #[must_use]
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Uart,
            1 => Self::Usb,
            2 => Self::Storage,
            3 => Self::Tty,
            4 => Self::Ram,
            5 => Self::NandData,
            6 => Self::NandMeta,
            7 => Self::NandRaw,
            _ => return None,
        })
    }
}

/// Outcome of asking a backend whether a device range can be used in place.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Mapping {
    /// The bytes are reachable at this CPU address, which lies inside the
    /// destination map; no copy is needed.
    Mappable(PhysicalAddress),
    /// The caller has to copy the bytes.
    NotMappable,
}

/// A device mapping request; the device range is `[offs, offs + size)`.
#[derive(Debug, Clone, Copy)]
pub struct MapRequest {
    pub offs: u64,
    pub size: u64,
    /// Access the caller needs on the mapped bytes.
    pub mode: MapAttributes,
    pub map_start: PhysicalAddress,
    pub map_size: u64,
    /// Attributes of the destination map.
    pub map_attr: MapAttributes,
}

/// Capability set of a backend. `minor` selects the instance.
pub trait Device {
    /// Probe and initialize instance `minor`.
    ///
    /// # Errors
    /// Fails if the instance is absent or does not come up.
    fn init(&mut self, minor: u32) -> Result<(), PhfsError>;

    /// Release instance `minor` before the kernel takes over.
    ///
    /// # Errors
    /// Backend specific.
    fn done(&mut self, minor: u32) -> Result<(), PhfsError>;

    /// Read up to `buf.len()` bytes at `offs`. Stream devices ignore `offs`.
    /// Returns `Ok(0)` if nothing arrived within `timeout_ms`.
    ///
    /// # Errors
    /// Backend specific.
    fn read(
        &mut self,
        minor: u32,
        offs: u64,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize, PhfsError>;

    /// # Errors
    /// Backend specific.
    fn write(&mut self, minor: u32, offs: u64, buf: &[u8]) -> Result<usize, PhfsError>;

    /// # Errors
    /// Backend specific; [`PhfsError::Unsupported`] for devices without erase.
    fn erase(&mut self, minor: u32, offs: u64, len: u64, flags: u32) -> Result<u64, PhfsError> {
        let _ = (minor, offs, len, flags);
        Err(PhfsError::Unsupported)
    }

    /// Flush pending writes.
    ///
    /// # Errors
    /// Backend specific.
    fn sync(&mut self, minor: u32) -> Result<(), PhfsError>;

    /// Decide whether `req` can be served in place.
    ///
    /// # Errors
    /// [`PhfsError::IncompatibleMode`] if the requested mode conflicts with
    /// the device or the destination map.
    fn map(&mut self, minor: u32, req: &MapRequest) -> Result<Mapping, PhfsError> {
        let _ = (minor, req);
        Ok(Mapping::NotMappable)
    }
}

struct Backend {
    major: Major,
    minors: u32,
    probed: Vec<bool>,
    dev: Box<dyn Device>,
}

/// Probed backends, one per major.
#[derive(Default)]
pub struct DeviceManager {
    backends: Vec<Backend>,
}

impl DeviceManager {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Register the backend serving `minors` instances of `major`.
    ///
    /// # Errors
    /// [`PhfsError::MajorTaken`] if `major` already has a backend.
    pub fn register(
        &mut self,
        major: Major,
        minors: u32,
        dev: Box<dyn Device>,
    ) -> Result<(), PhfsError> {
        if self.backends.iter().any(|b| b.major == major) {
            return Err(PhfsError::MajorTaken(major));
        }
        self.backends.push(Backend {
            major,
            minors,
            probed: alloc::vec![false; minors as usize],
            dev,
        });
        Ok(())
    }

    /// Initialize every registered instance; returns how many came up.
    pub fn init_all(&mut self) -> usize {
        let mut up = 0;
        for b in &mut self.backends {
            for minor in 0..b.minors {
                match b.dev.init(minor) {
                    Ok(()) => {
                        b.probed[minor as usize] = true;
                        up += 1;
                        debug!("device {:?}.{minor} initialized", b.major);
                    }
                    Err(e) => warn!("device {:?}.{minor} not available: {e}", b.major),
                }
            }
        }
        up
    }

    /// Release every initialized instance.
    pub fn done_all(&mut self) {
        for b in &mut self.backends {
            for minor in 0..b.minors {
                if b.probed[minor as usize] {
                    if let Err(e) = b.dev.done(minor) {
                        warn!("device {:?}.{minor} release failed: {e}", b.major);
                    }
                    b.probed[minor as usize] = false;
                }
            }
        }
    }

    /// `true` if `major.minor` was successfully initialized.
    #[must_use]
    pub fn check(&self, major: Major, minor: u32) -> bool {
        self.backends
            .iter()
            .find(|b| b.major == major)
            .and_then(|b| b.probed.get(minor as usize).copied())
            .unwrap_or(false)
    }

    /// The backend of an initialized instance.
    ///
    /// # Errors
    /// [`PhfsError::NoDevice`] if the instance is unknown or not initialized.
    pub fn get(&mut self, major: Major, minor: u32) -> Result<&mut dyn Device, PhfsError> {
        if !self.check(major, minor) {
            return Err(PhfsError::NoDevice { major, minor });
        }
        let backend = self
            .backends
            .iter_mut()
            .find(|b| b.major == major)
            .ok_or(PhfsError::NoDevice { major, minor })?;
        Ok(backend.dev.as_mut())
    }
}
