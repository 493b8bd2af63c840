//! # PHFS Dispatcher
//!
//! Device aliases, file aliases and the handle arena. Every open handle
//! records the device alias it was opened on (`pd`) and the per-protocol
//! state needed to serve it.

extern crate alloc;

use crate::PhfsError;
use crate::device::{DeviceManager, Major, MapRequest, Mapping};
use crate::phoenixd::Client;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use log::{debug, info, warn};
use plo_info::attributes::MapAttributes;
use plo_info::config::{ALIAS_LEN, DEFAULT_TIMEOUT_MS, MAX_DEVICES, MAX_FILES, PHFS_HANDLERS};
use plo_memory::PhysicalAddress;

/// Transport protocol spoken on top of a device.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum Protocol {
    /// Offsets go straight to the backend.
    #[default]
    Raw,
    /// Requests are framed for the host `phoenixd` daemon.
    Phoenixd,
}

impl Protocol {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "raw" => Some(Self::Raw),
            "phoenixd" => Some(Self::Phoenixd),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Phoenixd => "phoenixd",
        }
    }
}

/// A byte window `[addr, addr + size)` on a raw device.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Window {
    pub addr: u64,
    pub size: u64,
}

impl Window {
    /// Clamp `len` bytes at `offs` to the window; returns the device offset
    /// and the usable length.
    fn clamp(self, offs: u64, len: u64) -> (u64, u64) {
        if offs >= self.size {
            return (self.addr + self.size, 0);
        }
        (self.addr + offs, len.min(self.size - offs))
    }
}

struct DeviceEntry {
    alias: String,
    major: Major,
    minor: u32,
    protocol: Protocol,
}

struct FileEntry {
    alias: String,
    window: Window,
}

#[derive(Debug, Clone, Copy)]
enum OpenKind {
    Raw { window: Option<Window> },
    Phoenixd { fd: u32 },
}

#[derive(Debug, Clone, Copy)]
struct OpenState {
    pd: usize,
    kind: OpenKind,
}

#[derive(Default)]
struct Slot {
    generation: u16,
    state: Option<OpenState>,
}

/// An open PHFS file.
///
/// Handles are neither `Clone` nor `Copy`; [`Phfs::close`] consumes them.
/// A handle whose slot was closed and reused is rejected with
/// [`PhfsError::InvalidHandle`].
#[derive(Debug, Eq, PartialEq)]
pub struct Handle {
    slot: u8,
    generation: u16,
}

/// The PHFS layer: backends, aliases and open handles.
pub struct Phfs {
    devs: DeviceManager,
    aliases: Vec<DeviceEntry>,
    files: Vec<FileEntry>,
    slots: [Slot; PHFS_HANDLERS],
}

fn check_alias(alias: &str) -> Result<(), PhfsError> {
    if alias.is_empty() || alias.len() > ALIAS_LEN {
        return Err(PhfsError::BadAlias);
    }
    Ok(())
}

impl Phfs {
    /// Take over probed backends.
    #[must_use]
    pub fn new(devs: DeviceManager) -> Self {
        Self {
            devs,
            aliases: Vec::with_capacity(MAX_DEVICES),
            files: Vec::with_capacity(MAX_FILES),
            slots: Default::default(),
        }
    }

    pub const fn devices(&self) -> &DeviceManager {
        &self.devs
    }

    pub const fn devices_mut(&mut self) -> &mut DeviceManager {
        &mut self.devs
    }

    /// Register `alias` for the initialized device `major.minor`.
    ///
    /// # Errors
    /// [`PhfsError::AliasTaken`], [`PhfsError::RegistryFull`],
    /// [`PhfsError::BadAlias`] or [`PhfsError::NoDevice`].
    pub fn reg_dev(
        &mut self,
        alias: &str,
        major: Major,
        minor: u32,
        protocol: Protocol,
    ) -> Result<(), PhfsError> {
        check_alias(alias)?;
        if self.aliases.iter().any(|d| d.alias == alias) {
            return Err(PhfsError::AliasTaken);
        }
        if self.aliases.len() >= MAX_DEVICES {
            return Err(PhfsError::RegistryFull);
        }
        if !self.devs.check(major, minor) {
            return Err(PhfsError::NoDevice { major, minor });
        }

        info!("phfs: {alias} -> {major:?}.{minor} ({})", protocol.name());
        self.aliases.push(DeviceEntry {
            alias: String::from(alias),
            major,
            minor,
            protocol,
        });
        Ok(())
    }

    /// Name the window `[addr, addr + size)` of a raw device.
    ///
    /// # Errors
    /// [`PhfsError::AliasTaken`], [`PhfsError::RegistryFull`] or
    /// [`PhfsError::BadAlias`].
    pub fn reg_file(&mut self, alias: &str, addr: u64, size: u64) -> Result<(), PhfsError> {
        check_alias(alias)?;
        if self.files.iter().any(|f| f.alias == alias) {
            return Err(PhfsError::AliasTaken);
        }
        if self.files.len() >= MAX_FILES {
            return Err(PhfsError::RegistryFull);
        }
        if addr.checked_add(size).is_none() {
            return Err(PhfsError::BadAlias);
        }

        debug!("phfs: file {alias} at {addr:#x}+{size:#x}");
        self.files.push(FileEntry {
            alias: String::from(alias),
            window: Window { addr, size },
        });
        Ok(())
    }

    /// Protocol of a registered device alias.
    ///
    /// # Errors
    /// [`PhfsError::UnknownAlias`].
    pub fn protocol(&self, alias: &str) -> Result<Protocol, PhfsError> {
        self.find_dev(alias).map(|pd| self.aliases[pd].protocol)
    }

    fn find_dev(&self, alias: &str) -> Result<usize, PhfsError> {
        self.aliases
            .iter()
            .position(|d| d.alias == alias)
            .ok_or(PhfsError::UnknownAlias)
    }

    fn alloc_slot(&mut self, state: OpenState) -> Result<Handle, PhfsError> {
        let (idx, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.state.is_none())
            .ok_or(PhfsError::HandlesExhausted)?;
        slot.state = Some(state);
        Ok(Handle {
            slot: u8::try_from(idx).map_err(|_| PhfsError::HandlesExhausted)?,
            generation: slot.generation,
        })
    }

    fn state(&self, handle: &Handle) -> Result<OpenState, PhfsError> {
        let slot = self
            .slots
            .get(usize::from(handle.slot))
            .ok_or(PhfsError::InvalidHandle)?;
        if slot.generation != handle.generation {
            return Err(PhfsError::InvalidHandle);
        }
        slot.state.ok_or(PhfsError::InvalidHandle)
    }

    /// Open `name` on the device `alias`.
    ///
    /// On raw devices `None` opens the whole device and `Some(file)` opens a
    /// window registered with [`Phfs::reg_file`]. On phoenixd devices the
    /// name is sent to the host.
    ///
    /// # Errors
    /// [`PhfsError::UnknownAlias`], [`PhfsError::UnknownFile`],
    /// [`PhfsError::HandlesExhausted`] or a transport error.
    pub fn open(&mut self, alias: &str, name: Option<&str>, flags: u32) -> Result<Handle, PhfsError> {
        let pd = self.find_dev(alias)?;
        if self.slots.iter().all(|s| s.state.is_some()) {
            return Err(PhfsError::HandlesExhausted);
        }

        let kind = match self.aliases[pd].protocol {
            Protocol::Raw => {
                let window = match name {
                    None => None,
                    Some(file) => Some(
                        self.files
                            .iter()
                            .find(|f| f.alias == file)
                            .map(|f| f.window)
                            .ok_or(PhfsError::UnknownFile)?,
                    ),
                };
                OpenKind::Raw { window }
            }
            Protocol::Phoenixd => {
                let file = name.ok_or(PhfsError::UnknownFile)?;
                let (major, minor) = (self.aliases[pd].major, self.aliases[pd].minor);
                let dev = self.devs.get(major, minor)?;
                let fd = Client::new(dev, minor).open(file, flags)?;
                OpenKind::Phoenixd { fd }
            }
        };

        debug!("phfs: open {alias}:{}", name.unwrap_or("<raw>"));
        self.alloc_slot(OpenState { pd, kind })
    }

    /// Open the window `[window.addr, window.addr + window.size)` of a raw
    /// device without registering a file alias.
    ///
    /// # Errors
    /// [`PhfsError::UnknownAlias`], [`PhfsError::Unsupported`] on a framed
    /// device or [`PhfsError::HandlesExhausted`].
    pub fn open_window(&mut self, alias: &str, window: Window) -> Result<Handle, PhfsError> {
        let pd = self.find_dev(alias)?;
        if self.aliases[pd].protocol != Protocol::Raw {
            return Err(PhfsError::Unsupported);
        }
        if window.addr.checked_add(window.size).is_none() {
            return Err(PhfsError::BadAlias);
        }
        self.alloc_slot(OpenState {
            pd,
            kind: OpenKind::Raw {
                window: Some(window),
            },
        })
    }

    /// Read into `buf` starting at `offs`. File windows clamp the transfer
    /// to the registered size.
    ///
    /// # Errors
    /// [`PhfsError::InvalidHandle`] or a backend error.
    pub fn read(&mut self, handle: &Handle, offs: u64, buf: &mut [u8]) -> Result<usize, PhfsError> {
        let OpenState { pd, kind } = self.state(handle)?;
        let (major, minor) = (self.aliases[pd].major, self.aliases[pd].minor);
        let dev = self.devs.get(major, minor)?;

        match kind {
            OpenKind::Raw { window } => {
                let (at, len) = clamp(window, offs, buf.len());
                if len == 0 {
                    return Ok(0);
                }
                dev.read(minor, at, &mut buf[..len], DEFAULT_TIMEOUT_MS)
            }
            OpenKind::Phoenixd { fd } => {
                let mut client = Client::new(dev, minor);
                let mut done = 0;
                while done < buf.len() {
                    let n = client.read(fd, offs + done as u64, &mut buf[done..])?;
                    if n == 0 {
                        break;
                    }
                    done += n;
                }
                Ok(done)
            }
        }
    }

    /// Write `buf` at `offs`, clamped like [`Phfs::read`].
    ///
    /// # Errors
    /// [`PhfsError::InvalidHandle`] or a backend error.
    pub fn write(&mut self, handle: &Handle, offs: u64, buf: &[u8]) -> Result<usize, PhfsError> {
        let OpenState { pd, kind } = self.state(handle)?;
        let (major, minor) = (self.aliases[pd].major, self.aliases[pd].minor);
        let dev = self.devs.get(major, minor)?;

        match kind {
            OpenKind::Raw { window } => {
                let (at, len) = clamp(window, offs, buf.len());
                if len == 0 {
                    return Ok(0);
                }
                dev.write(minor, at, &buf[..len])
            }
            OpenKind::Phoenixd { fd } => {
                let mut client = Client::new(dev, minor);
                let mut done = 0;
                while done < buf.len() {
                    let n = client.write(fd, offs + done as u64, &buf[done..])?;
                    if n == 0 {
                        break;
                    }
                    done += n;
                }
                Ok(done)
            }
        }
    }

    /// Erase `len` bytes at `offs` of a raw handle.
    ///
    /// # Errors
    /// [`PhfsError::Unsupported`] on framed devices or backends without erase.
    pub fn erase(&mut self, handle: &Handle, offs: u64, len: u64, flags: u32) -> Result<u64, PhfsError> {
        let OpenState { pd, kind } = self.state(handle)?;
        let OpenKind::Raw { window } = kind else {
            return Err(PhfsError::Unsupported);
        };
        let (at, len) = match window {
            Some(w) => w.clamp(offs, len),
            None => (offs, len),
        };
        let (major, minor) = (self.aliases[pd].major, self.aliases[pd].minor);
        self.devs.get(major, minor)?.erase(minor, at, len, flags)
    }

    /// Ask whether `[offs, offs + size)` of the open file is reachable in
    /// place inside the map `[map_start, map_start + map_size)`.
    ///
    /// # Errors
    /// [`PhfsError::IncompatibleMode`] if `mode` conflicts with the device
    /// or with `map_attr`.
    #[allow(clippy::too_many_arguments)]
    pub fn map(
        &mut self,
        handle: &Handle,
        offs: u64,
        size: u64,
        mode: MapAttributes,
        map_start: PhysicalAddress,
        map_size: u64,
        map_attr: MapAttributes,
    ) -> Result<Mapping, PhfsError> {
        let OpenState { pd, kind } = self.state(handle)?;
        let OpenKind::Raw { window } = kind else {
            return Ok(Mapping::NotMappable);
        };
        let (at, len) = match window {
            Some(w) => w.clamp(offs, size),
            None => (offs, size),
        };
        if len < size {
            return Ok(Mapping::NotMappable);
        }

        let (major, minor) = (self.aliases[pd].major, self.aliases[pd].minor);
        let req = MapRequest {
            offs: at,
            size,
            mode,
            map_start,
            map_size,
            map_attr,
        };
        self.devs.get(major, minor)?.map(minor, &req)
    }

    /// Size of the open file.
    ///
    /// # Errors
    /// [`PhfsError::Unsupported`] for a whole raw device.
    pub fn stat(&mut self, handle: &Handle) -> Result<u64, PhfsError> {
        let OpenState { pd, kind } = self.state(handle)?;
        match kind {
            OpenKind::Raw { window: Some(w) } => Ok(w.size),
            OpenKind::Raw { window: None } => Err(PhfsError::Unsupported),
            OpenKind::Phoenixd { fd } => {
                let (major, minor) = (self.aliases[pd].major, self.aliases[pd].minor);
                let dev = self.devs.get(major, minor)?;
                Client::new(dev, minor).fstat(fd)
            }
        }
    }

    /// Release `handle` and sync its device.
    ///
    /// The handle is closed even if the sync fails; the failure is
    /// still reported.
    ///
    /// # Errors
    /// [`PhfsError::InvalidHandle`], or the close/sync failure.
    pub fn close(&mut self, handle: Handle) -> Result<(), PhfsError> {
        let OpenState { pd, kind } = self.state(&handle)?;
        let slot = &mut self.slots[usize::from(handle.slot)];
        slot.state = None;
        slot.generation = slot.generation.wrapping_add(1);

        let (major, minor) = (self.aliases[pd].major, self.aliases[pd].minor);
        let dev = self.devs.get(major, minor)?;
        let closed = match kind {
            OpenKind::Phoenixd { fd } => Client::new(&mut *dev, minor).close(fd),
            OpenKind::Raw { .. } => Ok(()),
        };
        let synced = dev.sync(minor);
        if let Err(e) = synced {
            warn!("phfs: sync of {} failed: {e}", self.aliases[pd].alias);
        }
        closed.and(synced)
    }

    /// Open a scoped session that closes its handle when dropped.
    ///
    /// # Errors
    /// As [`Phfs::open`].
    pub fn session(
        &mut self,
        alias: &str,
        name: Option<&str>,
        flags: u32,
    ) -> Result<Session<'_>, PhfsError> {
        let handle = self.open(alias, name, flags)?;
        Ok(Session {
            phfs: self,
            handle: Some(handle),
        })
    }

    /// Like [`Phfs::session`] for an unregistered raw window.
    ///
    /// # Errors
    /// As [`Phfs::open_window`].
    pub fn window_session(&mut self, alias: &str, window: Window) -> Result<Session<'_>, PhfsError> {
        let handle = self.open_window(alias, window)?;
        Ok(Session {
            phfs: self,
            handle: Some(handle),
        })
    }

    /// Number of handles currently open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state.is_some()).count()
    }

    /// List device aliases.
    ///
    /// # Errors
    /// Propagates console write errors.
    pub fn show_devices(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{:<16} {:>5} {:>5}  PROTOCOL", "ALIAS", "MAJOR", "MINOR")?;
        for d in &self.aliases {
            writeln!(
                out,
                "{:<16} {:>5} {:>5}  {}",
                d.alias,
                d.major as u32,
                d.minor,
                d.protocol.name()
            )?;
        }
        Ok(())
    }

    /// List file aliases.
    ///
    /// # Errors
    /// Propagates console write errors.
    pub fn show_files(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{:<16} {:>10} {:>10}", "FILE", "ADDRESS", "SIZE")?;
        for f in &self.files {
            writeln!(
                out,
                "{:<16} {:#010x} {:#010x}",
                f.alias, f.window.addr, f.window.size
            )?;
        }
        Ok(())
    }
}

fn clamp(window: Option<Window>, offs: u64, len: usize) -> (u64, usize) {
    match window {
        None => (offs, len),
        Some(w) => {
            let (at, n) = w.clamp(offs, len as u64);
            (at, usize::try_from(n).unwrap_or(len))
        }
    }
}

/// An open handle borrowed together with its [`Phfs`]; closes on drop.
pub struct Session<'a> {
    phfs: &'a mut Phfs,
    handle: Option<Handle>,
}

impl Session<'_> {
    fn handle(&self) -> Result<&Handle, PhfsError> {
        self.handle.as_ref().ok_or(PhfsError::InvalidHandle)
    }

    /// # Errors
    /// See [`Phfs::read`].
    pub fn read(&mut self, offs: u64, buf: &mut [u8]) -> Result<usize, PhfsError> {
        let handle = self.handle.as_ref().ok_or(PhfsError::InvalidHandle)?;
        self.phfs.read(handle, offs, buf)
    }

    /// Fill `buf` completely from `offs`.
    ///
    /// # Errors
    /// [`PhfsError::Io`] on a short read.
    pub fn read_exact(&mut self, offs: u64, buf: &mut [u8]) -> Result<(), PhfsError> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.read(offs + done as u64, &mut buf[done..])?;
            if n == 0 {
                return Err(PhfsError::Io);
            }
            done += n;
        }
        Ok(())
    }

    /// # Errors
    /// See [`Phfs::write`].
    pub fn write(&mut self, offs: u64, buf: &[u8]) -> Result<usize, PhfsError> {
        let handle = self.handle.as_ref().ok_or(PhfsError::InvalidHandle)?;
        self.phfs.write(handle, offs, buf)
    }

    /// # Errors
    /// See [`Phfs::erase`].
    pub fn erase(&mut self, offs: u64, len: u64, flags: u32) -> Result<u64, PhfsError> {
        let handle = self.handle.as_ref().ok_or(PhfsError::InvalidHandle)?;
        self.phfs.erase(handle, offs, len, flags)
    }

    /// # Errors
    /// See [`Phfs::map`].
    #[allow(clippy::too_many_arguments)]
    pub fn map(
        &mut self,
        offs: u64,
        size: u64,
        mode: MapAttributes,
        map_start: PhysicalAddress,
        map_size: u64,
        map_attr: MapAttributes,
    ) -> Result<Mapping, PhfsError> {
        let handle = self.handle.as_ref().ok_or(PhfsError::InvalidHandle)?;
        self.phfs
            .map(handle, offs, size, mode, map_start, map_size, map_attr)
    }

    /// # Errors
    /// See [`Phfs::stat`].
    pub fn stat(&mut self) -> Result<u64, PhfsError> {
        let handle = self.handle.as_ref().ok_or(PhfsError::InvalidHandle)?;
        self.phfs.stat(handle)
    }

    /// `true` while the session owns an open handle.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle().is_ok()
    }

    /// Close now and report the sync result.
    ///
    /// # Errors
    /// See [`Phfs::close`].
    pub fn close(mut self) -> Result<(), PhfsError> {
        let handle = self.handle.take().ok_or(PhfsError::InvalidHandle)?;
        self.phfs.close(handle)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.phfs.close(handle) {
                warn!("phfs: close on drop failed: {e}");
            }
        }
    }
}
