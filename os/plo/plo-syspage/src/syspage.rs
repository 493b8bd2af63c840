extern crate alloc;

use crate::SyspageError;
use crate::list::{parse_number, split_list};
use crate::map::{Entry, MemoryMap};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use log::{debug, info, warn};
use plo_info::attributes::MapAttributes;
use plo_info::config::{
    ARGS_LEN, CMDLINE_LEN, MAP_NAME_LEN, MAX_ENTRIES, MAX_MAPS, MAX_PARTITIONS, MAX_PROG_MAPS,
    MAX_PROGRAMS, MAX_SCHED_WINDOWS, PAGE_SIZE,
};
use plo_info::syspage::{
    ARGS_EXTRA_ARGV, KernelInfo, MapRecord, PartitionRecord, ProgramRecord, Record, Region,
    SYSPAGE_MAGIC, SchedWindowRecord, SyspageHeader, TableRef, align_table, fixed,
};
use plo_memory::{PhysicalAddress, PhysicalMemory};

/// Per-program flags stored in the syspage.
///
/// Layout (LSB→MSB):
/// - bit 0: exec, start the program at boot
/// - bit 1: no_copy, the image was verified in place and not copied; the
///   kernel has to verify it again before running it
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ProgramFlags {
    #[bits(1)]
    pub exec: bool,
    #[bits(1)]
    pub no_copy: bool,
    #[bits(30)]
    __: u32,
}

/// A registered program.
#[derive(Debug, Clone)]
pub struct Program {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
    pub imaps: Vec<u8>,
    pub dmaps: Vec<u8>,
    pub cmdline: [u8; CMDLINE_LEN],
    pub flags: ProgramFlags,
}

/// A registered partition.
#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub alloc: Vec<u8>,
    pub access: Vec<u8>,
}

/// Everything the kernel receives at hand-off, built up during boot.
pub struct Syspage {
    maps: Vec<MemoryMap>,
    entries: Vec<Entry>,
    progs: Vec<Program>,
    parts: Vec<Partition>,
    windows: Vec<SchedWindowRecord>,
    args: Vec<u8>,
    kernel: KernelInfo,
    address: Option<PhysicalAddress>,
    sealed: bool,
}

impl Default for Syspage {
    fn default() -> Self {
        Self::new()
    }
}

fn check_name(name: &str) -> Result<(), SyspageError> {
    if name.is_empty() || name.len() >= MAP_NAME_LEN {
        return Err(SyspageError::BadName);
    }
    Ok(())
}

impl Syspage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            maps: Vec::with_capacity(MAX_MAPS),
            entries: Vec::with_capacity(MAX_ENTRIES),
            progs: Vec::new(),
            parts: Vec::new(),
            windows: Vec::new(),
            args: Vec::with_capacity(ARGS_LEN),
            kernel: KernelInfo::default(),
            address: None,
            sealed: false,
        }
    }

    fn check_open(&self) -> Result<(), SyspageError> {
        if self.sealed {
            return Err(SyspageError::Sealed);
        }
        Ok(())
    }

    /// `true` once [`Syspage::save`] succeeded.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Register the map `[start, end)`.
    ///
    /// A name is taken if it begins with the full name of an existing map,
    /// so `"ddr2"` is refused once `"ddr"` exists. Reservations recorded so
    /// far are applied to the new map immediately.
    ///
    /// # Errors
    /// [`SyspageError::BadName`], [`SyspageError::NameTaken`],
    /// [`SyspageError::BadRange`], [`SyspageError::Overlap`] or
    /// [`SyspageError::Full`]; the registry is unchanged on error.
    pub fn add_map(
        &mut self,
        name: &str,
        start: PhysicalAddress,
        end: PhysicalAddress,
        attr: MapAttributes,
    ) -> Result<u8, SyspageError> {
        self.check_open()?;
        check_name(name)?;
        if start >= end {
            return Err(SyspageError::BadRange);
        }
        if self.maps.iter().any(|m| name.starts_with(m.name())) {
            return Err(SyspageError::NameTaken);
        }
        if let Some(m) = self.maps.iter().find(|m| m.overlaps(start, end)) {
            warn!("map {name} overlaps map {}", m.name());
            return Err(SyspageError::Overlap);
        }
        if self.maps.len() >= MAX_MAPS {
            return Err(SyspageError::Full);
        }

        let id = u8::try_from(self.maps.len()).map_err(|_| SyspageError::Full)?;
        let mut map = MemoryMap::new(name, id, start, end, attr);
        for &e in &self.entries {
            map.absorb(e);
        }
        info!("map {name}: {start}..{end} ({attr}), top {}", map.top());
        self.maps.push(map);
        Ok(id)
    }

    /// Record the reservation `[start, start + size)` and apply it to every map.
    ///
    /// # Errors
    /// [`SyspageError::BadRange`] for an empty or wrapping range,
    /// [`SyspageError::Full`] if no entry is left.
    pub fn add_entries(&mut self, start: PhysicalAddress, size: u64) -> Result<(), SyspageError> {
        self.check_open()?;
        let end = start
            .checked_add(size)
            .filter(|_| size != 0)
            .ok_or(SyspageError::BadRange)?;
        if self.entries.len() >= MAX_ENTRIES {
            return Err(SyspageError::Full);
        }

        debug!("reserved {start}..{end}");
        let entry = Entry::new(start, end);
        self.entries.push(entry);
        for map in &mut self.maps {
            map.absorb(entry);
        }
        Ok(())
    }

    /// Global reservations in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn maps(&self) -> impl ExactSizeIterator<Item = &MemoryMap> {
        self.maps.iter()
    }

    fn map_by_name(&self, name: &str) -> Result<&MemoryMap, SyspageError> {
        self.maps
            .iter()
            .find(|m| m.name() == name)
            .ok_or(SyspageError::UnknownMap)
    }

    fn map_by_name_mut(&mut self, name: &str) -> Result<&mut MemoryMap, SyspageError> {
        self.maps
            .iter_mut()
            .find(|m| m.name() == name)
            .ok_or(SyspageError::UnknownMap)
    }

    /// Copy `data` to the top of map `name` and advance the top.
    ///
    /// Returns the address the bytes were placed at.
    ///
    /// # Errors
    /// [`SyspageError::NoSpace`] if the map is too small,
    /// [`SyspageError::Again`] if `[top, top + len)` crossed a reservation;
    /// the top was moved past it and nothing was written.
    pub fn write_to_map(
        &mut self,
        mem: &mut dyn PhysicalMemory,
        name: &str,
        data: &[u8],
    ) -> Result<PhysicalAddress, SyspageError> {
        self.check_open()?;
        let map = self.map_by_name_mut(name)?;
        let len = data.len() as u64;
        if map.free_size() < len {
            return Err(SyspageError::NoSpace);
        }

        if let Some(e) = map.collision(len) {
            map.top = e.end.min(map.end);
            map.skip_reserved();
            debug!("map {name}: top moved past reservation to {}", map.top);
            return Err(SyspageError::Again(map.top));
        }

        let at = map.top;
        mem.write(at, data)?;
        map.top = at + len;
        Ok(at)
    }

    /// Current top of map `name`.
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`].
    pub fn map_top(&self, name: &str) -> Result<PhysicalAddress, SyspageError> {
        self.map_by_name(name).map(MemoryMap::top)
    }

    /// Bytes left between the top and the end of map `name`.
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`].
    pub fn free_size(&self, name: &str) -> Result<u64, SyspageError> {
        self.map_by_name(name).map(MemoryMap::free_size)
    }

    /// Attributes of the map with id `id`.
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`].
    pub fn map_attr(&self, id: u8) -> Result<MapAttributes, SyspageError> {
        self.maps
            .get(usize::from(id))
            .map(MemoryMap::attr)
            .ok_or(SyspageError::UnknownMap)
    }

    /// Round the top of map `name` up to a page boundary (clamped to the map end).
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`].
    pub fn align_map_top(&mut self, name: &str) -> Result<PhysicalAddress, SyspageError> {
        self.check_open()?;
        let map = self.map_by_name_mut(name)?;
        let aligned = map.top.align_up(PAGE_SIZE).unwrap_or(map.end);
        map.top = aligned.min(map.end);
        map.skip_reserved();
        Ok(map.top)
    }

    /// Move the top of map `name` forward to `addr`; a top already past
    /// `addr` is left alone.
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`] or [`SyspageError::BadRange`] if `addr`
    /// lies beyond the map end.
    pub fn advance_map_top(&mut self, name: &str, addr: PhysicalAddress) -> Result<(), SyspageError> {
        self.check_open()?;
        let map = self.map_by_name_mut(name)?;
        if addr > map.end {
            return Err(SyspageError::BadRange);
        }
        map.top = map.top.max(addr);
        map.skip_reserved();
        Ok(())
    }

    /// Id of map `name`.
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`].
    pub fn map_name_resolve(&self, name: &str) -> Result<u8, SyspageError> {
        self.map_by_name(name).map(MemoryMap::id)
    }

    /// Attributes of map `name`.
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`].
    pub fn map_attr_resolve(&self, name: &str) -> Result<MapAttributes, SyspageError> {
        self.map_by_name(name).map(MemoryMap::attr)
    }

    /// `(start, end)` of map `name`.
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`].
    pub fn map_range_resolve(
        &self,
        name: &str,
    ) -> Result<(PhysicalAddress, PhysicalAddress), SyspageError> {
        self.map_by_name(name).map(|m| (m.start(), m.end()))
    }

    /// The map containing `addr`, if any.
    #[must_use]
    pub fn map_containing(&self, addr: PhysicalAddress) -> Option<&MemoryMap> {
        self.maps.iter().find(|m| m.contains(addr))
    }

    /// Resolve a semicolon-delimited list of map names to ids.
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`], or [`SyspageError::TooManyMaps`] if
    /// the list holds more than `limit` names.
    pub fn resolve_map_list(&self, list: &str, limit: usize) -> Result<Vec<u8>, SyspageError> {
        let mut ids = Vec::new();
        for name in split_list(list) {
            if ids.len() >= limit {
                return Err(SyspageError::TooManyMaps);
            }
            ids.push(self.map_name_resolve(name)?);
        }
        Ok(ids)
    }

    /// Register a program.
    ///
    /// `imaps` and `dmaps` are semicolon-delimited map lists, each holding
    /// at least one map. `cmdline` is stored truncated to the record size
    /// and appended in full to the argument string.
    ///
    /// # Errors
    /// [`SyspageError::UnknownMap`], [`SyspageError::TooManyMaps`] or
    /// [`SyspageError::Full`]; nothing is recorded on error.
    pub fn add_prog(
        &mut self,
        start: PhysicalAddress,
        end: PhysicalAddress,
        imaps: &str,
        dmaps: &str,
        cmdline: &str,
        flags: ProgramFlags,
    ) -> Result<(), SyspageError> {
        self.check_open()?;
        if start > end {
            return Err(SyspageError::BadRange);
        }
        let imaps = self.resolve_map_list(imaps, MAX_PROG_MAPS)?;
        let dmaps = self.resolve_map_list(dmaps, MAX_PROG_MAPS)?;
        if imaps.is_empty() || dmaps.is_empty() {
            return Err(SyspageError::UnknownMap);
        }
        if self.progs.len() >= MAX_PROGRAMS {
            return Err(SyspageError::Full);
        }

        let sentinel = usize::from(self.args.is_empty());
        if self.args.len() + sentinel + cmdline.len() + 1 >= ARGS_LEN {
            return Err(SyspageError::Full);
        }
        if sentinel == 1 {
            self.args.push(ARGS_EXTRA_ARGV);
        }
        self.args.extend_from_slice(cmdline.as_bytes());
        self.args.push(b' ');

        info!("program {cmdline}: {start}..{end} flags {:#x}", flags.into_bits());
        self.progs.push(Program {
            start,
            end,
            imaps,
            dmaps,
            cmdline: fixed(cmdline),
            flags,
        });
        Ok(())
    }

    /// Registered programs in load order.
    #[must_use]
    pub fn programs(&self) -> &[Program] {
        &self.progs
    }

    /// The argument string (sentinel included, no terminator).
    #[must_use]
    pub fn args(&self) -> &[u8] {
        &self.args
    }

    /// Register a partition allowed to allocate from `alloc` and access `access`.
    ///
    /// # Errors
    /// [`SyspageError::BadName`], [`SyspageError::NameTaken`],
    /// [`SyspageError::UnknownMap`] or [`SyspageError::Full`].
    pub fn add_partition(&mut self, name: &str, alloc: &str, access: &str) -> Result<(), SyspageError> {
        self.check_open()?;
        check_name(name)?;
        if self.parts.iter().any(|p| p.name == name) {
            return Err(SyspageError::NameTaken);
        }
        if self.parts.len() >= MAX_PARTITIONS {
            return Err(SyspageError::Full);
        }
        let alloc = self.resolve_map_list(alloc, MAX_MAPS)?;
        let access = self.resolve_map_list(access, MAX_MAPS)?;

        info!("partition {name}: {} alloc, {} access maps", alloc.len(), access.len());
        self.parts.push(Partition {
            name: String::from(name),
            alloc,
            access,
        });
        Ok(())
    }

    #[must_use]
    pub fn partitions(&self) -> &[Partition] {
        &self.parts
    }

    /// Append scheduler windows with the semicolon-delimited `sizes`, laid
    /// end to end after the last window (or from time 0).
    ///
    /// # Errors
    /// [`SyspageError::BadNumber`] for a malformed or zero size,
    /// [`SyspageError::Full`] if the windows do not fit.
    pub fn add_sched_windows(&mut self, sizes: &str) -> Result<(), SyspageError> {
        self.check_open()?;
        let sizes = split_list(sizes)
            .map(parse_number)
            .collect::<Result<Vec<_>, _>>()?;
        if sizes.is_empty() || sizes.contains(&0) {
            return Err(SyspageError::BadNumber);
        }
        if self.windows.len() + sizes.len() > MAX_SCHED_WINDOWS {
            return Err(SyspageError::Full);
        }

        let mut start = self.windows.last().map_or(0, |w| w.stop);
        for size in sizes {
            let stop = start.checked_add(size).ok_or(SyspageError::BadNumber)?;
            let idx = u8::try_from(self.windows.len()).map_err(|_| SyspageError::Full)?;
            self.windows.push(SchedWindowRecord { start, stop, idx });
            start = stop;
        }
        Ok(())
    }

    #[must_use]
    pub fn sched_windows(&self) -> &[SchedWindowRecord] {
        &self.windows
    }

    pub const fn set_kernel_text(&mut self, text: Region) {
        self.kernel.text = text;
    }

    pub const fn set_kernel_data(&mut self, data: Region) {
        self.kernel.data = data;
    }

    pub const fn set_kernel_bss(&mut self, bss: Region) {
        self.kernel.bss = bss;
    }

    pub const fn set_kernel_entry(&mut self, entry: PhysicalAddress) {
        self.kernel.entry = entry;
    }

    #[must_use]
    pub const fn kernel(&self) -> &KernelInfo {
        &self.kernel
    }

    /// Place the syspage at `addr` instead of the board default.
    ///
    /// # Errors
    /// [`SyspageError::Sealed`] after the syspage was saved.
    pub fn set_address(&mut self, addr: PhysicalAddress) -> Result<(), SyspageError> {
        self.check_open()?;
        self.address = Some(addr);
        Ok(())
    }

    #[must_use]
    pub const fn address(&self) -> Option<PhysicalAddress> {
        self.address
    }

    /// Flatten all registries into the syspage binary layout.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let maps_off = align_table(SyspageHeader::SIZE);
        let progs_off = align_table(maps_off + self.maps.len() * MapRecord::SIZE);
        let parts_off = align_table(progs_off + self.progs.len() * ProgramRecord::SIZE);
        let windows_off = align_table(parts_off + self.parts.len() * PartitionRecord::SIZE);
        let args_off = align_table(windows_off + self.windows.len() * SchedWindowRecord::SIZE);
        let args_len = self.args.len() + 1;
        let size = align_table(args_off + args_len);

        let mut blob = vec![0u8; size];
        let table = |off: usize, count: usize| TableRef {
            off: u32::try_from(off).unwrap_or(u32::MAX),
            count: u32::try_from(count).unwrap_or(u32::MAX),
        };

        let header = SyspageHeader {
            magic: SYSPAGE_MAGIC,
            size: u32::try_from(size).unwrap_or(u32::MAX),
            kernel: self.kernel,
            maps: table(maps_off, self.maps.len()),
            progs: table(progs_off, self.progs.len()),
            parts: table(parts_off, self.parts.len()),
            windows: table(windows_off, self.windows.len()),
            args: table(args_off, args_len),
        };
        header.encode(&mut blob);

        for (i, m) in self.maps.iter().enumerate() {
            let rec = MapRecord {
                start: m.start(),
                end: m.end(),
                attr: m.attr().into_bits(),
                id: m.id(),
                name: fixed(m.name()),
            };
            rec.encode(&mut blob[maps_off + i * MapRecord::SIZE..]);
        }

        for (i, p) in self.progs.iter().enumerate() {
            let mut rec = ProgramRecord {
                start: p.start,
                end: p.end,
                flags: p.flags.into_bits(),
                imap_count: u8::try_from(p.imaps.len()).unwrap_or(0),
                dmap_count: u8::try_from(p.dmaps.len()).unwrap_or(0),
                cmdline: p.cmdline,
                ..ProgramRecord::default()
            };
            rec.imaps[..p.imaps.len()].copy_from_slice(&p.imaps);
            rec.dmaps[..p.dmaps.len()].copy_from_slice(&p.dmaps);
            rec.encode(&mut blob[progs_off + i * ProgramRecord::SIZE..]);
        }

        for (i, p) in self.parts.iter().enumerate() {
            let mut rec = PartitionRecord {
                name: fixed(&p.name),
                alloc_count: u8::try_from(p.alloc.len()).unwrap_or(0),
                access_count: u8::try_from(p.access.len()).unwrap_or(0),
                ..PartitionRecord::default()
            };
            rec.alloc[..p.alloc.len()].copy_from_slice(&p.alloc);
            rec.access[..p.access.len()].copy_from_slice(&p.access);
            rec.encode(&mut blob[parts_off + i * PartitionRecord::SIZE..]);
        }

        for (i, w) in self.windows.iter().enumerate() {
            w.encode(&mut blob[windows_off + i * SchedWindowRecord::SIZE..]);
        }

        blob[args_off..args_off + self.args.len()].copy_from_slice(&self.args);
        blob
    }

    /// Serialize, reserve and write the syspage to its address. No
    /// registry can change afterwards.
    ///
    /// # Errors
    /// [`SyspageError::NoAddress`], [`SyspageError::Overlap`] if the blob
    /// would cover a program or the kernel text, or a memory error.
    pub fn save(&mut self, mem: &mut dyn PhysicalMemory) -> Result<PhysicalAddress, SyspageError> {
        self.check_open()?;
        let addr = self.address.ok_or(SyspageError::NoAddress)?;
        let blob = self.serialize();
        let end = addr
            .checked_add(blob.len() as u64)
            .ok_or(SyspageError::BadRange)?;

        let text = self.kernel.text;
        let text_hit = text.size != 0
            && Entry::new(text.addr, text.addr + text.size).intersects(addr, end);
        let prog_hit = self
            .progs
            .iter()
            .any(|p| Entry::new(p.start, p.end).intersects(addr, end));
        if text_hit || prog_hit {
            return Err(SyspageError::Overlap);
        }

        self.add_entries(addr, blob.len() as u64)?;
        mem.write(addr, &blob)?;
        self.sealed = true;
        info!("syspage saved at {addr} ({} bytes)", blob.len());
        Ok(addr)
    }

    /// Dump maps, reservations and the kernel descriptor.
    ///
    /// # Errors
    /// Propagates console write errors.
    pub fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        match self.address {
            Some(addr) => writeln!(out, "syspage at {addr}")?,
            None => writeln!(out, "syspage address not set")?,
        }
        let k = &self.kernel;
        writeln!(
            out,
            "kernel text {}+{:#x} data {}+{:#x} bss {}+{:#x} entry {}",
            k.text.addr, k.text.size, k.data.addr, k.data.size, k.bss.addr, k.bss.size, k.entry
        )?;
        writeln!(out, "{:<3} {:<8} {:>10} {:>10} {:>10}  ATTR", "ID", "NAME", "START", "END", "TOP")?;
        for m in &self.maps {
            writeln!(
                out,
                "{:<3} {:<8} {} {} {}  {}",
                m.id(),
                m.name(),
                m.start(),
                m.end(),
                m.top(),
                m.attr()
            )?;
            for e in m.entries() {
                writeln!(out, "    reserved {}..{}", e.start, e.end)?;
            }
        }
        self.prog_show(out)
    }

    /// Dump programs and partitions.
    ///
    /// # Errors
    /// Propagates console write errors.
    pub fn prog_show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{:<16} {:>10} {:>10}  IMAPS/DMAPS", "PROGRAM", "START", "END")?;
        for p in &self.progs {
            writeln!(
                out,
                "{:<16} {} {}  {:?}/{:?}{}",
                plo_info::syspage::fixed_str(&p.cmdline),
                p.start,
                p.end,
                p.imaps,
                p.dmaps,
                if p.flags.exec() { " exec" } else { "" }
            )?;
        }
        for p in &self.parts {
            writeln!(out, "partition {} alloc {:?} access {:?}", p.name, p.alloc, p.access)?;
        }
        Ok(())
    }
}
