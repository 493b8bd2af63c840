//! # Syspage Binary Interface
//!
//! Records are encoded field by field in little-endian order, so the layout
//! does not depend on the loader's own target or packing rules.

pub mod view;

use crate::config::{CMDLINE_LEN, MAP_NAME_LEN, MAX_MAPS, MAX_PROG_MAPS};
use plo_memory::PhysicalAddress;

/// `"PLSP"` read as a little-endian `u32`.
pub const SYSPAGE_MAGIC: u32 = 0x5053_4C50;

/// First byte of the argument string; tells the kernel's parser that extra
/// per-program arguments follow.
pub const ARGS_EXTRA_ARGV: u8 = 0x01;

/// Alignment of every table inside the blob.
pub const TABLE_ALIGN: usize = 8;

/// A kernel section descriptor (address and size). `(0, 0)` means "not reported".
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Region {
    pub addr: PhysicalAddress,
    pub size: u64,
}

impl Region {
    #[must_use]
    pub const fn new(addr: u64, size: u64) -> Self {
        Self {
            addr: PhysicalAddress::new(addr),
            size,
        }
    }
}

/// Kernel image description.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct KernelInfo {
    pub text: Region,
    pub data: Region,
    pub bss: Region,
    pub entry: PhysicalAddress,
}

/// Position of a table inside the blob.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct TableRef {
    /// Byte offset from the start of the syspage.
    pub off: u32,
    /// Number of records (bytes, for the argument string).
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SyspageHeader {
    pub magic: u32,
    /// Total size of the blob in bytes.
    pub size: u32,
    pub kernel: KernelInfo,
    pub maps: TableRef,
    pub progs: TableRef,
    pub parts: TableRef,
    pub windows: TableRef,
    pub args: TableRef,
}

/// One encoded syspage record.
pub trait Record: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Write the record into `out[..Self::SIZE]`.
    fn encode(&self, out: &mut [u8]);

    /// Read a record from `bytes[..Self::SIZE]`.
    fn decode(bytes: &[u8]) -> Self;
}

/// Memory map record: `{start, end, attr, id, name[8]}`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct MapRecord {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
    pub attr: u32,
    pub id: u8,
    pub name: [u8; MAP_NAME_LEN],
}

/// Program record: address range, flags, map id lists and truncated command line.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ProgramRecord {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
    pub flags: u32,
    pub imap_count: u8,
    pub dmap_count: u8,
    pub imaps: [u8; MAX_PROG_MAPS],
    pub dmaps: [u8; MAX_PROG_MAPS],
    pub cmdline: [u8; CMDLINE_LEN],
}

/// Partition record: name plus the maps it may allocate from and access.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct PartitionRecord {
    pub name: [u8; MAP_NAME_LEN],
    pub alloc_count: u8,
    pub access_count: u8,
    pub alloc: [u8; MAX_MAPS],
    pub access: [u8; MAX_MAPS],
}

/// Scheduler window record.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SchedWindowRecord {
    pub start: u64,
    pub stop: u64,
    pub idx: u8,
}

impl ProgramRecord {
    /// Primary instruction map id.
    #[must_use]
    pub const fn imap(&self) -> u8 {
        self.imaps[0]
    }

    /// Primary data map id.
    #[must_use]
    pub const fn dmap(&self) -> u8 {
        self.dmaps[0]
    }

    #[must_use]
    pub fn cmdline_str(&self) -> &str {
        fixed_str(&self.cmdline)
    }
}

impl MapRecord {
    #[must_use]
    pub fn name_str(&self) -> &str {
        fixed_str(&self.name)
    }
}

impl PartitionRecord {
    #[must_use]
    pub fn name_str(&self) -> &str {
        fixed_str(&self.name)
    }
}

/// Copy `s` into a NUL-terminated fixed-size field, truncating if needed.
#[must_use]
pub fn fixed<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let len = s.len().min(N - 1);
    out[..len].copy_from_slice(&s.as_bytes()[..len]);
    out
}

/// The string stored in a NUL-terminated fixed-size field.
///
/// Invalid UTF-8 (possible after truncating inside a multi-byte character)
/// yields the longest valid prefix.
#[must_use]
pub fn fixed_str(field: &[u8]) -> &str {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    match core::str::from_utf8(&field[..len]) {
        Ok(s) => s,
        Err(e) => core::str::from_utf8(&field[..e.valid_up_to()]).unwrap_or_default(),
    }
}

#[inline]
#[must_use]
pub const fn align_table(off: usize) -> usize {
    (off + (TABLE_ALIGN - 1)) & !(TABLE_ALIGN - 1)
}

#[inline]
fn put_u32(out: &mut [u8], off: usize, v: u32) {
    out[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn put_u64(out: &mut [u8], off: usize, v: u64) {
    out[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn get_u32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

#[inline]
fn get_u64(b: &[u8], off: usize) -> u64 {
    u64::from_le_bytes([
        b[off],
        b[off + 1],
        b[off + 2],
        b[off + 3],
        b[off + 4],
        b[off + 5],
        b[off + 6],
        b[off + 7],
    ])
}

fn put_region(out: &mut [u8], off: usize, r: Region) {
    put_u64(out, off, r.addr.as_u64());
    put_u64(out, off + 8, r.size);
}

fn get_region(b: &[u8], off: usize) -> Region {
    Region::new(get_u64(b, off), get_u64(b, off + 8))
}

fn put_table(out: &mut [u8], off: usize, t: TableRef) {
    put_u32(out, off, t.off);
    put_u32(out, off + 4, t.count);
}

fn get_table(b: &[u8], off: usize) -> TableRef {
    TableRef {
        off: get_u32(b, off),
        count: get_u32(b, off + 4),
    }
}

impl Record for SyspageHeader {
    const SIZE: usize = 104;

    fn encode(&self, out: &mut [u8]) {
        put_u32(out, 0, self.magic);
        put_u32(out, 4, self.size);
        put_region(out, 8, self.kernel.text);
        put_region(out, 24, self.kernel.data);
        put_region(out, 40, self.kernel.bss);
        put_u64(out, 56, self.kernel.entry.as_u64());
        put_table(out, 64, self.maps);
        put_table(out, 72, self.progs);
        put_table(out, 80, self.parts);
        put_table(out, 88, self.windows);
        put_table(out, 96, self.args);
    }

    fn decode(b: &[u8]) -> Self {
        Self {
            magic: get_u32(b, 0),
            size: get_u32(b, 4),
            kernel: KernelInfo {
                text: get_region(b, 8),
                data: get_region(b, 24),
                bss: get_region(b, 40),
                entry: PhysicalAddress::new(get_u64(b, 56)),
            },
            maps: get_table(b, 64),
            progs: get_table(b, 72),
            parts: get_table(b, 80),
            windows: get_table(b, 88),
            args: get_table(b, 96),
        }
    }
}

impl Record for MapRecord {
    const SIZE: usize = 32;

    fn encode(&self, out: &mut [u8]) {
        put_u64(out, 0, self.start.as_u64());
        put_u64(out, 8, self.end.as_u64());
        put_u32(out, 16, self.attr);
        out[20] = self.id;
        out[21..21 + MAP_NAME_LEN].copy_from_slice(&self.name);
        out[29..32].fill(0);
    }

    fn decode(b: &[u8]) -> Self {
        let mut name = [0u8; MAP_NAME_LEN];
        name.copy_from_slice(&b[21..21 + MAP_NAME_LEN]);
        Self {
            start: PhysicalAddress::new(get_u64(b, 0)),
            end: PhysicalAddress::new(get_u64(b, 8)),
            attr: get_u32(b, 16),
            id: b[20],
            name,
        }
    }
}

impl Record for ProgramRecord {
    const SIZE: usize = 48;

    fn encode(&self, out: &mut [u8]) {
        put_u64(out, 0, self.start.as_u64());
        put_u64(out, 8, self.end.as_u64());
        put_u32(out, 16, self.flags);
        out[20] = self.imap_count;
        out[21] = self.dmap_count;
        out[22..24].fill(0);
        out[24..28].copy_from_slice(&self.imaps);
        out[28..32].copy_from_slice(&self.dmaps);
        out[32..48].copy_from_slice(&self.cmdline);
    }

    fn decode(b: &[u8]) -> Self {
        let mut rec = Self {
            start: PhysicalAddress::new(get_u64(b, 0)),
            end: PhysicalAddress::new(get_u64(b, 8)),
            flags: get_u32(b, 16),
            imap_count: b[20],
            dmap_count: b[21],
            ..Self::default()
        };
        rec.imaps.copy_from_slice(&b[24..28]);
        rec.dmaps.copy_from_slice(&b[28..32]);
        rec.cmdline.copy_from_slice(&b[32..48]);
        rec
    }
}

impl Record for PartitionRecord {
    const SIZE: usize = 48;

    fn encode(&self, out: &mut [u8]) {
        out[0..MAP_NAME_LEN].copy_from_slice(&self.name);
        out[8] = self.alloc_count;
        out[9] = self.access_count;
        out[10..16].fill(0);
        out[16..32].copy_from_slice(&self.alloc);
        out[32..48].copy_from_slice(&self.access);
    }

    fn decode(b: &[u8]) -> Self {
        let mut rec = Self {
            alloc_count: b[8],
            access_count: b[9],
            ..Self::default()
        };
        rec.name.copy_from_slice(&b[0..MAP_NAME_LEN]);
        rec.alloc.copy_from_slice(&b[16..32]);
        rec.access.copy_from_slice(&b[32..48]);
        rec
    }
}

impl Record for SchedWindowRecord {
    const SIZE: usize = 24;

    fn encode(&self, out: &mut [u8]) {
        put_u64(out, 0, self.start);
        put_u64(out, 8, self.stop);
        out[16] = self.idx;
        out[17..24].fill(0);
    }

    fn decode(b: &[u8]) -> Self {
        Self {
            start: get_u64(b, 0),
            stop: get_u64(b, 8),
            idx: b[16],
        }
    }
}

const _: () = {
    assert!(MAX_PROG_MAPS == 4);
    assert!(MAX_MAPS == 16);
    assert!(CMDLINE_LEN == 16);
    assert!(MAP_NAME_LEN == 8);
    assert!(SyspageHeader::SIZE % TABLE_ALIGN == 0);
    assert!(MapRecord::SIZE % TABLE_ALIGN == 0);
    assert!(ProgramRecord::SIZE % TABLE_ALIGN == 0);
    assert!(PartitionRecord::SIZE % TABLE_ALIGN == 0);
    assert!(SchedWindowRecord::SIZE % TABLE_ALIGN == 0);
};
