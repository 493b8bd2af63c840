//! In-memory ELF32 images for tests.

use crate::{EHDR_SIZE, ELF_MAGIC, PFlags, PHDR_SIZE, PT_LOAD, SHDR_SIZE, SHF_ALLOC, SHF_WRITE, SHT_NOBITS};
use alloc::string::String;
use alloc::vec::Vec;

const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;

/// One `PT_LOAD` segment.
#[derive(Debug, Clone)]
pub struct Seg {
    vaddr: u32,
    paddr: u32,
    data: Vec<u8>,
    memsz: u32,
    flags: PFlags,
}

impl Seg {
    #[must_use]
    pub fn new(paddr: u32, data: &[u8], memsz: u32, flags: PFlags) -> Self {
        Self {
            vaddr: paddr,
            paddr,
            data: data.to_vec(),
            memsz,
            flags,
        }
    }

    /// Read + execute segment with `memsz == filesz`.
    #[must_use]
    pub fn rx(paddr: u32, data: &[u8]) -> Self {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        Self::new(paddr, data, len, PFlags::new().with_read(true).with_execute(true))
    }

    /// Read + write segment.
    #[must_use]
    pub fn rw(paddr: u32, data: &[u8], memsz: u32) -> Self {
        Self::new(paddr, data, memsz, PFlags::new().with_read(true).with_write(true))
    }

    /// Link the segment at `vaddr` while keeping its physical address.
    #[must_use]
    pub const fn at_vaddr(mut self, vaddr: u32) -> Self {
        self.vaddr = vaddr;
        self
    }
}

/// Assembles header, program headers, segment data, named sections and the
/// section header table.
#[derive(Debug, Default)]
pub struct ImageBuilder {
    entry: u32,
    segs: Vec<Seg>,
    bss: Option<(u32, u32)>,
    sections: Vec<(String, Vec<u8>)>,
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn len32(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn shdr(out: &mut Vec<u8>, name: u32, ty: u32, flags: u32, addr: u32, off: u32, size: u32) {
    for v in [name, ty, flags, addr, off, size, 0, 0, 1, 0] {
        put32(out, v);
    }
}

impl ImageBuilder {
    #[must_use]
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn segment(mut self, seg: Seg) -> Self {
        self.segs.push(seg);
        self
    }

    /// Add a `.bss` section (`SHT_NOBITS`, `SHF_WRITE | SHF_ALLOC`).
    #[must_use]
    pub const fn bss(mut self, addr: u32, size: u32) -> Self {
        self.bss = Some((addr, size));
        self
    }

    /// Add a non-allocated section with contents.
    #[must_use]
    pub fn section(mut self, name: &str, data: &[u8]) -> Self {
        self.sections.push((String::from(name), data.to_vec()));
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let phnum = self.segs.len();
        let mut data_off = EHDR_SIZE + phnum * PHDR_SIZE;

        let mut seg_offs = Vec::with_capacity(phnum);
        for s in &self.segs {
            seg_offs.push(data_off);
            data_off += s.data.len();
        }
        let mut sec_offs = Vec::with_capacity(self.sections.len());
        for (_, d) in &self.sections {
            sec_offs.push(data_off);
            data_off += d.len();
        }

        // Section names: "\0.bss\0<named>\0...\0.shstrtab\0"
        let mut strtab = Vec::from([0u8]);
        let bss_name = len32(strtab.len());
        strtab.extend_from_slice(b".bss\0");
        let mut sec_names = Vec::with_capacity(self.sections.len());
        for (n, _) in &self.sections {
            sec_names.push(len32(strtab.len()));
            strtab.extend_from_slice(n.as_bytes());
            strtab.push(0);
        }
        let strtab_name = len32(strtab.len());
        strtab.extend_from_slice(b".shstrtab\0");
        let strtab_off = data_off;
        let shoff = (strtab_off + strtab.len() + 3) & !3;

        let shnum = 1 + usize::from(self.bss.is_some()) + self.sections.len() + 1;
        let shstrndx = shnum - 1;

        let mut out = Vec::with_capacity(shoff + shnum * SHDR_SIZE);
        out.extend_from_slice(&ELF_MAGIC);
        out.extend_from_slice(&[1, 1, 1]);
        out.resize(16, 0);
        put16(&mut out, 2);
        put16(&mut out, 40);
        put32(&mut out, 1);
        put32(&mut out, self.entry);
        put32(&mut out, len32(EHDR_SIZE));
        put32(&mut out, len32(shoff));
        put32(&mut out, 0);
        put16(&mut out, u16::try_from(EHDR_SIZE).unwrap_or(0));
        put16(&mut out, u16::try_from(PHDR_SIZE).unwrap_or(0));
        put16(&mut out, u16::try_from(phnum).unwrap_or(0));
        put16(&mut out, u16::try_from(SHDR_SIZE).unwrap_or(0));
        put16(&mut out, u16::try_from(shnum).unwrap_or(0));
        put16(&mut out, u16::try_from(shstrndx).unwrap_or(0));

        for (s, &off) in self.segs.iter().zip(&seg_offs) {
            for v in [
                PT_LOAD,
                len32(off),
                s.vaddr,
                s.paddr,
                len32(s.data.len()),
                s.memsz,
                s.flags.into_bits(),
                0x1000,
            ] {
                put32(&mut out, v);
            }
        }
        for s in &self.segs {
            out.extend_from_slice(&s.data);
        }
        for (_, d) in &self.sections {
            out.extend_from_slice(d);
        }
        out.extend_from_slice(&strtab);
        out.resize(shoff, 0);

        shdr(&mut out, 0, 0, 0, 0, 0, 0);
        if let Some((addr, size)) = self.bss {
            shdr(&mut out, bss_name, SHT_NOBITS, SHF_WRITE | SHF_ALLOC, addr, len32(strtab_off), size);
        }
        for ((_, d), (&off, &n)) in self.sections.iter().zip(sec_offs.iter().zip(&sec_names)) {
            shdr(&mut out, n, SHT_PROGBITS, 0, 0, len32(off), len32(d.len()));
        }
        shdr(&mut out, strtab_name, SHT_STRTAB, 0, 0, len32(strtab_off), len32(strtab.len()));
        out
    }
}
