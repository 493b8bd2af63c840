//! # ELF32 Parsing
//!
//! Little-endian ELF32 images are never assumed to be resident: every
//! table is fetched through an [`ElfSource`], which the loader backs with a
//! PHFS session and the host tools with a byte slice.
//!
//! ```text
//! offset 0      e_phoff                 e_shoff
//! ├─ Ehdr ─┬ … ─┼─ Phdr × e_phnum ─┬ … ──┼─ Shdr × e_shnum ─┤
//!                   │ PT_LOAD             │ .bss (NOBITS, WA)
//!                   ▼                     │ .signature
//!              p_offset..+p_filesz        ▼
//!              copied to p_paddr     sh_name → .shstrtab
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

#[cfg(any(test, feature = "builder"))]
pub mod builder;
mod error;
mod headers;

pub use error::ElfError;
pub use headers::{
    EHDR_SIZE, ELF_MAGIC, Elf32Header, PFlags, PHDR_SIZE, PT_LOAD, ProgramHeader, SHDR_SIZE,
    SHF_ALLOC, SHF_WRITE, SHT_NOBITS, SectionHeader,
};

use alloc::vec;
use alloc::vec::Vec;
use plo_info::config::ELF_STRTAB_MAX;

/// Random access to the bytes of an image.
pub trait ElfSource {
    type Error: From<ElfError>;

    /// Fill `buf` from `offs`; a short image is an error.
    ///
    /// # Errors
    /// Source specific.
    fn read_at(&mut self, offs: u64, buf: &mut [u8]) -> Result<(), Self::Error>;
}

impl ElfSource for &[u8] {
    type Error = ElfError;

    fn read_at(&mut self, offs: u64, buf: &mut [u8]) -> Result<(), ElfError> {
        let start = usize::try_from(offs).map_err(|_| ElfError::OutOfBounds)?;
        let end = start.checked_add(buf.len()).ok_or(ElfError::OutOfBounds)?;
        buf.copy_from_slice(self.get(start..end).ok_or(ElfError::OutOfBounds)?);
        Ok(())
    }
}

/// An image whose header has been read and validated.
#[derive(Debug, Clone, Copy)]
pub struct ElfFile {
    header: Elf32Header,
}

impl ElfFile {
    /// Read and validate the ELF header.
    ///
    /// # Errors
    /// [`ElfError::BadMagic`] and friends, or a source error.
    pub fn open<S: ElfSource + ?Sized>(src: &mut S) -> Result<Self, S::Error> {
        let mut buf = [0u8; EHDR_SIZE];
        src.read_at(0, &mut buf)?;
        Ok(Self {
            header: Elf32Header::parse(&buf)?,
        })
    }

    #[must_use]
    pub const fn header(&self) -> &Elf32Header {
        &self.header
    }

    #[must_use]
    pub const fn entry(&self) -> u32 {
        self.header.e_entry
    }

    /// All program headers.
    ///
    /// # Errors
    /// Source errors.
    pub fn program_headers<S: ElfSource + ?Sized>(
        &self,
        src: &mut S,
    ) -> Result<Vec<ProgramHeader>, S::Error> {
        let table = read_table(
            src,
            self.header.e_phoff,
            self.header.e_phnum,
            self.header.e_phentsize,
        )?;
        Ok(table
            .chunks_exact(usize::from(self.header.e_phentsize))
            .map(ProgramHeader::parse)
            .collect())
    }

    /// All section headers.
    ///
    /// # Errors
    /// Source errors.
    pub fn section_headers<S: ElfSource + ?Sized>(
        &self,
        src: &mut S,
    ) -> Result<Vec<SectionHeader>, S::Error> {
        let table = read_table(
            src,
            self.header.e_shoff,
            self.header.e_shnum,
            self.header.e_shentsize,
        )?;
        Ok(table
            .chunks_exact(usize::from(self.header.e_shentsize))
            .map(SectionHeader::parse)
            .collect())
    }

    /// The section called exactly `name`, resolved through the section
    /// name string table.
    ///
    /// # Errors
    /// [`ElfError::OutOfBounds`] if the string table index is invalid or
    /// the table is larger than [`ELF_STRTAB_MAX`], or a source error.
    pub fn section_by_name<S: ElfSource + ?Sized>(
        &self,
        src: &mut S,
        name: &str,
    ) -> Result<Option<SectionHeader>, S::Error> {
        let sections = self.section_headers(src)?;
        if sections.is_empty() {
            return Ok(None);
        }
        let strtab = sections
            .get(usize::from(self.header.e_shstrndx))
            .ok_or(ElfError::OutOfBounds)?;
        let len = usize::try_from(strtab.sh_size)
            .ok()
            .filter(|&len| len <= ELF_STRTAB_MAX)
            .ok_or(ElfError::OutOfBounds)?;
        let mut names = vec![0u8; len];
        src.read_at(u64::from(strtab.sh_offset), &mut names)?;

        Ok(sections.into_iter().find(|s| {
            let start = s.sh_name as usize;
            names
                .get(start..)
                .and_then(|rest| rest.split(|&b| b == 0).next())
                .is_some_and(|n| n == name.as_bytes())
        }))
    }

    /// The `.bss` section (the first `SHT_NOBITS` section that is writable
    /// and allocated).
    ///
    /// # Errors
    /// Source errors.
    pub fn bss<S: ElfSource + ?Sized>(&self, src: &mut S) -> Result<Option<SectionHeader>, S::Error> {
        Ok(self
            .section_headers(src)?
            .into_iter()
            .find(SectionHeader::is_bss))
    }
}

fn read_table<S: ElfSource + ?Sized>(
    src: &mut S,
    off: u32,
    num: u16,
    entsize: u16,
) -> Result<Vec<u8>, S::Error> {
    if num == 0 {
        return Ok(Vec::new());
    }
    let len = usize::from(num) * usize::from(entsize);
    let mut table = vec![0u8; len];
    src.read_at(u64::from(off), &mut table)?;
    Ok(table)
}

/// `[min addr, max addr + p_memsz)` over the `PT_LOAD` segments whose flags
/// are exactly read + execute, where `addr` is the load address `place`
/// assigns to a segment (usually `p_paddr`).
#[must_use]
pub fn text_range<F>(segments: &[ProgramHeader], place: F) -> Option<(u64, u64)>
where
    F: Fn(&ProgramHeader) -> u64,
{
    let rx = PFlags::new().with_read(true).with_execute(true);
    segments
        .iter()
        .filter(|ph| ph.is_load() && ph.p_flags == rx)
        .fold(None, |acc, ph| {
            let start = place(ph);
            let end = start.saturating_add(u64::from(ph.p_memsz));
            Some(match acc {
                None => (start, end),
                Some((lo, hi)) => (lo.min(start), hi.max(end)),
            })
        })
}

/// The physical load address of a segment.
#[must_use]
pub fn paddr(ph: &ProgramHeader) -> u64 {
    u64::from(ph.p_paddr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ImageBuilder, Seg};

    #[test]
    fn finds_segments_bss_and_named_sections() {
        let image = ImageBuilder::new(0x8000_0000)
            .segment(Seg::rx(0x8000_0000, &[0x11; 0x40]))
            .segment(Seg::rw(0x8001_0000, &[0x22; 0x10], 0x20))
            .bss(0x8001_0020, 0x4000)
            .section(".signature", &[0xaa; 64])
            .build();
        let mut src = image.as_slice();

        let elf = ElfFile::open(&mut src).unwrap();
        assert_eq!(elf.entry(), 0x8000_0000);

        let phdrs = elf.program_headers(&mut src).unwrap();
        assert_eq!(phdrs.len(), 2);
        assert!(phdrs.iter().all(ProgramHeader::is_load));
        assert_eq!(text_range(&phdrs, paddr), Some((0x8000_0000, 0x8000_0040)));

        let bss = elf.bss(&mut src).unwrap().unwrap();
        assert_eq!((bss.sh_addr, bss.sh_size), (0x8001_0020, 0x4000));

        let sig = elf.section_by_name(&mut src, ".signature").unwrap().unwrap();
        assert_eq!(sig.sh_size, 64);
        assert!(elf.section_by_name(&mut src, ".Signature").unwrap().is_none());
        assert!(elf.section_by_name(&mut src, ".sig").unwrap().is_none());
    }

    #[test]
    fn text_range_ignores_writable_segments() {
        let image = ImageBuilder::new(0)
            .segment(Seg::rw(0x1000, &[0; 4], 4))
            .build();
        let mut src = image.as_slice();
        let elf = ElfFile::open(&mut src).unwrap();
        assert_eq!(text_range(&elf.program_headers(&mut src).unwrap(), paddr), None);
    }

    #[test]
    fn truncated_image_is_out_of_bounds() {
        let image = ImageBuilder::new(0)
            .segment(Seg::rx(0x1000, &[0; 4]))
            .build();
        let mut src = &image[..60];
        let elf = ElfFile::open(&mut src).unwrap();
        assert_eq!(elf.program_headers(&mut src).unwrap_err(), ElfError::OutOfBounds);
    }

    fn put32(image: &mut [u8], off: usize, v: u32) {
        image[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn le(image: &[u8], off: usize, len: usize) -> usize {
        image[off..off + len]
            .iter()
            .rev()
            .fold(0, |acc, &b| (acc << 8) | usize::from(b))
    }

    #[test]
    fn oversized_name_table_fails_the_lookup() {
        let mut image = ImageBuilder::new(0)
            .segment(Seg::rx(0x1000, &[0; 4]))
            .section(".signature", &[0; 64])
            .build();
        let shoff = le(&image, 32, 4);
        let shstrndx = le(&image, 50, 2);
        put32(&mut image, shoff + shstrndx * SHDR_SIZE + 20, u32::MAX);

        let mut src = image.as_slice();
        let elf = ElfFile::open(&mut src).unwrap();
        assert_eq!(
            elf.section_by_name(&mut src, ".signature").unwrap_err(),
            ElfError::OutOfBounds
        );
    }

    #[test]
    fn table_geometry_is_bounded() {
        let image = ImageBuilder::new(0)
            .segment(Seg::rx(0x1000, &[0; 4]))
            .build();

        let mut wide = image.clone();
        wide[46..48].copy_from_slice(&0x1000u16.to_le_bytes());
        assert_eq!(ElfFile::open(&mut wide.as_slice()).unwrap_err(), ElfError::BadHeader);

        let mut many = image;
        many[48..50].copy_from_slice(&u16::MAX.to_le_bytes());
        assert_eq!(ElfFile::open(&mut many.as_slice()).unwrap_err(), ElfError::BadHeader);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut image = ImageBuilder::new(0).build();
        image[1] = b'X';
        assert_eq!(ElfFile::open(&mut image.as_slice()).unwrap_err(), ElfError::BadMagic);
    }
}
