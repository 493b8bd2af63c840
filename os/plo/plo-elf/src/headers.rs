use crate::ElfError;
use plo_info::config::ELF_TABLE_MAX;

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

pub const EHDR_SIZE: usize = 52;
pub const PHDR_SIZE: usize = 32;
pub const SHDR_SIZE: usize = 40;

pub const PT_LOAD: u32 = 1;
pub const SHT_NOBITS: u32 = 8;
pub const SHF_WRITE: u32 = 0x1;
pub const SHF_ALLOC: u32 = 0x2;

const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;

#[inline]
fn le16(x: &[u8]) -> u16 {
    u16::from_le_bytes([x[0], x[1]])
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

/// `Elf32_Phdr.p_flags`: bit0=X, bit1=W, bit2=R.
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PFlags {
    #[bits(1)]
    pub execute: bool,
    #[bits(1)]
    pub write: bool,
    #[bits(1)]
    pub read: bool,
    #[bits(29)]
    __: u32,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(clippy::struct_field_names)]
pub struct Elf32Header {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Elf32Header {
    /// Parse and validate `bytes[..EHDR_SIZE]`.
    ///
    /// # Errors
    /// [`ElfError::TooShort`], [`ElfError::BadMagic`],
    /// [`ElfError::BadClass`] or [`ElfError::BadHeader`] for table entry
    /// sizes other than the 32-bit records or oversized tables.
    pub fn parse(bytes: &[u8]) -> Result<Self, ElfError> {
        if bytes.len() < EHDR_SIZE {
            return Err(ElfError::TooShort);
        }
        if bytes[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if bytes[4] != ELFCLASS32 || bytes[5] != ELFDATA2LSB {
            return Err(ElfError::BadClass);
        }

        let eh = Self {
            e_type: le16(&bytes[16..18]),
            e_machine: le16(&bytes[18..20]),
            e_entry: le32(&bytes[24..28]),
            e_phoff: le32(&bytes[28..32]),
            e_shoff: le32(&bytes[32..36]),
            e_phentsize: le16(&bytes[42..44]),
            e_phnum: le16(&bytes[44..46]),
            e_shentsize: le16(&bytes[46..48]),
            e_shnum: le16(&bytes[48..50]),
            e_shstrndx: le16(&bytes[50..52]),
        };

        check_table(eh.e_phnum, eh.e_phentsize, PHDR_SIZE)?;
        check_table(eh.e_shnum, eh.e_shentsize, SHDR_SIZE)?;
        Ok(eh)
    }
}

/// Entries must have the 32-bit record size and the whole table must fit
/// [`ELF_TABLE_MAX`].
fn check_table(num: u16, entsize: u16, record: usize) -> Result<(), ElfError> {
    if num == 0 {
        return Ok(());
    }
    let entsize = usize::from(entsize);
    if entsize != record || usize::from(num) * entsize > ELF_TABLE_MAX {
        return Err(ElfError::BadHeader);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(clippy::struct_field_names)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: PFlags,
    pub p_align: u32,
}

impl ProgramHeader {
    /// Parse one entry; `bytes` holds at least [`PHDR_SIZE`] bytes.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            p_type: le32(&bytes[0..4]),
            p_offset: le32(&bytes[4..8]),
            p_vaddr: le32(&bytes[8..12]),
            p_paddr: le32(&bytes[12..16]),
            p_filesz: le32(&bytes[16..20]),
            p_memsz: le32(&bytes[20..24]),
            p_flags: PFlags::from_bits(le32(&bytes[24..28])),
            p_align: le32(&bytes[28..32]),
        }
    }

    #[must_use]
    pub const fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(clippy::struct_field_names)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u32,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
}

impl SectionHeader {
    /// Parse one entry; `bytes` holds at least [`SHDR_SIZE`] bytes.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            sh_name: le32(&bytes[0..4]),
            sh_type: le32(&bytes[4..8]),
            sh_flags: le32(&bytes[8..12]),
            sh_addr: le32(&bytes[12..16]),
            sh_offset: le32(&bytes[16..20]),
            sh_size: le32(&bytes[20..24]),
        }
    }

    /// `SHT_NOBITS` with both `SHF_WRITE` and `SHF_ALLOC`.
    #[must_use]
    pub const fn is_bss(&self) -> bool {
        let wa = SHF_WRITE | SHF_ALLOC;
        self.sh_type == SHT_NOBITS && self.sh_flags & wa == wa
    }
}
