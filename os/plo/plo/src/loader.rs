//! Streaming image placement shared by the load commands.
//!
//! Images are never buffered whole: bytes move from PHFS in chunks of
//! [`LOAD_CHUNK_SIZE`] and each chunk is written and hashed before the
//! next one is read, so the digest always covers exactly the resident
//! bytes.

use crate::Error;
use log::debug;
use plo_elf::{ElfSource, ProgramHeader};
use plo_info::config::{LOAD_CHUNK_SIZE, MAX_ENTRIES};
use plo_memory::{PhysicalAddress, PhysicalMemory};
use plo_phfs::Session;
use plo_secure::{Digest, HashAlgorithm, HashSession};
use plo_syspage::{SyspageError, Syspage};

/// ELF access through an open PHFS session.
pub struct SessionSource<'s, 'p>(pub &'s mut Session<'p>);

impl ElfSource for SessionSource<'_, '_> {
    type Error = Error;

    fn read_at(&mut self, offs: u64, buf: &mut [u8]) -> Result<(), Error> {
        self.0.read_exact(offs, buf).map_err(Error::from)
    }
}

/// An image copied to (or found in) its destination.
#[derive(Debug, Clone, Copy)]
pub struct Placed {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
    pub digest: Option<Digest>,
}

fn chunk_len(remaining: u64) -> usize {
    usize::try_from(remaining).map_or(LOAD_CHUNK_SIZE, |r| r.min(LOAD_CHUNK_SIZE))
}

/// Copy `size` bytes at `offs` of the session to the top of `map`,
/// hashing them with `algo` on the way.
///
/// The image is placed contiguously at the page aligned top. When a chunk
/// runs into a reservation the copy starts over behind it with a fresh
/// hash session.
///
/// # Errors
/// [`Error::EmptyImage`], PHFS read errors, or
/// [`SyspageError::NoSpace`] once the map is exhausted.
pub fn copy_to_map(
    session: &mut Session<'_>,
    offs: u64,
    size: u64,
    syspage: &mut Syspage,
    mem: &mut dyn PhysicalMemory,
    map: &str,
    algo: Option<HashAlgorithm>,
) -> Result<Placed, Error> {
    if size == 0 {
        return Err(Error::EmptyImage);
    }
    for _ in 0..=MAX_ENTRIES {
        match copy_once(session, offs, size, syspage, mem, map, algo) {
            Err(Error::Syspage(e)) if e.is_again() => {
                debug!("map {map}: collided with a reservation, starting over");
            }
            placed => return placed,
        }
    }
    Err(SyspageError::NoSpace.into())
}

fn copy_once(
    session: &mut Session<'_>,
    offs: u64,
    size: u64,
    syspage: &mut Syspage,
    mem: &mut dyn PhysicalMemory,
    map: &str,
    algo: Option<HashAlgorithm>,
) -> Result<Placed, Error> {
    let start = syspage.align_map_top(map)?;
    if syspage.free_size(map)? < size {
        return Err(SyspageError::NoSpace.into());
    }

    let mut hash = algo.map(HashSession::new);
    let mut buf = [0u8; LOAD_CHUNK_SIZE];
    let mut done = 0;
    while done < size {
        let chunk = &mut buf[..chunk_len(size - done)];
        session.read_exact(offs + done, chunk)?;
        syspage.write_to_map(mem, map, chunk)?;
        if let Some(hash) = hash.as_mut() {
            hash.feed(chunk);
        }
        done += chunk.len() as u64;
    }

    Ok(Placed {
        start,
        end: start + size,
        digest: hash.map(HashSession::finish),
    })
}

/// Hash `size` bytes at `offs` without placing them anywhere.
///
/// # Errors
/// PHFS read errors.
pub fn hash_only(
    session: &mut Session<'_>,
    offs: u64,
    size: u64,
    algo: HashAlgorithm,
) -> Result<Digest, Error> {
    let mut hash = HashSession::new(algo);
    let mut buf = [0u8; LOAD_CHUNK_SIZE];
    let mut done = 0;
    while done < size {
        let chunk = &mut buf[..chunk_len(size - done)];
        session.read_exact(offs + done, chunk)?;
        hash.feed(chunk);
        done += chunk.len() as u64;
    }
    Ok(hash.finish())
}

/// Copy the file bytes of a `PT_LOAD` segment to `dest`, feeding `hash`.
/// Bytes between `p_filesz` and `p_memsz` are left alone.
///
/// # Errors
/// PHFS read or memory errors.
pub fn copy_segment(
    session: &mut Session<'_>,
    ph: &ProgramHeader,
    dest: PhysicalAddress,
    mem: &mut dyn PhysicalMemory,
    mut hash: Option<&mut HashSession>,
) -> Result<(), Error> {
    let size = u64::from(ph.p_filesz);
    let offs = u64::from(ph.p_offset);
    let mut buf = [0u8; LOAD_CHUNK_SIZE];
    let mut done = 0;
    while done < size {
        let chunk = &mut buf[..chunk_len(size - done)];
        session.read_exact(offs + done, chunk)?;
        mem.write(dest + done, chunk)?;
        if let Some(hash) = hash.as_deref_mut() {
            hash.feed(chunk);
        }
        done += chunk.len() as u64;
    }
    debug!("segment {:#x}+{size:#x} -> {dest}", ph.p_offset);
    Ok(())
}
