use super::{
    MapRecord, PartitionRecord, ProgramRecord, Record, SYSPAGE_MAGIC, SchedWindowRecord,
    SyspageHeader, TABLE_ALIGN, TableRef, KernelInfo,
};
use core::marker::PhantomData;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ViewError {
    #[error("The blob is shorter than the syspage header")]
    TooShort,
    #[error("The syspage magic does not match")]
    BadMagic,
    #[error("A syspage table is not aligned")]
    BadAlignment,
    #[error("A syspage table lies outside the blob")]
    OutOfBounds,
}

/// Parsed, bounds-checked view over a serialized syspage.
pub struct SyspageView<'a> {
    blob: &'a [u8],
    hdr: SyspageHeader,
}

/// Iterator over the records of one table.
pub struct Records<'a, R: Record> {
    bytes: &'a [u8],
    idx: usize,
    count: usize,
    _record: PhantomData<R>,
}

impl<'a> SyspageView<'a> {
    /// Parse and validate a syspage blob.
    ///
    /// # Errors
    /// Returns a [`ViewError`] if the header or any table is malformed.
    pub fn parse(blob: &'a [u8]) -> Result<Self, ViewError> {
        if blob.len() < SyspageHeader::SIZE {
            return Err(ViewError::TooShort);
        }

        let hdr = SyspageHeader::decode(blob);
        if hdr.magic != SYSPAGE_MAGIC {
            return Err(ViewError::BadMagic);
        }

        let size = hdr.size as usize;
        if size > blob.len() || size < SyspageHeader::SIZE {
            return Err(ViewError::OutOfBounds);
        }
        let blob = &blob[..size];

        check_table(blob, hdr.maps, MapRecord::SIZE)?;
        check_table(blob, hdr.progs, ProgramRecord::SIZE)?;
        check_table(blob, hdr.parts, PartitionRecord::SIZE)?;
        check_table(blob, hdr.windows, SchedWindowRecord::SIZE)?;

        // Argument string: byte granular, any alignment.
        let args_end = (hdr.args.off as usize)
            .checked_add(hdr.args.count as usize)
            .ok_or(ViewError::OutOfBounds)?;
        if args_end > blob.len() {
            return Err(ViewError::OutOfBounds);
        }

        Ok(Self { blob, hdr })
    }

    #[must_use]
    pub const fn header(&self) -> &SyspageHeader {
        &self.hdr
    }

    #[must_use]
    pub const fn kernel(&self) -> &KernelInfo {
        &self.hdr.kernel
    }

    #[must_use]
    pub fn maps(&self) -> Records<'a, MapRecord> {
        self.records(self.hdr.maps)
    }

    #[must_use]
    pub fn programs(&self) -> Records<'a, ProgramRecord> {
        self.records(self.hdr.progs)
    }

    #[must_use]
    pub fn partitions(&self) -> Records<'a, PartitionRecord> {
        self.records(self.hdr.parts)
    }

    #[must_use]
    pub fn sched_windows(&self) -> Records<'a, SchedWindowRecord> {
        self.records(self.hdr.windows)
    }

    /// Find a map record by its id.
    #[must_use]
    pub fn map(&self, id: u8) -> Option<MapRecord> {
        self.maps().find(|m| m.id == id)
    }

    /// The argument string without its terminating NUL.
    #[must_use]
    pub fn args(&self) -> &'a [u8] {
        let start = self.hdr.args.off as usize;
        let bytes = &self.blob[start..start + self.hdr.args.count as usize];
        match bytes.iter().position(|&b| b == 0) {
            Some(nul) => &bytes[..nul],
            None => bytes,
        }
    }

    fn records<R: Record>(&self, table: TableRef) -> Records<'a, R> {
        let start = table.off as usize;
        let count = table.count as usize;
        Records {
            bytes: &self.blob[start..start + count * R::SIZE],
            idx: 0,
            count,
            _record: PhantomData,
        }
    }
}

fn check_table(blob: &[u8], table: TableRef, record_size: usize) -> Result<(), ViewError> {
    let off = table.off as usize;
    if off % TABLE_ALIGN != 0 {
        return Err(ViewError::BadAlignment);
    }
    let len = (table.count as usize)
        .checked_mul(record_size)
        .ok_or(ViewError::OutOfBounds)?;
    let end = off.checked_add(len).ok_or(ViewError::OutOfBounds)?;
    if end > blob.len() {
        return Err(ViewError::OutOfBounds);
    }
    Ok(())
}

impl<R: Record> Iterator for Records<'_, R> {
    type Item = R;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.count {
            return None;
        }
        let off = self.idx * R::SIZE;
        self.idx += 1;
        Some(R::decode(&self.bytes[off..off + R::SIZE]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let r = self.count.saturating_sub(self.idx);
        (r, Some(r))
    }
}

impl<R: Record> ExactSizeIterator for Records<'_, R> {}

impl<R: Record> core::iter::FusedIterator for Records<'_, R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syspage::{Region, fixed};
    use plo_memory::PhysicalAddress;

    fn blob_with_one_map() -> [u8; 160] {
        let mut blob = [0u8; 160];
        let hdr = SyspageHeader {
            magic: SYSPAGE_MAGIC,
            size: 160,
            kernel: KernelInfo {
                text: Region::new(0x8000_0000, 0x1_0000),
                ..KernelInfo::default()
            },
            maps: TableRef { off: 104, count: 1 },
            progs: TableRef { off: 136, count: 0 },
            parts: TableRef { off: 136, count: 0 },
            windows: TableRef { off: 136, count: 0 },
            args: TableRef { off: 136, count: 5 },
        };
        hdr.encode(&mut blob);
        MapRecord {
            start: PhysicalAddress::new(0x10_0000),
            end: PhysicalAddress::new(0x2010_0000),
            attr: 7,
            id: 0,
            name: fixed("ddr"),
        }
        .encode(&mut blob[104..136]);
        blob[136..141].copy_from_slice(b"\x01ab \0");
        blob
    }

    #[test]
    fn parses_tables_and_args() {
        let blob = blob_with_one_map();
        let view = SyspageView::parse(&blob).unwrap();
        assert_eq!(view.kernel().text, Region::new(0x8000_0000, 0x1_0000));
        assert_eq!(view.maps().len(), 1);
        assert_eq!(view.map(0).unwrap().name_str(), "ddr");
        assert_eq!(view.programs().count(), 0);
        assert_eq!(view.args(), b"\x01ab ");
    }

    #[test]
    fn rejects_bad_magic_and_bounds() {
        let mut blob = blob_with_one_map();
        blob[0] ^= 0xff;
        assert_eq!(SyspageView::parse(&blob).err(), Some(ViewError::BadMagic));

        let blob = blob_with_one_map();
        assert_eq!(
            SyspageView::parse(&blob[..120]).err(),
            Some(ViewError::OutOfBounds)
        );
        assert_eq!(SyspageView::parse(&blob[..16]).err(), Some(ViewError::TooShort));
    }

    #[test]
    fn rejects_misaligned_table() {
        let mut blob = blob_with_one_map();
        let mut hdr = SyspageHeader::decode(&blob);
        hdr.maps.off = 105;
        hdr.encode(&mut blob);
        assert_eq!(SyspageView::parse(&blob).err(), Some(ViewError::BadAlignment));
    }
}
