//! # Memory Attributes

/// Access and caching attributes of a memory map or of a requested mapping.
///
/// Layout (LSB→MSB):
/// - bit 0: read
/// - bit 1: write
/// - bit 2: execute
/// - bit 3: shareable
/// - bit 4: cacheable
/// - bit 5: bufferable
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct MapAttributes {
    #[bits(1)]
    pub read: bool,
    #[bits(1)]
    pub write: bool,
    #[bits(1)]
    pub exec: bool,
    #[bits(1)]
    pub shareable: bool,
    #[bits(1)]
    pub cacheable: bool,
    #[bits(1)]
    pub bufferable: bool,
    #[bits(26)]
    __: u32,
}

impl MapAttributes {
    /// Read + execute, the access a loaded program image needs.
    #[must_use]
    pub const fn read_exec() -> Self {
        Self::new().with_read(true).with_exec(true)
    }

    /// Parse the generic letter form, one letter per attribute:
    /// `r` read, `w` write, `x`/`e` execute, `s` shareable, `c` cacheable,
    /// `b` bufferable (case-insensitive). Returns `None` on unknown letters
    /// or an empty string.
    #[must_use]
    pub fn parse_letters(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        let mut attr = Self::new();
        for c in s.chars() {
            match c.to_ascii_lowercase() {
                'r' => attr.set_read(true),
                'w' => attr.set_write(true),
                'x' | 'e' => attr.set_exec(true),
                's' => attr.set_shareable(true),
                'c' => attr.set_cacheable(true),
                'b' => attr.set_bufferable(true),
                _ => return None,
            }
        }
        Some(attr)
    }

    /// `true` if every attribute set in `self` is also set in `other`.
    #[must_use]
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.into_bits() & !other.into_bits() == 0
    }
}

impl core::fmt::Display for MapAttributes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let flags = [
            (self.read(), 'r'),
            (self.write(), 'w'),
            (self.exec(), 'x'),
            (self.shareable(), 's'),
            (self.cacheable(), 'c'),
            (self.bufferable(), 'b'),
        ];
        for (set, c) in flags {
            if set {
                core::fmt::Write::write_char(f, c)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_map_to_bits() {
        let a = MapAttributes::parse_letters("RWE").unwrap();
        assert!(a.read() && a.write() && a.exec());
        assert_eq!(a.into_bits(), 0b111);
        assert_eq!(MapAttributes::parse_letters("rxc").unwrap().into_bits(), 0b1_0101);
        assert!(MapAttributes::parse_letters("rq").is_none());
        assert!(MapAttributes::parse_letters("").is_none());
    }

    #[test]
    fn subset_check() {
        let rwx = MapAttributes::parse_letters("rwx").unwrap();
        assert!(MapAttributes::read_exec().is_subset_of(rwx));
        assert!(!rwx.is_subset_of(MapAttributes::read_exec()));
    }

    #[test]
    fn display_uses_letters() {
        let a = MapAttributes::parse_letters("xbr").unwrap();
        assert_eq!(a.to_string(), "rxb");
    }
}
