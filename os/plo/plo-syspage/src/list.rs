//! Argument helpers shared by the map, partition and scheduler commands.

use crate::SyspageError;

/// Split a semicolon-delimited list, skipping empty items.
///
/// ```rust
/// # use plo_syspage::split_list;
/// let maps: Vec<_> = split_list("ddr;ocram;").collect();
/// assert_eq!(maps, ["ddr", "ocram"]);
/// ```
pub fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
///
/// # Errors
/// [`SyspageError::BadNumber`] if `s` is not a number or does not fit.
pub fn parse_number(s: &str) -> Result<u64, SyspageError> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| SyspageError::BadNumber)
}
