use plo_info::errno::ERR_PHFS_FILE;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum ElfError {
    #[error("The image is shorter than an ELF header")]
    TooShort,
    #[error("Invalid ELF magic")]
    BadMagic,
    #[error("Not a 32-bit little-endian ELF image")]
    BadClass,
    #[error("Malformed ELF header")]
    BadHeader,
    #[error("An ELF table or section lies outside the image")]
    OutOfBounds,
}

impl ElfError {
    /// Negative status code of this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        ERR_PHFS_FILE
    }
}
