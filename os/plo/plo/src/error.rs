use plo_elf::ElfError;
use plo_info::errno::{EINVAL, ERR_ARG, ERR_PHFS_FILE};
use plo_memory::MemoryError;
use plo_phfs::PhfsError;
use plo_secure::SecureError;
use plo_syspage::SyspageError;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Phfs(#[from] PhfsError),
    #[error(transparent)]
    Syspage(#[from] SyspageError),
    #[error(transparent)]
    Elf(#[from] ElfError),
    #[error(transparent)]
    Secure(#[from] SecureError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("Unknown command")]
    UnknownCommand,
    #[error("Invalid {0}")]
    BadArgument(&'static str),
    #[error("The image has no .signature section")]
    NoSignature,
    #[error("No kernel loaded")]
    NoKernel,
    #[error("The image is empty")]
    EmptyImage,
}

impl Error {
    /// Negative status code of this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Phfs(e) => e.code(),
            Self::Syspage(e) => e.code(),
            Self::Elf(e) => e.code(),
            Self::Secure(e) => e.code(),
            Self::NoSignature => EINVAL,
            Self::EmptyImage => ERR_PHFS_FILE,
            Self::Memory(_)
            | Self::Usage(_)
            | Self::UnknownCommand
            | Self::BadArgument(_)
            | Self::NoKernel => ERR_ARG,
        }
    }
}
