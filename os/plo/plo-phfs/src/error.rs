use crate::device::Major;
use plo_info::errno::{ERR_ARG, ERR_PHFS_IO, ERR_PHFS_PROTO};

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum PhfsError {
    #[error("Unknown device alias")]
    UnknownAlias,
    #[error("The alias is already registered")]
    AliasTaken,
    #[error("The alias is empty or too long")]
    BadAlias,
    #[error("The registry is full")]
    RegistryFull,
    #[error("No initialized device {major:?}.{minor}")]
    NoDevice { major: Major, minor: u32 },
    #[error("A backend is already registered for {0:?}")]
    MajorTaken(Major),
    #[error("Unknown file alias")]
    UnknownFile,
    #[error("All PHFS handles are in use")]
    HandlesExhausted,
    #[error("The handle is stale or was never opened")]
    InvalidHandle,
    #[error("The requested mapping mode is not allowed")]
    IncompatibleMode,
    #[error("The operation is not supported by this device or protocol")]
    Unsupported,
    #[error("The device did not answer in time")]
    Timeout,
    #[error("Device I/O failed")]
    Io,
    #[error("Unexpected protocol response")]
    Proto,
}

impl PhfsError {
    /// Negative status code of this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Io | Self::Timeout | Self::Unsupported => ERR_PHFS_IO,
            Self::Proto => ERR_PHFS_PROTO,
            Self::UnknownAlias
            | Self::AliasTaken
            | Self::BadAlias
            | Self::RegistryFull
            | Self::NoDevice { .. }
            | Self::MajorTaken(_)
            | Self::UnknownFile
            | Self::HandlesExhausted
            | Self::InvalidHandle
            | Self::IncompatibleMode => ERR_ARG,
        }
    }
}
