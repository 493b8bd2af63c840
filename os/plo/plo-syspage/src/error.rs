use plo_info::errno::{ERR_AGAIN, ERR_ARG, ERR_NOSPC};
use plo_memory::{MemoryError, PhysicalAddress};

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum SyspageError {
    #[error("The syspage was already saved")]
    Sealed,
    #[error("The name is empty or too long")]
    BadName,
    #[error("The name collides with an existing one")]
    NameTaken,
    #[error("The address range is empty or wraps around")]
    BadRange,
    #[error("The range overlaps an existing map")]
    Overlap,
    #[error("The registry is full")]
    Full,
    #[error("Unknown map")]
    UnknownMap,
    #[error("Too many maps in one list")]
    TooManyMaps,
    #[error("Not enough space left in the map")]
    NoSpace,
    #[error("The map top was moved past a reservation ending at {0}, retry")]
    Again(PhysicalAddress),
    #[error("Invalid number")]
    BadNumber,
    #[error("The syspage address is not set")]
    NoAddress,
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl SyspageError {
    /// Negative status code of this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::NoSpace => ERR_NOSPC,
            Self::Again(_) => ERR_AGAIN,
            _ => ERR_ARG,
        }
    }

    /// `true` for the retryable outcome of a map write.
    #[must_use]
    pub const fn is_again(self) -> bool {
        matches!(self, Self::Again(_))
    }
}
