use plo_info::errno::{EINVAL, ERR_ARG};

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum SecureError {
    #[error("Unsupported hash algorithm")]
    UnknownAlgorithm,
    #[error("Unsupported curve")]
    UnknownCurve,
    #[error("Invalid base64 encoding")]
    BadEncoding,
    #[error("Expected {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },
    #[error("Digest mismatch")]
    DigestMismatch,
    #[error("Invalid public key")]
    BadKey,
    #[error("Malformed signature")]
    BadSignature,
    #[error("Signature verification failed")]
    VerifyFailed,
}

impl SecureError {
    /// Negative status code of this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::UnknownAlgorithm
            | Self::UnknownCurve
            | Self::BadEncoding
            | Self::BadLength { .. } => ERR_ARG,
            Self::DigestMismatch | Self::BadKey | Self::BadSignature | Self::VerifyFailed => {
                EINVAL
            }
        }
    }
}
