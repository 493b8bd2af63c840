//! # Streaming Digests

use crate::SecureError;
use core::fmt;
use log::warn;
use sha2::{Digest as _, Sha256, Sha384};

/// Largest supported digest.
pub const MAX_DIGEST_LEN: usize = 48;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    /// Resolve a command-line algorithm name.
    ///
    /// # Errors
    /// [`SecureError::UnknownAlgorithm`] for anything but `sha256`/`sha384`.
    pub fn from_name(name: &str) -> Result<Self, SecureError> {
        match name {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            _ => Err(SecureError::UnknownAlgorithm),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
        }
    }

    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }
}

/// A finished digest.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Digest {
    len: usize,
    bytes: [u8; MAX_DIGEST_LEN],
}

impl Digest {
    /// Wrap raw digest bytes.
    ///
    /// # Errors
    /// [`SecureError::BadLength`] if `bytes` is longer than any digest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SecureError> {
        if bytes.len() > MAX_DIGEST_LEN {
            return Err(SecureError::BadLength {
                expected: MAX_DIGEST_LEN,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; MAX_DIGEST_LEN];
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            len: bytes.len(),
            bytes: out,
        })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Exact byte-for-byte comparison; a length difference is a mismatch.
    ///
    /// # Errors
    /// [`SecureError::DigestMismatch`].
    pub fn verify(&self, expected: &[u8]) -> Result<(), SecureError> {
        let actual = self.as_bytes();
        let diff = actual
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if actual.len() != expected.len() || diff != 0 {
            warn!("digest mismatch: computed {self:?}");
            return Err(SecureError::DigestMismatch);
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.as_bytes() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

enum State {
    Sha256(Sha256),
    Sha384(Sha384),
}

/// A running digest, fed chunk by chunk while an image streams in.
pub struct HashSession {
    state: State,
    fed: u64,
}

impl HashSession {
    #[must_use]
    pub fn new(algo: HashAlgorithm) -> Self {
        let state = match algo {
            HashAlgorithm::Sha256 => State::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => State::Sha384(Sha384::new()),
        };
        Self { state, fed: 0 }
    }

    #[must_use]
    pub const fn algorithm(&self) -> HashAlgorithm {
        match self.state {
            State::Sha256(_) => HashAlgorithm::Sha256,
            State::Sha384(_) => HashAlgorithm::Sha384,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        match &mut self.state {
            State::Sha256(h) => h.update(bytes),
            State::Sha384(h) => h.update(bytes),
        }
        self.fed += bytes.len() as u64;
    }

    /// Number of bytes fed so far.
    #[must_use]
    pub const fn fed(&self) -> u64 {
        self.fed
    }

    #[must_use]
    pub fn finish(self) -> Digest {
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        let len = match self.state {
            State::Sha256(h) => {
                bytes[..32].copy_from_slice(&h.finalize());
                32
            }
            State::Sha384(h) => {
                bytes.copy_from_slice(&h.finalize());
                48
            }
        };
        Digest { len, bytes }
    }
}

/// One-shot digest of `data`.
#[must_use]
pub fn hash_digest(algo: HashAlgorithm, data: &[u8]) -> Digest {
    let mut session = HashSession::new(algo);
    session.feed(data);
    session.finish()
}
