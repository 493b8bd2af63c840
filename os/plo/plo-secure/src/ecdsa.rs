//! # ECDSA over P-256
//!
//! Scalars and coordinates cross this interface as 32-byte little-endian
//! arrays; they are reversed into the big-endian SEC1 form only here.

use crate::SecureError;
use log::{debug, warn};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};

/// Size of one scalar or coordinate.
pub const SCALAR_LEN: usize = 32;

/// A little-endian scalar or coordinate.
pub type Scalar = [u8; SCALAR_LEN];

/// Supported curves.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Curve {
    Secp256r1,
}

impl Curve {
    /// # Errors
    /// [`SecureError::UnknownCurve`] for anything but `secp256r1`.
    pub fn from_name(name: &str) -> Result<Self, SecureError> {
        match name {
            "secp256r1" => Ok(Self::Secp256r1),
            _ => Err(SecureError::UnknownCurve),
        }
    }

    #[must_use]
    pub const fn key_bits(self) -> u32 {
        match self {
            Self::Secp256r1 => 256,
        }
    }
}

fn reversed(v: &Scalar) -> Scalar {
    let mut out = *v;
    out.reverse();
    out
}

fn verifying_key(qx: &Scalar, qy: &Scalar) -> Result<VerifyingKey, SecureError> {
    let mut sec1 = [0u8; 1 + 2 * SCALAR_LEN];
    sec1[0] = 0x04;
    sec1[1..=SCALAR_LEN].copy_from_slice(&reversed(qx));
    sec1[1 + SCALAR_LEN..].copy_from_slice(&reversed(qy));
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| {
        warn!("public key is not a point on the curve");
        SecureError::BadKey
    })
}

/// Verify the signature `(r, s)` over the prehashed `hash` with the public
/// key `(qx, qy)`.
///
/// # Errors
/// [`SecureError::UnknownCurve`] if `key_bits` is not 256,
/// [`SecureError::BadKey`] if `(qx, qy)` is not on the curve,
/// [`SecureError::BadSignature`] for out-of-range scalars and
/// [`SecureError::VerifyFailed`] if the signature does not match.
pub fn ecdsa_verify(
    r: &Scalar,
    s: &Scalar,
    hash: &[u8],
    qx: &Scalar,
    qy: &Scalar,
    key_bits: u32,
) -> Result<(), SecureError> {
    if key_bits != Curve::Secp256r1.key_bits() {
        return Err(SecureError::UnknownCurve);
    }
    let key = verifying_key(qx, qy)?;

    let mut rs = [0u8; 2 * SCALAR_LEN];
    rs[..SCALAR_LEN].copy_from_slice(&reversed(r));
    rs[SCALAR_LEN..].copy_from_slice(&reversed(s));
    let signature = Signature::from_slice(&rs).map_err(|_| SecureError::BadSignature)?;

    key.verify_prehash(hash, &signature).map_err(|_| {
        warn!("ECDSA signature does not match the public key");
        SecureError::VerifyFailed
    })?;
    debug!("ECDSA signature verified");
    Ok(())
}

fn signing_key(private: &Scalar) -> Result<SigningKey, SecureError> {
    SigningKey::from_slice(&reversed(private)).map_err(|_| SecureError::BadKey)
}

/// Sign the prehashed `hash`; returns `(r, s)`.
///
/// # Errors
/// [`SecureError::BadKey`] for a zero or out-of-range private key.
pub fn ecdsa_sign(hash: &[u8], private: &Scalar) -> Result<(Scalar, Scalar), SecureError> {
    let key = signing_key(private)?;
    let signature: Signature = key
        .sign_prehash(hash)
        .map_err(|_| SecureError::BadSignature)?;
    let bytes = signature.to_bytes();

    let mut r = [0u8; SCALAR_LEN];
    let mut s = [0u8; SCALAR_LEN];
    r.copy_from_slice(&bytes[..SCALAR_LEN]);
    s.copy_from_slice(&bytes[SCALAR_LEN..]);
    r.reverse();
    s.reverse();
    Ok((r, s))
}

/// Public key `(qx, qy)` of `private`.
///
/// # Errors
/// [`SecureError::BadKey`] for a zero or out-of-range private key.
pub fn ecc_pub_key(private: &Scalar) -> Result<(Scalar, Scalar), SecureError> {
    let key = signing_key(private)?;
    let point = key.verifying_key().to_encoded_point(false);
    let sec1 = point.as_bytes();

    let mut qx = [0u8; SCALAR_LEN];
    let mut qy = [0u8; SCALAR_LEN];
    qx.copy_from_slice(&sec1[1..=SCALAR_LEN]);
    qy.copy_from_slice(&sec1[1 + SCALAR_LEN..]);
    qx.reverse();
    qy.reverse();
    Ok((qx, qy))
}
