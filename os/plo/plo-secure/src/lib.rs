//! # Secure Image Verification
//!
//! Primitives behind the `*-secure` loaders:
//!
//! * [`HashSession`]: a running SHA-256/SHA-384 digest fed chunk by chunk
//!   with exactly the bytes that end up in memory (or, for in-place
//!   images, the bytes the device serves at the mapped address).
//! * [`Digest::verify`]: exact comparison against the expected digest
//!   decoded from a base64 argument with [`decode_exact`].
//! * [`ecdsa_verify`]: P-256 signature check over a prehashed image, with
//!   [`ecdsa_sign`] and [`ecc_pub_key`] for host-side tooling.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod ecdsa;
mod encoding;
mod error;
mod hash;

pub use ecdsa::{Curve, SCALAR_LEN, Scalar, ecc_pub_key, ecdsa_sign, ecdsa_verify};
pub use encoding::decode_exact;
pub use error::SecureError;
pub use hash::{Digest, HashAlgorithm, HashSession, MAX_DIGEST_LEN, hash_digest};

/// Length of the `.signature` section: `R || S`.
pub const SIGNATURE_LEN: usize = 2 * SCALAR_LEN;

/// Split a `.signature` payload into `(r, s)`.
///
/// # Errors
/// [`SecureError::BadLength`] unless `bytes` is exactly [`SIGNATURE_LEN`] long.
pub fn split_signature(bytes: &[u8]) -> Result<(Scalar, Scalar), SecureError> {
    if bytes.len() != SIGNATURE_LEN {
        return Err(SecureError::BadLength {
            expected: SIGNATURE_LEN,
            actual: bytes.len(),
        });
    }
    let mut r = [0u8; SCALAR_LEN];
    let mut s = [0u8; SCALAR_LEN];
    r.copy_from_slice(&bytes[..SCALAR_LEN]);
    s.copy_from_slice(&bytes[SCALAR_LEN..]);
    Ok((r, s))
}

/// Decode a base64 `X || Y` public key argument.
///
/// # Errors
/// [`SecureError::BadEncoding`] or [`SecureError::BadLength`].
pub fn decode_public_key(arg: &str) -> Result<(Scalar, Scalar), SecureError> {
    let mut raw = [0u8; 2 * SCALAR_LEN];
    decode_exact(arg, &mut raw)?;
    split_signature(&raw)
}

/// Decode a base64 digest argument for `algo`.
///
/// # Errors
/// [`SecureError::BadEncoding`] or [`SecureError::BadLength`].
pub fn decode_digest(algo: HashAlgorithm, arg: &str) -> Result<Digest, SecureError> {
    let mut raw = [0u8; MAX_DIGEST_LEN];
    let raw = &mut raw[..algo.digest_len()];
    decode_exact(arg, raw)?;
    Digest::from_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{LevelFilter, Log, Metadata, Record};
    use std::sync::Mutex;

    static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

    struct Capture;

    impl Log for Capture {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            LINES.lock().unwrap().push(format!("{} {}", record.level(), record.args()));
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture;

    #[test]
    fn rejections_are_logged() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(LevelFilter::Trace);

        let good = hash_digest(HashAlgorithm::Sha256, b"kernel");
        let bad = hash_digest(HashAlgorithm::Sha256, b"kerneL");
        assert_eq!(good.verify(bad.as_bytes()), Err(SecureError::DigestMismatch));

        let mut private = [0x11; SCALAR_LEN];
        private[SCALAR_LEN - 1] = 0x01;
        let (r, s) = ecdsa_sign(good.as_bytes(), &private).unwrap();
        let (qx, qy) = ecc_pub_key(&private).unwrap();
        assert_eq!(
            ecdsa_verify(&r, &s, bad.as_bytes(), &qx, &qy, 256),
            Err(SecureError::VerifyFailed)
        );

        let lines = LINES.lock().unwrap();
        assert!(lines.iter().any(|l| l.starts_with("WARN digest mismatch")));
        assert!(lines.iter().any(|l| l.starts_with("WARN ECDSA signature does not match")));
    }
}
