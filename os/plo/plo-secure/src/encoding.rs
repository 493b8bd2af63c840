//! Base64 command-line arguments.

use crate::SecureError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Decode `input` into `out`, which must be filled exactly.
///
/// # Errors
/// [`SecureError::BadEncoding`] for malformed input,
/// [`SecureError::BadLength`] if the decoded size differs from `out.len()`.
pub fn decode_exact(input: &str, out: &mut [u8]) -> Result<(), SecureError> {
    // Room for one extra byte so an overlong input is reported as such.
    let mut buf = [0u8; 128];
    let len = STANDARD
        .decode_slice(input.trim(), &mut buf)
        .map_err(|_| SecureError::BadEncoding)?;
    if len != out.len() {
        return Err(SecureError::BadLength {
            expected: out.len(),
            actual: len,
        });
    }
    out.copy_from_slice(&buf[..len]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exact_length() {
        let mut out = [0u8; 3];
        decode_exact("YWJj", &mut out).unwrap();
        assert_eq!(&out, b"abc");
    }

    #[test]
    fn length_and_alphabet_are_checked() {
        let mut out = [0u8; 4];
        assert_eq!(
            decode_exact("YWJj", &mut out),
            Err(SecureError::BadLength {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(decode_exact("YW*j", &mut out), Err(SecureError::BadEncoding));
    }
}
