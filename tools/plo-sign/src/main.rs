//! Host side of the secure load commands.
//!
//! ```text
//! plo-sign digest <hash> <file>           base64 digest for app-secure/blob-secure
//! plo-sign pubkey <key>                   base64 X || Y for kernel-sec
//! plo-sign sign <hash> <key> <elf> [out]  fill the .signature section of a kernel
//! ```
//!
//! `<key>` is a file holding the 32-byte private scalar, little endian.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use plo_elf::{ElfFile, ElfSource as _};
use plo_secure::{
    HashAlgorithm, HashSession, SCALAR_LEN, SIGNATURE_LEN, Scalar, ecc_pub_key, ecdsa_sign,
    hash_digest,
};
use std::{env, fs, io};

const USAGE: &str = "usage: plo-sign digest|pubkey|sign ...";

fn invalid(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, e)
}

fn read_key(path: &str) -> io::Result<Scalar> {
    let bytes = fs::read(path)?;
    Scalar::try_from(bytes.as_slice())
        .map_err(|_| invalid(format!("{path}: expected a {SCALAR_LEN}-byte key")))
}

/// Digest over the file bytes of every `PT_LOAD` segment, in header order.
fn segment_digest(image: &[u8], algo: HashAlgorithm) -> io::Result<Vec<u8>> {
    let mut src = image;
    let elf = ElfFile::open(&mut src).map_err(invalid)?;
    let mut hash = HashSession::new(algo);
    for ph in elf.program_headers(&mut src).map_err(invalid)? {
        if !ph.is_load() {
            continue;
        }
        let mut seg = vec![0u8; ph.p_filesz as usize];
        src.read_at(u64::from(ph.p_offset), &mut seg).map_err(invalid)?;
        hash.feed(&seg);
    }
    Ok(hash.finish().as_bytes().to_vec())
}

/// Write `R || S` over the segments of `image` into its `.signature` section.
fn sign(image: &mut [u8], algo: HashAlgorithm, key: &Scalar) -> io::Result<()> {
    let digest = segment_digest(image, algo)?;
    let mut src: &[u8] = image;
    let elf = ElfFile::open(&mut src).map_err(invalid)?;
    let section = elf
        .section_by_name(&mut src, ".signature")
        .map_err(invalid)?
        .ok_or_else(|| invalid("the image has no .signature section"))?;
    if section.sh_size as usize != SIGNATURE_LEN {
        return Err(invalid(format!(".signature must be {SIGNATURE_LEN} bytes")));
    }

    let (r, s) = ecdsa_sign(&digest, key).map_err(invalid)?;
    let off = section.sh_offset as usize;
    image[off..off + SCALAR_LEN].copy_from_slice(&r);
    image[off + SCALAR_LEN..off + SIGNATURE_LEN].copy_from_slice(&s);
    Ok(())
}

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["digest", algo, file] => {
            let algo = HashAlgorithm::from_name(algo).map_err(invalid)?;
            let data = fs::read(file)?;
            println!("{}", STANDARD.encode(hash_digest(algo, &data).as_bytes()));
        }
        ["pubkey", key] => {
            let (qx, qy) = ecc_pub_key(&read_key(key)?).map_err(invalid)?;
            println!("{}", STANDARD.encode([qx, qy].concat()));
        }
        ["sign", algo, key, elf, rest @ ..] if rest.len() <= 1 => {
            let algo = HashAlgorithm::from_name(algo).map_err(invalid)?;
            let key = read_key(key)?;
            let mut image = fs::read(elf)?;
            sign(&mut image, algo, &key)?;
            fs::write(rest.first().unwrap_or(elf), &image)?;
        }
        _ => return Err(invalid(USAGE)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plo_elf::builder::{ImageBuilder, Seg};
    use plo_secure::{ecdsa_verify, split_signature};

    #[test]
    fn signature_verifies_against_derived_key() {
        let key = [0x42u8; SCALAR_LEN];
        let mut image = ImageBuilder::new(0x8000_0000)
            .segment(Seg::rx(0x8000_0000, &[0x5a; 0x900]))
            .segment(Seg::rw(0x8000_1000, &[0x33; 0x40], 0x200))
            .section(".signature", &[0; SIGNATURE_LEN])
            .build();
        sign(&mut image, HashAlgorithm::Sha256, &key).unwrap();

        let digest = segment_digest(&image, HashAlgorithm::Sha256).unwrap();
        let mut segments = vec![0x5a_u8; 0x900];
        segments.extend_from_slice(&[0x33; 0x40]);
        let expected = hash_digest(HashAlgorithm::Sha256, &segments);
        assert_eq!(digest, expected.as_bytes());

        let mut src: &[u8] = &image;
        let elf = ElfFile::open(&mut src).unwrap();
        let sh = elf.section_by_name(&mut src, ".signature").unwrap().unwrap();
        let off = sh.sh_offset as usize;
        let (r, s) = split_signature(&image[off..off + SIGNATURE_LEN]).unwrap();
        let (qx, qy) = ecc_pub_key(&key).unwrap();
        assert!(ecdsa_verify(&r, &s, &digest, &qx, &qy, 256).is_ok());
    }

    #[test]
    fn unsigned_layout_is_refused() {
        let mut image = ImageBuilder::new(0).segment(Seg::rx(0, &[1; 16])).build();
        let err = sign(&mut image, HashAlgorithm::Sha256, &[0x42; SCALAR_LEN]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
