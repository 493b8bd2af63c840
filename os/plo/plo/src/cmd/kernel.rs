//! Kernel loading: every `PT_LOAD` segment is copied to the address the
//! board assigns it, then the syspage kernel descriptor and reservations
//! are filled in. `kernel-sec` additionally hashes the segment bytes while
//! copying and checks them against the `.signature` section; nothing is
//! recorded in the syspage unless that check passes.

use crate::context::BootContext;
use crate::hal::Hal;
use crate::loader::{SessionSource, copy_segment};
use crate::Error;
use alloc::string::String;
use alloc::vec::Vec;
use log::info;
use plo_elf::{ElfFile, ElfSource as _, text_range};
use plo_info::syspage::Region;
use plo_memory::PhysicalAddress;
use plo_phfs::Protocol;
use plo_secure::{
    Curve, HashAlgorithm, HashSession, SIGNATURE_LEN, Scalar, SecureError, decode_public_key,
    ecdsa_verify, split_signature,
};

/// Public key and algorithms a signed kernel is checked with.
struct KernelKey {
    curve: Curve,
    algo: HashAlgorithm,
    qx: Scalar,
    qy: Scalar,
}

pub fn kernel<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    let dev = match *args {
        [] => ctx.device()?,
        [dev] => String::from(dev),
        _ => return Err(Error::Usage("kernel [<dev>]")),
    };
    let name = match ctx.phfs.protocol(&dev)? {
        Protocol::Raw => None,
        Protocol::Phoenixd => Some(ctx.hal.kernel_name()),
    };
    load(ctx, &dev, name, None)
}

pub fn kernel_sec<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    let [dev, name, curve, algo, key] = *args else {
        return Err(Error::Usage("kernel-sec <dev> <name> <curve> <hash> <base64 pubkey>"));
    };
    let (qx, qy) = decode_public_key(key)?;
    let key = KernelKey {
        curve: Curve::from_name(curve)?,
        algo: HashAlgorithm::from_name(algo)?,
        qx,
        qy,
    };
    load(ctx, dev, Some(name), Some(key))
}

fn load<H: Hal>(
    ctx: &mut BootContext<H>,
    dev: &str,
    name: Option<&str>,
    key: Option<KernelKey>,
) -> Result<(), Error> {
    ctx.forget_kernel();
    let mut session = ctx.phfs.session(dev, name, 0)?;
    let mut src = SessionSource(&mut session);
    let elf = ElfFile::open(&mut src)?;
    let segments: Vec<_> = elf
        .program_headers(&mut src)?
        .into_iter()
        .filter(|ph| ph.is_load())
        .collect();
    if segments.is_empty() {
        return Err(Error::EmptyImage);
    }
    let bss = elf.bss(&mut src)?;

    let signature = if key.is_some() {
        let section = elf
            .section_by_name(&mut src, ".signature")?
            .ok_or(Error::NoSignature)?;
        let len = section.sh_size as usize;
        if len != SIGNATURE_LEN {
            return Err(SecureError::BadLength {
                expected: SIGNATURE_LEN,
                actual: len,
            }
            .into());
        }
        let mut raw = [0u8; SIGNATURE_LEN];
        src.read_at(u64::from(section.sh_offset), &mut raw)?;
        Some(split_signature(&raw)?)
    } else {
        None
    };

    let mut hash = key.as_ref().map(|k| HashSession::new(k.algo));
    for ph in &segments {
        let dest = ctx.hal.kernel_address(ph);
        copy_segment(&mut session, ph, dest, ctx.hal.memory(), hash.as_mut())?;
    }
    session.close()?;

    if let (Some(key), Some((r, s)), Some(hash)) = (key, signature, hash) {
        let digest = hash.finish();
        ecdsa_verify(&r, &s, digest.as_bytes(), &key.qx, &key.qy, key.curve.key_bits())?;
        info!("kernel signature verified ({})", key.algo.name());
    }

    let (text_start, text_end) =
        text_range(&segments, |ph| ctx.hal.kernel_address(ph).as_u64()).unwrap_or((0, 0));
    ctx.syspage
        .set_kernel_text(Region::new(text_start, text_end - text_start));
    ctx.syspage.set_kernel_data(Region::new(0, 0));
    ctx.syspage.set_kernel_bss(bss.map_or(Region::new(0, 0), |sh| {
        Region::new(u64::from(sh.sh_addr), u64::from(sh.sh_size))
    }));
    let entry = PhysicalAddress::new(u64::from(elf.entry()));
    ctx.syspage.set_kernel_entry(entry);
    for ph in segments.iter().filter(|ph| ph.p_memsz != 0) {
        ctx.syspage
            .add_entries(ctx.hal.kernel_address(ph), u64::from(ph.p_memsz))?;
    }

    ctx.set_kernel_loaded();
    info!("kernel from {dev}: text {text_start:#x}..{text_end:#x}, entry {entry}");
    Ok(())
}
