use super::app::{map_in_place, open_image, parse_image_name};
use crate::context::BootContext;
use crate::hal::Hal;
use crate::loader::{copy_to_map, hash_only};
use crate::Error;
use log::info;
use plo_info::attributes::MapAttributes;
use plo_secure::{HashAlgorithm, decode_digest};
use plo_syspage::ProgramFlags;

/// `blob <dev> <name> <map>` copies an opaque file to the top of `map`.
pub fn blob<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    let [dev, name, map] = *args else {
        if args.is_empty() {
            let _ = ctx.syspage.prog_show(ctx.hal.console());
            return Ok(());
        }
        return Err(Error::Usage("blob [<dev> <name> <map>]"));
    };
    let image = parse_image_name(name)?;
    ctx.syspage.map_name_resolve(map)?;

    let mut session = open_image(&mut ctx.phfs, dev, &image)?;
    let size = session.stat()?;
    let placed = copy_to_map(
        &mut session,
        0,
        size,
        &mut ctx.syspage,
        ctx.hal.memory(),
        map,
        None,
    )?;
    session.close()?;

    info!("blob {}: {}..{}", image.file, placed.start, placed.end);
    ctx.syspage.add_prog(
        placed.start,
        placed.end,
        map,
        map,
        &image.cmdline,
        ProgramFlags::new(),
    )?;
    Ok(())
}

/// `blob-secure <dev> <name> <map> <hash> <base64 digest>`
///
/// Blobs are never run by the loader, so a device that maps the file into
/// `map` is verified in place and the program is flagged `no_copy`.
pub fn blob_secure<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    let [dev, name, map, algo, digest] = *args else {
        return Err(Error::Usage("blob-secure <dev> <name> <map> <hash> <base64 digest>"));
    };
    let algo = HashAlgorithm::from_name(algo)?;
    let expected = decode_digest(algo, digest)?;
    let image = parse_image_name(name)?;
    ctx.syspage.map_name_resolve(map)?;

    let mut session = open_image(&mut ctx.phfs, dev, &image)?;
    let size = session.stat()?;
    let read_only = MapAttributes::new().with_read(true);
    let mut flags = ProgramFlags::new();
    let (start, end) = match map_in_place(&mut session, size, read_only, &ctx.syspage, map)? {
        Some(addr) => {
            hash_only(&mut session, 0, size, algo)?.verify(expected.as_bytes())?;
            flags.set_no_copy(true);
            (addr, addr + size)
        }
        None => {
            let placed = copy_to_map(
                &mut session,
                0,
                size,
                &mut ctx.syspage,
                ctx.hal.memory(),
                map,
                Some(algo),
            )?;
            placed
                .digest
                .ok_or(Error::BadArgument("hash"))?
                .verify(expected.as_bytes())?;
            (placed.start, placed.end)
        }
    };
    session.close()?;

    info!("blob-secure {}: {start}..{end} verified ({})", image.file, algo.name());
    ctx.syspage
        .add_prog(start, end, map, map, &image.cmdline, flags)?;
    if flags.no_copy() {
        ctx.syspage.add_entries(start, size)?;
    }
    Ok(())
}
