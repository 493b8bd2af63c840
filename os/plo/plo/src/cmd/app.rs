use super::number;
use crate::context::BootContext;
use crate::hal::Hal;
use crate::loader::{copy_to_map, hash_only};
use crate::Error;
use alloc::string::String;
use log::{info, warn};
use plo_info::attributes::MapAttributes;
use plo_info::config::MAX_PROG_MAPS;
use plo_memory::PhysicalAddress;
use plo_phfs::{Mapping, Phfs, PhfsError, Session, Window};
use plo_secure::{HashAlgorithm, decode_digest};
use plo_syspage::{ProgramFlags, Syspage, split_list};

/// `<file>[;argv][(offs:size)]` split into its parts.
#[derive(Debug, Eq, PartialEq)]
pub struct ImageName<'a> {
    pub file: &'a str,
    /// File name and arguments as handed to the kernel.
    pub cmdline: String,
    /// Explicit window of a raw device.
    pub window: Option<Window>,
}

pub fn parse_image_name(arg: &str) -> Result<ImageName<'_>, Error> {
    let (rest, window) = match arg.find('(') {
        None => (String::from(arg), None),
        Some(open) => {
            let close = arg[open..]
                .find(')')
                .map(|c| open + c)
                .ok_or(Error::BadArgument("window"))?;
            let (offs, size) = arg[open + 1..close]
                .split_once(':')
                .ok_or(Error::BadArgument("window"))?;
            let window = Window {
                addr: number(offs)?,
                size: number(size)?,
            };
            let mut rest = String::from(&arg[..open]);
            rest.push_str(&arg[close + 1..]);
            (rest, Some(window))
        }
    };

    let file = arg[..arg.find([';', '(']).unwrap_or(arg.len())].trim();
    if file.is_empty() {
        return Err(Error::BadArgument("name"));
    }
    Ok(ImageName {
        file,
        cmdline: rest,
        window,
    })
}

/// Open `image` on `dev`: an explicit window or a named file.
pub fn open_image<'p>(
    phfs: &'p mut Phfs,
    dev: &str,
    image: &ImageName<'_>,
) -> Result<Session<'p>, Error> {
    let session = match image.window {
        Some(window) => phfs.window_session(dev, window)?,
        None => phfs.session(dev, Some(image.file), 0)?,
    };
    Ok(session)
}

/// Ask the backend for the image at a CPU address inside `map`.
pub fn map_in_place(
    session: &mut Session<'_>,
    size: u64,
    mode: MapAttributes,
    syspage: &Syspage,
    map: &str,
) -> Result<Option<PhysicalAddress>, Error> {
    let (start, end) = syspage.map_range_resolve(map)?;
    let attr = syspage.map_attr_resolve(map)?;
    let map_size = end.distance_from(start).unwrap_or(0);
    match session.map(0, size, mode, start, map_size, attr) {
        Ok(Mapping::Mappable(addr)) => Ok(Some(addr)),
        Ok(Mapping::NotMappable) | Err(PhfsError::IncompatibleMode) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Split off a leading device alias if `args[0]` names one.
fn split_device<'a, H: Hal>(
    ctx: &BootContext<H>,
    args: &'a [&'a str],
) -> Result<(String, &'a [&'a str]), Error> {
    match args.split_first() {
        Some((first, rest)) if ctx.phfs.protocol(first).is_ok() => Ok(((*first).into(), rest)),
        _ => Ok((ctx.device()?, args)),
    }
}

fn resolve_lists<H: Hal>(ctx: &BootContext<H>, imaps: &str, dmaps: &str) -> Result<(), Error> {
    ctx.syspage.resolve_map_list(imaps, MAX_PROG_MAPS)?;
    ctx.syspage.resolve_map_list(dmaps, MAX_PROG_MAPS)?;
    Ok(())
}

/// `app [<dev>] [-x] <name>[;argv][(offs:size)] <imaps> [dmaps]`
///
/// The image is used in place if the device can map it into the first
/// instruction map, otherwise it is copied to the top of that map.
pub fn app<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    const USAGE: &str = "app [<dev>] [-x] <name>[;argv][(offs:size)] <imaps> [dmaps]";
    if args.is_empty() {
        let _ = ctx.syspage.prog_show(ctx.hal.console());
        return Ok(());
    }
    let (dev, args) = split_device(ctx, args)?;
    let (exec, args) = match args.split_first() {
        Some((&"-x", rest)) => (true, rest),
        _ => (false, args),
    };
    let (name, imaps, dmaps) = match *args {
        [name, imaps] => (name, imaps, imaps),
        [name, imaps, dmaps] => (name, imaps, dmaps),
        _ => return Err(Error::Usage(USAGE)),
    };
    let image = parse_image_name(name)?;
    let imap = split_list(imaps).next().ok_or(Error::BadArgument("imaps"))?;
    resolve_lists(ctx, imaps, dmaps)?;

    let mut session = open_image(&mut ctx.phfs, &dev, &image)?;
    let size = session.stat()?;
    let in_place =
        map_in_place(&mut session, size, MapAttributes::read_exec(), &ctx.syspage, imap)?;
    let (start, end) = match in_place {
        Some(addr) => (addr, addr + size),
        None => {
            let placed = copy_to_map(
                &mut session,
                0,
                size,
                &mut ctx.syspage,
                ctx.hal.memory(),
                imap,
                None,
            )?;
            (placed.start, placed.end)
        }
    };
    session.close()?;

    info!("app {}: {start}..{end} from {dev}", image.file);
    let flags = ProgramFlags::new().with_exec(exec);
    ctx.syspage
        .add_prog(start, end, imaps, dmaps, &image.cmdline, flags)?;
    if in_place.is_some() {
        ctx.syspage.add_entries(start, size)?;
    }
    Ok(())
}

/// `app-secure <dev> [-x|-xn] <name>[;argv] <imaps> <dmaps> <hash> <base64 digest>`
///
/// The image is accepted only if its digest matches. With `-xn` and a
/// device that maps the image into the first instruction map, the bytes
/// are hashed where they are and not copied; the program is flagged
/// `no_copy` and the kernel has to verify it again before running it, as
/// the device contents can change after this check.
pub fn app_secure<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    const USAGE: &str =
        "app-secure <dev> [-x|-xn] <name>[;argv] <imaps> <dmaps> <hash> <base64 digest>";
    let (dev, args) = args.split_first().ok_or(Error::Usage(USAGE))?;
    let (exec, no_copy, args) = match args.split_first() {
        Some((&"-x", rest)) => (true, false, rest),
        Some((&"-xn", rest)) => (true, true, rest),
        _ => (false, false, args),
    };
    let [name, imaps, dmaps, algo, digest] = *args else {
        return Err(Error::Usage(USAGE));
    };

    let algo = HashAlgorithm::from_name(algo)?;
    let expected = decode_digest(algo, digest)?;
    let image = parse_image_name(name)?;
    let imap = split_list(imaps).next().ok_or(Error::BadArgument("imaps"))?;
    resolve_lists(ctx, imaps, dmaps)?;

    let mut session = open_image(&mut ctx.phfs, dev, &image)?;
    let size = session.stat()?;
    let in_place = if no_copy {
        map_in_place(&mut session, size, MapAttributes::read_exec(), &ctx.syspage, imap)?
    } else {
        None
    };

    let mut flags = ProgramFlags::new().with_exec(exec);
    let (start, end) = match in_place {
        Some(addr) => {
            hash_only(&mut session, 0, size, algo)?.verify(expected.as_bytes())?;
            warn!(
                "app-secure {}: verified in place at {addr}, the kernel must verify it again",
                image.file
            );
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
                imap,
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

    info!("app-secure {}: {start}..{end} verified ({})", image.file, algo.name());
    ctx.syspage
        .add_prog(start, end, imaps, dmaps, &image.cmdline, flags)?;
    if in_place.is_some() {
        ctx.syspage.add_entries(start, size)?;
    }
    Ok(())
}
