use super::number;
use crate::context::BootContext;
use crate::hal::Hal;
use crate::Error;
use core::fmt::Write as _;
use plo_phfs::{Major, Protocol};

fn device_number(arg: &str) -> Result<(Major, u32), Error> {
    let (major, minor) = arg.split_once('.').ok_or(Error::BadArgument("major.minor"))?;
    let major = u32::try_from(number(major)?)
        .ok()
        .and_then(Major::from_u32)
        .ok_or(Error::BadArgument("major"))?;
    let minor = u32::try_from(number(minor)?).map_err(|_| Error::BadArgument("minor"))?;
    Ok((major, minor))
}

/// `phfs` lists aliases, `phfs <alias> <major.minor> [protocol]` registers one.
pub fn phfs<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    let (alias, dev, protocol) = match *args {
        [] => {
            let out = ctx.hal.console();
            let _ = ctx.phfs.show_devices(out);
            let _ = ctx.phfs.show_files(out);
            return Ok(());
        }
        [alias, dev] => (alias, dev, Protocol::Raw),
        [alias, dev, protocol] => (
            alias,
            dev,
            Protocol::from_name(protocol).ok_or(Error::BadArgument("protocol"))?,
        ),
        _ => return Err(Error::Usage("phfs [<alias> <major.minor> [protocol]]")),
    };

    let (major, minor) = device_number(dev)?;
    ctx.phfs.reg_dev(alias, major, minor, protocol)?;
    if ctx.default_device.is_none() {
        ctx.default_device = Some(alias.into());
    }
    let _ = writeln!(ctx.hal.console(), "{alias}: {major:?}.{minor} ({})", protocol.name());
    Ok(())
}

/// `file <alias> <address> <size>` names a window of a raw device.
pub fn file<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    let [alias, addr, size] = *args else {
        return Err(Error::Usage("file <alias> <address> <size>"));
    };
    ctx.phfs.reg_file(alias, number(addr)?, number(size)?)?;
    Ok(())
}
