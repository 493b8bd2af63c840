use super::number;
use crate::context::BootContext;
use crate::hal::Hal;
use crate::Error;
use plo_memory::PhysicalAddress;

/// `map` shows the maps, `map <name> <start> <end> <attributes>` adds one.
pub fn map<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    match *args {
        [] => {
            let _ = ctx.syspage.show(ctx.hal.console());
            Ok(())
        }
        [name, start, end, attrs] => {
            let start = PhysicalAddress::new(number(start)?);
            let end = PhysicalAddress::new(number(end)?);
            let attr = ctx
                .hal
                .map_attributes(attrs)
                .ok_or(Error::BadArgument("attributes"))?;
            ctx.syspage.add_map(name, start, end, attr)?;
            Ok(())
        }
        _ => Err(Error::Usage("map [<name> <start> <end> <attributes>]")),
    }
}

/// `syspage` shows the syspage, `syspage <address>` relocates it.
pub fn syspage<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    match *args {
        [] => {
            let _ = ctx.syspage.show(ctx.hal.console());
            Ok(())
        }
        [addr] => {
            let addr = PhysicalAddress::new(number(addr)?);
            ctx.syspage.set_address(addr)?;
            Ok(())
        }
        _ => Err(Error::Usage("syspage [<address>]")),
    }
}

pub fn part<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    match *args {
        [] => {
            let _ = ctx.syspage.prog_show(ctx.hal.console());
            Ok(())
        }
        [name, alloc, access] => Ok(ctx.syspage.add_partition(name, alloc, access)?),
        _ => Err(Error::Usage("part [<name> <alloc maps> <access maps>]")),
    }
}

pub fn sched<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    match *args {
        [sizes] => Ok(ctx.syspage.add_sched_windows(sizes)?),
        _ => Err(Error::Usage("sched <size0;size1;...>")),
    }
}
