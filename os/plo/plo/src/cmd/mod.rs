//! # Command Table
//!
//! Every command is a thin wrapper that parses its arguments and calls into
//! PHFS, the syspage or the loaders. Failures are printed with their status
//! code and never end the session; only scripts stop at the first failure.

mod app;
mod blob;
mod kernel;
mod map;
mod phfs;

use crate::context::BootContext;
use crate::hal::Hal;
use crate::Error;
use alloc::vec::Vec;
use core::fmt::Write as _;
use log::error;
use plo_syspage::parse_number;

/// Outcome of one command line.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CmdExit {
    Success,
    Failure,
}

pub type Handler<H> = fn(&mut BootContext<H>, &[&str]) -> Result<(), Error>;

pub struct Command<H> {
    pub name: &'static str,
    pub help: &'static str,
    pub run: Handler<H>,
}

/// All commands, in `help` order.
#[must_use]
pub fn commands<H: Hal>() -> [Command<H>; 14] {
    [
        Command {
            name: "app",
            help: "[<dev>] [-x] <name>[;argv][(offs:size)] <imaps> [dmaps]",
            run: app::app,
        },
        Command {
            name: "app-secure",
            help: "<dev> [-x|-xn] <name>[;argv] <imaps> <dmaps> <hash> <base64 digest>",
            run: app::app_secure,
        },
        Command {
            name: "blob",
            help: "[<dev> <name> <map>]",
            run: blob::blob,
        },
        Command {
            name: "blob-secure",
            help: "<dev> <name> <map> <hash> <base64 digest>",
            run: blob::blob_secure,
        },
        Command {
            name: "file",
            help: "<alias> <address> <size>",
            run: phfs::file,
        },
        Command {
            name: "go!",
            help: "start the loaded kernel",
            run: go,
        },
        Command {
            name: "help",
            help: "list commands",
            run: help,
        },
        Command {
            name: "kernel",
            help: "[<dev>]",
            run: kernel::kernel,
        },
        Command {
            name: "kernel-sec",
            help: "<dev> <name> <curve> <hash> <base64 pubkey>",
            run: kernel::kernel_sec,
        },
        Command {
            name: "map",
            help: "[<name> <start> <end> <attributes>]",
            run: map::map,
        },
        Command {
            name: "part",
            help: "[<name> <alloc maps> <access maps>]",
            run: map::part,
        },
        Command {
            name: "phfs",
            help: "[<alias> <major.minor> [protocol]]",
            run: phfs::phfs,
        },
        Command {
            name: "sched",
            help: "<size0;size1;...>",
            run: map::sched,
        },
        Command {
            name: "syspage",
            help: "[<address>]",
            run: map::syspage,
        },
    ]
}

impl<H: Hal> BootContext<H> {
    /// Run one command line. Blank lines and `#` comments succeed.
    pub fn execute(&mut self, line: &str) -> CmdExit {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return CmdExit::Success;
        }
        let args: Vec<&str> = line.split_whitespace().collect();
        let (name, args) = (args[0], &args[1..]);

        let result = commands::<H>()
            .iter()
            .find(|c| c.name == name)
            .map_or(Err(Error::UnknownCommand), |c| (c.run)(self, args));
        match result {
            Ok(()) => CmdExit::Success,
            Err(e) => {
                error!("{name}: {e}");
                let _ = writeln!(self.hal.console(), "{name}: {e} ({})", e.code());
                CmdExit::Failure
            }
        }
    }

    /// Run `script` line by line; stops at the first failing command.
    pub fn run_script(&mut self, script: &str) -> CmdExit {
        for line in script.lines() {
            if self.execute(line) == CmdExit::Failure {
                return CmdExit::Failure;
            }
        }
        CmdExit::Success
    }
}

fn number(arg: &str) -> Result<u64, Error> {
    Ok(parse_number(arg)?)
}

fn go<H: Hal>(ctx: &mut BootContext<H>, args: &[&str]) -> Result<(), Error> {
    if !args.is_empty() {
        return Err(Error::Usage("go!"));
    }
    ctx.launch()
}

fn help<H: Hal>(ctx: &mut BootContext<H>, _args: &[&str]) -> Result<(), Error> {
    let out = ctx.hal.console();
    for c in commands::<H>() {
        let _ = writeln!(out, "{:<12} {}", c.name, c.help);
    }
    Ok(())
}
