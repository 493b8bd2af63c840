//! # Phoenix Loader Core
//!
//! Ties the PHFS layer, the syspage builder, the ELF parser and the
//! verification primitives into the loader's command set.
//!
//! ```text
//!  script / console line
//!        │
//!        ▼
//!  BootContext::execute ──► command table ──► map / phfs / part / sched
//!        │                        │
//!        │                        ├─► kernel, kernel-sec ─► PT_LOAD copy ─► Hal::memory
//!        │                        └─► app, blob (+secure) ─► map top / in place
//!        ▼
//!   go! ─► Syspage::save ─► DeviceManager::done_all ─► Hal::launch
//! ```
//!
//! A board brings up its console and devices, builds a [`BootContext`]
//! and feeds it its pre-init script:
//!
//! ```rust,ignore
//! plo::init_console(uart_puts, LevelFilter::Info)?;
//! let mut devs = DeviceManager::new();
//! devs.register(Major::Ram, 1, Box::new(flash))?;
//! let mut ctx = BootContext::new(board, devs)?;
//! if ctx.run_script(PREINIT) == CmdExit::Success {
//!     ctx.execute("go!");
//! }
//! ```
//!
//! The loader is single threaded; all state lives in the context and is
//! borrowed by one command at a time.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod cmd;
mod context;
mod error;
pub mod hal;
mod loader;

pub use cmd::{CmdExit, Command, Handler, commands};
pub use context::BootContext;
pub use error::Error;
pub use hal::Hal;

use log::{LevelFilter, SetLoggerError};
use plo_console::{ConsoleLogger, console_fmt};

/// Route console output to `sink` and install the logger. Call once.
///
/// # Errors
/// Fails if a logger was already installed.
pub fn init_console(sink: fn(&str), level: LevelFilter) -> Result<(), SetLoggerError> {
    console_fmt::set_sink(sink);
    ConsoleLogger::new(level).init()
}
