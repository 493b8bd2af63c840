//! # Loader Console and Logging
//!
//! Routes diagnostic output of the loader to whatever console the board
//! brings up first (usually a polled UART).
//!
//! ## Output Mechanism
//! ```text
//! log::info!(..) / console_print!(..)
//!     ↓
//! ConsoleSink (fmt::Write)
//!     ↓
//! board sink, registered with console_fmt::set_sink
//!     ↓
//! UART / semihosting / debug port
//! ```
//!
//! Until a sink is registered all output is silently dropped, so logging
//! can be used from the very first instruction of board init.
//!
//! ## Usage
//! ```rust,no_run
//! use plo_console::{ConsoleLogger, console_fmt};
//! use log::{LevelFilter, info};
//!
//! fn uart_puts(s: &str) {
//!     // push bytes into the UART TX FIFO
//! #   let _ = s;
//! }
//!
//! console_fmt::set_sink(uart_puts);
//! ConsoleLogger::new(LevelFilter::Info).init().expect("logger initialization");
//! info!("plo up");
//! ```
//!
//! The `enabled` feature (default) compiles the sink in; without it every
//! operation is a no-op.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::ConsoleLogger;

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod console_fmt {
    use core::fmt::{self, Write};
    use core::sync::atomic::{AtomicPtr, Ordering};

    static SINK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

    /// Register the function receiving console output.
    pub fn set_sink(sink: fn(&str)) {
        SINK.store(sink as *mut (), Ordering::Release);
    }

    fn sink() -> Option<fn(&str)> {
        let raw = SINK.load(Ordering::Acquire);
        if raw.is_null() {
            return None;
        }
        // SAFETY: only ever stored from a `fn(&str)` in `set_sink`.
        Some(unsafe { core::mem::transmute::<*mut (), fn(&str)>(raw) })
    }

    pub struct ConsoleSink;

    impl Write for ConsoleSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            if let Some(sink) = sink() {
                sink(s);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn console_write(args: fmt::Arguments) {
        // Best effort; the console has nowhere to report its own failures.
        let _ = fmt::write(&mut ConsoleSink, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod console_fmt {
    use core::fmt;

    pub fn set_sink(_: fn(&str)) {}

    #[doc(hidden)]
    #[inline(always)]
    pub fn console_write(_: fmt::Arguments) {
        // no-op when feature disabled
    }
}

#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {{
        $crate::console_fmt::console_write(core::format_args!($($arg)*));
    }};
}
