//! # Loader Configuration and Syspage Interface
//!
//! Shared constants and the binary contract between the loader and the
//! kernel it starts.
//!
//! ## Architecture
//!
//! ### Configuration ([`config`])
//! Capacities of every fixed-size registry (maps, devices, handles,
//! programs, ...), name lengths that are baked into the syspage records and
//! the transfer chunk size used by the loaders. All values are checked at
//! compile time.
//!
//! ### Syspage ([`syspage`])
//! The boot descriptor handed to the kernel by address:
//!
//! ```text
//! syspage address
//! ┌──────────────────────────────┐ 0
//! │ Header (magic, size, kernel  │
//! │ text/data/bss/entry, counts  │
//! │ and offsets of every table)  │
//! ├──────────────────────────────┤ maps_off
//! │ MapRecord × maps_count       │
//! ├──────────────────────────────┤ progs_off
//! │ ProgramRecord × progs_count  │
//! ├──────────────────────────────┤ parts_off
//! │ PartitionRecord × ...        │
//! ├──────────────────────────────┤ windows_off
//! │ SchedWindowRecord × ...      │
//! ├──────────────────────────────┤ args_off
//! │ argument string (NUL term.)  │
//! └──────────────────────────────┘ size
//! ```
//!
//! Every field is little-endian; tables are 8-byte aligned. The loader
//! produces the blob with [`syspage::SyspageHeader::encode`] and the
//! record encoders; the kernel (and the tests) read it back through
//! [`syspage::view::SyspageView`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod attributes;
pub mod config;
pub mod errno;
pub mod syspage;
