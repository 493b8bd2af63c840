//! # Syspage Builder
//!
//! Collects everything the kernel needs at hand-off while the loader runs
//! and flattens it into the syspage blob right before the jump.
//!
//! ## Memory maps
//!
//! A map is a named, non-overlapping physical range with attributes and a
//! bump cursor (`top`). Images are placed with [`Syspage::write_to_map`],
//! which copies at `top` and advances it:
//!
//! ```text
//!  start                 top                           end
//!  ├──────────┬───────────┼───────────────────────────┤
//!  │ image A  │ image B   │          free             │
//!  └──────────┴───────────┴───────────────────────────┘
//! ```
//!
//! ## Reservations
//!
//! Ranges that must never be overwritten (the loader itself, kernel
//! segments, the syspage) are recorded with [`Syspage::add_entries`]. Each
//! map keeps the clipped, merged part of every reservation that falls into
//! it. A reservation at `top` pushes `top` past it; a write that would run
//! into one moves `top` behind it and reports [`SyspageError::Again`]
//! instead of writing, so the caller restarts the image at the new top.
//!
//! ## Programs, partitions and scheduler windows
//!
//! Every loaded image is registered with [`Syspage::add_prog`], which also
//! appends its command line to the argument string. Partitions group maps
//! a domain may allocate from and access. Scheduler windows are laid end to
//! end starting at time 0.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod error;
mod list;
mod map;
mod syspage;

pub use error::SyspageError;
pub use list::{parse_number, split_list};
pub use map::{Entry, MemoryMap};
pub use syspage::{Partition, Program, ProgramFlags, Syspage};
