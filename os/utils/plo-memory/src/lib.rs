//! # Physical Addresses and Memory Access
//!
//! Strongly typed physical addresses and a narrow trait through which the
//! loader touches physical memory.
//!
//! ## Overview
//!
//! The loader never dereferences addresses directly. Every byte that lands in
//! RAM (kernel segments, application images, the syspage blob) goes through a
//! [`PhysicalMemory`] implementation:
//!
//! | Implementation | Used by |
//! |----------------|---------|
//! | [`RawMemory`] | Targets; writes through raw pointers (identity mapped). |
//! | `WindowMemory` | Hosted tests (`testing` feature); a set of owned byte windows. |
//!
//! Addresses are carried as [`PhysicalAddress`], a zero-cost wrapper around
//! `u64` that keeps them apart from plain sizes and offsets.
//!
//! ```rust
//! # use plo_memory::*;
//! let pa = PhysicalAddress::new(0x0010_0123);
//! assert_eq!(pa.align_up(PAGE_ALIGN).unwrap().as_u64(), 0x0010_1000);
//! assert_eq!(pa.align_down(PAGE_ALIGN).as_u64(), 0x0010_0000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod memory;
mod physical_address;
#[cfg(feature = "testing")]
mod window;

pub use memory::{MemoryError, PhysicalMemory, RawMemory};
pub use physical_address::{PAGE_ALIGN, PhysicalAddress};
#[cfg(feature = "testing")]
pub use window::WindowMemory;
