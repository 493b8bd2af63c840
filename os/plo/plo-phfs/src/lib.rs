//! # Phoenix File System (PHFS)
//!
//! A uniform `open`/`read`/`write`/`map`/`erase`/`stat`/`close` surface over
//! heterogeneous backends, addressed by short aliases instead of raw
//! `(major, minor)` pairs.
//!
//! ```text
//!  "flash0" ──┐                    ┌──────────────┐
//!  "uart"   ──┼─► Phfs ──(alias)──►│ DeviceManager│──► dyn Device (major)
//!  "ram"    ──┘     │              └──────────────┘        │ minor
//!                   │ protocol                             ▼
//!                   ├─ Raw:      offsets go to the backend (file windows clamp)
//!                   └─ Phoenixd: framed requests to the host daemon
//! ```
//!
//! ## Handles
//!
//! [`Phfs::open`] hands out a [`Handle`] that indexes a fixed arena of
//! `PHFS_HANDLERS` slots. Every slot carries a generation counter, so a
//! handle kept past its `close` is rejected instead of aliasing a newer
//! file. [`Session`] borrows the [`Phfs`] together with one handle and
//! closes it when dropped.
//!
//! ## Mapping
//!
//! [`Phfs::map`] answers whether a byte range of the open file is reachable
//! in place inside a destination memory map ([`Mapping::Mappable`]) or has
//! to be copied ([`Mapping::NotMappable`]). Execute-in-place flash and RAM
//! disks are mappable; framed transports never are.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod device;
mod error;
mod phfs;
pub mod phoenixd;
pub mod ram;

pub use device::{Device, DeviceManager, Major, MapRequest, Mapping};
pub use error::PhfsError;
pub use phfs::{Handle, Phfs, Protocol, Session, Window};
