//! # Status Codes
//!
//! Negative integer status codes reported by commands and by the `code()`
//! accessor of every loader error type.

pub const EOK: i32 = 0;
/// Bad or missing argument, unknown alias or map, size mismatch.
pub const ERR_ARG: i32 = -1;
/// Backend open or transport failure.
pub const ERR_PHFS_IO: i32 = -2;
/// Malformed or unreadable file content.
pub const ERR_PHFS_FILE: i32 = -3;
/// Framed-protocol response did not match the request.
pub const ERR_PHFS_PROTO: i32 = -4;
/// A memory map has no room left.
pub const ERR_NOSPC: i32 = -5;
/// Retryable: a map cursor was moved past a reservation.
pub const ERR_AGAIN: i32 = -11;
/// Signature or digest mismatch.
pub const EINVAL: i32 = -22;
