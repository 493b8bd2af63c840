//! # phoenixd Framed Protocol
//!
//! File access over a byte stream (UART, USB CDC) served by the host-side
//! `phoenixd` daemon. Every request is answered by exactly one response of
//! the same type.
//!
//! ## Frame
//! ```text
//! MARK | stuffed( csum:u32 | type:u16 | len:u16 | data[len] )
//! ```
//! All integers are little-endian. `csum` is CRC-32 (poly `0xEDB88320`)
//! over `type | len | data`. Inside the stuffed part `MARK` and `ESC` are
//! sent as `ESC, byte ^ 0x20`.
//!
//! ## Messages
//! | Type | Request | Response |
//! |------|---------|----------|
//! | `OPEN` | `flags:u32, name, NUL` | `handle:i32` |
//! | `READ` | `handle, pos, len` | `handle, pos, len:i32, data[len]` |
//! | `WRITE` | `handle, pos, len, data[len]` | `handle, pos, len:i32` |
//! | `CLOSE` | `handle` | `status:i32` |
//! | `FSTAT` | `handle` | `status:i32, size:u32` |

extern crate alloc;

use crate::PhfsError;
use crate::device::Device;
use alloc::vec::Vec;
use log::{debug, warn};
use plo_info::config::{DEFAULT_TIMEOUT_MS, MSG_MAXLEN};

pub const MSG_MARK: u8 = 0x7e;
pub const MSG_ESC: u8 = 0x7d;
const MSG_ESC_XOR: u8 = 0x20;

pub const MSG_OPEN: u16 = 1;
pub const MSG_READ: u16 = 2;
pub const MSG_WRITE: u16 = 3;
pub const MSG_CLOSE: u16 = 4;
pub const MSG_FSTAT: u16 = 6;

const MSG_HDRSZ: usize = 8;
const IO_HDRSZ: usize = 12;
const RETRANSMITS: usize = 3;

/// Largest data chunk carried by one `READ` or `WRITE`.
pub const MAX_IO_CHUNK: usize = MSG_MAXLEN - IO_HDRSZ;

/// CRC-32 (IEEE, reflected) used for frame checksums.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xffff_ffff_u32;
    for &b in data {
        crc ^= u32::from(b);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xedb8_8320 & mask);
        }
    }
    !crc
}

/// A decoded message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub msg_type: u16,
    pub data: Vec<u8>,
}

/// Encode a message into a stuffed frame.
///
/// # Errors
/// [`PhfsError::Proto`] if the payload exceeds [`MSG_MAXLEN`].
pub fn encode_frame(msg_type: u16, data: &[u8]) -> Result<Vec<u8>, PhfsError> {
    if data.len() > MSG_MAXLEN {
        return Err(PhfsError::Proto);
    }
    let len = u16::try_from(data.len()).map_err(|_| PhfsError::Proto)?;

    let mut raw = Vec::with_capacity(MSG_HDRSZ + data.len());
    raw.extend_from_slice(&[0; 4]);
    raw.extend_from_slice(&msg_type.to_le_bytes());
    raw.extend_from_slice(&len.to_le_bytes());
    raw.extend_from_slice(data);
    let csum = crc32(&raw[4..]);
    raw[..4].copy_from_slice(&csum.to_le_bytes());

    let mut frame = Vec::with_capacity(raw.len() * 2 + 1);
    frame.push(MSG_MARK);
    for b in raw {
        if b == MSG_MARK || b == MSG_ESC {
            frame.push(MSG_ESC);
            frame.push(b ^ MSG_ESC_XOR);
        } else {
            frame.push(b);
        }
    }
    Ok(frame)
}

/// Incremental frame decoder; feed it received bytes one at a time.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    in_frame: bool,
    escaped: bool,
}

impl FrameDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            in_frame: false,
            escaped: false,
        }
    }

    /// Consume one byte. Returns a message once a complete frame with a valid
    /// checksum has been received; corrupted frames are dropped.
    pub fn push(&mut self, byte: u8) -> Option<Message> {
        if byte == MSG_MARK {
            self.buf.clear();
            self.in_frame = true;
            self.escaped = false;
            return None;
        }
        if !self.in_frame {
            return None;
        }
        if self.escaped {
            self.escaped = false;
            self.buf.push(byte ^ MSG_ESC_XOR);
        } else if byte == MSG_ESC {
            self.escaped = true;
            return None;
        } else {
            self.buf.push(byte);
        }

        if self.buf.len() < MSG_HDRSZ {
            return None;
        }
        let len = usize::from(u16::from_le_bytes([self.buf[6], self.buf[7]]));
        if len > MSG_MAXLEN {
            warn!("phoenixd: oversized frame dropped");
            self.in_frame = false;
            return None;
        }
        if self.buf.len() < MSG_HDRSZ + len {
            return None;
        }

        self.in_frame = false;
        let csum = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if csum != crc32(&self.buf[4..]) {
            warn!("phoenixd: frame checksum mismatch");
            return None;
        }
        Some(Message {
            msg_type: u16::from_le_bytes([self.buf[4], self.buf[5]]),
            data: self.buf[MSG_HDRSZ..].to_vec(),
        })
    }
}

/// Client side of the protocol over one device instance.
pub struct Client<'a> {
    dev: &'a mut dyn Device,
    minor: u32,
}

impl<'a> Client<'a> {
    pub fn new(dev: &'a mut dyn Device, minor: u32) -> Self {
        Self { dev, minor }
    }

    /// Send a request and wait for the response of the same type.
    ///
    /// # Errors
    /// [`PhfsError::Timeout`] after all retransmissions went unanswered,
    /// [`PhfsError::Proto`] on a response of another type.
    pub fn transact(&mut self, msg_type: u16, data: &[u8]) -> Result<Vec<u8>, PhfsError> {
        let frame = encode_frame(msg_type, data)?;
        for attempt in 0..RETRANSMITS {
            let sent = self.dev.write(self.minor, 0, &frame)?;
            if sent != frame.len() {
                return Err(PhfsError::Io);
            }
            if let Some(resp) = self.receive()? {
                if resp.msg_type != msg_type {
                    return Err(PhfsError::Proto);
                }
                return Ok(resp.data);
            }
            debug!("phoenixd: no answer to message {msg_type}, attempt {}", attempt + 1);
        }
        Err(PhfsError::Timeout)
    }

    fn receive(&mut self) -> Result<Option<Message>, PhfsError> {
        let mut decoder = FrameDecoder::new();
        let mut chunk = [0u8; 64];
        loop {
            let n = self.dev.read(self.minor, 0, &mut chunk, DEFAULT_TIMEOUT_MS)?;
            if n == 0 {
                return Ok(None);
            }
            for &b in &chunk[..n] {
                if let Some(msg) = decoder.push(b) {
                    return Ok(Some(msg));
                }
            }
        }
    }

    /// # Errors
    /// [`PhfsError::Io`] if the daemon refuses the file.
    pub fn open(&mut self, name: &str, flags: u32) -> Result<u32, PhfsError> {
        let mut req = Vec::with_capacity(4 + name.len() + 1);
        req.extend_from_slice(&flags.to_le_bytes());
        req.extend_from_slice(name.as_bytes());
        req.push(0);
        let resp = self.transact(MSG_OPEN, &req)?;
        let handle = read_i32(&resp, 0)?;
        u32::try_from(handle).map_err(|_| PhfsError::Io)
    }

    /// Read at most [`MAX_IO_CHUNK`] bytes.
    ///
    /// # Errors
    /// [`PhfsError::Io`] on a negative length, [`PhfsError::Proto`] on a
    /// malformed response.
    pub fn read(&mut self, handle: u32, pos: u64, buf: &mut [u8]) -> Result<usize, PhfsError> {
        let want = buf.len().min(MAX_IO_CHUNK);
        let req = io_header(handle, pos, want)?;
        let resp = self.transact(MSG_READ, &req)?;

        let len = read_i32(&resp, 8)?;
        let len = usize::try_from(len).map_err(|_| PhfsError::Io)?;
        if len > want || resp.len() != IO_HDRSZ + len {
            return Err(PhfsError::Proto);
        }
        buf[..len].copy_from_slice(&resp[IO_HDRSZ..]);
        Ok(len)
    }

    /// Write at most [`MAX_IO_CHUNK`] bytes.
    ///
    /// # Errors
    /// [`PhfsError::Io`] on a negative length, [`PhfsError::Proto`] on a
    /// malformed response.
    pub fn write(&mut self, handle: u32, pos: u64, buf: &[u8]) -> Result<usize, PhfsError> {
        let len = buf.len().min(MAX_IO_CHUNK);
        let mut req = io_header(handle, pos, len)?;
        req.extend_from_slice(&buf[..len]);
        let resp = self.transact(MSG_WRITE, &req)?;

        let written = usize::try_from(read_i32(&resp, 8)?).map_err(|_| PhfsError::Io)?;
        if written > len {
            return Err(PhfsError::Proto);
        }
        Ok(written)
    }

    /// # Errors
    /// [`PhfsError::Io`] if the daemon reports a failure.
    pub fn close(&mut self, handle: u32) -> Result<(), PhfsError> {
        let resp = self.transact(MSG_CLOSE, &handle.to_le_bytes())?;
        if read_i32(&resp, 0)? < 0 {
            return Err(PhfsError::Io);
        }
        Ok(())
    }

    /// # Errors
    /// [`PhfsError::Io`] if the daemon reports a failure.
    pub fn fstat(&mut self, handle: u32) -> Result<u64, PhfsError> {
        let resp = self.transact(MSG_FSTAT, &handle.to_le_bytes())?;
        if read_i32(&resp, 0)? < 0 {
            return Err(PhfsError::Io);
        }
        Ok(u64::from(read_i32(&resp, 4)?.cast_unsigned()))
    }
}

fn io_header(handle: u32, pos: u64, len: usize) -> Result<Vec<u8>, PhfsError> {
    let pos = u32::try_from(pos).map_err(|_| PhfsError::Unsupported)?;
    let len = u32::try_from(len).map_err(|_| PhfsError::Proto)?;
    let mut req = Vec::with_capacity(MSG_MAXLEN);
    req.extend_from_slice(&handle.to_le_bytes());
    req.extend_from_slice(&pos.to_le_bytes());
    req.extend_from_slice(&len.to_le_bytes());
    Ok(req)
}

fn read_i32(b: &[u8], off: usize) -> Result<i32, PhfsError> {
    let s = b.get(off..off + 4).ok_or(PhfsError::Proto)?;
    Ok(i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}
