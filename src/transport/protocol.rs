// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Upcall wire protocol.
//!
//! Frame shape: a fixed 14-byte header (`version: u8`, `command: u8`,
//! `xid: u64`, `len: u32`, all big-endian) followed by exactly `len`
//! payload bytes. This is hand-rolled rather than `serde`-derived because
//! the header mirrors a kernel-side C struct handed across a pipe, not a
//! self-describing document — the same header shape the kernel upcall
//! already speaks.

use crate::error::{Result, TrackerError};
use crate::store::{ClientId, OPAQUE_LIMIT};

pub const HEADER_LEN: usize = 14;

/// Protocol versions this build understands, newest first.
pub const SUPPORTED_VERSIONS: &[u8] = &[1];

/// errno-like status codes. `0` is success; negative values mirror POSIX
/// errno magnitudes used by the kernel side.
pub mod status {
    pub const OK: i32 = 0;
    /// Permission denied — used for `Check` when reclaim is not allowed.
    pub const DENIED: i32 = -13; // EACCES
    pub const INVALID: i32 = -22; // EINVAL
    pub const NOT_FOUND: i32 = -2; // ENOENT
    pub const IO_ERROR: i32 = -5; // EIO
}

/// Upcall opcodes. Dispatch over this is exhaustive: there is no
/// "unknown command" catch-all, only a decode failure for unrecognized
/// byte values (handled by [`Command::try_from_u8`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Init,
    Create,
    Remove,
    Check,
    GraceStart,
    GraceDone,
    HasSession,
}

impl Command {
    pub fn to_u8(self) -> u8 {
        match self {
            Command::Init => 0,
            Command::Create => 1,
            Command::Remove => 2,
            Command::Check => 3,
            Command::GraceStart => 4,
            Command::GraceDone => 5,
            Command::HasSession => 6,
        }
    }

    pub fn try_from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Command::Init),
            1 => Some(Command::Create),
            2 => Some(Command::Remove),
            3 => Some(Command::Check),
            4 => Some(Command::GraceStart),
            5 => Some(Command::GraceDone),
            6 => Some(Command::HasSession),
            _ => None,
        }
    }
}

/// An unsolicited message tag, sent only during recovery iteration (spec
/// §4.4). Reuses the same frame shape; `xid` is unused (set to 0) since
/// these are not request/reply pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsolicited {
    RecoveryEntry,
    RecoveryDone,
}

impl Unsolicited {
    pub fn to_u8(self) -> u8 {
        match self {
            Unsolicited::RecoveryEntry => 0xfe,
            Unsolicited::RecoveryDone => 0xff,
        }
    }
}

/// A decoded upcall request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub version: u8,
    pub command: Command,
    pub xid: u64,
    pub payload: Vec<u8>,
}

/// A reply frame to write back to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub xid: u64,
    pub status: i32,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn ok(xid: u64) -> Self {
        Reply {
            xid,
            status: status::OK,
            payload: Vec::new(),
        }
    }

    pub fn ok_with_payload(xid: u64, payload: Vec<u8>) -> Self {
        Reply {
            xid,
            status: status::OK,
            payload,
        }
    }

    pub fn err(xid: u64, status: i32) -> Self {
        Reply {
            xid,
            status,
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(1); // version: replies always echo the negotiated wire version
        buf.push(self.status as i8 as u8); // status reuses the request's command slot
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Decodes a frame header from exactly [`HEADER_LEN`] bytes.
///
/// Returns `(version, command_byte, xid, payload_len)`. Does not validate
/// the command byte — callers check that separately so a malformed
/// command can still be logged with its xid.
pub fn decode_header(buf: &[u8]) -> Result<(u8, u8, u64, u32)> {
    if buf.len() != HEADER_LEN {
        return Err(TrackerError::Invalid(format!(
            "short frame header: {} bytes",
            buf.len()
        )));
    }
    let version = buf[0];
    let command = buf[1];
    let xid = u64::from_be_bytes(buf[2..10].try_into().unwrap());
    let len = u32::from_be_bytes(buf[10..14].try_into().unwrap());
    Ok((version, command, xid, len))
}

/// Decodes a length-prefixed [`ClientId`] payload: `len: u16` (big-endian)
/// followed by `len` raw bytes.
pub fn decode_client_id(payload: &[u8]) -> Result<ClientId> {
    if payload.len() < 2 {
        return Err(TrackerError::Invalid("truncated client id payload".into()));
    }
    let len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    if payload.len() != 2 + len {
        return Err(TrackerError::Invalid(format!(
            "client id length mismatch: header says {len}, got {}",
            payload.len().saturating_sub(2)
        )));
    }
    if len > OPAQUE_LIMIT {
        return Err(TrackerError::Invalid(format!(
            "client id length {len} exceeds OPAQUE_LIMIT {OPAQUE_LIMIT}"
        )));
    }
    ClientId::new(payload[2..].to_vec())
}

pub fn encode_client_id(id: &ClientId) -> Vec<u8> {
    let bytes = id.as_bytes();
    let mut buf = Vec::with_capacity(2 + bytes.len());
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
    buf
}

/// Picks the highest version both sides support: the tracker replies with
/// the highest version it implements that is `≤` the kernel's.
pub fn negotiate(kernel_version: u8) -> Option<u8> {
    SUPPORTED_VERSIONS
        .iter()
        .copied()
        .filter(|&v| v <= kernel_version)
        .max()
}
