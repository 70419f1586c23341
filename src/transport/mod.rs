// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Upcall Transport (C3).
//!
//! A bidirectional, length-framed byte channel to the kernel NFS server.
//! Unlike the core library's [network transport trait it's modeled
//! after](crate), this one does not `connect`/`disconnect` — the kernel
//! owns the channel's lifetime; the tracker just reads requests and
//! writes replies (and, during recovery iteration, unsolicited messages)
//! over an already-open file descriptor.

pub mod protocol;

use std::io::{Read, Write};
use std::sync::mpsc;

use crate::error::{Result, TrackerError};
use protocol::{Reply, Request, Unsolicited, HEADER_LEN};

/// Platform-agnostic abstraction over the upcall channel.
///
/// Framing errors, truncated reads, and malformed payloads are the
/// caller's (the dispatcher's) concern to log-and-drop; this trait
/// surfaces them as [`TrackerError`] rather than panicking.
pub trait Transport {
    /// Blocks until a full request frame has been read, or returns
    /// [`crate::error::ErrorKind::TransportLost`] on EOF.
    fn recv_request(&mut self) -> Result<Request>;

    /// Writes a reply frame. Replies are written in the same order
    /// `recv_request` produced their requests, by construction: the
    /// dispatcher never calls `recv_request` again before the previous
    /// reply has been written.
    fn send_reply(&mut self, reply: &Reply) -> Result<()>;

    /// Writes an unsolicited message (used only during recovery
    /// iteration). Same framing as a reply; `tag` replaces the status
    /// field so the kernel can distinguish message kinds.
    fn send_unsolicited(&mut self, tag: protocol::Unsolicited, payload: &[u8]) -> Result<()>;
}

/// A real character-device/FIFO backed transport.
pub struct DeviceTransport<S> {
    stream: S,
}

impl<S: Read + Write> DeviceTransport<S> {
    pub fn new(stream: S) -> Self {
        DeviceTransport { stream }
    }
}

impl<S: Read + Write> Transport for DeviceTransport<S> {
    fn recv_request(&mut self) -> Result<Request> {
        let mut header = [0u8; HEADER_LEN];
        read_exact_or_eof(&mut self.stream, &mut header)?;
        let (version, command_byte, xid, len) = protocol::decode_header(&header)?;

        let mut payload = vec![0u8; len as usize];
        if len > 0 {
            self.stream
                .read_exact(&mut payload)
                .map_err(TrackerError::Io)?;
        }

        let command = protocol::Command::try_from_u8(command_byte)
            .ok_or_else(|| TrackerError::Invalid(format!("unknown command byte {command_byte}")))?;

        Ok(Request {
            version,
            command,
            xid,
            payload,
        })
    }

    fn send_reply(&mut self, reply: &Reply) -> Result<()> {
        self.stream
            .write_all(&reply.encode())
            .map_err(TrackerError::Io)
    }

    fn send_unsolicited(&mut self, tag: protocol::Unsolicited, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.push(1);
        buf.push(tag.to_u8());
        buf.extend_from_slice(&0u64.to_be_bytes()); // xid unused for unsolicited frames
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        self.stream.write_all(&buf).map_err(TrackerError::Io)
    }
}

/// One outbound message over a [`ChannelTransport`]: either a reply to a
/// specific request or an unsolicited recovery-iteration message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Reply(Reply),
    Unsolicited(Unsolicited, Vec<u8>),
}

/// An in-process, `mpsc`-backed stand-in for the real device channel.
///
/// Used by integration tests and harnesses that want to drive a
/// [`crate::dispatch::Dispatcher`] end to end without a real character
/// device — a producer feeds [`Request`]s in on one channel, and every
/// reply or unsolicited message comes back out on another.
pub struct ChannelTransport {
    requests: mpsc::Receiver<Request>,
    outbound: mpsc::Sender<Outbound>,
}

impl ChannelTransport {
    pub fn new(requests: mpsc::Receiver<Request>, outbound: mpsc::Sender<Outbound>) -> Self {
        ChannelTransport { requests, outbound }
    }
}

impl Transport for ChannelTransport {
    fn recv_request(&mut self) -> Result<Request> {
        self.requests
            .recv()
            .map_err(|_| TrackerError::TransportLost("upcall channel closed".into()))
    }

    fn send_reply(&mut self, reply: &Reply) -> Result<()> {
        self.outbound
            .send(Outbound::Reply(reply.clone()))
            .map_err(|_| TrackerError::TransportLost("upcall channel closed".into()))
    }

    fn send_unsolicited(&mut self, tag: Unsolicited, payload: &[u8]) -> Result<()> {
        self.outbound
            .send(Outbound::Unsolicited(tag, payload.to_vec()))
            .map_err(|_| TrackerError::TransportLost("upcall channel closed".into()))
    }
}

/// Like [`Read::read_exact`], but treats a zero-byte read at the very
/// start of the frame as a clean EOF ([`TrackerError::TransportLost`])
/// rather than an I/O error, since that's the kernel closing the channel
/// rather than a truncated frame.
fn read_exact_or_eof(stream: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).map_err(TrackerError::Io)?;
        if n == 0 {
            if filled == 0 {
                return Err(TrackerError::TransportLost("upcall channel closed".into()));
            }
            return Err(TrackerError::Invalid("truncated frame".into()));
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::Command;
    use std::io::Cursor;

    fn request_frame(command: Command, xid: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(1);
        buf.push(command.to_u8());
        buf.extend_from_slice(&xid.to_be_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    struct DuplexBuf {
        read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for DuplexBuf {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read.read(buf)
        }
    }

    impl Write for DuplexBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn recv_request_decodes_frame() {
        let frame = request_frame(Command::Check, 7, b"alice");
        let mut transport = DeviceTransport::new(DuplexBuf {
            read: Cursor::new(frame),
            written: Vec::new(),
        });
        let req = transport.recv_request().unwrap();
        assert_eq!(req.command, Command::Check);
        assert_eq!(req.xid, 7);
        assert_eq!(req.payload, b"alice");
    }

    #[test]
    fn recv_request_eof_on_empty_stream() {
        let mut transport = DeviceTransport::new(DuplexBuf {
            read: Cursor::new(Vec::new()),
            written: Vec::new(),
        });
        let err = transport.recv_request().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransportLost);
    }

    #[test]
    fn send_reply_writes_expected_bytes() {
        let mut transport = DeviceTransport::new(DuplexBuf {
            read: Cursor::new(Vec::new()),
            written: Vec::new(),
        });
        transport.send_reply(&Reply::ok(99)).unwrap();
        assert_eq!(transport.stream.written.len(), HEADER_LEN);
    }

    #[test]
    fn channel_transport_roundtrips_request_and_reply() {
        let (req_tx, req_rx) = std::sync::mpsc::channel();
        let (out_tx, out_rx) = std::sync::mpsc::channel();
        let mut transport = ChannelTransport::new(req_rx, out_tx);

        req_tx
            .send(Request {
                version: 1,
                command: Command::Check,
                xid: 5,
                payload: b"alice".to_vec(),
            })
            .unwrap();
        let req = transport.recv_request().unwrap();
        assert_eq!(req.xid, 5);

        transport.send_reply(&Reply::ok(5)).unwrap();
        match out_rx.recv().unwrap() {
            Outbound::Reply(r) => assert_eq!(r.xid, 5),
            Outbound::Unsolicited(..) => panic!("expected a reply"),
        }
    }

    #[test]
    fn channel_transport_reports_lost_when_producer_drops() {
        let (req_tx, req_rx) = std::sync::mpsc::channel();
        let (out_tx, _out_rx) = std::sync::mpsc::channel();
        let mut transport = ChannelTransport::new(req_rx, out_tx);
        drop(req_tx);

        let err = transport.recv_request().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransportLost);
    }
}
