// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Dispatcher / Event Loop (C4).
//!
//! Single-threaded cooperative reactor: one request is read, dispatched to
//! completion, and replied to before the next is read. That ordering
//! falls out of the structure here rather than from any queue — there is
//! only ever one in-flight handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::epoch::EpochManager;
use crate::error::ErrorKind;
use crate::store::{CheckResult, ClientId, Store};
use crate::transport::protocol::{self, Command, Reply, Unsolicited};
use crate::transport::Transport;

/// Shared shutdown flag set by the signal handler and polled by the
/// dispatcher between requests (never mid-handler).
pub type ShutdownFlag = Arc<AtomicBool>;

pub struct Dispatcher<T: Transport> {
    store: Store,
    epoch: EpochManager,
    transport: T,
    shutdown: ShutdownFlag,
    negotiated_version: Option<u8>,
    negotiation_failed: bool,
}

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `SIGTERM`/`SIGINT` observed between requests.
    Signal,
    /// The upcall channel reported EOF.
    TransportLost,
    /// `Init` found no protocol version in common with the kernel; the
    /// daemon fails closed (spec §4.3) rather than shutting down cleanly.
    NegotiationFailed,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(store: Store, epoch: EpochManager, transport: T, shutdown: ShutdownFlag) -> Self {
        Dispatcher {
            store,
            epoch,
            transport,
            shutdown,
            negotiated_version: None,
            negotiation_failed: false,
        }
    }

    /// If the store reports an active grace period at startup, replays the
    /// recovery set to the kernel before the main loop starts.
    pub fn replay_recovery_on_startup(&mut self) -> crate::error::Result<()> {
        if self.epoch.in_grace() {
            self.iterate_and_send_recovery_set()?;
        }
        Ok(())
    }

    /// Runs the event loop until shutdown is requested or the transport is
    /// lost. Returns the reason the loop stopped.
    pub fn run(&mut self) -> crate::error::Result<StopReason> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, stopping upcall loop");
                return Ok(StopReason::Signal);
            }

            let request = match self.transport.recv_request() {
                Ok(req) => req,
                Err(e) if e.kind() == ErrorKind::TransportLost => {
                    info!("upcall channel closed, exiting");
                    return Ok(StopReason::TransportLost);
                }
                Err(e) => {
                    // Framing errors / malformed payloads: log and drop,
                    // no reply — the kernel's own retry is the recovery
                    // mechanism.
                    warn!(error = %e, "dropping malformed upcall frame");
                    continue;
                }
            };

            self.handle(request);

            if self.negotiation_failed {
                info!("no common upcall protocol version, failing closed");
                return Ok(StopReason::NegotiationFailed);
            }
        }
    }

    fn handle(&mut self, request: protocol::Request) {
        let xid = request.xid;
        let command = request.command;

        if self.negotiated_version.is_none() && command != Command::Init {
            warn!(xid, ?command, "request before Init, dropping");
            return;
        }

        let reply = match command {
            Command::Init => self.handle_init(xid, request.version),
            Command::Create => self.handle_create(xid, &request.payload),
            Command::Remove => self.handle_remove(xid, &request.payload),
            Command::Check => self.handle_check(xid, &request.payload),
            Command::GraceStart => self.handle_grace_start(xid),
            Command::GraceDone => self.handle_grace_done(xid),
            Command::HasSession => self.handle_has_session(xid),
        };

        debug!(xid, ?command, status = reply.status, "dispatched upcall");

        if let Err(e) = self.transport.send_reply(&reply) {
            error!(xid, error = %e, "failed to write reply");
        }
    }

    fn handle_init(&mut self, xid: u64, kernel_version: u8) -> Reply {
        match protocol::negotiate(kernel_version) {
            Some(v) => {
                self.negotiated_version = Some(v);
                info!(version = v, "negotiated upcall protocol version");
                Reply::ok_with_payload(xid, vec![v])
            }
            None => {
                error!(
                    kernel_version,
                    "no common upcall protocol version, failing closed"
                );
                self.negotiation_failed = true;
                Reply::err(xid, protocol::status::INVALID)
            }
        }
    }

    fn handle_create(&mut self, xid: u64, payload: &[u8]) -> Reply {
        let id = match protocol::decode_client_id(payload) {
            Ok(id) => id,
            Err(_) => return Reply::err(xid, protocol::status::INVALID),
        };
        match self.store.insert_client(self.epoch.current(), &id) {
            Ok(()) => Reply::ok(xid),
            Err(e) => Reply::err(xid, status_for(&e)),
        }
    }

    fn handle_remove(&mut self, xid: u64, payload: &[u8]) -> Reply {
        let id = match protocol::decode_client_id(payload) {
            Ok(id) => id,
            Err(_) => return Reply::err(xid, protocol::status::INVALID),
        };
        match self.store.remove_client(self.epoch.current(), &id) {
            Ok(()) => Reply::ok(xid),
            Err(e) => Reply::err(xid, status_for(&e)),
        }
    }

    fn handle_check(&mut self, xid: u64, payload: &[u8]) -> Reply {
        let id = match protocol::decode_client_id(payload) {
            Ok(id) => id,
            Err(_) => return Reply::err(xid, protocol::status::INVALID),
        };
        match self.store.check_client(self.epoch.state(), &id) {
            Ok(CheckResult::Allowed) => Reply::ok(xid),
            Ok(CheckResult::Denied) => Reply::err(xid, protocol::status::DENIED),
            Err(e) => Reply::err(xid, status_for(&e)),
        }
    }

    fn handle_grace_start(&mut self, xid: u64) -> Reply {
        match self.epoch.grace_start(&self.store) {
            Ok(_) => {
                if let Err(e) = self.iterate_and_send_recovery_set() {
                    error!(error = %e, "recovery iteration failed after grace_start");
                    return Reply::err(xid, status_for(&e));
                }
                Reply::ok(xid)
            }
            Err(e) => Reply::err(xid, status_for(&e)),
        }
    }

    fn handle_grace_done(&mut self, xid: u64) -> Reply {
        match self.epoch.grace_done(&self.store) {
            Ok(_) => Reply::ok(xid),
            Err(e) => Reply::err(xid, status_for(&e)),
        }
    }

    fn handle_has_session(&mut self, xid: u64) -> Reply {
        let payload = vec![self.store.has_session() as u8];
        Reply::ok_with_payload(xid, payload)
    }

    /// Sends one `RecoveryEntry` per client in the recovery-epoch bucket,
    /// followed by a `RecoveryDone` terminator. Normal request handling on
    /// this channel is suspended for the duration, by construction — we
    /// are still inside the single dispatch call that triggered it.
    fn iterate_and_send_recovery_set(&mut self) -> crate::error::Result<()> {
        let state = self.epoch.state();
        let transport = &mut self.transport;
        let mut send_err = None;
        self.store.iterate_recovery(state, |id| {
            if send_err.is_some() {
                return;
            }
            if let Err(e) = transport.send_unsolicited(Unsolicited::RecoveryEntry, id) {
                send_err = Some(e);
            }
        })?;
        if let Some(e) = send_err {
            return Err(e);
        }
        self.transport
            .send_unsolicited(Unsolicited::RecoveryDone, &[])
    }
}

fn status_for(e: &crate::error::TrackerError) -> i32 {
    match e.kind() {
        ErrorKind::NotFound => protocol::status::NOT_FOUND,
        ErrorKind::Invalid => protocol::status::INVALID,
        ErrorKind::Transient => protocol::status::IO_ERROR,
        ErrorKind::Corruption | ErrorKind::UnsupportedSchema => protocol::status::IO_ERROR,
        ErrorKind::TransportLost => protocol::status::IO_ERROR,
    }
}
