// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Drives a [`Dispatcher`] end to end through the real `mpsc`-backed
//! [`ChannelTransport`], rather than the private scripted double used by
//! the dispatcher's own unit tests.

use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};
use std::thread;

use nfsdcld::dispatch::Dispatcher;
use nfsdcld::epoch::EpochManager;
use nfsdcld::store::{ClientId, Store};
use nfsdcld::transport::protocol::{self, Command, Request};
use nfsdcld::transport::{ChannelTransport, Outbound};

#[test]
fn init_create_check_over_a_real_channel() {
    let (req_tx, req_rx) = mpsc::channel();
    let (out_tx, out_rx) = mpsc::channel();

    let (store, state) = Store::open_in_memory().unwrap();
    let epoch = EpochManager::new(state);
    let transport = ChannelTransport::new(req_rx, out_tx);
    let shutdown = Arc::new(AtomicBool::new(false));

    let handle = thread::spawn(move || {
        let mut dispatcher = Dispatcher::new(store, epoch, transport, shutdown);
        dispatcher.run().unwrap()
    });

    req_tx
        .send(Request {
            version: 1,
            command: Command::Init,
            xid: 1,
            payload: vec![1],
        })
        .unwrap();
    req_tx
        .send(Request {
            version: 1,
            command: Command::Create,
            xid: 2,
            payload: protocol::encode_client_id(&ClientId::new(b"alice".to_vec()).unwrap()),
        })
        .unwrap();

    let init_reply = match out_rx.recv().unwrap() {
        Outbound::Reply(r) => r,
        Outbound::Unsolicited(..) => panic!("expected a reply"),
    };
    assert_eq!(init_reply.status, protocol::status::OK);

    let create_reply = match out_rx.recv().unwrap() {
        Outbound::Reply(r) => r,
        Outbound::Unsolicited(..) => panic!("expected a reply"),
    };
    assert_eq!(create_reply.status, protocol::status::OK);

    drop(req_tx);
    let reason = handle.join().unwrap();
    assert_eq!(reason, nfsdcld::dispatch::StopReason::TransportLost);
}
