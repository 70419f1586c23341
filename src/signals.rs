// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Signal handling for the event loop's shutdown path.
//!
//! `SIGTERM`/`SIGINT` set a flag the dispatcher polls between requests
//! (never mid-handler — cancellation is only honored at the next loop
//! iteration). `SIGHUP`, `SIGPIPE`, and `SIGCHLD` are registered as
//! explicit no-ops: the daemon never forks children (so `SIGCHLD` is
//! vestigial), never re-reads a config file (so `SIGHUP` has nothing to
//! do), and must not let a broken transport write kill the process via
//! default `SIGPIPE` disposition — write errors already surface through
//! the transport's `Result`.

use std::io;

use signal_hook::consts::{SIGCHLD, SIGHUP, SIGINT, SIGPIPE, SIGTERM};

use crate::dispatch::ShutdownFlag;

/// Installs the daemon's signal handlers. Must be called before the event
/// loop starts; the underlying registration is one-shot per process.
pub fn install(shutdown: ShutdownFlag) -> io::Result<()> {
    signal_hook::flag::register(SIGTERM, shutdown.clone())?;
    signal_hook::flag::register(SIGINT, shutdown)?;

    // SAFETY: these handlers only set a flag-free no-op; they perform no
    // allocation, locking, or anything else unsafe to run inside a signal
    // handler.
    unsafe {
        signal_hook::low_level::register(SIGHUP, || {})?;
        signal_hook::low_level::register(SIGPIPE, || {})?;
        signal_hook::low_level::register(SIGCHLD, || {})?;
    }

    Ok(())
}
