// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! `nfsdcld` — NFSv4 client recovery tracking daemon entry point.
//!
//! Thin wrapper: parse CLI, wire up logging, open the store, open the
//! upcall channel, hand everything to the dispatcher. All real behavior
//! lives in the library (`src/lib.rs` and its modules) so it's testable
//! without a real kernel upcall device.

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use nfsdcld::config::Cli;
use nfsdcld::dispatch::Dispatcher;
use nfsdcld::epoch::EpochManager;
use nfsdcld::signals;
use nfsdcld::store::Store;
use nfsdcld::transport::DeviceTransport;

/// Exit code for a setup/open failure, or a fatal protocol negotiation
/// failure (spec §4.3: "fails closed and exits").
const EXIT_SETUP_FAILURE: u8 = 1;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal startup error");
            ExitCode::from(EXIT_SETUP_FAILURE)
        }
    }
}

fn init_logging(cli: &Cli) {
    use tracing_subscriber::EnvFilter;

    let mut filter = EnvFilter::new("nfsdcld=info");
    if let Some(target) = cli.debug {
        filter = filter.add_directive(format!("{}=trace", target.target()).parse().unwrap());
    }

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cli.foreground {
        builder.with_ansi(true).compact().init();
    } else {
        builder.with_ansi(false).init();
    }
}

fn run(cli: Cli) -> nfsdcld::error::Result<()> {
    info!(
        storage_dir = %cli.storage_dir.display(),
        upcall_device = %cli.upcall_device.display(),
        "starting nfsdcld"
    );

    let (store, state) = Store::open(&cli.storage_dir)?;
    info!(?state, "store opened");
    let epoch = EpochManager::new(state);

    let device = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&cli.upcall_device)?;
    let transport = DeviceTransport::new(device);

    let shutdown = Arc::new(AtomicBool::new(false));
    signals::install(shutdown.clone())?;

    let mut dispatcher = Dispatcher::new(store, epoch, transport, shutdown);
    dispatcher.replay_recovery_on_startup()?;

    let reason = dispatcher.run()?;
    if reason == nfsdcld::dispatch::StopReason::NegotiationFailed {
        return Err(nfsdcld::error::TrackerError::Invalid(
            "no upcall protocol version in common with the kernel".to_string(),
        ));
    }
    info!(?reason, "event loop stopped, shutting down cleanly");

    Ok(())
}
