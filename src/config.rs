// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! CLI & process bootstrap.
//!
//! Parsing failures exit `2` (clap's default for usage errors); `--help`
//! and `--version` exit `0` without starting the daemon. Everything here
//! is ambient process wiring, not part of the tracked state machine.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

const DEFAULT_STORAGE_DIR: &str = "/var/lib/nfs/nfsdcltrack";
const DEFAULT_UPCALL_DEVICE: &str = "/proc/fs/nfsd/clients/cld-pipe";

/// Trace targets selectable via `--debug`. A closed set, not a free-form
/// string, so an unrecognized value is a usage error rather than silently
/// accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DebugTarget {
    All,
    Store,
    Transport,
    Dispatch,
}

impl DebugTarget {
    /// The tracing target module path this debug kind corresponds to.
    pub fn target(self) -> &'static str {
        match self {
            DebugTarget::All => "nfsdcld",
            DebugTarget::Store => "nfsdcld::store",
            DebugTarget::Transport => "nfsdcld::transport",
            DebugTarget::Dispatch => "nfsdcld::dispatch",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "nfsdcld")]
#[command(version, about = "NFSv4 client recovery tracking daemon")]
pub struct Cli {
    /// Run in the foreground instead of backgrounding (logs to a
    /// terminal-friendly colored format).
    #[arg(short = 'f', long)]
    pub foreground: bool,

    /// Raise one trace target to verbose logging.
    #[arg(short = 'd', long, value_enum)]
    pub debug: Option<DebugTarget>,

    /// Directory holding the persistent client database.
    #[arg(short = 's', long, env = "NFSDCLD_STORAGE_DIR", default_value = DEFAULT_STORAGE_DIR)]
    pub storage_dir: PathBuf,

    /// Path to the kernel upcall character device or FIFO.
    #[arg(long, env = "NFSDCLD_UPCALL_DEVICE", default_value = DEFAULT_UPCALL_DEVICE)]
    pub upcall_device: PathBuf,
}
