// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! NFSv4 client recovery tracking daemon.
//!
//! Remembers, across server reboots, which clients held state before the
//! crash so only those clients may reclaim locks/opens during the
//! post-reboot grace period. See `DESIGN.md` for the full design.

pub mod config;
pub mod dispatch;
pub mod epoch;
pub mod error;
pub mod signals;
pub mod store;
pub mod transport;
