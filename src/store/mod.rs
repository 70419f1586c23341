// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Persistent Store (C1).
//!
//! Crash-safe, SQLite-backed set of client identities keyed by reboot
//! epoch. Every operation here is atomic with respect to process crashes
//! and to another process (a stale instance, a test harness) momentarily
//! holding the same database — see [`bucket`] for table layout and
//! [`migration`] for the schema state machine.

pub mod bucket;
pub mod migration;

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::epoch::{Epoch, GraceState};
use crate::error::{ErrorKind, Result, TrackerError};

/// Maximum length, in bytes, of a [`ClientId`].
pub const OPAQUE_LIMIT: usize = 128;

/// Total time budget for retrying a busy/locked database before giving
/// up and surfacing [`ErrorKind::Transient`] to the caller.
const BUSY_RETRY_BUDGET: Duration = Duration::from_secs(10);
const BUSY_RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Runs `body` inside an exclusive transaction on `conn`, retrying on
/// busy/locked outcomes (including on the initial `BEGIN`) up to
/// [`BUSY_RETRY_BUDGET`]. On any other failure, or on exhausting the
/// retry budget, rolls back and propagates the original error; a
/// rollback failure is logged but never replaces it.
///
/// Shared by every multi-step store operation — ordinary mutations via
/// [`Store::with_exclusive_transaction`], and schema migration/setup via
/// [`migration::run`], since spec §4.1 lists "migration, setup" among
/// the operations another process may transiently contend with at open
/// time.
fn with_busy_retry<T>(conn: &Connection, body: impl Fn(&Connection) -> Result<T>) -> Result<T> {
    let deadline = Instant::now() + BUSY_RETRY_BUDGET;
    let mut backoff = BUSY_RETRY_INITIAL_BACKOFF;

    loop {
        match conn.execute_batch("BEGIN EXCLUSIVE TRANSACTION;") {
            Ok(()) => {}
            Err(e) => {
                let err = TrackerError::Database(e);
                if err.kind() == ErrorKind::Transient && Instant::now() < deadline {
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_millis(500));
                    continue;
                }
                return Err(if err.kind() == ErrorKind::Transient {
                    TrackerError::BusyTimeout(BUSY_RETRY_BUDGET)
                } else {
                    err
                });
            }
        }

        let result = body(conn);

        match result {
            Ok(value) => {
                conn.execute_batch("COMMIT;")?;
                return Ok(value);
            }
            Err(e) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK;") {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                if e.kind() == ErrorKind::Transient && Instant::now() < deadline {
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_millis(500));
                    continue;
                }
                return Err(e);
            }
        }
    }
}

/// An opaque client identity. Equality is bytewise; the daemon never
/// interprets the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(Vec<u8>);

impl ClientId {
    /// Validates and wraps `bytes` as a client identity.
    ///
    /// Length `0` is accepted; length greater than [`OPAQUE_LIMIT`] is
    /// rejected as [`ErrorKind::Invalid`].
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() > OPAQUE_LIMIT {
            return Err(TrackerError::Invalid(format!(
                "client id length {} exceeds OPAQUE_LIMIT {}",
                bytes.len(),
                OPAQUE_LIMIT
            )));
        }
        Ok(ClientId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex-encoded rendering, safe to log: the bytes are opaque to us but
    /// may be sensitive, so we never log them raw.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Result of [`Store::check_client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Allowed,
    Denied,
}

/// Crash-safe persistent store, opened exclusively by a single process at
/// a time (SQLite's own file locking enforces this).
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating and migrating if necessary) the database under
    /// `dir`, creating `dir` with mode `0700` if absent.
    ///
    /// Returns the handle along with the grace state read from disk.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<(Self, GraceState)> {
        let dir = dir.as_ref();
        let already_existed = dir.exists();
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        if !already_existed {
            let mut perms = fs::metadata(dir)?.permissions();
            perms.set_mode(0o700);
            fs::set_permissions(dir, perms)?;
        }

        let db_path = dir.join("main.sqlite");
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;

        migration::run(&conn)?;

        let store = Store { conn };
        let state = store.read_grace_state()?;
        Ok((store, state))
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<(Self, GraceState)> {
        let conn = Connection::open_in_memory()?;
        migration::run(&conn)?;
        let store = Store { conn };
        let state = store.read_grace_state()?;
        Ok((store, state))
    }

    fn read_grace_state(&self) -> Result<GraceState> {
        let (current, recovery): (i64, i64) = self.conn.query_row(
            "SELECT current, recovery FROM grace",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(GraceState {
            current: Epoch(current as u64),
            recovery: Epoch(recovery as u64),
        })
    }

    /// Runs `body` inside an exclusive transaction, retrying on
    /// busy/locked outcomes up to [`BUSY_RETRY_BUDGET`]. On any other
    /// failure (or on exhausting the retry budget), rolls back and
    /// propagates the original error; a rollback failure is logged but
    /// never replaces it.
    fn with_exclusive_transaction<T>(
        &self,
        body: impl Fn(&Connection) -> Result<T>,
    ) -> Result<T> {
        with_busy_retry(&self.conn, body)
    }

    /// Inserts `id` into the current epoch's bucket. Idempotent.
    pub fn insert_client(&self, current: Epoch, id: &ClientId) -> Result<()> {
        self.with_exclusive_transaction(|conn| bucket::insert(conn, current, id.as_bytes()))
    }

    /// Removes `id` from the current epoch's bucket. Succeeds even if
    /// absent.
    pub fn remove_client(&self, current: Epoch, id: &ClientId) -> Result<()> {
        self.with_exclusive_transaction(|conn| bucket::remove(conn, current, id.as_bytes()))
    }

    /// Checks whether `id` may reclaim during the active grace period.
    ///
    /// If `recovery_epoch == 0` (no grace active), always denies. On
    /// `Allowed`, also (logically-atomically) records `id` into the
    /// current epoch's bucket, so re-presentation during the same grace
    /// period is idempotent.
    pub fn check_client(
        &self,
        state: GraceState,
        id: &ClientId,
    ) -> Result<CheckResult> {
        if state.recovery.is_none() {
            return Ok(CheckResult::Denied);
        }

        self.with_exclusive_transaction(|conn| {
            if bucket::contains(conn, state.recovery, id.as_bytes())? {
                bucket::insert(conn, state.current, id.as_bytes())?;
                Ok(CheckResult::Allowed)
            } else {
                Ok(CheckResult::Denied)
            }
        })
    }

    /// Starts a grace period, implementing both restart cases from the
    /// design:
    ///
    /// - Case A (normal → grace, `recovery == 0`): allocates a new current
    ///   epoch, freezes the old one as the recovery epoch, creates an
    ///   empty bucket for the new current epoch.
    /// - Case B (already in grace, server restarted, `recovery != 0`):
    ///   leaves `(current, recovery)` unchanged but empties the current
    ///   epoch's bucket, since the restart invalidated any partial
    ///   reclaims recorded there.
    pub fn grace_start(&self) -> Result<GraceState> {
        self.with_exclusive_transaction(|conn| {
            let (current, recovery): (i64, i64) =
                conn.query_row("SELECT current, recovery FROM grace", [], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
            let current = Epoch(current as u64);
            let recovery = Epoch(recovery as u64);

            if recovery.is_none() {
                let new_current = current.next();
                let new_recovery = current;
                conn.execute(
                    "UPDATE grace SET current = ?1, recovery = ?2",
                    rusqlite::params![new_current.0 as i64, new_recovery.0 as i64],
                )?;
                bucket::create(conn, new_current)?;
                Ok(GraceState {
                    current: new_current,
                    recovery: new_recovery,
                })
            } else {
                bucket::clear(conn, current)?;
                Ok(GraceState { current, recovery })
            }
        })
    }

    /// Ends the active grace period: sets `recovery_epoch` to `0` and
    /// drops the now-frozen recovery bucket.
    pub fn grace_done(&self) -> Result<()> {
        self.with_exclusive_transaction(|conn| {
            let recovery: i64 =
                conn.query_row("SELECT recovery FROM grace", [], |row| row.get(0))?;
            let recovery = Epoch(recovery as u64);

            conn.execute("UPDATE grace SET recovery = 0", [])?;
            if !recovery.is_none() {
                bucket::drop_bucket(conn, recovery)?;
            }
            Ok(())
        })
    }

    /// Invokes `cb` once per client identity in the recovery-epoch bucket.
    ///
    /// Returns [`ErrorKind::Invalid`] if no grace period is active.
    pub fn iterate_recovery(
        &self,
        state: GraceState,
        cb: impl FnMut(&[u8]),
    ) -> Result<usize> {
        if state.recovery.is_none() {
            return Err(TrackerError::Invalid(
                "iterate_recovery called outside grace".to_string(),
            ));
        }
        bucket::iterate(&self.conn, state.recovery, cb)
    }

    /// Returns `true` once [`Store::open`] has succeeded — used to answer
    /// the upcall transport's `HasSession` query.
    pub fn has_session(&self) -> bool {
        true
    }
}
