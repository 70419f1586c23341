// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Schema migration state machine.
//!
//! Unlike a conventional sequential migration runner (apply every pending
//! version in turn), this store's migration path is a small closed state
//! machine keyed off the *current* on-disk version, because every legacy
//! version converges on the same target schema: `LATEST = 3`. The shape —
//! a single exclusive transaction, rollback-and-propagate on failure, a
//! version stamped in a durable key/value table — follows the same
//! discipline as a sequential runner; there just isn't a list of
//! per-version callbacks to walk because only two legacy shapes exist.

use rusqlite::Connection;

use crate::epoch::Epoch;
use crate::error::{Result, TrackerError};
use crate::store::bucket;

pub const LATEST: u32 = 3;

/// Reads `parameters.version`, or `None` if the table/row doesn't exist
/// yet (a brand new database).
fn read_version(conn: &Connection) -> Result<Option<u32>> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='parameters'",
        [],
        |row| row.get(0),
    )?;
    if !table_exists {
        return Ok(None);
    }

    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM parameters WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .ok();

    match value {
        None => Ok(None),
        Some(v) => v
            .parse::<u32>()
            .map(Some)
            .map_err(|_| TrackerError::Corruption(format!("non-numeric schema version: {v}"))),
    }
}

fn write_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO parameters (key, value) VALUES ('version', ?1)",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn create_fresh(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS parameters (key TEXT PRIMARY KEY, value TEXT);
         CREATE TABLE IF NOT EXISTS grace (current INTEGER NOT NULL, recovery INTEGER NOT NULL);",
    )?;
    write_version(conn, LATEST)?;
    conn.execute("DELETE FROM grace", [])?;
    conn.execute(
        "INSERT INTO grace (current, recovery) VALUES (1, 0)",
        [],
    )?;
    bucket::create(conn, Epoch::FIRST)?;
    Ok(())
}

/// Copies every row from the legacy `clients` bucket into `rec-<16-hex of
/// epoch 1>`, then drops `clients`. Safe to call when `clients` doesn't
/// exist (legacy v2 databases that never had it).
fn migrate_legacy_clients_table(conn: &Connection) -> Result<()> {
    let has_clients: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='clients'",
        [],
        |row| row.get(0),
    )?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS parameters (key TEXT PRIMARY KEY, value TEXT);
         CREATE TABLE IF NOT EXISTS grace (current INTEGER NOT NULL, recovery INTEGER NOT NULL);",
    )?;

    let has_grace_row: bool =
        conn.query_row("SELECT COUNT(*) > 0 FROM grace", [], |row| row.get(0))?;
    if !has_grace_row {
        conn.execute("INSERT INTO grace (current, recovery) VALUES (1, 0)", [])?;
    }

    bucket::create(conn, Epoch::FIRST)?;

    if has_clients {
        let mut stmt = conn.prepare("SELECT id FROM clients")?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let id: Vec<u8> = row.get(0)?;
            ids.push(id);
        }
        drop(rows);
        drop(stmt);
        for id in ids {
            bucket::insert(conn, Epoch::FIRST, &id)?;
        }
        conn.execute_batch("DROP TABLE clients;")?;
    }

    Ok(())
}

/// Opens (or migrates) the database at `conn` so that it reads at
/// [`LATEST`] on return. Runs the entire migration under one exclusive
/// transaction, retrying busy/locked outcomes (on `BEGIN` and on any
/// migration step) up to the same bounded busy-retry budget every other
/// multi-step store operation uses — spec §4.1 lists "migration, setup"
/// among the operations another process may transiently hold the
/// database during. Any non-transient failure rolls back and leaves the
/// database exactly as it was before this call, and the original error
/// is propagated (a rollback failure is never allowed to mask it).
pub fn run(conn: &Connection) -> Result<()> {
    super::with_busy_retry(conn, |conn| {
        // Re-read on every attempt: defensive against another process
        // racing us to initialize the same fresh database.
        match read_version(conn)? {
            None => create_fresh(conn),
            Some(1) | Some(2) => {
                migrate_legacy_clients_table(conn)?;
                write_version(conn, LATEST)
            }
            Some(3) => Ok(()),
            Some(other) => Err(TrackerError::UnsupportedSchema(other.to_string())),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_lands_on_latest() {
        let conn = conn();
        run(&conn).unwrap();
        assert_eq!(read_version(&conn).unwrap(), Some(LATEST));
        let (current, recovery): (i64, i64) = conn
            .query_row("SELECT current, recovery FROM grace", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!((current, recovery), (1, 0));
        assert!(bucket::contains(&conn, Epoch(1), b"nobody").is_ok());
    }

    #[test]
    fn rerunning_on_latest_is_noop() {
        let conn = conn();
        run(&conn).unwrap();
        bucket::insert(&conn, Epoch(1), b"alice").unwrap();
        run(&conn).unwrap();
        assert!(bucket::contains(&conn, Epoch(1), b"alice").unwrap());
    }

    #[test]
    fn unknown_version_is_refused() {
        let conn = conn();
        conn.execute_batch(
            "CREATE TABLE parameters (key TEXT PRIMARY KEY, value TEXT);
             INSERT INTO parameters (key, value) VALUES ('version', '99');",
        )
        .unwrap();
        let err = run(&conn).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedSchema);
    }

    #[test]
    fn v1_migrates_legacy_clients_into_epoch_one_bucket() {
        let conn = conn();
        conn.execute_batch(
            "CREATE TABLE parameters (key TEXT PRIMARY KEY, value TEXT);
             INSERT INTO parameters (key, value) VALUES ('version', '1');
             CREATE TABLE clients (id BLOB PRIMARY KEY);
             INSERT INTO clients (id) VALUES (x'78'), (x'79');",
        )
        .unwrap();

        run(&conn).unwrap();

        assert_eq!(read_version(&conn).unwrap(), Some(LATEST));
        assert!(bucket::contains(&conn, Epoch(1), b"x").unwrap());
        assert!(bucket::contains(&conn, Epoch(1), b"y").unwrap());
        let clients_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='clients'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!clients_exists);
    }
}
