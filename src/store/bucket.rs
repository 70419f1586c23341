// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Recovery bucket naming and access.
//!
//! A bucket is a single-column table `rec-<16-hex-digits-of-epoch>` holding
//! one row per client identity known to that epoch. The name is part of the
//! on-disk format and must stay bit-exact (lowercase hex, zero-padded to 16
//! characters) so an existing database remains readable across rebuilds.
//!
//! The table name is built with `format!` because it is derived only from
//! an epoch integer — never from client-supplied bytes. Client identity
//! values always go through bound parameters.

use rusqlite::{params, Connection};

use crate::epoch::Epoch;
use crate::error::Result;

/// Returns the bucket table name for `epoch`, e.g. `rec-0000000000000001`.
pub fn bucket_name(epoch: Epoch) -> String {
    format!("rec-{:016x}", epoch.0)
}

/// Creates an empty bucket for `epoch` if it does not already exist.
pub fn create(conn: &Connection, epoch: Epoch) -> Result<()> {
    let name = bucket_name(epoch);
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{name}\" (id BLOB PRIMARY KEY);"
    ))?;
    Ok(())
}

/// Drops the bucket for `epoch`, if present.
pub fn drop_bucket(conn: &Connection, epoch: Epoch) -> Result<()> {
    let name = bucket_name(epoch);
    conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{name}\";"))?;
    Ok(())
}

/// Empties the bucket for `epoch` without dropping it.
pub fn clear(conn: &Connection, epoch: Epoch) -> Result<()> {
    let name = bucket_name(epoch);
    conn.execute(&format!("DELETE FROM \"{name}\""), [])?;
    Ok(())
}

/// Inserts `id` into the bucket for `epoch`. Idempotent: re-inserting the
/// same id is a no-op.
pub fn insert(conn: &Connection, epoch: Epoch, id: &[u8]) -> Result<()> {
    let name = bucket_name(epoch);
    conn.execute(
        &format!("INSERT OR IGNORE INTO \"{name}\" (id) VALUES (?1)"),
        params![id],
    )?;
    Ok(())
}

/// Removes `id` from the bucket for `epoch`. Succeeds even if absent.
pub fn remove(conn: &Connection, epoch: Epoch, id: &[u8]) -> Result<()> {
    let name = bucket_name(epoch);
    conn.execute(&format!("DELETE FROM \"{name}\" WHERE id = ?1"), params![id])?;
    Ok(())
}

/// Returns true if `id` is present in the bucket for `epoch`.
pub fn contains(conn: &Connection, epoch: Epoch, id: &[u8]) -> Result<bool> {
    let name = bucket_name(epoch);
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM \"{name}\" WHERE id = ?1"),
            params![id],
            |row| row.get(0),
        )
        .ok();
    Ok(found.is_some())
}

/// Invokes `cb` once per client identity in the bucket for `epoch`, in no
/// particular order. Returns the number of identities visited.
pub fn iterate(conn: &Connection, epoch: Epoch, mut cb: impl FnMut(&[u8])) -> Result<usize> {
    let name = bucket_name(epoch);
    let mut stmt = conn.prepare(&format!("SELECT id FROM \"{name}\""))?;
    let mut rows = stmt.query([])?;
    let mut count = 0usize;
    while let Some(row) = rows.next()? {
        let id: Vec<u8> = row.get(0)?;
        cb(&id);
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn bucket_name_is_zero_padded_lowercase_hex() {
        assert_eq!(bucket_name(Epoch(1)), "rec-0000000000000001");
        assert_eq!(bucket_name(Epoch(2)), "rec-0000000000000002");
        assert_eq!(bucket_name(Epoch(0xabcdef)), "rec-0000000000abcdef");
    }

    #[test]
    fn insert_then_contains() {
        let conn = conn();
        create(&conn, Epoch(1)).unwrap();
        assert!(!contains(&conn, Epoch(1), b"alice").unwrap());
        insert(&conn, Epoch(1), b"alice").unwrap();
        assert!(contains(&conn, Epoch(1), b"alice").unwrap());
    }

    #[test]
    fn insert_is_idempotent() {
        let conn = conn();
        create(&conn, Epoch(1)).unwrap();
        insert(&conn, Epoch(1), b"alice").unwrap();
        insert(&conn, Epoch(1), b"alice").unwrap();
        let mut seen = 0;
        iterate(&conn, Epoch(1), |_| seen += 1).unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn remove_absent_succeeds() {
        let conn = conn();
        create(&conn, Epoch(1)).unwrap();
        remove(&conn, Epoch(1), b"nobody").unwrap();
    }

    #[test]
    fn clear_empties_without_dropping() {
        let conn = conn();
        create(&conn, Epoch(1)).unwrap();
        insert(&conn, Epoch(1), b"alice").unwrap();
        clear(&conn, Epoch(1)).unwrap();
        assert!(!contains(&conn, Epoch(1), b"alice").unwrap());
        // still exists and usable
        insert(&conn, Epoch(1), b"bob").unwrap();
        assert!(contains(&conn, Epoch(1), b"bob").unwrap());
    }

    #[test]
    fn iterate_empty_bucket_zero_times() {
        let conn = conn();
        create(&conn, Epoch(1)).unwrap();
        let mut seen = 0;
        let count = iterate(&conn, Epoch(1), |_| seen += 1).unwrap();
        assert_eq!(count, 0);
        assert_eq!(seen, 0);
    }
}
