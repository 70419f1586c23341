// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Error taxonomy shared by the store, transport, and dispatcher.
//!
//! Every fallible operation in the daemon returns a [`TrackerError`]. The
//! dispatcher never lets a lower layer's error type leak unmodified — it
//! asks `kind()` and turns that into a reply or a logged-and-dropped
//! request, never an unwind.

use thiserror::Error;

/// Abstract error kind, independent of which layer raised it.
///
/// Mirrors the taxonomy names used throughout the design: retried
/// internally, reported as a denial/ok, reported as a bad-request, or
/// fatal at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Busy/locked database or a short I/O hiccup. Retried internally;
    /// only observed by callers if the retry budget is exhausted.
    Transient,
    /// Client absent on a query that tolerates absence.
    NotFound,
    /// Malformed payload, oversize client id, or an operation invoked
    /// outside the state it requires (e.g. iterating recovery while not
    /// in grace).
    Invalid,
    /// On-disk state is unreadable or inconsistent. Fatal at startup.
    Corruption,
    /// `parameters.version` names a schema this build does not know how
    /// to migrate from. Fatal at startup.
    UnsupportedSchema,
    /// The upcall channel reported EOF.
    TransportLost,
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database busy, retry budget exhausted after {0:?}")]
    BusyTimeout(std::time::Duration),

    #[error("client identity not found")]
    NotFound,

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("store corrupted: {0}")]
    Corruption(String),

    #[error("unsupported schema version {0}")]
    UnsupportedSchema(String),

    #[error("upcall transport lost: {0}")]
    TransportLost(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// Classifies this error into the abstract taxonomy from the design.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackerError::Database(e) => classify_sqlite(e),
            TrackerError::BusyTimeout(_) => ErrorKind::Transient,
            TrackerError::NotFound => ErrorKind::NotFound,
            TrackerError::Invalid(_) => ErrorKind::Invalid,
            TrackerError::Corruption(_) => ErrorKind::Corruption,
            TrackerError::UnsupportedSchema(_) => ErrorKind::UnsupportedSchema,
            TrackerError::TransportLost(_) => ErrorKind::TransportLost,
            TrackerError::Io(_) => ErrorKind::TransportLost,
        }
    }

    /// True if this error is one the caller should retry, rather than
    /// surface.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

fn classify_sqlite(e: &rusqlite::Error) -> ErrorKind {
    use rusqlite::ffi::ErrorCode;
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            ErrorKind::Transient
        }
        rusqlite::Error::QueryReturnedNoRows => ErrorKind::NotFound,
        _ => ErrorKind::Corruption,
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
