// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Epoch Manager (C2).
//!
//! Holds the in-memory `(current_epoch, recovery_epoch)` pair and the two
//! mutators that change it. The cached copy is updated only after the
//! store's commit succeeds, so "in-memory == on-disk" holds at every
//! quiescent point — no global mutable state, just a value threaded
//! through the dispatcher.

use std::fmt;

use crate::error::Result;
use crate::store::Store;

/// Monotonically increasing boot generation. `0` is reserved to mean "no
/// recovery in progress" when used as a recovery epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    pub const NONE: Epoch = Epoch(0);
    pub const FIRST: Epoch = Epoch(1);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Epoch {
    fn from(v: u64) -> Self {
        Epoch(v)
    }
}

/// Snapshot of the grace-period state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraceState {
    pub current: Epoch,
    pub recovery: Epoch,
}

impl GraceState {
    /// True when `recovery_epoch != 0`, i.e. a grace period is active.
    pub fn in_grace(&self) -> bool {
        !self.recovery.is_none()
    }
}

/// Owns the cached `(current_epoch, recovery_epoch)` pair and delegates
/// mutation to the [`Store`]. Never mutates its cache before the store's
/// transaction commits.
pub struct EpochManager {
    state: GraceState,
}

impl EpochManager {
    /// Builds a manager from the state [`Store::open`] already read off
    /// disk.
    pub fn new(state: GraceState) -> Self {
        EpochManager { state }
    }

    pub fn current(&self) -> Epoch {
        self.state.current
    }

    pub fn recovery(&self) -> Epoch {
        self.state.recovery
    }

    pub fn state(&self) -> GraceState {
        self.state
    }

    pub fn in_grace(&self) -> bool {
        self.state.in_grace()
    }

    /// Delegates to [`Store::grace_start`] and publishes the new state only
    /// on success.
    pub fn grace_start(&mut self, store: &Store) -> Result<GraceState> {
        let new_state = store.grace_start()?;
        self.state = new_state;
        Ok(new_state)
    }

    /// Delegates to [`Store::grace_done`] and publishes the new state only
    /// on success.
    pub fn grace_done(&mut self, store: &Store) -> Result<GraceState> {
        store.grace_done()?;
        self.state.recovery = Epoch::NONE;
        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_none_is_zero() {
        assert!(Epoch::NONE.is_none());
        assert!(!Epoch::FIRST.is_none());
    }

    #[test]
    fn grace_state_in_grace() {
        let normal = GraceState {
            current: Epoch(1),
            recovery: Epoch::NONE,
        };
        assert!(!normal.in_grace());

        let grace = GraceState {
            current: Epoch(2),
            recovery: Epoch(1),
        };
        assert!(grace.in_grace());
    }

    #[test]
    fn epoch_next_increments() {
        assert_eq!(Epoch(1).next(), Epoch(2));
    }
}
