// SPDX-FileCopyrightText: 2026 The nfsdcld Authors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Property-based checks for the parts of the store with a clean
//! algebraic shape: bucket membership and client id validation.

use nfsdcld::store::{ClientId, Store, OPAQUE_LIMIT};
use proptest::prelude::*;

proptest! {
    #[test]
    fn client_id_accepts_iff_within_opaque_limit(len in 0usize..300) {
        let bytes = vec![0xABu8; len];
        let result = ClientId::new(bytes);
        prop_assert_eq!(result.is_ok(), len <= OPAQUE_LIMIT);
    }

    #[test]
    fn insert_then_remove_leaves_no_trace(ids in proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 0..32), 1..20
    )) {
        let (store, state) = Store::open_in_memory().unwrap();
        let mut inserted = Vec::new();
        for bytes in &ids {
            let id = ClientId::new(bytes.clone()).unwrap();
            store.insert_client(state.current, &id).unwrap();
            inserted.push(id);
        }
        for id in &inserted {
            store.remove_client(state.current, id).unwrap();
        }

        let state = store.grace_start().unwrap();
        for id in &inserted {
            let result = store.check_client(state, id).unwrap();
            prop_assert_eq!(result, nfsdcld::store::CheckResult::Denied);
        }
    }

    #[test]
    fn reinserting_a_client_is_idempotent(bytes in proptest::collection::vec(any::<u8>(), 0..32), times in 1usize..10) {
        let (store, state) = Store::open_in_memory().unwrap();
        let id = ClientId::new(bytes).unwrap();
        for _ in 0..times {
            store.insert_client(state.current, &id).unwrap();
        }

        let mut count = 0;
        store
            .iterate_recovery(
                nfsdcld::epoch::GraceState {
                    current: state.current,
                    recovery: state.current,
                },
                |_| count += 1,
            )
            .unwrap();
        prop_assert_eq!(count, 1);
    }
}
