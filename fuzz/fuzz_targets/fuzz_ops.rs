//! Fuzz testing for store operations.
//!
//! Applies an arbitrary sequence of inserts, deletes, lookups, and commits
//! to a store and a reference BTreeMap, checking that results agree and
//! that AVL invariants hold after every mutation.

#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use arbordb::Store;

#[derive(Debug, Arbitrary)]
enum Op {
    Insert { key: u16, value: Vec<u8> },
    Delete { key: u16 },
    Get { key: u16 },
    Commit,
}

fn key_bytes(key: u16) -> Vec<u8> {
    format!("key{:05}", key % 512).into_bytes()
}

fuzz_target!(|ops: Vec<Op>| {
    let mut store = Store::in_memory();
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Insert { key, value } => {
                let key = key_bytes(key);
                let inserted = store.insert(&key, &value).unwrap();
                assert_eq!(inserted, !model.contains_key(&key));
                model.insert(key, value);
                store.check_invariants().unwrap();
            }
            Op::Delete { key } => {
                let key = key_bytes(key);
                let deleted = store.delete(&key).unwrap();
                assert_eq!(deleted, model.remove(&key).is_some());
                store.check_invariants().unwrap();
            }
            Op::Get { key } => {
                let key = key_bytes(key);
                assert_eq!(store.get(&key).unwrap(), model.get(&key).cloned());
            }
            Op::Commit => {
                store.commit().unwrap();
                store.check_invariants().unwrap();
            }
        }
    }

    for (key, value) in &model {
        assert_eq!(store.get(key).unwrap().as_ref(), Some(value));
    }
});
