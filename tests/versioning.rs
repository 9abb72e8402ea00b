//! # Version Isolation Tests
//!
//! A commit freezes a version; the next batch mutates on top of it while
//! the shadow tree keeps the old state reachable. These tests pin down
//! isolation between the current version and its predecessor, plus the
//! page-reuse behavior between commits.

use arbordb::Store;

#[test]
fn shadow_visibility_after_overwrite() {
    let mut store = Store::in_memory();
    store.insert(b"alpha", b"old-a").unwrap();
    store.insert(b"beta", b"old-b").unwrap();
    store.commit().unwrap();

    store.insert(b"alpha", b"new-a").unwrap();
    store.insert(b"gamma", b"new-g").unwrap();
    store.commit().unwrap();

    // Version 2 sees the batch, version 1 the frozen predecessor.
    assert_eq!(store.get(b"alpha").unwrap(), Some(b"new-a".to_vec()));
    assert_eq!(store.get_at_version(2, b"alpha").unwrap(), Some(b"new-a".to_vec()));
    assert_eq!(store.get_at_version(2, b"gamma").unwrap(), Some(b"new-g".to_vec()));
    assert_eq!(store.get_at_version(1, b"alpha").unwrap(), Some(b"old-a".to_vec()));
    assert_eq!(store.get_at_version(1, b"beta").unwrap(), Some(b"old-b".to_vec()));
    assert_eq!(store.get_at_version(1, b"gamma").unwrap(), None);
}

#[test]
fn shadow_visibility_after_delete() {
    let mut store = Store::in_memory();
    for n in 0..40u32 {
        store.insert(format!("k{n:02}").as_bytes(), b"v1").unwrap();
    }
    store.commit().unwrap();

    for n in 0..40u32 {
        if n % 2 == 0 {
            assert!(store.delete(format!("k{n:02}").as_bytes()).unwrap());
        }
    }
    store.commit().unwrap();

    for n in 0..40u32 {
        let key = format!("k{n:02}");
        assert_eq!(
            store.get_at_version(1, key.as_bytes()).unwrap(),
            Some(b"v1".to_vec()),
            "version 1 lost {key}"
        );
        let current = store.get(key.as_bytes()).unwrap();
        if n % 2 == 0 {
            assert_eq!(current, None, "{key} should be deleted in version 2");
        } else {
            assert_eq!(current, Some(b"v1".to_vec()));
        }
    }
}

#[test]
fn shadow_stays_sound_while_the_buffer_mutates() {
    let mut store = Store::in_memory();
    for n in 0..120u32 {
        store
            .insert(format!("key{n:04}").as_bytes(), format!("v{n}").as_bytes())
            .unwrap();
    }
    store.commit().unwrap();

    // Heavy churn on top of the frozen version; both trees must hold their
    // invariants after every step.
    for n in 0..120u32 {
        match n % 3 {
            0 => {
                store
                    .insert(format!("key{n:04}").as_bytes(), b"rewritten")
                    .unwrap();
            }
            1 => {
                assert!(store.delete(format!("key{n:04}").as_bytes()).unwrap());
            }
            _ => {
                store
                    .insert(format!("fresh{n:04}").as_bytes(), b"added")
                    .unwrap();
            }
        }
        store.check_invariants().unwrap();
    }
    store.commit().unwrap();
    store.check_invariants().unwrap();

    for n in 0..120u32 {
        assert_eq!(
            store.get_at_version(1, format!("key{n:04}").as_bytes()).unwrap(),
            Some(format!("v{n}").into_bytes())
        );
    }
}

#[test]
fn large_values_stay_visible_in_the_previous_version() {
    let mut store = Store::builder().inline_value_max(16).open().unwrap();
    let big_old = vec![0xAA; 900];
    let big_new = vec![0xBB; 900];
    store.insert(b"blob", &big_old).unwrap();
    store.commit().unwrap();

    store.insert(b"blob", &big_new).unwrap();
    store.commit().unwrap();

    assert_eq!(store.get(b"blob").unwrap(), Some(big_new));
    assert_eq!(store.get_at_version(1, b"blob").unwrap(), Some(big_old));
}

#[test]
fn repeated_commit_cycles_reuse_pages() {
    let mut store = Store::in_memory();
    store.insert(b"alpha", b"seed").unwrap();
    store.insert(b"beta", b"seed").unwrap();
    store.commit().unwrap();

    for round in 0..10u32 {
        store
            .insert(b"alpha", format!("{round}").as_bytes())
            .unwrap();
        store.commit().unwrap();
        store.check_invariants().unwrap();
    }

    // Every cycle writes a handful of pages; without the recycle set and
    // free list the slab would grow past twenty ids here.
    let stats = store.stats();
    assert!(
        stats.max_page_id < 20,
        "page ids kept growing: {}",
        stats.max_page_id
    );
    let current = store.current_version();
    assert_eq!(current, 11);
    assert_eq!(store.get(b"alpha").unwrap(), Some(b"9".to_vec()));
    assert_eq!(
        store.get_at_version(current - 1, b"alpha").unwrap(),
        Some(b"8".to_vec())
    );
}

#[test]
fn commit_without_changes_publishes_nothing() {
    let mut store = Store::in_memory();
    store.insert(b"k", b"v").unwrap();
    store.commit().unwrap();
    assert_eq!(store.current_version(), 1);

    // Neither a clean buffer nor a no-op insert counts as a change.
    assert_eq!(store.commit().unwrap(), 0);
    assert!(!store.insert(b"k", b"v").unwrap());
    assert_eq!(store.commit().unwrap(), 0);
    assert_eq!(store.current_version(), 1);
    assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn scan_reflects_the_committed_page_graph() {
    let mut store = Store::in_memory();
    for n in 0..400u32 {
        store
            .insert(format!("key{n:05}").as_bytes(), &[b'v'; 72])
            .unwrap();
    }
    store.commit().unwrap();

    let report = store.scan().unwrap();
    assert!(report.pages > 1);
    assert!(report.max_arrow_depth >= 1);

    // A second batch on top; the graph keeps validating.
    for n in 0..400u32 {
        if n % 4 == 0 {
            store.delete(format!("key{n:05}").as_bytes()).unwrap();
        }
    }
    store.commit().unwrap();
    let report = store.scan().unwrap();
    assert!(report.pages >= 1);

    let space = store.space_scan().unwrap();
    assert!(space.pages >= report.pages as u64);
}
