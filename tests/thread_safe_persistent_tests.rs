#![cfg(feature = "arc")]
//! Cross-thread sharing tests for persistent collections.
//!
//! With the `arc` feature, nodes are shared through `Arc` and persistent
//! handles are `Send + Sync`. Transient editors stay thread-confined
//! regardless (that part is a compile-time guarantee checked by
//! `static_assertions` in the library itself).

use std::thread;

use rstest::rstest;
use trellis::persistent::{PersistentHashMap, PersistentHashSet, PersistentTreeMap};

fn assert_send_sync<T: Send + Sync>() {}

#[rstest]
fn test_persistent_handles_are_send_sync() {
    assert_send_sync::<PersistentHashMap<String, i32>>();
    assert_send_sync::<PersistentHashSet<String>>();
    assert_send_sync::<PersistentTreeMap<String, i32>>();
}

#[rstest]
fn test_shared_map_readable_from_many_threads() {
    let map: PersistentHashMap<i32, i32> = (0..1000).map(|key| (key, key * 2)).collect();

    thread::scope(|scope| {
        for chunk in 0..4 {
            let map = &map;
            scope.spawn(move || {
                for key in (chunk * 250)..((chunk + 1) * 250) {
                    assert_eq!(map.get(&key), Some(&(key * 2)));
                }
            });
        }
    });
}

#[rstest]
fn test_derivations_on_other_threads_leave_original_intact() {
    let base: PersistentHashMap<i32, i32> = (0..100).map(|key| (key, key)).collect();

    let handles: Vec<_> = (0..4)
        .map(|thread_index| {
            let base = base.clone();
            thread::spawn(move || {
                let mut derived = base;
                for key in 0..100 {
                    derived = derived.insert(key, key + thread_index * 1000);
                }
                derived.len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 100);
    }
    for key in 0..100 {
        assert_eq!(base.get(&key), Some(&key));
    }
}

#[rstest]
fn test_cursor_halves_consumed_on_separate_threads() {
    let map: PersistentHashMap<i32, i32> = (0..400).map(|key| (key, key)).collect();

    let mut right = map.cursor();
    let left = right.try_split().expect("enough work to split");

    let (mut left_keys, mut right_keys) = thread::scope(|scope| {
        let left_handle = scope.spawn(move || left.map(|(key, _)| *key).collect::<Vec<_>>());
        let right_handle = scope.spawn(move || right.map(|(key, _)| *key).collect::<Vec<_>>());
        (left_handle.join().unwrap(), right_handle.join().unwrap())
    });

    left_keys.append(&mut right_keys);
    left_keys.sort_unstable();
    assert_eq!(left_keys, (0..400).collect::<Vec<_>>());
}

#[rstest]
fn test_transient_commit_then_share() {
    let snapshot = {
        let mut transient = PersistentTreeMap::new().transient();
        for key in 0..200 {
            transient.insert(key, key);
        }
        transient.persistent()
    };

    thread::scope(|scope| {
        for _ in 0..3 {
            let snapshot = &snapshot;
            scope.spawn(move || {
                let keys: Vec<i32> = snapshot.keys().copied().collect();
                assert_eq!(keys, (0..200).collect::<Vec<_>>());
            });
        }
    });
}
