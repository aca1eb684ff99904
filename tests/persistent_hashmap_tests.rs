//! Integration tests for PersistentHashMap and TransientHashMap.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rstest::rstest;
use trellis::persistent::{KeepExistingPolicy, MergePolicy, PersistentHashMap, TransientHashMap};

/// A key whose hash is fixed by the test while equality stays per-id, so
/// hash collisions can be forced deterministically.
#[derive(Clone, Debug, PartialEq, Eq)]
struct CollidingKey {
    id: u32,
}

impl CollidingKey {
    const fn new(id: u32) -> Self {
        Self { id }
    }
}

impl Hash for CollidingKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Every key feeds the same bytes to the hasher.
        1u32.hash(state);
    }
}

/// A policy that vetoes every change.
struct AlwaysVeto;

impl<K, V> MergePolicy<K, V> for AlwaysVeto {
    fn on_insert(&self, _key: &K, _incoming: &V) -> bool {
        false
    }

    fn on_delete(&self, _key: &K, _existing: &V) -> bool {
        false
    }

    fn on_merge(&self, _key: &K, _existing: &V, _incoming: &V) -> bool {
        false
    }
}

// =============================================================================
// Concrete scenarios
// =============================================================================

#[rstest]
fn test_overwrite_then_snapshot() {
    let map = PersistentHashMap::new().insert(1, 1).insert(2, 2).insert(1, 99);

    assert_eq!(map.len(), 2);
    let expected: HashMap<i32, i32> = [(1, 99), (2, 2)].into_iter().collect();
    assert_eq!(map.to_hash_map(), expected);
}

#[rstest]
fn test_colliding_keys_remove_one_keeps_other() {
    let first = CollidingKey::new(1);
    let second = CollidingKey::new(2);

    let map = PersistentHashMap::new()
        .insert(first.clone(), first.clone())
        .insert(second.clone(), second.clone())
        .remove(&first);

    assert_eq!(map.get(&second), Some(&second));
    assert_eq!(map.get(&first), None);
}

#[rstest]
fn test_vetoed_merge_returns_original() {
    let map = PersistentHashMap::new().insert(1, 1);
    let result = map.merge_with(1, 2, &AlwaysVeto);

    assert_eq!(result, map);
    assert!(result.ptr_eq(&map));
    assert_eq!(result.get(&1), Some(&1));
}

// =============================================================================
// Persistence
// =============================================================================

#[rstest]
fn test_derivations_never_disturb_published_handles() {
    let base: PersistentHashMap<i32, i32> = (0..100).map(|key| (key, key)).collect();
    let generation1 = base.insert(100, 100);
    let generation2 = generation1.remove(&0);
    let generation3 = generation2.insert(50, -50);

    assert_eq!(base.len(), 100);
    assert_eq!(base.get(&50), Some(&50));
    assert_eq!(base.get(&100), None);

    assert_eq!(generation1.len(), 101);
    assert_eq!(generation1.get(&0), Some(&0));

    assert_eq!(generation2.len(), 100);
    assert_eq!(generation2.get(&0), None);
    assert_eq!(generation2.get(&50), Some(&50));

    assert_eq!(generation3.get(&50), Some(&-50));
}

#[rstest]
fn test_unrelated_keys_unaffected_by_update() {
    let map: PersistentHashMap<i32, i32> = (0..500).map(|key| (key, key)).collect();
    let updated = map.insert(250, 9999);

    for key in 0..500 {
        if key != 250 {
            assert_eq!(updated.get(&key), Some(&key));
        }
    }
}

// =============================================================================
// No-op identity
// =============================================================================

#[rstest]
fn test_equal_value_insert_shares_root() {
    let map: PersistentHashMap<String, i32> = [("a".to_string(), 1), ("b".to_string(), 2)].into();
    let same = map.insert("a".to_string(), 1);

    assert!(same.ptr_eq(&map));
}

#[rstest]
fn test_absent_remove_shares_root() {
    let map: PersistentHashMap<String, i32> = [("a".to_string(), 1)].into();

    assert!(map.remove("zzz").ptr_eq(&map));
}

#[rstest]
fn test_vetoed_delete_shares_root() {
    let map = PersistentHashMap::new().insert(1, 1);
    let kept = map.remove_with(&1, &KeepExistingPolicy);

    assert!(kept.ptr_eq(&map));
    assert_eq!(kept.get(&1), Some(&1));
}

#[rstest]
fn test_merge_all_with_no_effective_change_shares_root() {
    let map: PersistentHashMap<i32, i32> = (0..10).map(|key| (key, key)).collect();
    // A copy with the same contents changes nothing entry-by-entry.
    let twin: PersistentHashMap<i32, i32> = (0..10).map(|key| (key, key)).collect();

    let merged = map.merge_all(&twin, &KeepExistingPolicy);
    assert!(merged.ptr_eq(&map));
}

// =============================================================================
// Collisions
// =============================================================================

#[rstest]
fn test_three_way_collision_chain() {
    let keys: Vec<CollidingKey> = (0..3).map(CollidingKey::new).collect();
    let mut map = PersistentHashMap::new();
    for key in &keys {
        map = map.insert(key.clone(), key.id);
    }

    assert_eq!(map.len(), 3);
    for key in &keys {
        assert_eq!(map.get(key), Some(&key.id));
    }

    let removed = map.remove(&keys[1]);
    assert_eq!(removed.len(), 2);
    assert_eq!(removed.get(&keys[0]), Some(&0));
    assert_eq!(removed.get(&keys[1]), None);
    assert_eq!(removed.get(&keys[2]), Some(&2));
}

#[rstest]
fn test_collision_chain_iteration() {
    let map: PersistentHashMap<CollidingKey, u32> =
        (0..5).map(|id| (CollidingKey::new(id), id)).collect();

    let mut ids: Vec<u32> = map.iter().map(|(key, _)| key.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

// =============================================================================
// Transient editing
// =============================================================================

#[rstest]
fn test_transient_round_trip_preserves_contents() {
    let original: PersistentHashMap<i32, String> =
        (0..50).map(|key| (key, key.to_string())).collect();

    let mut transient = original.clone().transient();
    for key in 50..100 {
        transient.insert(key, key.to_string());
    }
    let expanded = transient.persistent();

    assert_eq!(original.len(), 50);
    assert_eq!(expanded.len(), 100);
    for key in 0..100 {
        assert_eq!(expanded.get(&key), Some(&key.to_string()));
    }
}

#[rstest]
fn test_committed_snapshot_is_frozen() {
    let mut transient = TransientHashMap::new();
    transient.insert("a".to_string(), 1);
    let snapshot = transient.persistent();

    // A fresh editor derived from the snapshot starts a new session;
    // its edits never reach the committed snapshot.
    let mut second_session = snapshot.clone().transient();
    second_session.insert("a".to_string(), 999);
    second_session.insert("b".to_string(), 2);
    let second_snapshot = second_session.persistent();

    assert_eq!(snapshot.get("a"), Some(&1));
    assert_eq!(snapshot.get("b"), None);
    assert_eq!(second_snapshot.get("a"), Some(&999));
}

#[rstest]
fn test_transient_insert_remove_returns_previous() {
    let mut transient = TransientHashMap::new();

    assert_eq!(transient.insert(1, "one"), None);
    assert_eq!(transient.insert(1, "uno"), Some("one"));
    assert_eq!(transient.remove(&1), Some("uno"));
    assert_eq!(transient.remove(&1), None);
    assert!(transient.is_empty());
}

// =============================================================================
// Bulk operations
// =============================================================================

#[rstest]
fn test_insert_all_is_last_wins() {
    let left: PersistentHashMap<i32, i32> = (0..5).map(|key| (key, key)).collect();
    let right: PersistentHashMap<i32, i32> = (3..8).map(|key| (key, key * 100)).collect();

    let combined = left.insert_all(&right);
    assert_eq!(combined.len(), 8);
    assert_eq!(combined.get(&2), Some(&2));
    assert_eq!(combined.get(&4), Some(&400));
}

#[rstest]
fn test_from_iterator_deduplicates() {
    let map: PersistentHashMap<i32, i32> =
        vec![(1, 10), (2, 20), (1, 11)].into_iter().collect();

    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&1), Some(&11));
}

#[rstest]
#[case(10)]
#[case(1_000)]
#[case(10_000)]
fn test_large_map_integrity(#[case] size: i32) {
    let map: PersistentHashMap<i32, i32> = (0..size).map(|key| (key, key * 2)).collect();

    assert_eq!(map.len(), size as usize);
    assert_eq!(map.get(&0), Some(&0));
    assert_eq!(map.get(&(size / 2)), Some(&(size / 2 * 2)));
    assert_eq!(map.get(&(size - 1)), Some(&((size - 1) * 2)));
    assert_eq!(map.get(&size), None);
    assert_eq!(map.iter().count(), size as usize);
}
