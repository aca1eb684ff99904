//! Property-based tests for PersistentHashMap.
//!
//! Verifies the map's laws and invariants against a `std::collections`
//! model using proptest.

use proptest::prelude::*;
use std::collections::HashMap;
use trellis::persistent::PersistentHashMap;

// =============================================================================
// Strategy for generating test data
// =============================================================================

fn arbitrary_key() -> impl Strategy<Value = String> {
    "[a-z]{1,10}"
}

fn arbitrary_value() -> impl Strategy<Value = i32> {
    any::<i32>()
}

fn arbitrary_entries() -> impl Strategy<Value = Vec<(String, i32)>> {
    prop::collection::vec((arbitrary_key(), arbitrary_value()), 0..50)
}

// =============================================================================
// Get-Insert Law: map.insert(k, v).get(&k) == Some(&v)
// =============================================================================

proptest! {
    #[test]
    fn prop_get_insert_law(
        entries in arbitrary_entries(),
        key in arbitrary_key(),
        value in arbitrary_value()
    ) {
        let map: PersistentHashMap<String, i32> = entries.into_iter().collect();
        let inserted = map.insert(key.clone(), value);

        prop_assert_eq!(inserted.get(&key), Some(&value));
    }
}

// =============================================================================
// Get-Insert-Other Law: k1 != k2 => map.insert(k1, v).get(&k2) == map.get(&k2)
// =============================================================================

proptest! {
    #[test]
    fn prop_get_insert_other_law(
        entries in arbitrary_entries(),
        key1 in arbitrary_key(),
        key2 in arbitrary_key(),
        value in arbitrary_value()
    ) {
        prop_assume!(key1 != key2);

        let map: PersistentHashMap<String, i32> = entries.into_iter().collect();
        let inserted = map.insert(key1, value);

        prop_assert_eq!(inserted.get(&key2), map.get(&key2));
    }
}

// =============================================================================
// Remove-Get Law: map.remove(&k).get(&k) == None
// =============================================================================

proptest! {
    #[test]
    fn prop_remove_get_law(
        entries in arbitrary_entries(),
        key in arbitrary_key()
    ) {
        let map: PersistentHashMap<String, i32> = entries.into_iter().collect();
        let removed = map.remove(&key);

        prop_assert_eq!(removed.get(&key), None);
    }
}

// =============================================================================
// Remove-Insert Law: !map.contains_key(&k) => map.insert(k, v).remove(&k) == map
// =============================================================================

proptest! {
    #[test]
    fn prop_remove_insert_law(
        entries in arbitrary_entries(),
        key in arbitrary_key(),
        value in arbitrary_value()
    ) {
        let map: PersistentHashMap<String, i32> = entries.into_iter().collect();

        if !map.contains_key(&key) {
            let round_tripped = map.insert(key.clone(), value).remove(&key);
            prop_assert_eq!(round_tripped, map);
        }
    }
}

// =============================================================================
// Length Law: insertion changes length by exactly one iff the key is new
// =============================================================================

proptest! {
    #[test]
    fn prop_length_law(
        entries in arbitrary_entries(),
        key in arbitrary_key(),
        value in arbitrary_value()
    ) {
        let map: PersistentHashMap<String, i32> = entries.into_iter().collect();
        let was_present = map.contains_key(&key);
        let inserted = map.insert(key.clone(), value);

        let expected = map.len() + usize::from(!was_present);
        prop_assert_eq!(inserted.len(), expected);

        let removed = inserted.remove(&key);
        prop_assert_eq!(removed.len(), inserted.len() - 1);
    }
}

// =============================================================================
// No-op Identity Law: provable no-ops share the receiver's root
// =============================================================================

proptest! {
    #[test]
    fn prop_noop_identity_law(entries in arbitrary_entries()) {
        let map: PersistentHashMap<String, i32> = entries.clone().into_iter().collect();

        for (key, value) in &entries {
            let same = map.insert(key.clone(), map.get(key).copied().unwrap_or(*value));
            prop_assert!(same.ptr_eq(&map));
        }

        let absent = map.remove("0-never-generated");
        prop_assert!(absent.ptr_eq(&map));
    }
}

// =============================================================================
// Model Law: the map agrees with std::collections::HashMap
// =============================================================================

proptest! {
    #[test]
    fn prop_model_law(entries in arbitrary_entries(), probes in arbitrary_entries()) {
        let map: PersistentHashMap<String, i32> = entries.clone().into_iter().collect();
        let model: HashMap<String, i32> = entries.into_iter().collect();

        prop_assert_eq!(map.len(), model.len());
        for (key, _) in &probes {
            prop_assert_eq!(map.get(key), model.get(key));
        }
        prop_assert_eq!(map.to_hash_map(), model);
    }
}

// =============================================================================
// Iteration Law: iter visits every entry exactly once
// =============================================================================

proptest! {
    #[test]
    fn prop_iteration_law(entries in arbitrary_entries()) {
        let map: PersistentHashMap<String, i32> = entries.into_iter().collect();

        let visited: HashMap<String, i32> = map
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        prop_assert_eq!(visited.len(), map.len());
        prop_assert_eq!(visited, map.to_hash_map());
    }
}

// =============================================================================
// Transient Law: a batched edit equals the same edits applied persistently
// =============================================================================

proptest! {
    #[test]
    fn prop_transient_equivalence_law(
        base in arbitrary_entries(),
        edits in arbitrary_entries()
    ) {
        let origin: PersistentHashMap<String, i32> = base.into_iter().collect();

        let mut transient = origin.clone().transient();
        for (key, value) in &edits {
            transient.insert(key.clone(), *value);
        }
        let batched = transient.persistent();

        let mut one_by_one = origin.clone();
        for (key, value) in &edits {
            one_by_one = one_by_one.insert(key.clone(), *value);
        }

        prop_assert_eq!(batched, one_by_one);
    }
}
