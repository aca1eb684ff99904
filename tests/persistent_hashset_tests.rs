//! Integration tests for PersistentHashSet and TransientHashSet.

use rstest::rstest;
use trellis::persistent::{MergePolicy, PersistentHashSet, TransientHashSet};

#[rstest]
fn test_set_semantics_deduplicate() {
    let set: PersistentHashSet<i32> = [1, 2, 2, 3, 3, 3].into();
    assert_eq!(set.len(), 3);
}

#[rstest]
fn test_persistence_across_derivations() {
    let base: PersistentHashSet<i32> = (0..20).collect();
    let shrunk = base.remove(&10);
    let grown = shrunk.insert(100);

    assert_eq!(base.len(), 20);
    assert!(base.contains(&10));
    assert_eq!(shrunk.len(), 19);
    assert!(!shrunk.contains(&10));
    assert!(grown.contains(&100));
    assert!(!base.contains(&100));
}

#[rstest]
fn test_algebra_identities() {
    let set: PersistentHashSet<i32> = (0..10).collect();
    let empty = PersistentHashSet::new();

    assert_eq!(set.union(&empty), set);
    assert_eq!(set.intersection(&set.clone()), set);
    assert_eq!(set.difference(&set.clone()), empty);
    assert_eq!(set.symmetric_difference(&empty), set);
}

#[rstest]
fn test_disjoint_difference_shares_root() {
    let left: PersistentHashSet<i32> = (0..5).collect();
    let right: PersistentHashSet<i32> = (100..105).collect();

    assert!(left.difference(&right).ptr_eq(&left));
}

#[rstest]
fn test_subset_reflexive_and_strict() {
    let small: PersistentHashSet<i32> = (0..3).collect();
    let large: PersistentHashSet<i32> = (0..6).collect();
    let other: PersistentHashSet<i32> = (10..13).collect();

    assert!(small.is_subset(&small.clone()));
    assert!(small.is_subset(&large));
    assert!(!small.is_subset(&other));
    assert!(large.is_superset(&small));
}

#[rstest]
fn test_merge_all_element_policy() {
    struct BelowTen;
    impl MergePolicy<i32, ()> for BelowTen {
        fn on_insert(&self, element: &i32, _incoming: &()) -> bool {
            *element < 10
        }
    }

    let left: PersistentHashSet<i32> = [1].into();
    let right: PersistentHashSet<i32> = [5, 15, 7, 25].into();

    let merged = left.merge_all(&right, &BelowTen);
    assert_eq!(merged.len(), 3);
    assert!(merged.contains(&5) && merged.contains(&7));
    assert!(!merged.contains(&15) && !merged.contains(&25));
}

#[rstest]
fn test_transient_batch_and_freeze() {
    let origin: PersistentHashSet<String> = ["a", "b"].map(String::from).into();

    let mut transient = origin.clone().transient();
    assert!(transient.insert("c".to_string()));
    assert!(!transient.insert("a".to_string()));
    assert!(transient.remove("b"));
    let edited = transient.persistent();

    assert_eq!(origin.len(), 2);
    assert!(origin.contains("b"));
    assert_eq!(edited.len(), 2);
    assert!(edited.contains("c"));
    assert!(!edited.contains("b"));
}

#[rstest]
fn test_collect_from_iterator() {
    let set: PersistentHashSet<i32> = (0..1000).map(|element| element % 100).collect();
    assert_eq!(set.len(), 100);

    let mut transient: TransientHashSet<i32> = (0..50).collect();
    transient.extend(25..75);
    assert_eq!(transient.persistent().len(), 75);
}
