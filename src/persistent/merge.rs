//! Veto-capable merge policies.
//!
//! This module provides [`MergePolicy`], the conflict-resolution strategy
//! consulted by `merge_with`, `merge_all`, and `remove_with` on all
//! persistent collections in this crate.
//!
//! A policy exposes three predicates, one per kind of structural change.
//! Each returns `true` to let the change proceed and `false` to veto it;
//! the defaults accept everything. A vetoed change leaves the existing
//! binding untouched, and a bulk operation in which every change is
//! vetoed returns a handle sharing the original root, so callers can
//! detect "nothing changed" cheaply with `ptr_eq`.
//!
//! # Examples
//!
//! ```rust
//! use trellis::persistent::{MergePolicy, PersistentHashMap};
//!
//! /// Keeps the larger of two conflicting values.
//! struct KeepLarger;
//!
//! impl MergePolicy<String, i32> for KeepLarger {
//!     fn on_merge(&self, _key: &String, existing: &i32, incoming: &i32) -> bool {
//!         incoming > existing
//!     }
//! }
//!
//! let map = PersistentHashMap::new().insert("a".to_string(), 10);
//! let merged = map.merge_with("a".to_string(), 3, &KeepLarger);
//! assert_eq!(merged.get("a"), Some(&10)); // 3 < 10, replacement vetoed
//! assert!(merged.ptr_eq(&map));           // nothing changed
//! ```

// =============================================================================
// MergePolicy Trait
// =============================================================================

/// A three-predicate strategy governing how entries combine during a merge.
///
/// Every method defaults to `true` (accept), so implementors only override
/// the decisions they care about. During a bulk merge the policy is
/// consulted once per key that would change, in source iteration order,
/// and each decision sees the target as already modified by the accepted
/// changes before it.
///
/// The three predicates correspond to the three structural outcomes of a
/// per-key merge:
///
/// - [`on_insert`](Self::on_insert): the key is absent in the target and
///   present in the source;
/// - [`on_merge`](Self::on_merge): the key is present in both with unequal
///   values (equal values are an unconditional no-op and consult nothing);
/// - [`on_delete`](Self::on_delete): a policy-aware removal would drop an
///   existing entry.
pub trait MergePolicy<K, V> {
    /// Consulted when `key` is absent in the target.
    ///
    /// Returning `false` leaves the target without the key.
    fn on_insert(&self, key: &K, incoming: &V) -> bool {
        let _ = (key, incoming);
        true
    }

    /// Consulted when a policy-aware removal would drop an existing entry.
    ///
    /// Returning `false` keeps the existing entry.
    fn on_delete(&self, key: &K, existing: &V) -> bool {
        let _ = (key, existing);
        true
    }

    /// Consulted when `key` is present in both sides with unequal values.
    ///
    /// Returning `true` replaces the existing value with the incoming one;
    /// returning `false` keeps the existing value.
    fn on_merge(&self, key: &K, existing: &V, incoming: &V) -> bool {
        let _ = (key, existing, incoming);
        true
    }
}

// =============================================================================
// Built-in Policies
// =============================================================================

/// The permissive policy: accepts every insert, replacement, and deletion.
///
/// `merge_all` under this policy is a plain last-wins merge, equivalent to
/// `insert_all`.
///
/// # Examples
///
/// ```rust
/// use trellis::persistent::{PersistentHashMap, ReplacePolicy};
///
/// let left = PersistentHashMap::new().insert("a".to_string(), 1);
/// let right = PersistentHashMap::new().insert("a".to_string(), 2);
///
/// let merged = left.merge_all(&right, &ReplacePolicy);
/// assert_eq!(merged.get("a"), Some(&2));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplacePolicy;

impl<K, V> MergePolicy<K, V> for ReplacePolicy {}

/// A policy that never replaces or deletes existing entries.
///
/// Novel keys are still inserted; conflicts resolve in favor of the
/// target ("first wins").
///
/// # Examples
///
/// ```rust
/// use trellis::persistent::{KeepExistingPolicy, PersistentHashMap};
///
/// let left = PersistentHashMap::new().insert("a".to_string(), 1);
/// let right = PersistentHashMap::new()
///     .insert("a".to_string(), 2)
///     .insert("b".to_string(), 3);
///
/// let merged = left.merge_all(&right, &KeepExistingPolicy);
/// assert_eq!(merged.get("a"), Some(&1)); // existing value kept
/// assert_eq!(merged.get("b"), Some(&3)); // novel key inserted
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepExistingPolicy;

impl<K, V> MergePolicy<K, V> for KeepExistingPolicy {
    fn on_delete(&self, key: &K, existing: &V) -> bool {
        let _ = (key, existing);
        false
    }

    fn on_merge(&self, key: &K, existing: &V, incoming: &V) -> bool {
        let _ = (key, existing, incoming);
        false
    }
}

// =============================================================================
// Tests
// =============================================================================
