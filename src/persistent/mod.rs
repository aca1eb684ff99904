//! Persistent (immutable) data structures.
//!
//! This module provides efficient immutable collections that use
//! structural sharing to minimize copying:
//!
//! - [`PersistentHashMap`]: Persistent hash map (hash array mapped trie)
//! - [`PersistentHashSet`]: Persistent hash set (based on the hash map)
//! - [`PersistentTreeMap`]: Persistent ordered map (red-black tree)
//! - [`PersistentTreeSet`]: Persistent ordered set (based on the tree map)
//!
//! Every "mutating" operation returns a new collection and leaves the
//! original untouched. A provable no-op (inserting an equal value,
//! removing an absent key, a fully vetoed merge) returns a handle that
//! shares the original root, observable through `ptr_eq`.
//!
//! # Transient Editing
//!
//! Each persistent collection converts into a transient editor
//! ([`TransientHashMap`] and friends) for efficient batch updates. The
//! editor mutates uniquely-owned nodes in place and clones shared nodes
//! exactly once, then freezes back into a persistent value with
//! `persistent()`. Transient editors are `!Send`/`!Sync` and are consumed
//! on freeze, so cross-thread mutation and mutation-after-commit are
//! compile errors rather than runtime failures.
//!
//! # Merge Policies
//!
//! Two collections combine entry-by-entry under a caller-supplied
//! [`MergePolicy`], which may veto individual insertions, replacements,
//! and deletions. See [`merge`](module@crate::persistent::merge).
//!
//! # Examples
//!
//! ```rust
//! use trellis::persistent::PersistentHashMap;
//!
//! let map = PersistentHashMap::new()
//!     .insert("one".to_string(), 1)
//!     .insert("two".to_string(), 2);
//! assert_eq!(map.get("one"), Some(&1));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.insert("one".to_string(), 100);
//! assert_eq!(map.get("one"), Some(&1));       // Original unchanged
//! assert_eq!(updated.get("one"), Some(&100)); // New version
//! ```
//!
//! ```rust
//! use trellis::persistent::PersistentTreeMap;
//!
//! let map = PersistentTreeMap::new()
//!     .insert(3, "three")
//!     .insert(1, "one")
//!     .insert(2, "two");
//!
//! // Entries are always in sorted order
//! let keys: Vec<&i32> = map.keys().collect();
//! assert_eq!(keys, vec![&1, &2, &3]);
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod hashmap;
mod hashset;
pub mod merge;
mod treemap;
mod treeset;

pub use hashmap::MapCursor;
pub use hashmap::PersistentHashMap;
pub use hashmap::PersistentHashMapIntoIterator;
pub use hashmap::PersistentHashMapIterator;
pub use hashmap::TransientHashMap;
pub use hashset::PersistentHashSet;
pub use hashset::PersistentHashSetIntoIterator;
pub use hashset::PersistentHashSetIterator;
pub use hashset::SetCursor;
pub use hashset::TransientHashSet;
pub use merge::KeepExistingPolicy;
pub use merge::MergePolicy;
pub use merge::ReplacePolicy;
pub use treemap::PersistentTreeMap;
pub use treemap::PersistentTreeMapIntoIterator;
pub use treemap::PersistentTreeMapIterator;
pub use treemap::PersistentTreeMapRangeIterator;
pub use treemap::TransientTreeMap;
pub use treemap::TreeCursor;
pub use treeset::PersistentTreeSet;
pub use treeset::PersistentTreeSetIntoIterator;
pub use treeset::PersistentTreeSetIterator;
pub use treeset::TransientTreeSet;
pub use treeset::TreeSetCursor;

// =============================================================================
// Tests
// =============================================================================
