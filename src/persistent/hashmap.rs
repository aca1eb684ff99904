//! Persistent (immutable) hash map based on HAMT.
//!
//! This module provides [`PersistentHashMap`], an immutable hash map
//! that uses structural sharing for efficient operations, and
//! [`TransientHashMap`], its temporarily mutable batch editor.
//!
//! # Overview
//!
//! `PersistentHashMap` is based on Hash Array Mapped Trie (HAMT), a data
//! structure that provides efficient immutable operations. It uses a
//! 32-way branching trie where successive 5-bit chunks of a 32-bit hash
//! navigate the tree, so the depth is bounded at seven levels.
//!
//! - O(log32 N) get (effectively O(1) for practical sizes)
//! - O(log32 N) insert
//! - O(log32 N) remove
//! - O(1) len and `is_empty`
//!
//! All operations return new maps without modifying the original, and
//! structural sharing ensures memory efficiency. Provable no-ops
//! (inserting an already-equal value, removing an absent key, a vetoed
//! merge) return a map sharing the original root, observable through
//! [`ptr_eq`](PersistentHashMap::ptr_eq).
//!
//! # Examples
//!
//! ```rust
//! use trellis::persistent::PersistentHashMap;
//!
//! let map = PersistentHashMap::new()
//!     .insert("one".to_string(), 1)
//!     .insert("two".to_string(), 2)
//!     .insert("three".to_string(), 3);
//!
//! assert_eq!(map.get("one"), Some(&1));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.insert("one".to_string(), 100);
//! assert_eq!(map.get("one"), Some(&1));       // Original unchanged
//! assert_eq!(updated.get("one"), Some(&100)); // New version
//! ```
//!
//! # Internal Structure
//!
//! Four node shapes carry the trie:
//!
//! - inline entries, stored directly in a parent slot;
//! - collision chains, for keys whose full 32-bit hashes are equal;
//! - bitmap nodes, a `u32` presence bitmap plus a dense child vector
//!   addressed by the population count of lower bits;
//! - array nodes, dense 32-slot nodes a bitmap node promotes into when
//!   its last free slot fills (and demotes out of when occupancy drops
//!   below half).
//!
//! Nodes are shared through [`ReferenceCounter`] and edited copy-on-write:
//! a node uniquely owned by the handle performing the edit is mutated in
//! place, a shared node is cloned exactly once. This single discipline
//! serves both the persistent operations (which clone the handle first,
//! so every touched node is copied) and the transient editor (which owns
//! its spine after the first pass, so repeated edits are in-place).

use std::borrow::Borrow;
use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use arrayvec::ArrayVec;
use smallvec::{SmallVec, smallvec};

use super::ReferenceCounter;
use super::merge::MergePolicy;

// =============================================================================
// Constants
// =============================================================================

/// Branching factor (2^5 = 32)
const BRANCHING_FACTOR: usize = 32;

/// Bits per level in the trie
const BITS_PER_LEVEL: u32 = 5;

/// Bit mask for extracting an index within a node
const MASK: u32 = (BRANCHING_FACTOR - 1) as u32;

/// Deepest shift at which two distinct hashes can still diverge
const MAX_SHIFT: u32 = 30;

/// Maximum frame depth of any traversal: seven bitmap/array levels plus
/// one collision chain hanging off the deepest level.
const MAX_DEPTH: usize = 8;

/// An array node demotes back to a bitmap node below this occupancy.
///
/// Promotion happens only when all 32 slots fill, so the gap between the
/// two thresholds keeps a node from flapping between representations
/// under alternating insert/remove traffic.
const ARRAY_DEMOTION_THRESHOLD: usize = 16;

// =============================================================================
// Hash computation
// =============================================================================

/// Computes the 32-bit hash of a key using `DefaultHasher`.
fn compute_hash<K: Hash + ?Sized>(key: &K) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    // The trie consumes 32 bits, five at a time.
    hasher.finish() as u32
}

/// Extracts the child index for a given level from a hash.
#[inline]
const fn hash_index(hash: u32, shift: u32) -> usize {
    ((hash >> shift) & MASK) as usize
}

// =============================================================================
// Node Definition
// =============================================================================

/// A slot in a bitmap or array node: either an inline entry or a subtree.
#[derive(Clone)]
enum Child<K, V> {
    /// A key-value entry stored directly in the parent
    Entry { key: K, value: V },
    /// A shared sub-node
    Node(ReferenceCounter<Node<K, V>>),
}

/// Internal node structure for the HAMT.
#[derive(Clone)]
enum Node<K, V> {
    /// Sparse branch node: presence bitmap plus compacted children
    Bitmap {
        /// Bitmap indicating which of the 32 slots are occupied
        bitmap: u32,
        /// Children for the occupied slots, in slot order
        children: Vec<Child<K, V>>,
    },
    /// Dense branch node with one slot per 5-bit chunk value
    Array {
        /// Number of occupied slots
        occupied: usize,
        /// All 32 slots, occupied or not
        slots: Vec<Option<Child<K, V>>>,
    },
    /// Keys whose full 32-bit hashes are equal but whose keys are not
    Collision {
        hash: u32,
        entries: SmallVec<[(K, V); 2]>,
    },
}

impl<K, V> Node<K, V> {
    /// Creates an empty node (the root of an empty map).
    const fn empty() -> Self {
        Self::Bitmap {
            bitmap: 0,
            children: Vec::new(),
        }
    }

    /// Returns `true` if this node holds no children at all.
    ///
    /// Only the root may stay in this state; interior nodes are removed
    /// by their parent as soon as they empty out.
    fn is_exhausted(&self) -> bool {
        match self {
            Self::Bitmap { children, .. } => children.is_empty(),
            Self::Array { occupied, .. } => *occupied == 0,
            Self::Collision { entries, .. } => entries.is_empty(),
        }
    }

    /// Extracts the sole remaining entry, if this node has shrunk to one.
    ///
    /// A parent uses this to re-inline a child subtree as a plain entry:
    /// inline entries are position-independent, so lifting them one level
    /// is always safe (unlike lifting a whole node, whose slot depends on
    /// its depth). A one-entry collision chain degenerates the same way.
    fn take_sole_entry(&mut self) -> Option<(K, V)> {
        match self {
            Self::Bitmap { bitmap, children }
                if children.len() == 1 && matches!(children[0], Child::Entry { .. }) =>
            {
                *bitmap = 0;
                let Some(Child::Entry { key, value }) = children.pop() else {
                    unreachable!("bitmap child changed shape");
                };
                Some((key, value))
            }
            Self::Collision { entries, .. } if entries.len() == 1 => entries.pop(),
            _ => None,
        }
    }
}

impl<K: Clone + Hash + Eq, V: Clone> Node<K, V> {
    /// Builds the smallest subtree holding two entries with distinct
    /// hashes, starting at `shift`.
    fn pair(shift: u32, hash1: u32, key1: K, value1: V, hash2: u32, key2: K, value2: V) -> Self {
        debug_assert!(hash1 != hash2, "equal hashes must form a collision chain");
        debug_assert!(shift <= MAX_SHIFT, "trie deeper than the hash is wide");

        let index1 = hash_index(hash1, shift);
        let index2 = hash_index(hash2, shift);

        if index1 == index2 {
            // Same chunk at this level: push both another level down.
            let subnode = Self::pair(
                shift + BITS_PER_LEVEL,
                hash1,
                key1,
                value1,
                hash2,
                key2,
                value2,
            );
            Self::Bitmap {
                bitmap: 1 << index1,
                children: vec![Child::Node(ReferenceCounter::new(subnode))],
            }
        } else {
            let first = Child::Entry {
                key: key1,
                value: value1,
            };
            let second = Child::Entry {
                key: key2,
                value: value2,
            };
            let children = if index1 < index2 {
                vec![first, second]
            } else {
                vec![second, first]
            };
            Self::Bitmap {
                bitmap: (1 << index1) | (1 << index2),
                children,
            }
        }
    }

    /// Inserts into this node, editing in place.
    ///
    /// Returns the previous value if the key was already present. The
    /// caller owns this node uniquely (via `make_mut`), so in-place
    /// mutation here never leaks into another handle.
    fn insert(&mut self, hash: u32, shift: u32, key: K, value: V) -> Option<V> {
        match self {
            Self::Bitmap { bitmap, children } => {
                let index = hash_index(hash, shift);
                let bit = 1u32 << index;
                let position = (*bitmap & (bit - 1)).count_ones() as usize;

                if *bitmap & bit == 0 {
                    children.insert(position, Child::Entry { key, value });
                    *bitmap |= bit;
                    if *bitmap == u32::MAX {
                        // All 32 slots occupied: the bitmap indirection no
                        // longer pays off.
                        let slots = mem::take(children).into_iter().map(Some).collect();
                        *self = Self::Array {
                            occupied: BRANCHING_FACTOR,
                            slots,
                        };
                    }
                    None
                } else {
                    Child::insert(&mut children[position], hash, shift, key, value)
                }
            }
            Self::Array { occupied, slots } => {
                let index = hash_index(hash, shift);
                let slot = &mut slots[index];
                if let Some(child) = slot {
                    Child::insert(child, hash, shift, key, value)
                } else {
                    *slot = Some(Child::Entry { key, value });
                    *occupied += 1;
                    None
                }
            }
            Self::Collision {
                hash: collision_hash,
                entries,
            } => {
                if *collision_hash == hash {
                    for entry in entries.iter_mut() {
                        if entry.0 == key {
                            return Some(mem::replace(&mut entry.1, value));
                        }
                    }
                    entries.push((key, value));
                    None
                } else {
                    // A different hash reached this chain: push the chain
                    // one level down behind a fresh bitmap node, then
                    // insert into that.
                    let collision_index = hash_index(*collision_hash, shift);
                    let previous = mem::replace(
                        self,
                        Self::Bitmap {
                            bitmap: 1 << collision_index,
                            children: Vec::with_capacity(2),
                        },
                    );
                    if let Self::Bitmap { children, .. } = self {
                        children.push(Child::Node(ReferenceCounter::new(previous)));
                    }
                    self.insert(hash, shift, key, value)
                }
            }
        }
    }

    /// Removes from this node, editing in place.
    ///
    /// Returns the removed value, or `None` when the key is absent.
    /// Collapses emptied children upward and re-inlines sole surviving
    /// entries on the way back out.
    fn remove<Q>(&mut self, hash: u32, shift: u32, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            Self::Bitmap { bitmap, children } => {
                let index = hash_index(hash, shift);
                let bit = 1u32 << index;
                if *bitmap & bit == 0 {
                    return None;
                }
                let position = (*bitmap & (bit - 1)).count_ones() as usize;

                if let Child::Entry { key: entry_key, .. } = &children[position] {
                    if entry_key.borrow() != key {
                        return None;
                    }
                    *bitmap &= !bit;
                    let Child::Entry { value, .. } = children.remove(position) else {
                        unreachable!("bitmap child changed shape");
                    };
                    return Some(value);
                }

                let Child::Node(subnode) = &mut children[position] else {
                    unreachable!("bitmap child changed shape");
                };
                let removed =
                    ReferenceCounter::make_mut(subnode).remove(hash, shift + BITS_PER_LEVEL, key)?;
                let subnode = ReferenceCounter::make_mut(subnode);
                if subnode.is_exhausted() {
                    *bitmap &= !bit;
                    children.remove(position);
                } else if let Some((lifted_key, lifted_value)) = subnode.take_sole_entry() {
                    children[position] = Child::Entry {
                        key: lifted_key,
                        value: lifted_value,
                    };
                }
                Some(removed)
            }
            Self::Array { occupied, slots } => {
                let index = hash_index(hash, shift);
                let removed = if let Some(Child::Entry { key: entry_key, .. }) = &slots[index] {
                    if entry_key.borrow() != key {
                        return None;
                    }
                    let Some(Child::Entry { value, .. }) = slots[index].take() else {
                        unreachable!("array slot changed shape");
                    };
                    *occupied -= 1;
                    value
                } else if let Some(Child::Node(subnode)) = &mut slots[index] {
                    let value = ReferenceCounter::make_mut(subnode).remove(
                        hash,
                        shift + BITS_PER_LEVEL,
                        key,
                    )?;
                    let subnode = ReferenceCounter::make_mut(subnode);
                    if subnode.is_exhausted() {
                        slots[index] = None;
                        *occupied -= 1;
                    } else if let Some((lifted_key, lifted_value)) = subnode.take_sole_entry() {
                        slots[index] = Some(Child::Entry {
                            key: lifted_key,
                            value: lifted_value,
                        });
                    }
                    value
                } else {
                    return None;
                };

                if *occupied < ARRAY_DEMOTION_THRESHOLD {
                    // Sparse again: reclaim the bitmap representation.
                    let mut bitmap = 0u32;
                    let mut children = Vec::with_capacity(*occupied);
                    for (slot_index, slot) in mem::take(slots).into_iter().enumerate() {
                        if let Some(child) = slot {
                            bitmap |= 1 << slot_index;
                            children.push(child);
                        }
                    }
                    *self = Self::Bitmap { bitmap, children };
                }
                Some(removed)
            }
            Self::Collision {
                hash: collision_hash,
                entries,
            } => {
                if *collision_hash != hash {
                    return None;
                }
                let position = entries
                    .iter()
                    .position(|(entry_key, _)| entry_key.borrow() == key)?;
                let (_, value) = entries.remove(position);
                Some(value)
            }
        }
    }

    /// Looks up an entry by hash and key.
    fn get_key_value<'a, Q>(&'a self, hash: u32, shift: u32, key: &Q) -> Option<(&'a K, &'a V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            Self::Bitmap { bitmap, children } => {
                let index = hash_index(hash, shift);
                let bit = 1u32 << index;
                if *bitmap & bit == 0 {
                    return None;
                }
                let position = (*bitmap & (bit - 1)).count_ones() as usize;
                Child::get_key_value(&children[position], hash, shift, key)
            }
            Self::Array { slots, .. } => {
                let index = hash_index(hash, shift);
                slots[index]
                    .as_ref()
                    .and_then(|child| Child::get_key_value(child, hash, shift, key))
            }
            Self::Collision {
                hash: collision_hash,
                entries,
            } => {
                if *collision_hash != hash {
                    return None;
                }
                entries
                    .iter()
                    .find(|(entry_key, _)| entry_key.borrow() == key)
                    .map(|(entry_key, value)| (entry_key, value))
            }
        }
    }
}

impl<K: Clone + Hash + Eq, V: Clone> Child<K, V> {
    /// Inserts through a single occupied slot.
    fn insert(child: &mut Self, hash: u32, shift: u32, key: K, value: V) -> Option<V> {
        match child {
            Self::Entry {
                key: entry_key,
                value: entry_value,
            } => {
                if *entry_key == key {
                    return Some(mem::replace(entry_value, value));
                }
                // Two distinct keys in one slot: grow a subtree (or a
                // collision chain when the full hashes are equal).
                let entry_hash = compute_hash(entry_key);
                let subnode = if entry_hash == hash {
                    Node::Collision {
                        hash,
                        entries: smallvec![(entry_key.clone(), entry_value.clone()), (key, value)],
                    }
                } else {
                    Node::pair(
                        shift + BITS_PER_LEVEL,
                        entry_hash,
                        entry_key.clone(),
                        entry_value.clone(),
                        hash,
                        key,
                        value,
                    )
                };
                *child = Self::Node(ReferenceCounter::new(subnode));
                None
            }
            Self::Node(subnode) => {
                ReferenceCounter::make_mut(subnode).insert(hash, shift + BITS_PER_LEVEL, key, value)
            }
        }
    }

    /// Looks up through a single occupied slot.
    fn get_key_value<'a, Q>(
        child: &'a Self,
        hash: u32,
        shift: u32,
        key: &Q,
    ) -> Option<(&'a K, &'a V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match child {
            Self::Entry {
                key: entry_key,
                value,
            } => {
                if entry_key.borrow() == key {
                    Some((entry_key, value))
                } else {
                    None
                }
            }
            Self::Node(subnode) => subnode.get_key_value(hash, shift + BITS_PER_LEVEL, key),
        }
    }
}

// =============================================================================
// PersistentHashMap Definition
// =============================================================================

/// A persistent (immutable) hash map based on HAMT.
///
/// `PersistentHashMap` is an immutable data structure that uses structural
/// sharing to efficiently support functional programming patterns.
///
/// Values carry a `PartialEq` bound on the operations that promise
/// identity-preserving no-ops: inserting a value equal to the present one
/// returns a handle sharing the original root.
///
/// # Time Complexity
///
/// | Operation      | Complexity        |
/// |----------------|-------------------|
/// | `new`          | O(1)              |
/// | `get`          | O(log32 N)        |
/// | `insert`       | O(log32 N)        |
/// | `remove`       | O(log32 N)        |
/// | `contains_key` | O(log32 N)        |
/// | `len`          | O(1)              |
/// | `is_empty`     | O(1)              |
///
/// # Examples
///
/// ```rust
/// use trellis::persistent::PersistentHashMap;
///
/// let map = PersistentHashMap::singleton("key".to_string(), 42);
/// assert_eq!(map.get("key"), Some(&42));
/// ```
#[derive(Clone)]
pub struct PersistentHashMap<K, V> {
    /// Root node of the trie
    root: ReferenceCounter<Node<K, V>>,
    /// Number of entries
    length: usize,
}

impl<K, V> PersistentHashMap<K, V> {
    /// Creates a new empty map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: ReferenceCounter::new(Node::empty()),
            length: 0,
        }
    }

    /// Returns the number of entries in the map.
    ///
    /// # Complexity
    ///
    /// O(1)
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns `true` if both maps share one root node.
    ///
    /// Structural sharing makes this the cheap way to detect that an
    /// operation was a no-op: every identity-preserving operation
    /// (equal-value insert, absent-key remove, fully vetoed merge)
    /// returns a map for which `ptr_eq` with its input holds.
    ///
    /// `ptr_eq` implies equality of contents; the converse does not hold.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("a".to_string(), 1);
    /// let same = map.insert("a".to_string(), 1);
    /// let changed = map.insert("a".to_string(), 2);
    ///
    /// assert!(same.ptr_eq(&map));
    /// assert!(!changed.ptr_eq(&map));
    /// ```
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.root, &other.root)
    }

    /// Returns a lazy iterator over key-value pairs.
    ///
    /// Iteration order is unspecified but stable for a given map value.
    /// The walk is driven by an explicit stack of at most eight frames
    /// (the trie's maximum depth), not recursion.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    ///
    /// let sum: i32 = map.iter().map(|(_, value)| value).sum();
    /// assert_eq!(sum, 3);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentHashMapIterator<'_, K, V> {
        let mut stack = ArrayVec::new();
        stack.push(Frame::of(&self.root));
        PersistentHashMapIterator {
            stack,
            remaining: self.length,
        }
    }

    /// Returns an iterator over keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Returns a splittable traversal cursor over the map.
    ///
    /// A [`MapCursor`] walks the same entries as [`iter`](Self::iter) but
    /// can split off roughly half of its remaining subtrees as an
    /// independent cursor for parallel consumption.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<i32, i32> = (0..100).map(|i| (i, i)).collect();
    ///
    /// let mut cursor = map.cursor();
    /// let other = cursor.try_split().expect("enough work to split");
    ///
    /// let total = cursor.count() + other.count();
    /// assert_eq!(total, 100);
    /// ```
    #[must_use]
    pub fn cursor(&self) -> MapCursor<'_, K, V> {
        let mut pending = VecDeque::new();
        expand_front(&mut pending, &self.root);
        MapCursor {
            pending,
            remaining: Some(self.length),
            consumed: false,
        }
    }
}

impl<K: Clone + Hash + Eq, V: Clone> PersistentHashMap<K, V> {
    /// Returns a reference to the value corresponding to the key.
    ///
    /// The key may be any borrowed form of the map's key type, but `Hash`
    /// and `Eq` on the borrowed form must match those for the key type.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("hello".to_string(), 42);
    ///
    /// // Can use &str to look up String keys
    /// assert_eq!(map.get("hello"), Some(&42));
    /// assert_eq!(map.get("world"), None);
    /// ```
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Returns the stored key-value pair for the given key.
    #[must_use]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = compute_hash(key);
        self.root.get_key_value(hash, 0, key)
    }

    /// Returns `true` if the map contains a value for the specified key.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).is_some()
    }

    /// Removes a key from the map.
    ///
    /// Returns a new map without the key. If the key is absent, the
    /// result shares the original root (`ptr_eq` holds).
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    /// let removed = map.remove("a");
    ///
    /// assert_eq!(map.len(), 2);     // Original unchanged
    /// assert_eq!(removed.len(), 1); // New version
    /// assert_eq!(removed.get("a"), None);
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.contains_key(key) {
            return self.clone();
        }
        let hash = compute_hash(key);
        let mut root = self.root.clone();
        let removed = ReferenceCounter::make_mut(&mut root).remove(hash, 0, key);
        debug_assert!(removed.is_some(), "contains_key and remove disagree");
        Self {
            root,
            length: self.length - 1,
        }
    }

    /// Removes a key, consulting the policy's `on_delete` predicate.
    ///
    /// A veto (or an absent key) leaves the map unchanged and returns a
    /// handle sharing the original root.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::{KeepExistingPolicy, PersistentHashMap};
    ///
    /// let map = PersistentHashMap::new().insert("a".to_string(), 1);
    /// let kept = map.remove_with("a", &KeepExistingPolicy);
    ///
    /// assert!(kept.ptr_eq(&map));
    /// assert_eq!(kept.get("a"), Some(&1));
    /// ```
    #[must_use]
    pub fn remove_with<Q, P>(&self, key: &Q, policy: &P) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        P: MergePolicy<K, V> + ?Sized,
    {
        match self.get_key_value(key) {
            Some((existing_key, existing_value)) if policy.on_delete(existing_key, existing_value) => {
                self.remove(key)
            }
            _ => self.clone(),
        }
    }

    /// Produces a `std::collections::HashMap` snapshot of the map.
    ///
    /// The snapshot is independent of this map; later derivations of
    /// either do not affect the other.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("a".to_string(), 1);
    /// let plain = map.to_hash_map();
    /// assert_eq!(plain.get("a"), Some(&1));
    /// ```
    #[must_use]
    pub fn to_hash_map(&self) -> std::collections::HashMap<K, V> {
        self.iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Converts this persistent map into a transient editor.
    ///
    /// O(1): the root is shared until the editor's first write, which
    /// copies only the touched path.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let persistent = PersistentHashMap::new().insert("a".to_string(), 1);
    ///
    /// let mut transient = persistent.transient();
    /// transient.insert("b".to_string(), 2);
    /// transient.insert("c".to_string(), 3);
    ///
    /// let rebuilt = transient.persistent();
    /// assert_eq!(rebuilt.len(), 3);
    /// ```
    #[must_use]
    pub fn transient(self) -> TransientHashMap<K, V> {
        TransientHashMap {
            root: self.root,
            length: self.length,
            _marker: PhantomData,
        }
    }
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> PersistentHashMap<K, V> {
    /// Creates a map containing a single key-value pair.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::singleton("key".to_string(), 42);
    /// assert_eq!(map.len(), 1);
    /// ```
    #[inline]
    #[must_use]
    pub fn singleton(key: K, value: V) -> Self {
        Self::new().insert(key, value)
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map already maps the key to an equal value, the same map is
    /// returned (root-sharing no-op). Otherwise the value is replaced or
    /// added, copying only the path from the root to the affected slot.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map1 = PersistentHashMap::new().insert("key".to_string(), 1);
    /// let map2 = map1.insert("key".to_string(), 2);
    ///
    /// assert_eq!(map1.get("key"), Some(&1)); // Original unchanged
    /// assert_eq!(map2.get("key"), Some(&2)); // New version
    /// ```
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        let hash = compute_hash(&key);
        if let Some((_, existing)) = self.root.get_key_value(hash, 0, &key) {
            if *existing == value {
                return self.clone();
            }
        }
        let mut root = self.root.clone();
        let previous = ReferenceCounter::make_mut(&mut root).insert(hash, 0, key, value);
        Self {
            root,
            length: self.length + usize::from(previous.is_none()),
        }
    }

    /// Inserts every entry of `other` into this map, last-wins.
    ///
    /// Runs through one transient batch internally, so bulk application
    /// costs amortized O(1) allocation per entry. If no entry changes
    /// anything, the original map is returned unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let left = PersistentHashMap::new().insert("a".to_string(), 1);
    /// let right = PersistentHashMap::new()
    ///     .insert("a".to_string(), 10)
    ///     .insert("b".to_string(), 2);
    ///
    /// let combined = left.insert_all(&right);
    /// assert_eq!(combined.get("a"), Some(&10));
    /// assert_eq!(combined.get("b"), Some(&2));
    /// ```
    #[must_use]
    pub fn insert_all(&self, other: &Self) -> Self {
        let mut transient = self.clone().transient();
        let mut changed = false;
        for (key, value) in other {
            if transient.get(key) != Some(value) {
                transient.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if changed { transient.persistent() } else { self.clone() }
    }

    /// Merges one entry under the supplied policy.
    ///
    /// - Key absent: consult [`MergePolicy::on_insert`].
    /// - Key present with an unequal value: consult
    ///   [`MergePolicy::on_merge`].
    /// - Key present with an equal value: unconditional no-op.
    ///
    /// A veto or no-op returns a handle sharing the original root.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::{KeepExistingPolicy, PersistentHashMap};
    ///
    /// let map = PersistentHashMap::new().insert(1, 1);
    /// let vetoed = map.merge_with(1, 2, &KeepExistingPolicy);
    ///
    /// assert!(vetoed.ptr_eq(&map));
    /// assert_eq!(vetoed.get(&1), Some(&1));
    /// ```
    #[must_use]
    pub fn merge_with<P>(&self, key: K, value: V, policy: &P) -> Self
    where
        P: MergePolicy<K, V> + ?Sized,
    {
        match self.get_key_value(&key) {
            Some((_, existing)) if *existing == value => self.clone(),
            Some((existing_key, existing)) => {
                if policy.on_merge(existing_key, existing, &value) {
                    self.insert(key, value)
                } else {
                    self.clone()
                }
            }
            None => {
                if policy.on_insert(&key, &value) {
                    self.insert(key, value)
                } else {
                    self.clone()
                }
            }
        }
    }

    /// Merges every entry of `other` under the supplied policy.
    ///
    /// Applies the [`merge_with`](Self::merge_with) decision per entry of
    /// `other`, batched through one transient edit. If every change is
    /// vetoed (or no entry differs), the original map is returned
    /// unchanged, sharing its root.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::{PersistentHashMap, ReplacePolicy};
    ///
    /// let left = PersistentHashMap::new().insert(1, "one");
    /// let right = PersistentHashMap::new().insert(2, "two");
    ///
    /// let merged = left.merge_all(&right, &ReplacePolicy);
    /// assert_eq!(merged.len(), 2);
    /// ```
    #[must_use]
    pub fn merge_all<P>(&self, other: &Self, policy: &P) -> Self
    where
        P: MergePolicy<K, V> + ?Sized,
    {
        let mut transient = self.clone().transient();
        let mut changed = false;
        for (key, value) in other {
            let accepted = match transient.get_key_value(key) {
                Some((_, existing)) if existing == value => false,
                Some((existing_key, existing)) => policy.on_merge(existing_key, existing, value),
                None => policy.on_insert(key, value),
            };
            if accepted {
                transient.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if changed { transient.persistent() } else { self.clone() }
    }

    /// Updates the value for a key using a function.
    ///
    /// Returns `None` if the key doesn't exist.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("count".to_string(), 10);
    /// let updated = map.update("count", |value| value + 1);
    ///
    /// assert_eq!(updated.unwrap().get("count"), Some(&11));
    /// ```
    #[must_use]
    pub fn update<Q, F>(&self, key: &Q, function: F) -> Option<Self>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> V,
    {
        let (stored_key, value) = self.get_key_value(key)?;
        let new_value = function(value);
        Some(self.insert(stored_key.clone(), new_value))
    }

    /// Updates or removes a value for a key using an updater function.
    ///
    /// The updater receives `Some(&V)` if the key exists, or `None` if it
    /// doesn't. Returning `Some(V)` inserts or updates; returning `None`
    /// removes the key (if present).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("count".to_string(), 10);
    ///
    /// let incremented = map.update_with("count", |current| current.map(|value| value + 1));
    /// assert_eq!(incremented.get("count"), Some(&11));
    ///
    /// let removed = map.update_with("count", |_| None);
    /// assert_eq!(removed.get("count"), None);
    /// ```
    #[must_use]
    pub fn update_with<Q, F>(&self, key: &Q, updater: F) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let current = self.get_key_value(key);
        match (current, updater(current.map(|(_, value)| value))) {
            (Some((stored_key, _)), Some(value)) => self.insert(stored_key.clone(), value),
            (Some(_), None) => self.remove(key),
            (None, Some(value)) => self.insert(key.to_owned(), value),
            (None, None) => self.clone(),
        }
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// One level of the explicit traversal stack.
enum Frame<'a, K, V> {
    Children(std::slice::Iter<'a, Child<K, V>>),
    Slots(std::slice::Iter<'a, Option<Child<K, V>>>),
    Entries(std::slice::Iter<'a, (K, V)>),
}

impl<'a, K, V> Frame<'a, K, V> {
    fn of(node: &'a Node<K, V>) -> Self {
        match node {
            Node::Bitmap { children, .. } => Self::Children(children.iter()),
            Node::Array { slots, .. } => Self::Slots(slots.iter()),
            Node::Collision { entries, .. } => Self::Entries(entries.iter()),
        }
    }
}

/// One step of the traversal loop.
enum Step<'a, K, V> {
    Entry(&'a K, &'a V),
    Node(&'a Node<K, V>),
    Exhausted,
}

impl<'a, K, V> Step<'a, K, V> {
    fn of_child(child: &'a Child<K, V>) -> Self {
        match child {
            Child::Entry { key, value } => Self::Entry(key, value),
            Child::Node(subnode) => Self::Node(subnode),
        }
    }
}

/// A lazy iterator over key-value pairs of a [`PersistentHashMap`].
///
/// Holds an explicit stack of at most eight frames; the trie's depth is
/// bounded by the hash width, so the stack never reallocates.
pub struct PersistentHashMapIterator<'a, K, V> {
    stack: ArrayVec<Frame<'a, K, V>, MAX_DEPTH>,
    remaining: usize,
}

impl<'a, K, V> Iterator for PersistentHashMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = match self.stack.last_mut()? {
                Frame::Children(children) => {
                    children.next().map_or(Step::Exhausted, Step::of_child)
                }
                Frame::Slots(slots) => loop {
                    match slots.next() {
                        Some(Some(child)) => break Step::of_child(child),
                        Some(None) => {}
                        None => break Step::Exhausted,
                    }
                },
                Frame::Entries(entries) => entries
                    .next()
                    .map_or(Step::Exhausted, |(key, value)| Step::Entry(key, value)),
            };
            match step {
                Step::Entry(key, value) => {
                    self.remaining -= 1;
                    return Some((key, value));
                }
                Step::Node(node) => self.stack.push(Frame::of(node)),
                Step::Exhausted => {
                    self.stack.pop();
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for PersistentHashMapIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}

/// An owning iterator over key-value pairs of a [`PersistentHashMap`].
pub struct PersistentHashMapIntoIterator<K, V> {
    entries: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for PersistentHashMapIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> ExactSizeIterator for PersistentHashMapIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// Splittable Traversal Cursor
// =============================================================================

/// A pending unit of traversal work: a single entry or a whole subtree.
enum CursorStep<'a, K, V> {
    Entry(&'a K, &'a V),
    Branch(&'a Node<K, V>),
}

/// Expands a node's immediate contents to the front of the work queue,
/// preserving traversal order.
fn expand_front<'a, K, V>(pending: &mut VecDeque<CursorStep<'a, K, V>>, node: &'a Node<K, V>) {
    match node {
        Node::Bitmap { children, .. } => {
            for child in children.iter().rev() {
                pending.push_front(step_of_child(child));
            }
        }
        Node::Array { slots, .. } => {
            for child in slots.iter().rev().flatten() {
                pending.push_front(step_of_child(child));
            }
        }
        Node::Collision { entries, .. } => {
            for (key, value) in entries.iter().rev() {
                pending.push_front(CursorStep::Entry(key, value));
            }
        }
    }
}

fn step_of_child<'a, K, V>(child: &'a Child<K, V>) -> CursorStep<'a, K, V> {
    match child {
        Child::Entry { key, value } => CursorStep::Entry(key, value),
        Child::Node(subnode) => CursorStep::Branch(subnode),
    }
}

/// A splittable traversal cursor over a [`PersistentHashMap`].
///
/// Behaves as a lazy iterator over `(&K, &V)`, and additionally supports
/// [`try_split`](Self::try_split), which detaches a disjoint prefix of the
/// remaining entries as an independent cursor. Together the two cursors
/// visit exactly the elements the original would have, with no omission
/// or duplication, so the halves can be consumed on different threads of
/// a fork-join traversal.
///
/// # Examples
///
/// ```rust
/// use trellis::persistent::PersistentHashMap;
///
/// let map: PersistentHashMap<i32, i32> = (0..64).map(|i| (i, i * 10)).collect();
///
/// let mut right = map.cursor();
/// let left = right.try_split().expect("enough work to split");
///
/// let mut seen: Vec<i32> = left.chain(right).map(|(key, _)| *key).collect();
/// seen.sort_unstable();
/// assert_eq!(seen, (0..64).collect::<Vec<_>>());
/// ```
pub struct MapCursor<'a, K, V> {
    pending: VecDeque<CursorStep<'a, K, V>>,
    /// Exact remaining count, or `None` once a split made it unknowable.
    remaining: Option<usize>,
    consumed: bool,
}

impl<K, V> MapCursor<'_, K, V> {
    /// Splits off a disjoint prefix of the remaining work, if there is
    /// enough of it to be worth parallelizing.
    ///
    /// Returns `None` when fewer than two pending work items remain
    /// (including mid-leaf states where only part of one subtree is
    /// left). After a split, both cursors report an unknown size unless
    /// the cursor was fully expanded and unconsumed, in which case both
    /// sizes stay exact.
    pub fn try_split(&mut self) -> Option<Self> {
        if self.pending.len() < 2 {
            return None;
        }
        let back = self.pending.split_off(self.pending.len() / 2);
        let front = mem::replace(&mut self.pending, back);

        // Sizes survive a split only when every pending item is a single
        // entry and nothing was consumed yet; otherwise the distribution
        // across the halves is unknowable without walking the subtrees.
        let fully_expanded = !self.consumed
            && self.remaining.is_some()
            && front.iter().all(|step| matches!(step, CursorStep::Entry(..)))
            && self
                .pending
                .iter()
                .all(|step| matches!(step, CursorStep::Entry(..)));
        let front_remaining = fully_expanded.then_some(front.len());
        self.remaining = fully_expanded.then_some(self.pending.len());

        Some(Self {
            pending: front,
            remaining: front_remaining,
            consumed: false,
        })
    }
}

impl<'a, K, V> Iterator for MapCursor<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.pending.pop_front()? {
                CursorStep::Entry(key, value) => {
                    self.consumed = true;
                    if let Some(remaining) = &mut self.remaining {
                        *remaining -= 1;
                    }
                    return Some((key, value));
                }
                CursorStep::Branch(node) => expand_front(&mut self.pending, node),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.remaining
            .map_or((0, None), |remaining| (remaining, Some(remaining)))
    }
}

// =============================================================================
// TransientHashMap Definition
// =============================================================================

/// A transient (temporarily mutable) hash map for efficient batch updates.
///
/// A `TransientHashMap` edits the same trie a [`PersistentHashMap`] wraps,
/// but in place: nodes the editor owns uniquely are mutated directly,
/// nodes still shared with a persistent handle are cloned exactly once
/// and owned thereafter. Building a map of N entries this way costs
/// amortized O(1) allocations per entry instead of a fresh O(log N)
/// spine per insert.
///
/// # Thread Confinement
///
/// The editor is the only mutable state in this crate and is confined to
/// the thread that created it: `PhantomData<Rc<()>>` makes it `!Send` and
/// `!Sync` (statically asserted, also under the `arc` feature), so
/// publishing an open editor to another thread is a compile error, not a
/// runtime check. `Clone`/`Copy` are intentionally not implemented
/// (linear-type semantics: one live editor per edit session).
///
/// # Commit
///
/// [`persistent`](Self::persistent) consumes the editor and freezes its
/// contents into an immutable map in O(1). Because commit takes the
/// editor by value, mutating after commit is also a compile error, and a
/// committed snapshot can never be retroactively changed by later edits.
///
/// # Examples
///
/// ```rust
/// use trellis::persistent::{PersistentHashMap, TransientHashMap};
///
/// let mut transient = TransientHashMap::new();
/// for index in 0..100 {
///     transient.insert(index, index * 2);
/// }
///
/// let persistent = transient.persistent();
/// assert_eq!(persistent.len(), 100);
/// assert_eq!(persistent.get(&21), Some(&42));
/// ```
pub struct TransientHashMap<K, V> {
    root: ReferenceCounter<Node<K, V>>,
    length: usize,
    /// Marker to ensure `!Send` and `!Sync`.
    _marker: PhantomData<Rc<()>>,
}

// Transient editors must stay confined to their creating thread.
static_assertions::assert_not_impl_any!(TransientHashMap<i32, i32>: Send, Sync);
static_assertions::assert_not_impl_any!(TransientHashMap<String, String>: Send, Sync);

// Arc feature verification: even with Arc nodes, the editor is confined.
#[cfg(feature = "arc")]
mod arc_send_sync_verification_hashmap {
    use super::TransientHashMap;
    use std::sync::Arc;

    static_assertions::assert_not_impl_any!(TransientHashMap<Arc<i32>, Arc<i32>>: Send, Sync);
}

impl<K, V> TransientHashMap<K, V> {
    /// Returns the number of entries in the map.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl<K: Clone + Hash + Eq, V: Clone> TransientHashMap<K, V> {
    /// Creates a new empty transient map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::TransientHashMap;
    ///
    /// let transient: TransientHashMap<String, i32> = TransientHashMap::new();
    /// assert!(transient.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: ReferenceCounter::new(Node::empty()),
            length: 0,
            _marker: PhantomData,
        }
    }

    /// Returns a reference to the value corresponding to the key.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Returns the stored key-value pair for the given key.
    #[must_use]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = compute_hash(key);
        self.root.get_key_value(hash, 0, key)
    }

    /// Returns `true` if the map contains a value for the specified key.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).is_some()
    }

    /// Inserts a key-value pair, returning the previous value if any.
    ///
    /// # Complexity
    ///
    /// O(log32 N), amortized O(1) allocations per insert within one
    /// edit session.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::TransientHashMap;
    ///
    /// let mut transient = TransientHashMap::new();
    /// assert_eq!(transient.insert("a".to_string(), 1), None);
    /// assert_eq!(transient.insert("a".to_string(), 2), Some(1));
    /// assert_eq!(transient.len(), 1);
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = compute_hash(&key);
        let previous = ReferenceCounter::make_mut(&mut self.root).insert(hash, 0, key, value);
        if previous.is_none() {
            self.length += 1;
        }
        previous
    }

    /// Removes a key, returning the removed value if it was present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::TransientHashMap;
    ///
    /// let mut transient = TransientHashMap::new();
    /// transient.insert("a".to_string(), 1);
    ///
    /// assert_eq!(transient.remove("a"), Some(1));
    /// assert_eq!(transient.remove("a"), None);
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        // Probe first so an absent key does not clone the spine.
        if !self.contains_key(key) {
            return None;
        }
        let hash = compute_hash(key);
        let removed = ReferenceCounter::make_mut(&mut self.root).remove(hash, 0, key);
        if removed.is_some() {
            self.length -= 1;
        }
        removed
    }

    /// Extends the map with entries from an iterator, last-wins.
    pub fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }

    /// Freezes this editor into a persistent map.
    ///
    /// O(1): only moves fields. Consuming the editor ends the edit
    /// session; every node it owned becomes permanently immutable and
    /// safe to share from any number of persistent handles.
    #[must_use]
    pub fn persistent(self) -> PersistentHashMap<K, V> {
        PersistentHashMap {
            root: self.root,
            length: self.length,
        }
    }
}

impl<K: Clone + Hash + Eq, V: Clone> Default for TransientHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Hash + Eq, V: Clone> FromIterator<(K, V)> for TransientHashMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut transient = Self::new();
        transient.extend(iter);
        transient
    }
}

impl<K: Clone + Hash + Eq, V: Clone> Extend<(K, V)> for TransientHashMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        Self::extend(self, iter);
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V> Default for PersistentHashMap<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Hash + Eq, V: Clone> FromIterator<(K, V)> for PersistentHashMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter().collect::<TransientHashMap<K, V>>().persistent()
    }
}

impl<K: Clone + Hash + Eq, V: Clone, const N: usize> From<[(K, V); N]> for PersistentHashMap<K, V> {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<K: Clone, V: Clone> IntoIterator for PersistentHashMap<K, V> {
    type Item = (K, V);
    type IntoIter = PersistentHashMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let entries: Vec<(K, V)> = self
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        PersistentHashMapIntoIterator {
            entries: entries.into_iter(),
        }
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentHashMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentHashMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> PartialEq for PersistentHashMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.length != other.length {
            return false;
        }
        if self.ptr_eq(other) {
            return true;
        }
        self.iter()
            .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl<K: Clone + Hash + Eq, V: Clone + Eq> Eq for PersistentHashMap<K, V> {}

impl<K: Clone + Hash + Eq + fmt::Debug, V: Clone + fmt::Debug> fmt::Debug
    for PersistentHashMap<K, V>
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K: fmt::Display, V: fmt::Display> fmt::Display for PersistentHashMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{key}: {value}")?;
        }
        write!(formatter, "}}")
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for PersistentHashMap<K, V>
where
    K: serde::Serialize + Clone + Hash + Eq,
    V: serde::Serialize + Clone,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentHashMapVisitor<K, V> {
    marker: PhantomData<(K, V)>,
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for PersistentHashMapVisitor<K, V>
where
    K: serde::Deserialize<'de> + Clone + Hash + Eq,
    V: serde::Deserialize<'de> + Clone,
{
    type Value = PersistentHashMap<K, V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut transient = TransientHashMap::new();
        while let Some((key, value)) = access.next_entry()? {
            transient.insert(key, value);
        }
        Ok(transient.persistent())
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for PersistentHashMap<K, V>
where
    K: serde::Deserialize<'de> + Clone + Hash + Eq,
    V: serde::Deserialize<'de> + Clone,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PersistentHashMapVisitor {
            marker: PhantomData,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// A key whose hash is chosen by the test, independent of identity.
    ///
    /// Two `HashKey`s with the same `hash` but different `id` collide in
    /// the trie without being equal.
    #[derive(Clone, Debug, PartialEq, Eq)]
    struct HashKey {
        hash: u32,
        id: u32,
    }

    impl HashKey {
        const fn new(hash: u32, id: u32) -> Self {
            Self { hash, id }
        }
    }

    impl Hash for HashKey {
        fn hash<H: Hasher>(&self, state: &mut H) {
            // Only the chosen hash feeds the hasher, so equal `hash`
            // fields produce identical trie paths.
            self.hash.hash(state);
        }
    }

    #[rstest]
    fn test_new_creates_empty() {
        let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
    }

    #[rstest]
    fn test_insert_and_get() {
        let map = PersistentHashMap::new()
            .insert("one".to_string(), 1)
            .insert("two".to_string(), 2);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("one"), Some(&1));
        assert_eq!(map.get("two"), Some(&2));
        assert_eq!(map.get("three"), None);
    }

    #[rstest]
    fn test_insert_equal_value_is_identity() {
        let map = PersistentHashMap::new().insert("key".to_string(), 1);
        let same = map.insert("key".to_string(), 1);

        assert!(same.ptr_eq(&map));
        assert_eq!(same.len(), 1);
    }

    #[rstest]
    fn test_remove_absent_is_identity() {
        let map = PersistentHashMap::new().insert("key".to_string(), 1);
        let same = map.remove("missing");

        assert!(same.ptr_eq(&map));
    }

    #[rstest]
    fn test_collision_chain_insert_get_remove() {
        let first = HashKey::new(1, 1);
        let second = HashKey::new(1, 2);
        let third = HashKey::new(1, 3);

        let map = PersistentHashMap::new()
            .insert(first.clone(), 10)
            .insert(second.clone(), 20)
            .insert(third.clone(), 30);

        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&first), Some(&10));
        assert_eq!(map.get(&second), Some(&20));
        assert_eq!(map.get(&third), Some(&30));

        let removed = map.remove(&second);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed.get(&first), Some(&10));
        assert_eq!(removed.get(&second), None);
        assert_eq!(removed.get(&third), Some(&30));
        // Original chain untouched
        assert_eq!(map.get(&second), Some(&20));
    }

    #[rstest]
    fn test_collision_chain_degenerates_to_entry() {
        let first = HashKey::new(7, 1);
        let second = HashKey::new(7, 2);

        let map = PersistentHashMap::new()
            .insert(first.clone(), first.clone())
            .insert(second.clone(), second.clone());
        let removed = map.remove(&first);

        assert_eq!(removed.get(&second), Some(&second));
        assert_eq!(removed.get(&first), None);
        assert_eq!(removed.len(), 1);
    }

    #[rstest]
    fn test_colliding_key_does_not_shadow_sibling() {
        // Same 5-bit chunk at the root, different full hashes.
        let low = HashKey::new(5, 1);
        let high = HashKey::new(5 | (1 << 5), 2);

        let map = PersistentHashMap::new()
            .insert(low.clone(), 1)
            .insert(high.clone(), 2);

        assert_eq!(map.get(&low), Some(&1));
        assert_eq!(map.get(&high), Some(&2));

        let removed = map.remove(&low);
        assert_eq!(removed.get(&high), Some(&2));
        assert_eq!(removed.len(), 1);
    }

    #[rstest]
    fn test_array_node_promotion_and_demotion() {
        // A thousand keys saturate the root level's 32 slots, and the
        // removal churn afterwards drives occupancy back under the
        // demotion threshold.
        let full: PersistentHashMap<u32, u32> = (0..1024).map(|key| (key, key)).collect();
        assert_eq!(full.len(), 1024);
        for key in 0..1024 {
            assert_eq!(full.get(&key), Some(&key));
        }

        let mut shrunk = full.clone();
        for key in 16..1024 {
            shrunk = shrunk.remove(&key);
        }
        assert_eq!(shrunk.len(), 16);
        for key in 0..16 {
            assert_eq!(shrunk.get(&key), Some(&key));
        }
        for key in 16..32 {
            assert_eq!(shrunk.get(&key), None);
        }
        // The fully populated original is unaffected.
        assert_eq!(full.len(), 1024);
        assert_eq!(full.get(&999), Some(&999));
    }

    #[rstest]
    fn test_transient_batch_matches_persistent_inserts() {
        let mut transient = TransientHashMap::new();
        for index in 0..500 {
            transient.insert(index, index * 3);
        }
        let batched = transient.persistent();

        let mut one_by_one = PersistentHashMap::new();
        for index in 0..500 {
            one_by_one = one_by_one.insert(index, index * 3);
        }

        assert_eq!(batched, one_by_one);
    }

    #[rstest]
    fn test_transient_does_not_disturb_origin() {
        let origin: PersistentHashMap<i32, i32> = (0..100).map(|index| (index, index)).collect();

        let mut transient = origin.clone().transient();
        for index in 0..100 {
            transient.insert(index, index + 1000);
        }
        transient.remove(&0);
        let edited = transient.persistent();

        assert_eq!(origin.len(), 100);
        for index in 0..100 {
            assert_eq!(origin.get(&index), Some(&index));
        }
        assert_eq!(edited.len(), 99);
        assert_eq!(edited.get(&1), Some(&1001));
        assert_eq!(edited.get(&0), None);
    }

    #[rstest]
    fn test_iterator_visits_every_entry_once() {
        let map: PersistentHashMap<u32, u32> = (0..300).map(|key| (key, key)).collect();

        let mut seen: Vec<u32> = map.iter().map(|(key, _)| *key).collect();
        assert_eq!(map.iter().len(), 300);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 300);
    }

    #[rstest]
    fn test_cursor_split_partitions_entries() {
        let map: PersistentHashMap<u32, u32> = (0..200).map(|key| (key, key)).collect();

        let mut right = map.cursor();
        let left = right.try_split().expect("map is large enough to split");

        let mut seen: Vec<u32> = left.map(|(key, _)| *key).collect();
        seen.extend(right.map(|(key, _)| *key));
        seen.sort_unstable();
        assert_eq!(seen, (0..200).collect::<Vec<_>>());
    }

    #[rstest]
    fn test_cursor_split_declines_tiny_work() {
        let map = PersistentHashMap::new().insert(1, 1);
        let mut cursor = map.cursor();
        assert!(cursor.try_split().is_none());
        assert_eq!(cursor.next(), Some((&1, &1)));
        assert_eq!(cursor.next(), None);
    }

    #[rstest]
    fn test_merge_with_veto_returns_same_instance() {
        struct VetoAll;
        impl<K, V> MergePolicy<K, V> for VetoAll {
            fn on_insert(&self, _key: &K, _incoming: &V) -> bool {
                false
            }
            fn on_merge(&self, _key: &K, _existing: &V, _incoming: &V) -> bool {
                false
            }
        }

        let map = PersistentHashMap::new().insert(1, 1);
        let merged = map.merge_with(1, 2, &VetoAll);

        assert!(merged.ptr_eq(&map));
        assert_eq!(merged.get(&1), Some(&1));
    }

    #[rstest]
    fn test_update_with_inserts_and_removes() {
        let map: PersistentHashMap<String, i32> = PersistentHashMap::new();

        let inserted = map.update_with("fresh", |current| {
            assert!(current.is_none());
            Some(7)
        });
        assert_eq!(inserted.get("fresh"), Some(&7));

        let removed = inserted.update_with("fresh", |_| None);
        assert_eq!(removed.get("fresh"), None);
    }

    #[rstest]
    fn test_display_formats_entries() {
        let map = PersistentHashMap::new().insert(1, 10);
        assert_eq!(format!("{map}"), "{1: 10}");
    }
}
