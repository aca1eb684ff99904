//! Persistent (immutable) ordered map based on a red-black tree.
//!
//! This module provides [`PersistentTreeMap`], an immutable map whose
//! entries are kept in ascending key order, and [`TransientTreeMap`],
//! its temporarily mutable batch editor.
//!
//! # Overview
//!
//! The tree is a classic red-black tree with path copying: every
//! operation rebuilds only the root-to-target search path and shares all
//! untouched subtrees with the original map. Insertion rebalances with
//! the Okasaki cases; deletion repairs the black-height deficit with the
//! standard sibling cases, propagating the deficit upward until a
//! recoloring or restructuring absorbs it.
//!
//! - O(log N) get, insert, remove
//! - O(1) len and `is_empty`
//! - O(N) ascending iteration, lazy
//!
//! As with the hash map, provable no-ops (equal-value insert, absent-key
//! remove, vetoed merge) return a handle sharing the original root,
//! observable through [`ptr_eq`](PersistentTreeMap::ptr_eq).
//!
//! # Examples
//!
//! ```rust
//! use trellis::persistent::PersistentTreeMap;
//!
//! let map = PersistentTreeMap::new()
//!     .insert(3, "three")
//!     .insert(1, "one")
//!     .insert(2, "two");
//!
//! // Entries are always visited in key order
//! let keys: Vec<&i32> = map.keys().collect();
//! assert_eq!(keys, vec![&1, &2, &3]);
//! ```

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Bound, RangeBounds};
use std::rc::Rc;

use super::ReferenceCounter;
use super::merge::MergePolicy;

// =============================================================================
// Node Definition
// =============================================================================

/// Node color for red-black tree balancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

type Link<K, V> = Option<ReferenceCounter<Node<K, V>>>;

/// Internal node of the red-black tree.
#[derive(Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    color: Color,
    left: Link<K, V>,
    right: Link<K, V>,
}

impl<K, V> Node<K, V> {
    /// Creates a new red leaf node. Fresh insertions are always red so
    /// they can only violate the red-red rule, never the black-height
    /// rule.
    const fn new_red(key: K, value: V) -> Self {
        Self {
            key,
            value,
            color: Color::Red,
            left: None,
            right: None,
        }
    }

    fn is_red(link: &Link<K, V>) -> bool {
        link.as_ref().is_some_and(|node| node.color == Color::Red)
    }
}

impl<K: Clone + Ord, V: Clone> Node<K, V> {
    /// Forces the subtree root black. The root of the whole tree is kept
    /// black after every operation.
    fn blacken(link: &mut Link<K, V>) {
        if let Some(node_ref) = link.as_mut() {
            if node_ref.color == Color::Red {
                ReferenceCounter::make_mut(node_ref).color = Color::Black;
            }
        }
    }

    /// Right rotation: the left child becomes the subtree root. Colors
    /// travel with their node contents; callers recolor afterwards.
    fn rotate_right(node: &mut Self) {
        let Some(mut pivot_ref) = node.left.take() else {
            return;
        };
        let pivot = ReferenceCounter::make_mut(&mut pivot_ref);
        mem::swap(node, pivot);
        // `node` now holds the pivot's contents; `pivot` the old root's.
        pivot.left = node.right.take();
        node.right = Some(pivot_ref);
    }

    /// Left rotation: the right child becomes the subtree root.
    fn rotate_left(node: &mut Self) {
        let Some(mut pivot_ref) = node.right.take() else {
            return;
        };
        let pivot = ReferenceCounter::make_mut(&mut pivot_ref);
        mem::swap(node, pivot);
        pivot.right = node.left.take();
        node.left = Some(pivot_ref);
    }

    /// Okasaki insert balancing: a black node with a red child and red
    /// grandchild restructures into a red parent with two black children.
    fn balance(node: &mut Self) {
        if node.color != Color::Black {
            return;
        }
        if Self::is_red(&node.left) {
            let left_left = node.left.as_ref().is_some_and(|left| Self::is_red(&left.left));
            let left_right = node
                .left
                .as_ref()
                .is_some_and(|left| Self::is_red(&left.right));
            if left_left || left_right {
                if left_right && !left_left {
                    if let Some(left_ref) = node.left.as_mut() {
                        Self::rotate_left(ReferenceCounter::make_mut(left_ref));
                    }
                }
                Self::rotate_right(node);
                if let Some(left_ref) = node.left.as_mut() {
                    ReferenceCounter::make_mut(left_ref).color = Color::Black;
                }
            }
        } else if Self::is_red(&node.right) {
            let right_right = node
                .right
                .as_ref()
                .is_some_and(|right| Self::is_red(&right.right));
            let right_left = node
                .right
                .as_ref()
                .is_some_and(|right| Self::is_red(&right.left));
            if right_right || right_left {
                if right_left && !right_right {
                    if let Some(right_ref) = node.right.as_mut() {
                        Self::rotate_right(ReferenceCounter::make_mut(right_ref));
                    }
                }
                Self::rotate_left(node);
                if let Some(right_ref) = node.right.as_mut() {
                    ReferenceCounter::make_mut(right_ref).color = Color::Black;
                }
            }
        }
    }

    /// Inserts into the subtree, editing in place.
    ///
    /// Returns the previous value if the key was already present. Shared
    /// nodes along the search path are cloned once by `make_mut`; nodes
    /// already owned by the editing handle are mutated directly.
    fn insert(link: &mut Link<K, V>, key: K, value: V) -> Option<V> {
        let Some(node_ref) = link else {
            *link = Some(ReferenceCounter::new(Self::new_red(key, value)));
            return None;
        };
        let node = ReferenceCounter::make_mut(node_ref);
        let previous = match key.cmp(&node.key) {
            Ordering::Less => Self::insert(&mut node.left, key, value),
            Ordering::Greater => Self::insert(&mut node.right, key, value),
            Ordering::Equal => return Some(mem::replace(&mut node.value, value)),
        };
        if previous.is_none() {
            Self::balance(node);
        }
        previous
    }

    /// Removes from the subtree, editing in place.
    ///
    /// Returns the removed value plus a flag telling the caller whether
    /// this subtree's black height shrank by one and still needs repair
    /// at the parent.
    fn remove<Q>(link: &mut Link<K, V>, key: &Q) -> (Option<V>, bool)
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let Some(node_ref) = link else {
            return (None, false);
        };
        let node = ReferenceCounter::make_mut(node_ref);
        match key.cmp(node.key.borrow()) {
            Ordering::Less => {
                let (removed, shrunk) = Self::remove(&mut node.left, key);
                let still_short = removed.is_some() && shrunk && Self::balance_left_short(node);
                (removed, still_short)
            }
            Ordering::Greater => {
                let (removed, shrunk) = Self::remove(&mut node.right, key);
                let still_short = removed.is_some() && shrunk && Self::balance_right_short(node);
                (removed, still_short)
            }
            Ordering::Equal => {
                if node.left.is_some() && node.right.is_some() {
                    // Interior node: replace with the in-order successor,
                    // then repair the right spine the successor left.
                    let ((successor_key, successor_value), shrunk) =
                        Self::remove_min(&mut node.right);
                    node.key = successor_key;
                    let value = mem::replace(&mut node.value, successor_value);
                    let still_short = shrunk && Self::balance_right_short(node);
                    return (Some(value), still_short);
                }
                let was_black = node.color == Color::Black;
                let child = node.left.take().or_else(|| node.right.take());
                let Some(detached_ref) = link.take() else {
                    unreachable!("link emptied during removal");
                };
                let detached = ReferenceCounter::unwrap_or_clone(detached_ref);
                match child {
                    Some(mut child_ref) => {
                        // A node with exactly one child is black with a
                        // red child; blackening the child restores the
                        // black height outright.
                        ReferenceCounter::make_mut(&mut child_ref).color = Color::Black;
                        *link = Some(child_ref);
                        (Some(detached.value), false)
                    }
                    None => (Some(detached.value), was_black),
                }
            }
        }
    }

    /// Detaches the minimum entry of a non-empty subtree.
    fn remove_min(link: &mut Link<K, V>) -> ((K, V), bool) {
        let Some(node_ref) = link else {
            unreachable!("remove_min on empty subtree");
        };
        let node = ReferenceCounter::make_mut(node_ref);
        if node.left.is_some() {
            let (entry, shrunk) = Self::remove_min(&mut node.left);
            let still_short = shrunk && Self::balance_left_short(node);
            return (entry, still_short);
        }
        let was_black = node.color == Color::Black;
        let child = node.right.take();
        let Some(detached_ref) = link.take() else {
            unreachable!("link emptied during removal");
        };
        let detached = ReferenceCounter::unwrap_or_clone(detached_ref);
        let entry = (detached.key, detached.value);
        match child {
            Some(mut child_ref) => {
                ReferenceCounter::make_mut(&mut child_ref).color = Color::Black;
                *link = Some(child_ref);
                (entry, false)
            }
            None => (entry, was_black),
        }
    }

    /// Repairs a black-height deficit in the left subtree.
    ///
    /// Returns `true` when the deficit survives and the caller must keep
    /// repairing one level up. The sibling always exists: the short side
    /// still has black height at least one less than the other.
    fn balance_left_short(node: &mut Self) -> bool {
        if Self::is_red(&node.right) {
            // Red sibling: rotate it above the (black) parent, recolor,
            // and repair inside the now-red parent, where the deficit
            // terminates at a black-sibling case.
            Self::rotate_left(node);
            node.color = Color::Black;
            if let Some(left_ref) = node.left.as_mut() {
                let left = ReferenceCounter::make_mut(left_ref);
                left.color = Color::Red;
                let still_short = Self::balance_left_short(left);
                debug_assert!(!still_short, "deficit must resolve under a red parent");
            }
            return false;
        }

        let near_red = node.right.as_ref().is_some_and(|s| Self::is_red(&s.left));
        let far_red = node.right.as_ref().is_some_and(|s| Self::is_red(&s.right));

        if !near_red && !far_red {
            // All-black sibling: recolor it red, shortening the sibling
            // side to match. A red parent absorbs the deficit; a black
            // parent passes it up.
            if let Some(sibling_ref) = node.right.as_mut() {
                ReferenceCounter::make_mut(sibling_ref).color = Color::Red;
            }
            if node.color == Color::Red {
                node.color = Color::Black;
                return false;
            }
            return true;
        }

        if !far_red {
            // Near child red: restructure the sibling so its far child
            // is red, reducing to the final case.
            if let Some(sibling_ref) = node.right.as_mut() {
                let sibling = ReferenceCounter::make_mut(sibling_ref);
                Self::rotate_right(sibling);
                sibling.color = Color::Black;
                if let Some(inner_ref) = sibling.right.as_mut() {
                    ReferenceCounter::make_mut(inner_ref).color = Color::Red;
                }
            }
        }

        // Far child red: rotate the sibling above the parent; the new
        // root takes the old parent's color and both its children go
        // black, restoring the height on both sides.
        let parent_color = node.color;
        Self::rotate_left(node);
        node.color = parent_color;
        if let Some(left_ref) = node.left.as_mut() {
            ReferenceCounter::make_mut(left_ref).color = Color::Black;
        }
        if let Some(right_ref) = node.right.as_mut() {
            ReferenceCounter::make_mut(right_ref).color = Color::Black;
        }
        false
    }

    /// Mirror image of [`balance_left_short`](Self::balance_left_short)
    /// for a deficit in the right subtree.
    fn balance_right_short(node: &mut Self) -> bool {
        if Self::is_red(&node.left) {
            Self::rotate_right(node);
            node.color = Color::Black;
            if let Some(right_ref) = node.right.as_mut() {
                let right = ReferenceCounter::make_mut(right_ref);
                right.color = Color::Red;
                let still_short = Self::balance_right_short(right);
                debug_assert!(!still_short, "deficit must resolve under a red parent");
            }
            return false;
        }

        let near_red = node.left.as_ref().is_some_and(|s| Self::is_red(&s.right));
        let far_red = node.left.as_ref().is_some_and(|s| Self::is_red(&s.left));

        if !near_red && !far_red {
            if let Some(sibling_ref) = node.left.as_mut() {
                ReferenceCounter::make_mut(sibling_ref).color = Color::Red;
            }
            if node.color == Color::Red {
                node.color = Color::Black;
                return false;
            }
            return true;
        }

        if !far_red {
            if let Some(sibling_ref) = node.left.as_mut() {
                let sibling = ReferenceCounter::make_mut(sibling_ref);
                Self::rotate_left(sibling);
                sibling.color = Color::Black;
                if let Some(inner_ref) = sibling.left.as_mut() {
                    ReferenceCounter::make_mut(inner_ref).color = Color::Red;
                }
            }
        }

        let parent_color = node.color;
        Self::rotate_right(node);
        node.color = parent_color;
        if let Some(left_ref) = node.left.as_mut() {
            ReferenceCounter::make_mut(left_ref).color = Color::Black;
        }
        if let Some(right_ref) = node.right.as_mut() {
            ReferenceCounter::make_mut(right_ref).color = Color::Black;
        }
        false
    }
}

// =============================================================================
// PersistentTreeMap Definition
// =============================================================================

/// A persistent (immutable) ordered map based on a red-black tree.
///
/// Keys are kept in ascending `Ord` order; iteration, `min`/`max`, and
/// `range` all observe that order. Every operation copies only the
/// search path and shares the rest of the tree with the original map.
///
/// # Time Complexity
///
/// | Operation      | Complexity |
/// |----------------|------------|
/// | `get`          | O(log N)   |
/// | `insert`       | O(log N)   |
/// | `remove`       | O(log N)   |
/// | `min` / `max`  | O(log N)   |
/// | `len`          | O(1)       |
///
/// # Examples
///
/// ```rust
/// use trellis::persistent::PersistentTreeMap;
///
/// let map = PersistentTreeMap::new()
///     .insert(2, "two")
///     .insert(1, "one");
///
/// assert_eq!(map.min(), Some((&1, &"one")));
/// assert_eq!(map.max(), Some((&2, &"two")));
/// ```
#[derive(Clone)]
pub struct PersistentTreeMap<K, V> {
    root: Link<K, V>,
    length: usize,
}

impl<K, V> PersistentTreeMap<K, V> {
    /// Creates a new empty map.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: None,
            length: 0,
        }
    }

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

    /// Returns `true` if both maps share one root node (or are both
    /// empty). See [`PersistentHashMap::ptr_eq`] for the contract.
    ///
    /// [`PersistentHashMap::ptr_eq`]: super::PersistentHashMap::ptr_eq
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(left), Some(right)) => ReferenceCounter::ptr_eq(left, right),
            _ => false,
        }
    }

    /// Returns a lazy iterator over entries in ascending key order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentTreeMap;
    ///
    /// let map = PersistentTreeMap::new().insert(2, 20).insert(1, 10);
    /// let entries: Vec<(&i32, &i32)> = map.iter().collect();
    /// assert_eq!(entries, vec![(&1, &10), (&2, &20)]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentTreeMapIterator<'_, K, V> {
        let mut iterator = PersistentTreeMapIterator {
            stack: Vec::new(),
            remaining: self.length,
        };
        iterator.descend_left(&self.root);
        iterator
    }

    /// Returns an iterator over keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over values, in ascending key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Returns the entry with the smallest key.
    #[must_use]
    pub fn min(&self) -> Option<(&K, &V)> {
        let mut current = self.root.as_deref()?;
        while let Some(left) = current.left.as_deref() {
            current = left;
        }
        Some((&current.key, &current.value))
    }

    /// Returns the entry with the largest key.
    #[must_use]
    pub fn max(&self) -> Option<(&K, &V)> {
        let mut current = self.root.as_deref()?;
        while let Some(right) = current.right.as_deref() {
            current = right;
        }
        Some((&current.key, &current.value))
    }

    /// Returns a splittable traversal cursor over the map.
    ///
    /// A [`TreeCursor`] yields entries in ascending key order;
    /// `try_split` detaches a prefix cursor whose keys all precede the
    /// keys left in the remainder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentTreeMap;
    ///
    /// let map: PersistentTreeMap<i32, i32> = (0..50).map(|i| (i, i)).collect();
    ///
    /// let mut tail = map.cursor();
    /// let head = tail.try_split().expect("enough work to split");
    ///
    /// let keys: Vec<i32> = head.chain(tail).map(|(key, _)| *key).collect();
    /// assert_eq!(keys, (0..50).collect::<Vec<_>>());
    /// ```
    #[must_use]
    pub fn cursor(&self) -> TreeCursor<'_, K, V> {
        let mut pending = VecDeque::new();
        if let Some(root) = self.root.as_deref() {
            expand_in_order(&mut pending, root);
        }
        TreeCursor {
            pending,
            remaining: Some(self.length),
            consumed: false,
        }
    }
}

impl<K: Clone + Ord, V: Clone> PersistentTreeMap<K, V> {
    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Complexity
    ///
    /// O(log N)
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Returns the stored key-value pair for the given key.
    #[must_use]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            match key.cmp(node.key.borrow()) {
                Ordering::Less => current = node.left.as_deref(),
                Ordering::Greater => current = node.right.as_deref(),
                Ordering::Equal => return Some((&node.key, &node.value)),
            }
        }
        None
    }

    /// Returns `true` if the map contains a value for the specified key.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get_key_value(key).is_some()
    }

    /// Removes a key from the map.
    ///
    /// If the key is absent, the result shares the original root.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentTreeMap;
    ///
    /// let map = PersistentTreeMap::new().insert(1, "one").insert(2, "two");
    /// let removed = map.remove(&1);
    ///
    /// assert_eq!(map.len(), 2);
    /// assert_eq!(removed.len(), 1);
    /// assert_eq!(removed.get(&1), None);
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if !self.contains_key(key) {
            return self.clone();
        }
        let mut root = self.root.clone();
        let (removed, _) = Node::remove(&mut root, key);
        debug_assert!(removed.is_some(), "contains_key and remove disagree");
        Node::blacken(&mut root);
        Self {
            root,
            length: self.length - 1,
        }
    }

    /// Removes a key, consulting the policy's `on_delete` predicate.
    ///
    /// A veto (or an absent key) returns a root-sharing handle.
    #[must_use]
    pub fn remove_with<Q, P>(&self, key: &Q, policy: &P) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        P: MergePolicy<K, V> + ?Sized,
    {
        match self.get_key_value(key) {
            Some((existing_key, existing_value))
                if policy.on_delete(existing_key, existing_value) =>
            {
                self.remove(key)
            }
            _ => self.clone(),
        }
    }

    /// Returns a lazy iterator over the entries whose keys fall within
    /// the given range, in ascending key order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentTreeMap;
    ///
    /// let map: PersistentTreeMap<i32, i32> = (0..10).map(|i| (i, i * 10)).collect();
    ///
    /// let window: Vec<i32> = map.range(&3..&6).map(|(key, _)| *key).collect();
    /// assert_eq!(window, vec![3, 4, 5]);
    /// ```
    pub fn range<'a, Q, R>(&'a self, range: R) -> PersistentTreeMapRangeIterator<'a, 'a, K, V, Q>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        R: RangeBounds<&'a Q>,
    {
        let start = match range.start_bound() {
            Bound::Included(&bound) => Bound::Included(bound),
            Bound::Excluded(&bound) => Bound::Excluded(bound),
            Bound::Unbounded => Bound::Unbounded,
        };
        let end = match range.end_bound() {
            Bound::Included(&bound) => Bound::Included(bound),
            Bound::Excluded(&bound) => Bound::Excluded(bound),
            Bound::Unbounded => Bound::Unbounded,
        };
        let mut iterator = PersistentTreeMapRangeIterator {
            stack: Vec::new(),
            end,
        };
        iterator.descend_from(&self.root, start);
        iterator
    }

    /// Produces a `std::collections::BTreeMap` snapshot of the map.
    #[must_use]
    pub fn to_btree_map(&self) -> std::collections::BTreeMap<K, V> {
        self.iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Converts this persistent map into a transient editor in O(1).
    #[must_use]
    pub fn transient(self) -> TransientTreeMap<K, V> {
        TransientTreeMap {
            root: self.root,
            length: self.length,
            _marker: PhantomData,
        }
    }
}

impl<K: Clone + Ord, V: Clone + PartialEq> PersistentTreeMap<K, V> {
    /// Creates a map containing a single key-value pair.
    #[inline]
    #[must_use]
    pub fn singleton(key: K, value: V) -> Self {
        Self::new().insert(key, value)
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map already maps the key to an equal value, the same map
    /// is returned (root-sharing no-op). Only the search path is copied.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentTreeMap;
    ///
    /// let map1 = PersistentTreeMap::new().insert("key", 1);
    /// let map2 = map1.insert("key", 2);
    ///
    /// assert_eq!(map1.get("key"), Some(&1));
    /// assert_eq!(map2.get("key"), Some(&2));
    /// ```
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        if let Some((_, existing)) = self.get_key_value(&key) {
            if *existing == value {
                return self.clone();
            }
        }
        let mut root = self.root.clone();
        let previous = Node::insert(&mut root, key, value);
        Node::blacken(&mut root);
        Self {
            root,
            length: self.length + usize::from(previous.is_none()),
        }
    }

    /// Inserts every entry of `other` into this map, last-wins.
    ///
    /// If no entry changes anything, the original map is returned
    /// unchanged.
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
        if changed {
            transient.persistent()
        } else {
            self.clone()
        }
    }

    /// Merges one entry under the supplied policy.
    ///
    /// Same decision table as [`PersistentHashMap::merge_with`]: absent
    /// key consults `on_insert`, conflicting value consults `on_merge`,
    /// equal value is an unconditional no-op.
    ///
    /// [`PersistentHashMap::merge_with`]: super::PersistentHashMap::merge_with
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
    /// If every change is vetoed (or no entry differs), the original map
    /// is returned unchanged, sharing its root.
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
        if changed {
            transient.persistent()
        } else {
            self.clone()
        }
    }

    /// Updates the value for a key using a function.
    ///
    /// Returns `None` if the key doesn't exist.
    #[must_use]
    pub fn update<Q, F>(&self, key: &Q, function: F) -> Option<Self>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnOnce(&V) -> V,
    {
        let (stored_key, value) = self.get_key_value(key)?;
        let new_value = function(value);
        Some(self.insert(stored_key.clone(), new_value))
    }

    /// Updates or removes a value for a key using an updater function.
    ///
    /// The updater receives `Some(&V)` if the key exists, or `None` if
    /// it doesn't. Returning `Some(V)` inserts or updates; returning
    /// `None` removes the key (if present).
    #[must_use]
    pub fn update_with<Q, F>(&self, key: &Q, updater: F) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ToOwned<Owned = K> + ?Sized,
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
// TransientTreeMap Definition
// =============================================================================

/// A transient (temporarily mutable) ordered map for batch updates.
///
/// Edits the same red-black tree a [`PersistentTreeMap`] wraps: nodes
/// the editor owns uniquely are rebalanced in place, shared nodes are
/// cloned once on first touch. Confinement follows the hash map editor:
/// `!Send`/`!Sync`, no `Clone`, consumed by
/// [`persistent`](Self::persistent). See
/// [`TransientHashMap`](super::TransientHashMap) for the full session
/// semantics.
///
/// # Examples
///
/// ```rust
/// use trellis::persistent::TransientTreeMap;
///
/// let mut transient = TransientTreeMap::new();
/// for key in (0..100).rev() {
///     transient.insert(key, key * 2);
/// }
///
/// let persistent = transient.persistent();
/// assert_eq!(persistent.len(), 100);
/// assert_eq!(persistent.min(), Some((&0, &0)));
/// ```
pub struct TransientTreeMap<K, V> {
    root: Link<K, V>,
    length: usize,
    /// Marker to ensure `!Send` and `!Sync`.
    _marker: PhantomData<Rc<()>>,
}

// Transient editors must stay confined to their creating thread.
static_assertions::assert_not_impl_any!(TransientTreeMap<i32, i32>: Send, Sync);
static_assertions::assert_not_impl_any!(TransientTreeMap<String, String>: Send, Sync);

impl<K, V> TransientTreeMap<K, V> {
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

impl<K: Clone + Ord, V: Clone> TransientTreeMap<K, V> {
    /// Creates a new empty transient map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: None,
            length: 0,
            _marker: PhantomData,
        }
    }

    /// Returns a reference to the value corresponding to the key.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Returns the stored key-value pair for the given key.
    #[must_use]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            match key.cmp(node.key.borrow()) {
                Ordering::Less => current = node.left.as_deref(),
                Ordering::Greater => current = node.right.as_deref(),
                Ordering::Equal => return Some((&node.key, &node.value)),
            }
        }
        None
    }

    /// Returns `true` if the map contains a value for the specified key.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get_key_value(key).is_some()
    }

    /// Inserts a key-value pair, returning the previous value if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = Node::insert(&mut self.root, key, value);
        Node::blacken(&mut self.root);
        if previous.is_none() {
            self.length += 1;
        }
        previous
    }

    /// Removes a key, returning the removed value if it was present.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        // Probe first so an absent key does not clone the search path.
        if !self.contains_key(key) {
            return None;
        }
        let (removed, _) = Node::remove(&mut self.root, key);
        Node::blacken(&mut self.root);
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

    /// Freezes this editor into a persistent map in O(1).
    #[must_use]
    pub fn persistent(self) -> PersistentTreeMap<K, V> {
        PersistentTreeMap {
            root: self.root,
            length: self.length,
        }
    }
}

impl<K: Clone + Ord, V: Clone> Default for TransientTreeMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Ord, V: Clone> FromIterator<(K, V)> for TransientTreeMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut transient = Self::new();
        transient.extend(iter);
        transient
    }
}

impl<K: Clone + Ord, V: Clone> Extend<(K, V)> for TransientTreeMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        Self::extend(self, iter);
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// A lazy in-order iterator over a [`PersistentTreeMap`].
pub struct PersistentTreeMapIterator<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
    remaining: usize,
}

impl<'a, K, V> PersistentTreeMapIterator<'a, K, V> {
    fn descend_left(&mut self, mut link: &'a Link<K, V>) {
        while let Some(node) = link.as_deref() {
            self.stack.push(node);
            link = &node.left;
        }
    }
}

impl<'a, K, V> Iterator for PersistentTreeMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.descend_left(&node.right);
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for PersistentTreeMapIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}

/// An owning in-order iterator over a [`PersistentTreeMap`].
pub struct PersistentTreeMapIntoIterator<K, V> {
    entries: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for PersistentTreeMapIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> ExactSizeIterator for PersistentTreeMapIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A lazy in-order iterator over a key range of a [`PersistentTreeMap`].
pub struct PersistentTreeMapRangeIterator<'a, 'q, K, V, Q: ?Sized> {
    stack: Vec<&'a Node<K, V>>,
    end: Bound<&'q Q>,
}

impl<'a, K, V, Q> PersistentTreeMapRangeIterator<'a, '_, K, V, Q>
where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
{
    /// Seeds the stack with the in-order spine of every node at or past
    /// the start bound.
    fn descend_from(&mut self, mut link: &'a Link<K, V>, start: Bound<&Q>) {
        while let Some(node) = link.as_deref() {
            let past_start = match start {
                Bound::Unbounded => true,
                Bound::Included(bound) => node.key.borrow() >= bound,
                Bound::Excluded(bound) => node.key.borrow() > bound,
            };
            if past_start {
                self.stack.push(node);
                link = &node.left;
            } else {
                link = &node.right;
            }
        }
    }

    fn descend_left(&mut self, mut link: &'a Link<K, V>) {
        while let Some(node) = link.as_deref() {
            self.stack.push(node);
            link = &node.left;
        }
    }
}

impl<'a, K, V, Q> Iterator for PersistentTreeMapRangeIterator<'a, '_, K, V, Q>
where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let before_end = match self.end {
            Bound::Unbounded => true,
            Bound::Included(bound) => node.key.borrow() <= bound,
            Bound::Excluded(bound) => node.key.borrow() < bound,
        };
        if !before_end {
            // In-order pops are ascending, so everything left is also
            // past the end bound.
            self.stack.clear();
            return None;
        }
        self.descend_left(&node.right);
        Some((&node.key, &node.value))
    }
}

// =============================================================================
// Splittable Traversal Cursor
// =============================================================================

/// A pending unit of traversal work: a single entry or a whole subtree.
enum TreeCursorStep<'a, K, V> {
    Entry(&'a K, &'a V),
    Branch(&'a Node<K, V>),
}

/// Expands one node to the front of the work queue in in-order position:
/// left subtree, own entry, right subtree.
fn expand_in_order<'a, K, V>(
    pending: &mut VecDeque<TreeCursorStep<'a, K, V>>,
    node: &'a Node<K, V>,
) {
    if let Some(right) = node.right.as_deref() {
        pending.push_front(TreeCursorStep::Branch(right));
    }
    pending.push_front(TreeCursorStep::Entry(&node.key, &node.value));
    if let Some(left) = node.left.as_deref() {
        pending.push_front(TreeCursorStep::Branch(left));
    }
}

/// A splittable in-order traversal cursor over a [`PersistentTreeMap`].
///
/// Same splitting contract as [`MapCursor`](super::MapCursor), with the
/// additional guarantee that every key yielded by a split-off prefix
/// cursor precedes every key left in the remainder.
pub struct TreeCursor<'a, K, V> {
    pending: VecDeque<TreeCursorStep<'a, K, V>>,
    /// Exact remaining count, or `None` once a split made it unknowable.
    remaining: Option<usize>,
    consumed: bool,
}

impl<K, V> TreeCursor<'_, K, V> {
    /// Splits off a disjoint prefix of the remaining work, if there is
    /// enough of it to be worth parallelizing.
    ///
    /// Returns `None` when fewer than two pending work items remain.
    pub fn try_split(&mut self) -> Option<Self> {
        if self.pending.len() < 2 {
            return None;
        }
        let back = self.pending.split_off(self.pending.len() / 2);
        let front = mem::replace(&mut self.pending, back);

        let fully_expanded = !self.consumed
            && self.remaining.is_some()
            && front
                .iter()
                .all(|step| matches!(step, TreeCursorStep::Entry(..)))
            && self
                .pending
                .iter()
                .all(|step| matches!(step, TreeCursorStep::Entry(..)));
        let front_remaining = fully_expanded.then_some(front.len());
        self.remaining = fully_expanded.then_some(self.pending.len());

        Some(Self {
            pending: front,
            remaining: front_remaining,
            consumed: false,
        })
    }
}

impl<'a, K, V> Iterator for TreeCursor<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.pending.pop_front()? {
                TreeCursorStep::Entry(key, value) => {
                    self.consumed = true;
                    if let Some(remaining) = &mut self.remaining {
                        *remaining -= 1;
                    }
                    return Some((key, value));
                }
                TreeCursorStep::Branch(node) => expand_in_order(&mut self.pending, node),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.remaining
            .map_or((0, None), |remaining| (remaining, Some(remaining)))
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V> Default for PersistentTreeMap<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Ord, V: Clone> FromIterator<(K, V)> for PersistentTreeMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .collect::<TransientTreeMap<K, V>>()
            .persistent()
    }
}

impl<K: Clone + Ord, V: Clone, const N: usize> From<[(K, V); N]> for PersistentTreeMap<K, V> {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<K: Clone, V: Clone> IntoIterator for PersistentTreeMap<K, V> {
    type Item = (K, V);
    type IntoIter = PersistentTreeMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let entries: Vec<(K, V)> = self
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        PersistentTreeMapIntoIterator {
            entries: entries.into_iter(),
        }
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentTreeMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentTreeMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Clone + Ord, V: Clone + PartialEq> PartialEq for PersistentTreeMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.length != other.length {
            return false;
        }
        if self.ptr_eq(other) {
            return true;
        }
        self.iter().eq(other.iter())
    }
}

impl<K: Clone + Ord, V: Clone + Eq> Eq for PersistentTreeMap<K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentTreeMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K: fmt::Display, V: fmt::Display> fmt::Display for PersistentTreeMap<K, V> {
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
impl<K, V> serde::Serialize for PersistentTreeMap<K, V>
where
    K: serde::Serialize,
    V: serde::Serialize,
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
struct PersistentTreeMapVisitor<K, V> {
    marker: PhantomData<(K, V)>,
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for PersistentTreeMapVisitor<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord,
    V: serde::Deserialize<'de> + Clone,
{
    type Value = PersistentTreeMap<K, V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an ordered map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut transient = TransientTreeMap::new();
        while let Some((key, value)) = access.next_entry()? {
            transient.insert(key, value);
        }
        Ok(transient.persistent())
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for PersistentTreeMap<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord,
    V: serde::Deserialize<'de> + Clone,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PersistentTreeMapVisitor {
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

    /// Checks every red-black invariant plus key ordering; returns the
    /// black height of the tree.
    fn validate<K: Ord + fmt::Debug, V>(map: &PersistentTreeMap<K, V>) -> usize {
        assert!(
            !Node::is_red(&map.root),
            "root must be black, tree of {} entries",
            map.len()
        );
        validate_node(&map.root, None, None)
    }

    fn validate_node<'a, K: Ord + fmt::Debug, V>(
        link: &'a Link<K, V>,
        lower: Option<&'a K>,
        upper: Option<&'a K>,
    ) -> usize {
        let Some(node) = link.as_deref() else {
            return 1;
        };
        if let Some(lower) = lower {
            assert!(node.key > *lower, "key {:?} out of order", node.key);
        }
        if let Some(upper) = upper {
            assert!(node.key < *upper, "key {:?} out of order", node.key);
        }
        if node.color == Color::Red {
            assert!(
                !Node::is_red(&node.left) && !Node::is_red(&node.right),
                "red node {:?} has a red child",
                node.key
            );
        }
        let left_height = validate_node(&node.left, lower, Some(&node.key));
        let right_height = validate_node(&node.right, Some(&node.key), upper);
        assert_eq!(
            left_height, right_height,
            "black height mismatch at {:?}",
            node.key
        );
        left_height + usize::from(node.color == Color::Black)
    }

    #[rstest]
    fn test_new_creates_empty() {
        let map: PersistentTreeMap<i32, i32> = PersistentTreeMap::new();
        assert!(map.is_empty());
        assert_eq!(map.min(), None);
        assert_eq!(map.max(), None);
    }

    #[rstest]
    fn test_insert_and_get() {
        let map = PersistentTreeMap::new()
            .insert(2, "two")
            .insert(1, "one")
            .insert(3, "three");

        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&1), Some(&"one"));
        assert_eq!(map.get(&2), Some(&"two"));
        assert_eq!(map.get(&3), Some(&"three"));
        assert_eq!(map.get(&4), None);
    }

    #[rstest]
    fn test_iteration_is_ascending() {
        let map: PersistentTreeMap<i32, i32> = [5, 2, 8, 1, 9, 3].map(|k| (k, k)).into();
        let keys: Vec<i32> = map.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 3, 5, 8, 9]);
    }

    #[rstest]
    fn test_insert_equal_value_is_identity() {
        let map = PersistentTreeMap::new().insert(1, 10);
        let same = map.insert(1, 10);
        assert!(same.ptr_eq(&map));
    }

    #[rstest]
    fn test_remove_absent_is_identity() {
        let map = PersistentTreeMap::new().insert(1, 10);
        let same = map.remove(&2);
        assert!(same.ptr_eq(&map));
    }

    #[rstest]
    #[case::ascending((0..200).collect::<Vec<i32>>())]
    #[case::descending((0..200).rev().collect::<Vec<i32>>())]
    #[case::zigzag((0..100).flat_map(|i| [i, 199 - i]).collect::<Vec<i32>>())]
    fn test_insert_preserves_invariants(#[case] keys: Vec<i32>) {
        let mut map = PersistentTreeMap::new();
        for &key in &keys {
            map = map.insert(key, key);
            validate(&map);
        }
        assert_eq!(map.len(), 200);
        let sorted: Vec<i32> = map.keys().copied().collect();
        assert_eq!(sorted, (0..200).collect::<Vec<_>>());
    }

    #[rstest]
    fn test_remove_preserves_invariants() {
        let mut map: PersistentTreeMap<i32, i32> = (0..150).map(|k| (k, k)).collect();
        validate(&map);

        // Remove in an order that exercises leaves, one-child nodes, and
        // interior nodes with two children.
        for key in (0..150).step_by(3).chain((1..150).step_by(3)) {
            map = map.remove(&key);
            validate(&map);
            assert_eq!(map.get(&key), None);
        }
        let survivors: Vec<i32> = map.keys().copied().collect();
        assert_eq!(survivors, (2..150).step_by(3).collect::<Vec<_>>());
    }

    #[rstest]
    fn test_remove_shares_unrelated_subtrees() {
        let map: PersistentTreeMap<i32, i32> = (0..100).map(|k| (k, k)).collect();
        let removed = map.remove(&50);

        assert_eq!(map.len(), 100);
        assert_eq!(removed.len(), 99);
        for key in 0..100 {
            assert_eq!(map.get(&key), Some(&key));
            if key != 50 {
                assert_eq!(removed.get(&key), Some(&key));
            }
        }
    }

    #[rstest]
    fn test_min_max() {
        let map: PersistentTreeMap<i32, i32> = [7, 3, 11, 1].map(|k| (k, k * 10)).into();
        assert_eq!(map.min(), Some((&1, &10)));
        assert_eq!(map.max(), Some((&11, &110)));
    }

    #[rstest]
    fn test_range_bounds() {
        let map: PersistentTreeMap<i32, i32> = (0..20).map(|k| (k, k)).collect();

        let middle: Vec<i32> = map.range(&5..&10).map(|(key, _)| *key).collect();
        assert_eq!(middle, vec![5, 6, 7, 8, 9]);

        let tail: Vec<i32> = map.range(&17..).map(|(key, _)| *key).collect();
        assert_eq!(tail, vec![17, 18, 19]);

        let inclusive: Vec<i32> = map.range(&4..=&6).map(|(key, _)| *key).collect();
        assert_eq!(inclusive, vec![4, 5, 6]);
    }

    #[rstest]
    fn test_transient_batch_preserves_invariants() {
        let mut transient = TransientTreeMap::new();
        for key in (0..300).rev() {
            transient.insert(key, key);
        }
        for key in (0..300).step_by(2) {
            transient.remove(&key);
        }
        let map = transient.persistent();

        validate(&map);
        assert_eq!(map.len(), 150);
        let keys: Vec<i32> = map.keys().copied().collect();
        assert_eq!(keys, (1..300).step_by(2).collect::<Vec<_>>());
    }

    #[rstest]
    fn test_transient_does_not_disturb_origin() {
        let origin: PersistentTreeMap<i32, i32> = (0..50).map(|k| (k, k)).collect();

        let mut transient = origin.clone().transient();
        for key in 0..50 {
            transient.insert(key, key + 1000);
        }
        let edited = transient.persistent();

        for key in 0..50 {
            assert_eq!(origin.get(&key), Some(&key));
            assert_eq!(edited.get(&key), Some(&(key + 1000)));
        }
        validate(&origin);
        validate(&edited);
    }

    #[rstest]
    fn test_merge_all_veto_is_identity() {
        struct VetoAll;
        impl<K, V> MergePolicy<K, V> for VetoAll {
            fn on_insert(&self, _key: &K, _incoming: &V) -> bool {
                false
            }
            fn on_merge(&self, _key: &K, _existing: &V, _incoming: &V) -> bool {
                false
            }
        }

        let left: PersistentTreeMap<i32, i32> = (0..10).map(|k| (k, k)).collect();
        let right: PersistentTreeMap<i32, i32> = (5..15).map(|k| (k, k + 100)).collect();

        let merged = left.merge_all(&right, &VetoAll);
        assert!(merged.ptr_eq(&left));
    }

    #[rstest]
    fn test_cursor_split_is_order_partitioned() {
        let map: PersistentTreeMap<i32, i32> = (0..80).map(|k| (k, k)).collect();

        let mut tail = map.cursor();
        let head = tail.try_split().expect("map is large enough to split");

        let head_keys: Vec<i32> = head.map(|(key, _)| *key).collect();
        let tail_keys: Vec<i32> = tail.map(|(key, _)| *key).collect();

        // The prefix cursor holds strictly smaller keys, and both halves
        // are themselves ascending.
        assert!(head_keys.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(tail_keys.windows(2).all(|pair| pair[0] < pair[1]));
        if let (Some(last), Some(first)) = (head_keys.last(), tail_keys.first()) {
            assert!(last < first);
        }
        let mut all = head_keys;
        all.extend(tail_keys);
        assert_eq!(all, (0..80).collect::<Vec<_>>());
    }

    #[rstest]
    fn test_update_with() {
        let map = PersistentTreeMap::new().insert(1, 10);

        let incremented = map.update_with(&1, |value| value.map(|v| v + 1));
        assert_eq!(incremented.get(&1), Some(&11));

        let removed = incremented.update_with(&1, |_| None);
        assert_eq!(removed.get(&1), None);
        validate(&removed);
    }

    #[rstest]
    fn test_to_btree_map() {
        let map: PersistentTreeMap<i32, i32> = (0..5).map(|k| (k, k * 2)).collect();
        let snapshot = map.to_btree_map();
        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot.get(&3), Some(&6));
    }
}
