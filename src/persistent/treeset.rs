//! Persistent (immutable) ordered set built on the persistent tree map.
//!
//! This module provides [`PersistentTreeSet`], an immutable set whose
//! elements are kept in ascending `Ord` order, and [`TransientTreeSet`],
//! its temporarily mutable batch editor. Like the hash set, it is a thin
//! facade over the map with `()` values, so the red-black machinery, the
//! no-op identity contract, and the transient discipline all come from
//! [`PersistentTreeMap`].
//!
//! # Examples
//!
//! ```rust
//! use trellis::persistent::PersistentTreeSet;
//!
//! let set = PersistentTreeSet::new().insert(3).insert(1).insert(2);
//!
//! let elements: Vec<&i32> = set.iter().collect();
//! assert_eq!(elements, vec![&1, &2, &3]);
//! ```

use std::borrow::Borrow;
use std::fmt;

use super::merge::MergePolicy;
use super::treemap::{
    PersistentTreeMap, PersistentTreeMapIntoIterator, PersistentTreeMapIterator, TransientTreeMap,
    TreeCursor,
};

// =============================================================================
// PersistentTreeSet Definition
// =============================================================================

/// A persistent (immutable) ordered set based on a red-black tree.
///
/// Elements are kept in ascending order; iteration, [`min`](Self::min),
/// and [`max`](Self::max) observe that order. Provable no-ops return a
/// handle sharing the original root, observable through
/// [`ptr_eq`](Self::ptr_eq).
#[derive(Clone)]
pub struct PersistentTreeSet<T> {
    map: PersistentTreeMap<T, ()>,
}

impl<T> PersistentTreeSet<T> {
    /// Creates a new empty set.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            map: PersistentTreeMap::new(),
        }
    }

    /// Returns the number of elements in the set.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the set contains no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns `true` if both sets share one root node (or are both
    /// empty).
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.map.ptr_eq(&other.map)
    }

    /// Returns a lazy iterator over the elements in ascending order.
    #[must_use]
    pub fn iter(&self) -> PersistentTreeSetIterator<'_, T> {
        PersistentTreeSetIterator {
            inner: self.map.iter(),
        }
    }

    /// Returns the smallest element.
    #[must_use]
    pub fn min(&self) -> Option<&T> {
        self.map.min().map(|(element, ())| element)
    }

    /// Returns the largest element.
    #[must_use]
    pub fn max(&self) -> Option<&T> {
        self.map.max().map(|(element, ())| element)
    }

    /// Returns a splittable ascending traversal cursor over the set.
    ///
    /// See [`TreeCursor`] for the splitting contract; every element a
    /// split-off prefix cursor yields precedes every element left in the
    /// remainder.
    #[must_use]
    pub fn cursor(&self) -> TreeSetCursor<'_, T> {
        TreeSetCursor {
            inner: self.map.cursor(),
        }
    }
}

impl<T: Clone + Ord> PersistentTreeSet<T> {
    /// Creates a set containing a single element.
    #[inline]
    #[must_use]
    pub fn singleton(element: T) -> Self {
        Self {
            map: PersistentTreeMap::singleton(element, ()),
        }
    }

    /// Returns `true` if the set contains the element.
    ///
    /// # Complexity
    ///
    /// O(log N)
    #[must_use]
    pub fn contains<Q>(&self, element: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.map.contains_key(element)
    }

    /// Returns the stored element equal to the given one, if any.
    #[must_use]
    pub fn get<Q>(&self, element: &Q) -> Option<&T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.map.get_key_value(element).map(|(stored, ())| stored)
    }

    /// Adds an element to the set.
    ///
    /// If the element is already present, the same set is returned
    /// (root-sharing no-op).
    #[must_use]
    pub fn insert(&self, element: T) -> Self {
        Self {
            map: self.map.insert(element, ()),
        }
    }

    /// Removes an element from the set.
    ///
    /// If the element is absent, the result shares the original root.
    #[must_use]
    pub fn remove<Q>(&self, element: &Q) -> Self
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Self {
            map: self.map.remove(element),
        }
    }

    /// Removes an element, consulting the policy's `on_delete` predicate.
    #[must_use]
    pub fn remove_with<Q, P>(&self, element: &Q, policy: &P) -> Self
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
        P: MergePolicy<T, ()> + ?Sized,
    {
        Self {
            map: self.map.remove_with(element, policy),
        }
    }

    /// Adds every element of `other` to this set.
    #[must_use]
    pub fn insert_all(&self, other: &Self) -> Self {
        Self {
            map: self.map.insert_all(&other.map),
        }
    }

    /// Merges every element of `other` under the supplied policy.
    ///
    /// As with the hash set, only [`MergePolicy::on_insert`] is ever
    /// consulted; a total veto returns a root-sharing handle.
    #[must_use]
    pub fn merge_all<P>(&self, other: &Self, policy: &P) -> Self
    where
        P: MergePolicy<T, ()> + ?Sized,
    {
        Self {
            map: self.map.merge_all(&other.map, policy),
        }
    }

    /// Returns the union of `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        self.insert_all(other)
    }

    /// Returns the intersection of `self` and `other`.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut transient = TransientTreeMap::new();
        for element in self {
            if other.contains(element) {
                transient.insert(element.clone(), ());
            }
        }
        if transient.len() == self.len() {
            self.clone()
        } else {
            Self {
                map: transient.persistent(),
            }
        }
    }

    /// Returns the elements of `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut transient = TransientTreeMap::new();
        for element in self {
            if !other.contains(element) {
                transient.insert(element.clone(), ());
            }
        }
        if transient.len() == self.len() {
            self.clone()
        } else {
            Self {
                map: transient.persistent(),
            }
        }
    }

    /// Returns the elements in exactly one of `self` and `other`.
    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.difference(other).insert_all(&other.difference(self))
    }

    /// Returns `true` if every element of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().all(|element| other.contains(element))
    }

    /// Returns `true` if every element of `other` is in `self`.
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }

    /// Produces a `std::collections::BTreeSet` snapshot of the set.
    #[must_use]
    pub fn to_btree_set(&self) -> std::collections::BTreeSet<T> {
        self.iter().cloned().collect()
    }

    /// Converts this persistent set into a transient editor in O(1).
    #[must_use]
    pub fn transient(self) -> TransientTreeSet<T> {
        TransientTreeSet {
            map: self.map.transient(),
        }
    }
}

// =============================================================================
// TransientTreeSet Definition
// =============================================================================

/// A transient (temporarily mutable) ordered set for batch updates.
///
/// Wraps a [`TransientTreeMap`] and inherits its confinement discipline:
/// `!Send`/`!Sync`, no `Clone`, consumed by
/// [`persistent`](Self::persistent).
pub struct TransientTreeSet<T> {
    map: TransientTreeMap<T, ()>,
}

// Transient editors must stay confined to their creating thread.
static_assertions::assert_not_impl_any!(TransientTreeSet<i32>: Send, Sync);
static_assertions::assert_not_impl_any!(TransientTreeSet<String>: Send, Sync);

impl<T> TransientTreeSet<T> {
    /// Returns the number of elements in the set.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the set contains no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<T: Clone + Ord> TransientTreeSet<T> {
    /// Creates a new empty transient set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: TransientTreeMap::new(),
        }
    }

    /// Returns `true` if the set contains the element.
    #[must_use]
    pub fn contains<Q>(&self, element: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.map.contains_key(element)
    }

    /// Adds an element, returning `true` if it was newly inserted.
    pub fn insert(&mut self, element: T) -> bool {
        self.map.insert(element, ()).is_none()
    }

    /// Removes an element, returning `true` if it was present.
    pub fn remove<Q>(&mut self, element: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.map.remove(element).is_some()
    }

    /// Extends the set with elements from an iterator.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for element in iter {
            self.insert(element);
        }
    }

    /// Freezes this editor into a persistent set in O(1).
    #[must_use]
    pub fn persistent(self) -> PersistentTreeSet<T> {
        PersistentTreeSet {
            map: self.map.persistent(),
        }
    }
}

impl<T: Clone + Ord> Default for TransientTreeSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Ord> FromIterator<T> for TransientTreeSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut transient = Self::new();
        transient.extend(iter);
        transient
    }
}

impl<T: Clone + Ord> Extend<T> for TransientTreeSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        Self::extend(self, iter);
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// A lazy ascending iterator over the elements of a
/// [`PersistentTreeSet`].
pub struct PersistentTreeSetIterator<'a, T> {
    inner: PersistentTreeMapIterator<'a, T, ()>,
}

impl<'a, T> Iterator for PersistentTreeSetIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(element, ())| element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for PersistentTreeSetIterator<'_, T> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// An owning ascending iterator over the elements of a
/// [`PersistentTreeSet`].
pub struct PersistentTreeSetIntoIterator<T> {
    inner: PersistentTreeMapIntoIterator<T, ()>,
}

impl<T> Iterator for PersistentTreeSetIntoIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(element, ())| element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for PersistentTreeSetIntoIterator<T> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// A splittable ascending traversal cursor over a [`PersistentTreeSet`].
pub struct TreeSetCursor<'a, T> {
    inner: TreeCursor<'a, T, ()>,
}

impl<T> TreeSetCursor<'_, T> {
    /// Splits off a disjoint prefix of the remaining work, if there is
    /// enough of it to be worth parallelizing.
    pub fn try_split(&mut self) -> Option<Self> {
        self.inner.try_split().map(|inner| Self { inner })
    }
}

impl<'a, T> Iterator for TreeSetCursor<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(element, ())| element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<T> Default for PersistentTreeSet<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Ord> FromIterator<T> for PersistentTreeSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter()
            .collect::<TransientTreeSet<T>>()
            .persistent()
    }
}

impl<T: Clone + Ord, const N: usize> From<[T; N]> for PersistentTreeSet<T> {
    fn from(elements: [T; N]) -> Self {
        elements.into_iter().collect()
    }
}

impl<T: Clone> IntoIterator for PersistentTreeSet<T> {
    type Item = T;
    type IntoIter = PersistentTreeSetIntoIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        PersistentTreeSetIntoIterator {
            inner: self.map.into_iter(),
        }
    }
}

impl<'a, T> IntoIterator for &'a PersistentTreeSet<T> {
    type Item = &'a T;
    type IntoIter = PersistentTreeSetIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Clone + Ord> PartialEq for PersistentTreeSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl<T: Clone + Ord> Eq for PersistentTreeSet<T> {}

impl<T: fmt::Debug> fmt::Debug for PersistentTreeSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.iter()).finish()
    }
}

impl<T: fmt::Display> fmt::Display for PersistentTreeSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        for (index, element) in self.iter().enumerate() {
            if index > 0 {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{element}")?;
        }
        write!(formatter, "}}")
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<T: serde::Serialize> serde::Serialize for PersistentTreeSet<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut sequence = serializer.serialize_seq(Some(self.len()))?;
        for element in self {
            sequence.serialize_element(element)?;
        }
        sequence.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentTreeSetVisitor<T> {
    marker: std::marker::PhantomData<T>,
}

#[cfg(feature = "serde")]
impl<'de, T> serde::de::Visitor<'de> for PersistentTreeSetVisitor<T>
where
    T: serde::Deserialize<'de> + Clone + Ord,
{
    type Value = PersistentTreeSet<T>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a sequence of set elements")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut transient = TransientTreeSet::new();
        while let Some(element) = access.next_element()? {
            transient.insert(element);
        }
        Ok(transient.persistent())
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for PersistentTreeSet<T>
where
    T: serde::Deserialize<'de> + Clone + Ord,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(PersistentTreeSetVisitor {
            marker: std::marker::PhantomData,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
