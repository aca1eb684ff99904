//! Persistent (immutable) hash set built on the persistent hash map.
//!
//! This module provides [`PersistentHashSet`], an immutable hash set with
//! structural sharing, and [`TransientHashSet`], its temporarily mutable
//! batch editor.
//!
//! The set is a thin facade over [`PersistentHashMap`] with `()` values,
//! so it inherits the trie machinery, the no-op identity contract, and
//! the transient editing discipline from the map. On top of that it adds
//! the usual set algebra (union, intersection, difference, symmetric
//! difference, subset tests).
//!
//! # Examples
//!
//! ```rust
//! use trellis::persistent::PersistentHashSet;
//!
//! let set = PersistentHashSet::new()
//!     .insert(1)
//!     .insert(2)
//!     .insert(3);
//!
//! assert!(set.contains(&2));
//!
//! // Structural sharing: the original set is preserved
//! let bigger = set.insert(4);
//! assert_eq!(set.len(), 3);
//! assert_eq!(bigger.len(), 4);
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use super::hashmap::{
    MapCursor, PersistentHashMap, PersistentHashMapIntoIterator, PersistentHashMapIterator,
    TransientHashMap,
};
use super::merge::MergePolicy;

// =============================================================================
// PersistentHashSet Definition
// =============================================================================

/// A persistent (immutable) hash set.
///
/// Stored as a [`PersistentHashMap`] from elements to `()`, so every
/// operation has the map's complexity and sharing behavior. A provable
/// no-op (inserting a present element, removing an absent one, a fully
/// vetoed merge) returns a handle sharing the original root, observable
/// through [`ptr_eq`](Self::ptr_eq).
///
/// # Examples
///
/// ```rust
/// use trellis::persistent::PersistentHashSet;
///
/// let set = PersistentHashSet::singleton("apple".to_string());
/// assert!(set.contains("apple"));
/// assert!(!set.contains("banana"));
/// ```
#[derive(Clone)]
pub struct PersistentHashSet<T> {
    map: PersistentHashMap<T, ()>,
}

impl<T> PersistentHashSet<T> {
    /// Creates a new empty set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashSet;
    ///
    /// let set: PersistentHashSet<i32> = PersistentHashSet::new();
    /// assert!(set.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: PersistentHashMap::new(),
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

    /// Returns `true` if both sets share one root node.
    ///
    /// See [`PersistentHashMap::ptr_eq`] for the identity contract.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.map.ptr_eq(&other.map)
    }

    /// Returns a lazy iterator over the elements.
    ///
    /// Iteration order is unspecified but stable for a given set value.
    #[must_use]
    pub fn iter(&self) -> PersistentHashSetIterator<'_, T> {
        PersistentHashSetIterator {
            inner: self.map.iter(),
        }
    }

    /// Returns a splittable traversal cursor over the set.
    ///
    /// See [`MapCursor`] for the splitting contract; a [`SetCursor`]
    /// yields `&T` instead of key-value pairs.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashSet;
    ///
    /// let set: PersistentHashSet<i32> = (0..100).collect();
    ///
    /// let mut cursor = set.cursor();
    /// let other = cursor.try_split().expect("enough work to split");
    /// assert_eq!(cursor.count() + other.count(), 100);
    /// ```
    #[must_use]
    pub fn cursor(&self) -> SetCursor<'_, T> {
        SetCursor {
            inner: self.map.cursor(),
        }
    }
}

impl<T: Clone + Hash + Eq> PersistentHashSet<T> {
    /// Creates a set containing a single element.
    #[inline]
    #[must_use]
    pub fn singleton(element: T) -> Self {
        Self {
            map: PersistentHashMap::singleton(element, ()),
        }
    }

    /// Returns `true` if the set contains the element.
    ///
    /// The element may be any borrowed form of the set's element type.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    #[must_use]
    pub fn contains<Q>(&self, element: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(element)
    }

    /// Returns the stored element equal to the given one, if any.
    #[must_use]
    pub fn get<Q>(&self, element: &Q) -> Option<&T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get_key_value(element).map(|(stored, ())| stored)
    }

    /// Adds an element to the set.
    ///
    /// If the element is already present, the same set is returned
    /// (root-sharing no-op).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashSet;
    ///
    /// let set = PersistentHashSet::new().insert(1);
    /// let same = set.insert(1);
    ///
    /// assert!(same.ptr_eq(&set));
    /// assert_eq!(same.len(), 1);
    /// ```
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
        Q: Hash + Eq + ?Sized,
    {
        Self {
            map: self.map.remove(element),
        }
    }

    /// Removes an element, consulting the policy's `on_delete` predicate.
    ///
    /// A veto (or an absent element) returns a root-sharing handle.
    #[must_use]
    pub fn remove_with<Q, P>(&self, element: &Q, policy: &P) -> Self
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        P: MergePolicy<T, ()> + ?Sized,
    {
        Self {
            map: self.map.remove_with(element, policy),
        }
    }

    /// Adds every element of `other` to this set.
    ///
    /// Runs through one transient batch. If `other` adds nothing, the
    /// original set is returned unchanged.
    #[must_use]
    pub fn insert_all(&self, other: &Self) -> Self {
        Self {
            map: self.map.insert_all(&other.map),
        }
    }

    /// Merges every element of `other` under the supplied policy.
    ///
    /// Because set "values" are all equal, only
    /// [`MergePolicy::on_insert`] is ever consulted: each element of
    /// `other` absent from this set is inserted iff the policy accepts
    /// it. If every insertion is vetoed (or `other` adds nothing), the
    /// original set is returned unchanged, sharing its root.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::{MergePolicy, PersistentHashSet};
    ///
    /// struct EvenOnly;
    /// impl MergePolicy<i32, ()> for EvenOnly {
    ///     fn on_insert(&self, element: &i32, _incoming: &()) -> bool {
    ///         element % 2 == 0
    ///     }
    /// }
    ///
    /// let left = PersistentHashSet::new().insert(1);
    /// let right: PersistentHashSet<i32> = (2..=5).collect();
    ///
    /// let merged = left.merge_all(&right, &EvenOnly);
    /// assert!(merged.contains(&2) && merged.contains(&4));
    /// assert!(!merged.contains(&3) && !merged.contains(&5));
    /// ```
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
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashSet;
    ///
    /// let left: PersistentHashSet<i32> = (0..3).collect();
    /// let right: PersistentHashSet<i32> = (2..5).collect();
    ///
    /// let union = left.union(&right);
    /// assert_eq!(union.len(), 5);
    /// ```
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        self.insert_all(other)
    }

    /// Returns the intersection of `self` and `other`.
    ///
    /// If every element of `self` is also in `other`, the original set
    /// is returned unchanged.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut transient = TransientHashMap::new();
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
    ///
    /// If the sets are disjoint, the original set is returned unchanged.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut transient = TransientHashMap::new();
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
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashSet;
    ///
    /// let left: PersistentHashSet<i32> = (0..3).collect();
    /// let right: PersistentHashSet<i32> = (2..5).collect();
    ///
    /// let symmetric = left.symmetric_difference(&right);
    /// let mut elements: Vec<i32> = symmetric.iter().copied().collect();
    /// elements.sort_unstable();
    /// assert_eq!(elements, vec![0, 1, 3, 4]);
    /// ```
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

    /// Produces a `std::collections::HashSet` snapshot of the set.
    #[must_use]
    pub fn to_hash_set(&self) -> std::collections::HashSet<T> {
        self.iter().cloned().collect()
    }

    /// Converts this persistent set into a transient editor in O(1).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::persistent::PersistentHashSet;
    ///
    /// let persistent = PersistentHashSet::new().insert(1);
    ///
    /// let mut transient = persistent.transient();
    /// transient.insert(2);
    /// transient.insert(3);
    ///
    /// let rebuilt = transient.persistent();
    /// assert_eq!(rebuilt.len(), 3);
    /// ```
    #[must_use]
    pub fn transient(self) -> TransientHashSet<T> {
        TransientHashSet {
            map: self.map.transient(),
        }
    }
}

// =============================================================================
// TransientHashSet Definition
// =============================================================================

/// A transient (temporarily mutable) hash set for efficient batch updates.
///
/// Wraps a [`TransientHashMap`] and inherits its confinement discipline:
/// `!Send`/`!Sync`, no `Clone`, consumed by [`persistent`](Self::persistent).
/// See [`TransientHashMap`] for the edit-session semantics.
///
/// # Examples
///
/// ```rust
/// use trellis::persistent::TransientHashSet;
///
/// let mut transient = TransientHashSet::new();
/// for element in 0..100 {
///     transient.insert(element);
/// }
///
/// let persistent = transient.persistent();
/// assert_eq!(persistent.len(), 100);
/// ```
pub struct TransientHashSet<T> {
    map: TransientHashMap<T, ()>,
}

// Transient editors must stay confined to their creating thread.
static_assertions::assert_not_impl_any!(TransientHashSet<i32>: Send, Sync);
static_assertions::assert_not_impl_any!(TransientHashSet<String>: Send, Sync);

impl<T> TransientHashSet<T> {
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

impl<T: Clone + Hash + Eq> TransientHashSet<T> {
    /// Creates a new empty transient set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: TransientHashMap::new(),
        }
    }

    /// Returns `true` if the set contains the element.
    #[must_use]
    pub fn contains<Q>(&self, element: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
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
        Q: Hash + Eq + ?Sized,
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
    pub fn persistent(self) -> PersistentHashSet<T> {
        PersistentHashSet {
            map: self.map.persistent(),
        }
    }
}

impl<T: Clone + Hash + Eq> Default for TransientHashSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Hash + Eq> FromIterator<T> for TransientHashSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut transient = Self::new();
        transient.extend(iter);
        transient
    }
}

impl<T: Clone + Hash + Eq> Extend<T> for TransientHashSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        Self::extend(self, iter);
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// A lazy iterator over the elements of a [`PersistentHashSet`].
pub struct PersistentHashSetIterator<'a, T> {
    inner: PersistentHashMapIterator<'a, T, ()>,
}

impl<'a, T> Iterator for PersistentHashSetIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(element, ())| element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for PersistentHashSetIterator<'_, T> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// An owning iterator over the elements of a [`PersistentHashSet`].
pub struct PersistentHashSetIntoIterator<T> {
    inner: PersistentHashMapIntoIterator<T, ()>,
}

impl<T> Iterator for PersistentHashSetIntoIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(element, ())| element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for PersistentHashSetIntoIterator<T> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// A splittable traversal cursor over a [`PersistentHashSet`].
///
/// See [`MapCursor`] for the splitting and size-reporting contract.
pub struct SetCursor<'a, T> {
    inner: MapCursor<'a, T, ()>,
}

impl<T> SetCursor<'_, T> {
    /// Splits off a disjoint prefix of the remaining work, if there is
    /// enough of it to be worth parallelizing.
    pub fn try_split(&mut self) -> Option<Self> {
        self.inner.try_split().map(|inner| Self { inner })
    }
}

impl<'a, T> Iterator for SetCursor<'a, T> {
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

impl<T> Default for PersistentHashSet<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Hash + Eq> FromIterator<T> for PersistentHashSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter()
            .collect::<TransientHashSet<T>>()
            .persistent()
    }
}

impl<T: Clone + Hash + Eq, const N: usize> From<[T; N]> for PersistentHashSet<T> {
    fn from(elements: [T; N]) -> Self {
        elements.into_iter().collect()
    }
}

impl<T: Clone> IntoIterator for PersistentHashSet<T> {
    type Item = T;
    type IntoIter = PersistentHashSetIntoIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        PersistentHashSetIntoIterator {
            inner: self.map.into_iter(),
        }
    }
}

impl<'a, T> IntoIterator for &'a PersistentHashSet<T> {
    type Item = &'a T;
    type IntoIter = PersistentHashSetIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Clone + Hash + Eq> PartialEq for PersistentHashSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl<T: Clone + Hash + Eq> Eq for PersistentHashSet<T> {}

impl<T: Clone + Hash + Eq + fmt::Debug> fmt::Debug for PersistentHashSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.iter()).finish()
    }
}

impl<T: fmt::Display> fmt::Display for PersistentHashSet<T> {
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
impl<T> serde::Serialize for PersistentHashSet<T>
where
    T: serde::Serialize + Clone + Hash + Eq,
{
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
struct PersistentHashSetVisitor<T> {
    marker: std::marker::PhantomData<T>,
}

#[cfg(feature = "serde")]
impl<'de, T> serde::de::Visitor<'de> for PersistentHashSetVisitor<T>
where
    T: serde::Deserialize<'de> + Clone + Hash + Eq,
{
    type Value = PersistentHashSet<T>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a sequence of set elements")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut transient = TransientHashSet::new();
        while let Some(element) = access.next_element()? {
            transient.insert(element);
        }
        Ok(transient.persistent())
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for PersistentHashSet<T>
where
    T: serde::Deserialize<'de> + Clone + Hash + Eq,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(PersistentHashSetVisitor {
            marker: std::marker::PhantomData,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
