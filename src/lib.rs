//! # trellis
//!
//! Persistent (immutable) hash and ordered collections for Rust, with
//! transient batch editing and a veto-capable merge protocol.
//!
//! ## Overview
//!
//! Every "mutating" operation on a persistent collection returns a new
//! collection and leaves the original untouched; structural sharing keeps
//! this cheap. For bulk updates, each collection converts into a transient
//! editor that amortizes allocation by editing uniquely-owned nodes in
//! place, then freezes back into an immutable value.
//!
//! - [`persistent::PersistentHashMap`]: hash map (hash array mapped trie)
//! - [`persistent::PersistentHashSet`]: hash set (built on the hash map)
//! - [`persistent::PersistentTreeMap`]: ordered map (red-black tree)
//! - [`persistent::PersistentTreeSet`]: ordered set (built on the tree map)
//!
//! Each has a transient counterpart (`TransientHashMap` and friends) and
//! accepts a [`persistent::MergePolicy`] for policy-governed combination
//! of two collections.
//!
//! ## Feature Flags
//!
//! - `arc`: share nodes through `Arc` instead of `Rc`, making persistent
//!   handles `Send + Sync` (transient editors stay thread-confined)
//! - `serde`: serde support for all persistent collections
//!
//! ## Example
//!
//! ```rust
//! use trellis::persistent::PersistentHashMap;
//!
//! let map = PersistentHashMap::new()
//!     .insert("one".to_string(), 1)
//!     .insert("two".to_string(), 2);
//!
//! let updated = map.insert("one".to_string(), 100);
//! assert_eq!(map.get("one"), Some(&1));       // Original unchanged
//! assert_eq!(updated.get("one"), Some(&100)); // New version
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types and traits.
///
/// # Usage
///
/// ```rust
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::*;
}

pub mod persistent;
