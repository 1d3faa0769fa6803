//! lazyskip - Fine-grained locked concurrent sorted collections
//!
//! This crate provides two sorted, duplicate-free key value containers that
//! many threads can operate on at once through a shared reference:
//!
//! * [`LazyList`](lazylist::LazyList) - a sorted linked list where each node
//!   carries its own lock. Writers find their position without locking, then
//!   lock the two nodes either side of the change, validate that nothing moved
//!   underneath them, and commit. If validation fails they start again.
//! * [`SkipList`](skiplist::SkipList) - the same discipline generalised over
//!   eight levels of a probabilistic skip list, so that searches are
//!   logarithmic rather than linear.
//!
//! In both structures readers never take a lock. A removed node is first
//! *marked* (logically deleted) and only then unlinked, so a reader that
//! observes a node can always tell if it is still present. Insertions into the
//! skip list are *published* by a `fully_linked` flag that is set only once the
//! node is reachable on every level it occupies.
//!
//! Unlinked nodes may still be in use by a concurrent reader, so their memory is
//! reclaimed with crossbeam-epoch. The convenience methods (`lookup`, `add`,
//! `remove` ...) pin an epoch for you. Methods that hand out references into the
//! structure (`lookup_in`, `range`, `iter` ...) take a [`Guard`] that you pin
//! with [`pin`], and those references live as long as the guard.
//!
//! ```
//! use lazyskip::skiplist::SkipList;
//!
//! let list = SkipList::new();
//! assert!(list.add(5, "five"));
//! assert!(list.add(3, "three"));
//! assert!(!list.add(3, "trois"));
//! assert_eq!(list.lookup(&3), Some("three"));
//!
//! let guard = lazyskip::pin();
//! let keys: Vec<_> = list.iter(&guard).map(|(k, _)| *k).collect();
//! assert_eq!(keys, vec![3, 5]);
//! ```
//!
//! # Features
//!
//! * `lazylist` - the lock coupled sorted list
//! * `skiplist` - the lock coupled skip list
//!
//! Both are enabled by default.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![warn(missing_docs)]
#![allow(clippy::needless_lifetimes)]

pub mod error;
pub mod order;
mod retry;

#[cfg(feature = "lazylist")]
pub mod lazylist;
#[cfg(feature = "skiplist")]
pub mod skiplist;

pub use crossbeam_epoch::{pin, Guard};
pub use error::Contended;
pub use order::{FnOrder, KeyOrder, NaturalOrder};

/// The number of failed validations the bounded `try_*` operations tolerate
/// before giving up with [`Contended`], unless configured otherwise.
pub const DEFAULT_RETRY_LIMIT: usize = 256;
