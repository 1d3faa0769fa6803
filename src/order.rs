//! Key ordering used by the sorted collections.
//!
//! Every collection is parameterised by a [`KeyOrder`], a strict total order
//! together with a matching equality. For keys that implement [`Ord`] the
//! [`NaturalOrder`] is used by default. Any pair of closures can be adapted
//! with [`FnOrder`].
//!
//! The two predicates must agree: `equal(a, b)` must hold exactly when neither
//! `less(a, b)` nor `less(b, a)` does. This is not checked. An inconsistent
//! order breaks the sortedness of the structure, and with it every guarantee
//! the collections give.

use std::fmt;
use std::ops::{Bound, RangeBounds};

/// A strict total order over `K`, and the equality it implies.
pub trait KeyOrder<K: ?Sized> {
    /// True if `a` sorts strictly before `b`.
    fn less(&self, a: &K, b: &K) -> bool;

    /// True if `a` and `b` are the same key.
    fn equal(&self, a: &K, b: &K) -> bool {
        !self.less(a, b) && !self.less(b, a)
    }
}

/// The order given by the key's own [`Ord`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> KeyOrder<K> for NaturalOrder {
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        a < b
    }

    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

/// An order built from a `less` and an `eq` closure.
///
/// ```
/// use lazyskip::{FnOrder, KeyOrder};
///
/// // Sort by length only.
/// let order = FnOrder::new(
///     |a: &String, b: &String| a.len() < b.len(),
///     |a: &String, b: &String| a.len() == b.len(),
/// );
/// assert!(order.less(&"ab".to_string(), &"abc".to_string()));
/// assert!(order.equal(&"ab".to_string(), &"xy".to_string()));
/// ```
#[derive(Clone, Copy)]
pub struct FnOrder<L, E> {
    less: L,
    eq: E,
}

impl<L, E> FnOrder<L, E> {
    /// Pair a strict order predicate with its equality predicate.
    pub fn new(less: L, eq: E) -> Self {
        FnOrder { less, eq }
    }
}

impl<K, L, E> KeyOrder<K> for FnOrder<L, E>
where
    K: ?Sized,
    L: Fn(&K, &K) -> bool,
    E: Fn(&K, &K) -> bool,
{
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        (self.less)(a, b)
    }

    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        (self.eq)(a, b)
    }
}

impl<L, E> fmt::Debug for FnOrder<L, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnOrder")
    }
}

/// True if `key` sorts before the start of `range`.
pub(crate) fn before_start<K, O, R>(order: &O, key: &K, range: &R) -> bool
where
    O: KeyOrder<K>,
    R: RangeBounds<K>,
{
    match range.start_bound() {
        Bound::Included(lo) => order.less(key, lo),
        Bound::Excluded(lo) => !order.less(lo, key),
        Bound::Unbounded => false,
    }
}

/// True if `key` sorts after the end of `range`.
pub(crate) fn after_end<K, O, R>(order: &O, key: &K, range: &R) -> bool
where
    O: KeyOrder<K>,
    R: RangeBounds<K>,
{
    match range.end_bound() {
        Bound::Included(hi) => order.less(hi, key),
        Bound::Excluded(hi) => !order.less(key, hi),
        Bound::Unbounded => false,
    }
}
