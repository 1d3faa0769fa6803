//! Iterators for [`LazyList`].

use crossbeam_epoch::Guard;

use std::iter::FusedIterator;
use std::ops::{RangeBounds, RangeFull};
use std::sync::atomic::Ordering::Acquire;

use super::{LazyList, Node};
use crate::order::{after_end, before_start, KeyOrder, NaturalOrder};

/// Iterator over the entries of a [`LazyList`] inside a key range.
///
/// Created by [`LazyList::range`]. Yields `(&K, &V)` in key order, skipping
/// entries that were removed before the iterator reached them.
pub struct Range<'g, K, V, O, R> {
    list: &'g LazyList<K, V, O>,
    curr: &'g Node<K, V>,
    bounds: R,
    guard: &'g Guard,
    done: bool,
}

/// Iterator over every entry of a [`LazyList`], created by [`LazyList::iter`].
pub type Iter<'g, K, V, O = NaturalOrder> = Range<'g, K, V, O, RangeFull>;

impl<'g, K, V, O, R> Range<'g, K, V, O, R> {
    pub(super) fn new(list: &'g LazyList<K, V, O>, bounds: R, guard: &'g Guard) -> Self {
        Range {
            list,
            curr: &list.head,
            bounds,
            guard,
            done: false,
        }
    }
}

impl<'g, K, V, O, R> Iterator for Range<'g, K, V, O, R>
where
    O: KeyOrder<K>,
    R: RangeBounds<K>,
{
    type Item = (&'g K, &'g V);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let next = self.curr.next.load(Acquire, self.guard);
            let Some(node) = (unsafe { next.as_ref() }) else {
                break;
            };
            self.curr = node;
            // The tail has no entry.
            let Some((k, v)) = node.entry.as_ref() else {
                break;
            };
            if node.is_marked() || before_start(&self.list.order, k, &self.bounds) {
                continue;
            }
            if after_end(&self.list.order, k, &self.bounds) {
                break;
            }
            return Some((k, v));
        }
        self.done = true;
        None
    }
}

impl<K, V, O, R> FusedIterator for Range<'_, K, V, O, R>
where
    O: KeyOrder<K>,
    R: RangeBounds<K>,
{
}
