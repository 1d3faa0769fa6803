//! Positions and iterators for [`SkipList`].

use crossbeam_epoch::Guard;

use std::fmt;
use std::iter::FusedIterator;
use std::ops::RangeBounds;
use std::sync::atomic::Ordering::Acquire;

use super::{Node, SkipList};
use crate::order::{after_end, before_start, KeyOrder};

/// A position in a [`SkipList`], pointing at an entry that was present when
/// it was reached.
///
/// The entry may be removed concurrently afterwards. The key and value stay
/// readable for as long as the guard the entry was created with, and
/// [`next`](Entry::next) still moves forward from it.
pub struct Entry<'g, K, V> {
    node: &'g Node<K, V>,
    key: &'g K,
    value: &'g V,
    guard: &'g Guard,
}

impl<'g, K, V> Entry<'g, K, V> {
    /// The first unmarked entry after `node` on level 0.
    pub(super) fn after(mut node: &'g Node<K, V>, guard: &'g Guard) -> Option<Self> {
        loop {
            let next = node.next[0].load(Acquire, guard);
            node = unsafe { next.as_ref() }?;
            match &node.entry {
                // The tail.
                None => return None,
                Some((key, value)) if !node.is_marked() => {
                    return Some(Entry {
                        node,
                        key,
                        value,
                        guard,
                    })
                }
                Some(_) => {}
            }
        }
    }

    /// The key of this entry.
    pub fn key(&self) -> &'g K {
        self.key
    }

    /// The value of this entry.
    pub fn value(&self) -> &'g V {
        self.value
    }

    /// True if this entry has been removed since it was reached.
    pub fn is_removed(&self) -> bool {
        self.node.is_marked()
    }

    /// The next present entry in key order.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Option<Entry<'g, K, V>> {
        Entry::after(self.node, self.guard)
    }

    /// Iterate forward starting with this entry. The entry itself is skipped
    /// if it has been removed by the time the iterator reaches it.
    pub fn iter(&self) -> Iter<'g, K, V> {
        Iter {
            prev: self.node,
            pending: Some(*self),
            guard: self.guard,
            done: false,
        }
    }
}

impl<K, V> Clone for Entry<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for Entry<'_, K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Entry<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", self.key)
            .field("value", self.value)
            .finish()
    }
}

/// Iterator over the entries of a [`SkipList`] in key order.
///
/// Created by [`SkipList::iter`] or [`Entry::iter`].
pub struct Iter<'g, K, V> {
    prev: &'g Node<K, V>,
    pending: Option<Entry<'g, K, V>>,
    guard: &'g Guard,
    done: bool,
}

impl<'g, K, V> Iter<'g, K, V> {
    pub(super) fn after(prev: &'g Node<K, V>, guard: &'g Guard) -> Self {
        Iter {
            prev,
            pending: None,
            guard,
            done: false,
        }
    }
}

impl<'g, K, V> Iterator for Iter<'g, K, V> {
    type Item = (&'g K, &'g V);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending.take() {
            if !e.is_removed() {
                return Some((e.key, e.value));
            }
        }
        if self.done {
            return None;
        }
        match Entry::after(self.prev, self.guard) {
            Some(e) => {
                self.prev = e.node;
                Some((e.key, e.value))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// Iterator over the entries of a [`SkipList`] inside a key range, created by
/// [`SkipList::range`].
pub struct Range<'g, K, V, O, R> {
    list: &'g SkipList<K, V, O>,
    inner: Iter<'g, K, V>,
    bounds: R,
}

impl<'g, K, V, O, R> Range<'g, K, V, O, R> {
    pub(super) fn new(list: &'g SkipList<K, V, O>, inner: Iter<'g, K, V>, bounds: R) -> Self {
        Range {
            list,
            inner,
            bounds,
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
        for (k, v) in self.inner.by_ref() {
            if before_start(&self.list.order, k, &self.bounds) {
                continue;
            }
            if after_end(&self.list.order, k, &self.bounds) {
                break;
            }
            return Some((k, v));
        }
        self.inner.done = true;
        None
    }
}

impl<K, V, O, R> FusedIterator for Range<'_, K, V, O, R>
where
    O: KeyOrder<K>,
    R: RangeBounds<K>,
{
}
