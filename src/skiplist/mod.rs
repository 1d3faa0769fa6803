//! SkipList - A skip list with per-node locks
//!
//! A [SkipList] is a sorted, duplicate free map with the same concurrency
//! discipline as the [`LazyList`](crate::lazylist::LazyList), generalised over
//! eight levels. Every node is linked into level 0 and into each level up to a
//! randomly drawn top level, so a search skips over most of the list and costs
//! `O(log n)` on average.
//!
//! A skip list node can't be linked into every level in one step. Two flags on
//! each node make the intermediate states visible to other threads:
//!
//! * `fully_linked` is set once an insertion has linked the node into every
//!   level it occupies. Until then a concurrent insert of the same key waits
//!   for it, and a concurrent remove ignores it.
//! * `marked` is set when a removal logically deletes the node, before it is
//!   unlinked level by level from the top down. Readers treat a marked node as
//!   absent.
//!
//! Writers lock the predecessors of the change at each level, bottom level
//! first, taking each distinct predecessor only once. A remove locks its victim
//! before any predecessor. Every writer acquires locks in the same direction
//! across the list, so there is no circular wait.
//!
//! Readers never lock. Lookups and iteration race freely with writers and only
//! ever observe keys in order, without duplicates and without removed nodes.
//!
//! This is the lazy skip list of "The Art of Multiprocessor Programming",
//! chapter 14.

mod iter;
mod node;

pub use iter::{Entry, Iter, Range};
pub use node::{random_level, MAX_LEVEL};

use node::{Node, LEVELS};

use crossbeam_epoch as epoch;
use crossbeam_epoch::{Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use parking_lot::MutexGuard;
use smallvec::SmallVec;
use tracing::trace;

use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::ptr;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::error::Contended;
use crate::order::{FnOrder, KeyOrder, NaturalOrder};
use crate::retry::{self, Attempt};
use crate::DEFAULT_RETRY_LIMIT;

type Preds<'g, K, V> = [&'g Node<K, V>; LEVELS];
type Succs<'g, K, V> = [Shared<'g, Node<K, V>>; LEVELS];
type LockSet<'g> = SmallVec<[MutexGuard<'g, ()>; LEVELS]>;

/// A concurrent sorted map built on a lock based skip list.
///
/// All operations take `&self`. See the [module documentation](self) for the
/// concurrency guarantees.
///
/// # Examples
/// ```
/// use lazyskip::skiplist::SkipList;
///
/// let list = SkipList::new();
/// for k in [5, 3, 8, 1] {
///     assert!(list.add(k, k * 10));
/// }
/// assert_eq!(list.lookup(&3), Some(30));
/// assert_eq!(list.lookup(&9), None);
/// assert!(list.remove(&3));
/// assert!(!list.remove(&3));
///
/// // Walk forward from the first entry.
/// let guard = lazyskip::pin();
/// let first = list.first(&guard).unwrap();
/// assert_eq!(*first.key(), 1);
/// assert_eq!(first.next().map(|e| *e.key()), Some(5));
/// ```
pub struct SkipList<K, V, O = NaturalOrder> {
    head: Node<K, V>,
    order: O,
    retry_limit: usize,
}

impl<K, V> SkipList<K, V, NaturalOrder>
where
    K: Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create an empty skip list ordered by the key's [`Ord`] implementation.
    pub fn new() -> Self {
        Self::with_order(NaturalOrder)
    }
}

impl<K, V, L, E> SkipList<K, V, FnOrder<L, E>>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    L: Fn(&K, &K) -> bool,
    E: Fn(&K, &K) -> bool,
{
    /// Create an empty skip list ordered by a strict `less` predicate and the
    /// equality `eq` consistent with it.
    pub fn with_comparator(less: L, eq: E) -> Self {
        Self::with_order(FnOrder::new(less, eq))
    }
}

impl<K, V, O> SkipList<K, V, O>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    O: KeyOrder<K>,
{
    /// Create an empty skip list ordered by `order`.
    pub fn with_order(order: O) -> Self {
        let head = Node::new(None, MAX_LEVEL);
        let tail = Node::new(None, MAX_LEVEL);
        head.fully_linked.store(true, Relaxed);
        tail.fully_linked.store(true, Relaxed);

        // Nothing else can see the tail yet.
        let tail = Owned::new(tail).into_shared(unsafe { epoch::unprotected() });
        for slot in head.next.iter() {
            slot.store(tail, Relaxed);
        }

        SkipList {
            head,
            order,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }

    /// Set how many attempts [`try_add`](Self::try_add) and
    /// [`try_remove`](Self::try_remove) make before reporting [`Contended`].
    /// A limit of zero makes no attempt at all, so every bounded call reports
    /// [`Contended`] straight away.
    #[must_use]
    pub fn with_retry_limit(mut self, limit: usize) -> Self {
        self.retry_limit = limit;
        self
    }

    #[inline]
    fn precedes(&self, node: &Node<K, V>, key: &K) -> bool {
        match &node.entry {
            Some((k, _)) => self.order.less(k, key),
            None => false,
        }
    }

    #[inline]
    fn matches(&self, node: &Node<K, V>, key: &K) -> bool {
        match &node.entry {
            Some((k, _)) => self.order.equal(k, key),
            None => false,
        }
    }

    /// Descend from the top level, recording at each level the last node
    /// before `key` and the node after it. Returns the highest level at which
    /// a node with an equal key was seen. Marked nodes are not filtered here.
    fn find<'g>(
        &'g self,
        key: &K,
        preds: &mut Preds<'g, K, V>,
        succs: &mut Succs<'g, K, V>,
        guard: &'g Guard,
    ) -> Option<usize> {
        let mut found = None;
        let mut pred = &self.head;
        for level in (0..LEVELS).rev() {
            let mut curr = pred.next[level].load(Acquire, guard);
            loop {
                // A node reached on a level has a successor on that level,
                // and the walk never passes the tail.
                let node = unsafe { curr.deref() };
                if !self.precedes(node, key) {
                    if found.is_none() && self.matches(node, key) {
                        found = Some(level);
                    }
                    break;
                }
                pred = node;
                curr = node.next[level].load(Acquire, guard);
            }
            preds[level] = pred;
            succs[level] = curr;
        }
        found
    }

    /// The last node on level 0 that sorts before `key`, found top down.
    fn last_before<'g>(&'g self, key: &K, guard: &'g Guard) -> &'g Node<K, V> {
        let mut pred = &self.head;
        for level in (0..LEVELS).rev() {
            let mut curr = unsafe { pred.next[level].load(Acquire, guard).deref() };
            while self.precedes(curr, key) {
                pred = curr;
                curr = unsafe { curr.next[level].load(Acquire, guard).deref() };
            }
        }
        pred
    }

    fn add_attempt<'g>(&'g self, key: K, value: V, guard: &'g Guard) -> Attempt<(K, V)> {
        let top_level = random_level(&mut rand::rng());
        let mut preds: Preds<'g, K, V> = [&self.head; LEVELS];
        let mut succs: Succs<'g, K, V> = [Shared::null(); LEVELS];

        if let Some(level) = self.find(&key, &mut preds, &mut succs, guard) {
            let found = unsafe { succs[level].deref() };
            if !found.is_marked() {
                // Present, but possibly still being linked. Don't report it
                // until it is published.
                let backoff = Backoff::new();
                while !found.is_fully_linked() {
                    backoff.snooze();
                }
                return Attempt::Done(false);
            }
            trace!(level, "add found a removed node, retrying");
            return Attempt::Retry((key, value));
        }

        // Bottom up. Consecutive levels often share a predecessor, and our
        // locks are not reentrant.
        let mut locks: LockSet<'g> = SmallVec::new();
        for lv in 0..=top_level {
            let pred = preds[lv];
            if lv == 0 || !ptr::eq(pred, preds[lv - 1]) {
                locks.push(pred.lock.lock());
            }
            let succ_ptr = succs[lv];
            let succ = unsafe { succ_ptr.deref() };
            let valid = !pred.is_marked()
                && !succ.is_marked()
                && pred.next[lv].load(Acquire, guard) == succ_ptr;
            if !valid {
                trace!(level = lv, "add validation failed, retrying");
                return Attempt::Retry((key, value));
            }
        }

        let node = Owned::new(Node::new(Some((key, value)), top_level));
        for (lv, slot) in node.next.iter().enumerate() {
            slot.store(succs[lv], Relaxed);
        }
        let node = node.into_shared(guard);
        for (lv, pred) in preds.iter().enumerate().take(top_level + 1) {
            pred.next[lv].store(node, Release);
        }
        // Only now is the node reported as present to other inserts.
        unsafe { node.deref() }.fully_linked.store(true, Release);
        drop(locks);
        Attempt::Done(true)
    }

    fn remove_attempt<'g>(&'g self, key: &K, guard: &'g Guard) -> Attempt<()> {
        let mut preds: Preds<'g, K, V> = [&self.head; LEVELS];
        let mut succs: Succs<'g, K, V> = [Shared::null(); LEVELS];

        let Some(level) = self.find(key, &mut preds, &mut succs, guard) else {
            return Attempt::Done(false);
        };
        let victim_ptr = succs[level];
        let victim = unsafe { victim_ptr.deref() };

        // A node first seen below its top level is either not yet fully
        // linked, or marked and partly unlinked by another remove.
        let ready = victim.is_fully_linked() && !victim.is_marked() && victim.top_level == level;
        if !ready {
            return Attempt::Done(false);
        }

        let victim_lock = victim.lock.lock();
        if victim.is_marked() {
            trace!("remove lost its victim to another remove, retrying");
            return Attempt::Retry(());
        }

        let top_level = victim.top_level;
        let mut locks: LockSet<'g> = SmallVec::new();
        for lv in 0..=top_level {
            let pred = preds[lv];
            if lv == 0 || !ptr::eq(pred, preds[lv - 1]) {
                locks.push(pred.lock.lock());
            }
            let valid = !pred.is_marked() && pred.next[lv].load(Acquire, guard) == victim_ptr;
            if !valid {
                trace!(level = lv, "remove validation failed, retrying");
                return Attempt::Retry(());
            }
        }

        victim.marked.store(true, Release);
        // Top down, so the node is never present on a level without being
        // present on every level below it.
        for lv in (0..=top_level).rev() {
            preds[lv].next[lv].store(victim.next[lv].load(Acquire, guard), Release);
        }
        drop(locks);
        drop(victim_lock);

        // Unlinked at every level under our locks, nobody else will do it.
        unsafe { guard.defer_destroy(victim_ptr) };
        Attempt::Done(true)
    }

    /// Insert `key` with `value`. Returns `true` if it was inserted, or
    /// `false` if the key was already present, in which case the existing
    /// value is left as it was.
    pub fn add(&self, key: K, value: V) -> bool {
        let guard = epoch::pin();
        retry::until_done((key, value), |(k, v)| self.add_attempt(k, v, &guard))
    }

    /// As [`add`](Self::add), but give up with [`Contended`] once validation
    /// has failed on every one of the configured number of attempts.
    pub fn try_add(&self, key: K, value: V) -> Result<bool, Contended> {
        let guard = epoch::pin();
        retry::bounded((key, value), self.retry_limit, |(k, v)| {
            self.add_attempt(k, v, &guard)
        })
    }

    /// Remove `key`. Returns `true` if it was present and has been removed.
    ///
    /// A node that is still being inserted by another thread, or is already
    /// being removed, is not ready to be removed, and this returns `false`
    /// for it without waiting.
    pub fn remove(&self, key: &K) -> bool {
        let guard = epoch::pin();
        retry::until_done((), |()| self.remove_attempt(key, &guard))
    }

    /// As [`remove`](Self::remove), but bounded in the same way as
    /// [`try_add`](Self::try_add).
    pub fn try_remove(&self, key: &K) -> Result<bool, Contended> {
        let guard = epoch::pin();
        retry::bounded((), self.retry_limit, |()| self.remove_attempt(key, &guard))
    }

    /// Find the value for `key`. The reference lives as long as `guard`.
    pub fn lookup_in<'g>(&'g self, key: &K, guard: &'g Guard) -> Option<&'g V> {
        let mut pred = &self.head;
        for level in (0..LEVELS).rev() {
            let mut curr = unsafe { pred.next[level].load(Acquire, guard).deref() };
            while self.precedes(curr, key) {
                pred = curr;
                curr = unsafe { curr.next[level].load(Acquire, guard).deref() };
            }
            if let Some((k, v)) = &curr.entry {
                if self.order.equal(k, key) {
                    return if curr.is_marked() { None } else { Some(v) };
                }
            }
        }
        None
    }

    /// Find the value for `key` and return a copy of it.
    pub fn lookup(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let guard = epoch::pin();
        self.lookup_in(key, &guard).cloned()
    }

    /// True if `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        let guard = epoch::pin();
        self.lookup_in(key, &guard).is_some()
    }

    /// The first present entry, or `None` if the list is empty.
    pub fn first<'g>(&'g self, guard: &'g Guard) -> Option<Entry<'g, K, V>> {
        Entry::after(&self.head, guard)
    }

    /// The first present entry whose key is not less than `key`.
    pub fn seek<'g>(&'g self, key: &K, guard: &'g Guard) -> Option<Entry<'g, K, V>> {
        Entry::after(self.last_before(key, guard), guard)
    }

    /// Iterate over every entry in key order.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K, V> {
        Iter::after(&self.head, guard)
    }

    /// Iterate in key order over the entries that fall inside `range`.
    pub fn range<'g, R>(&'g self, range: R, guard: &'g Guard) -> Range<'g, K, V, O, R>
    where
        R: RangeBounds<K>,
    {
        let start = match range.start_bound() {
            Bound::Included(lo) | Bound::Excluded(lo) => self.last_before(lo, guard),
            Bound::Unbounded => &self.head,
        };
        Range::new(self, Iter::after(start, guard), range)
    }

    /// True if no key is present.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.first(&guard).is_none()
    }
}

impl<K, V, O> Drop for SkipList<K, V, O> {
    fn drop(&mut self) {
        // Every node that was not removed is linked on level 0, followed by
        // the tail. Removed nodes belong to the collector already.
        unsafe {
            let guard = epoch::unprotected();
            let mut curr = self.head.next[0].load(Relaxed, guard);
            while !curr.is_null() {
                let next = curr.deref().next[0].load(Relaxed, guard);
                drop(curr.into_owned());
                curr = next;
            }
        }
    }
}

impl<K, V> Default for SkipList<K, V, NaturalOrder>
where
    K: Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for SkipList<K, V, NaturalOrder>
where
    K: Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let list = SkipList::new();
        for (k, v) in iter {
            list.add(k, v);
        }
        list
    }
}

impl<K, V, O> fmt::Debug for SkipList<K, V, O>
where
    K: fmt::Debug + Send + Sync + 'static,
    V: fmt::Debug + Send + Sync + 'static,
    O: KeyOrder<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = epoch::pin();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{SkipList, LEVELS};
    use crate::error::Contended;
    use crate::order::KeyOrder;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use std::sync::atomic::Ordering::Acquire;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::scope;

    /// Walk every level while quiescent and check that keys increase, that
    /// nothing is marked or half linked, and that every level is a subset of
    /// the level below it. Returns the number of nodes per level.
    fn verify<K, V, O>(list: &SkipList<K, V, O>) -> [usize; LEVELS]
    where
        K: Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
        O: KeyOrder<K>,
    {
        let guard = crate::pin();
        let mut counts = [0; LEVELS];
        let mut below: Vec<K> = Vec::new();
        for level in 0..LEVELS {
            let mut keys: Vec<K> = Vec::new();
            let mut curr = unsafe { list.head.next[level].load(Acquire, &guard).deref() };
            while let Some((k, _)) = &curr.entry {
                assert!(!curr.is_marked());
                assert!(curr.is_fully_linked());
                assert!(curr.top_level >= level);
                if let Some(prev) = keys.last() {
                    assert!(list.order.less(prev, k));
                }
                if level > 0 {
                    assert!(below.iter().any(|b| list.order.equal(b, k)));
                }
                keys.push(k.clone());
                curr = unsafe { curr.next[level].load(Acquire, &guard).deref() };
            }
            counts[level] = keys.len();
            below = keys;
        }
        counts
    }

    #[test]
    fn test_skiplist_basic() {
        let list: SkipList<i64, i64> = SkipList::new();
        assert!(list.is_empty());
        for k in [5, 3, 8, 1] {
            assert!(list.add(k, k * 10));
        }
        assert_eq!(list.lookup(&3), Some(30));
        assert_eq!(list.lookup(&9), None);
        assert!(list.remove(&3));
        assert_eq!(list.lookup(&3), None);
        assert!(!list.remove(&3));

        let guard = crate::pin();
        let keys: Vec<i64> = list.iter(&guard).map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 5, 8]);
        assert_eq!(verify(&list)[0], 3);
    }

    #[test]
    fn test_skiplist_add_present_keeps_value() {
        let list = SkipList::new();
        assert!(list.add(7u32, "first"));
        assert!(!list.add(7u32, "second"));
        assert_eq!(list.lookup(&7), Some("first"));
        assert!(list.contains_key(&7));
        assert!(!list.contains_key(&8));
    }

    #[test]
    fn test_skiplist_remove_absent() {
        let list: SkipList<u32, ()> = SkipList::new();
        assert!(!list.remove(&1));
        list.add(2, ());
        assert!(!list.remove(&1));
        assert!(!list.remove(&3));
        assert!(list.remove(&2));
        assert!(list.is_empty());
    }

    #[test]
    fn test_skiplist_remove_tall_nodes() {
        let list: SkipList<u32, u32> = SkipList::new();
        let mut keys: Vec<u32> = (0..2000).collect();
        keys.shuffle(&mut rand::rng());
        for k in keys.iter() {
            assert!(list.add(*k, *k));
        }
        let counts = verify(&list);
        assert_eq!(counts[0], 2000);
        // With 2000 draws there are certainly nodes above level 0.
        assert!(counts[1] > 0);

        keys.shuffle(&mut rand::rng());
        for (i, k) in keys.iter().enumerate() {
            assert!(list.remove(k), "failed to remove {}", k);
            if i % 500 == 0 {
                assert_eq!(verify(&list)[0], 2000 - i - 1);
            }
        }
        assert!(list.is_empty());
        assert_eq!(verify(&list), [0; LEVELS]);
    }

    #[test]
    fn test_skiplist_walk() {
        let list: SkipList<u32, u32> = (0..10).map(|v| (v * 10, v)).collect();
        let guard = crate::pin();

        let first = list.first(&guard).unwrap();
        assert_eq!((*first.key(), *first.value()), (0, 0));
        let second = first.next().unwrap();
        assert_eq!(*second.key(), 10);

        // Walk forward from a position.
        let e = list.seek(&35, &guard).unwrap();
        assert_eq!(*e.key(), 40);
        let rest: Vec<u32> = e.iter().map(|(k, _)| *k).collect();
        assert_eq!(rest, vec![40, 50, 60, 70, 80, 90]);
        assert_eq!(list.seek(&40, &guard).map(|e| *e.key()), Some(40));
        assert!(list.seek(&91, &guard).is_none());

        // A removed entry is skipped by the walk.
        assert!(list.remove(&50));
        assert!(e.next().map(|e| *e.key()) == Some(60));
        let last = list.seek(&90, &guard).unwrap();
        assert!(last.next().is_none());
    }

    #[test]
    fn test_skiplist_iter_from_removed_entry() {
        let list: SkipList<u32, u32> = (1..6).map(|v| (v, v)).collect();
        let guard = crate::pin();
        let e = list.seek(&3, &guard).unwrap();
        assert!(list.remove(&3));
        assert!(e.is_removed());
        // The position still moves forward, but never yields itself.
        let rest: Vec<u32> = e.iter().map(|(k, _)| *k).collect();
        assert_eq!(rest, vec![4, 5]);

        // Removed between creating the iterator and the first step.
        let e = list.seek(&4, &guard).unwrap();
        let mut it = e.iter();
        assert!(list.remove(&4));
        assert_eq!(it.next().map(|(k, _)| *k), Some(5));
        assert!(it.next().is_none());
    }

    #[test]
    fn test_skiplist_range() {
        let list: SkipList<u32, u32> = (0..20).map(|v| (v, v)).collect();
        let guard = crate::pin();
        let r: Vec<u32> = list.range(5..9, &guard).map(|(k, _)| *k).collect();
        assert_eq!(r, vec![5, 6, 7, 8]);
        let r: Vec<u32> = list.range(17.., &guard).map(|(k, _)| *k).collect();
        assert_eq!(r, vec![17, 18, 19]);
        assert_eq!(list.range(..=3, &guard).count(), 4);
        assert_eq!(list.range(25..30, &guard).count(), 0);
        assert!(list.remove(&6));
        let r: Vec<u32> = list.range(5..=7, &guard).map(|(k, _)| *k).collect();
        assert_eq!(r, vec![5, 7]);
    }

    #[test]
    fn test_skiplist_custom_comparator() {
        let list = SkipList::with_comparator(
            |a: &String, b: &String| a.to_lowercase() < b.to_lowercase(),
            |a: &String, b: &String| a.to_lowercase() == b.to_lowercase(),
        );
        assert!(list.add("Beta".to_string(), 2));
        assert!(list.add("alpha".to_string(), 1));
        assert!(!list.add("ALPHA".to_string(), 3));
        assert_eq!(list.lookup(&"Alpha".to_string()), Some(1));
        let guard = crate::pin();
        let keys: Vec<&str> = list.iter(&guard).map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "Beta"]);
        verify(&list);
    }

    #[test]
    fn test_skiplist_bounded_ops() {
        let list: SkipList<u8, u8> = SkipList::new().with_retry_limit(4);
        assert_eq!(list.try_add(1, 1), Ok(true));
        assert_eq!(list.try_add(1, 2), Ok(false));
        assert_eq!(list.try_remove(&2), Ok(false));
        assert_eq!(list.try_remove(&1), Ok(true));

        let list: SkipList<u8, u8> = SkipList::new().with_retry_limit(0);
        assert_eq!(list.try_remove(&1), Err(Contended { attempts: 0 }));
    }

    #[test]
    fn test_skiplist_debug() {
        let list: SkipList<u8, &str> = SkipList::new();
        list.add(2, "b");
        list.add(1, "a");
        assert_eq!(format!("{:?}", list), r#"{1: "a", 2: "b"}"#);
    }

    static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

    struct DropCounter;

    impl Drop for DropCounter {
        fn drop(&mut self) {
            DROP_COUNT.fetch_add(1, Ordering::Release);
        }
    }

    #[test]
    fn test_skiplist_drop_releases_values() {
        let list = SkipList::new();
        for k in 0..100u32 {
            assert!(list.add(k, DropCounter));
        }
        assert_eq!(DROP_COUNT.load(Ordering::Acquire), 0);
        drop(list);
        assert_eq!(DROP_COUNT.load(Ordering::Acquire), 100);
    }

    const LOOP_CNT: usize = 1000;
    const TH_CNT: usize = 10;

    fn conservation_stress(key_range: i64) {
        let _ = tracing_subscriber::fmt::try_init();
        let list: SkipList<i64, usize> = SkipList::new();

        let (added, removed) = scope(|scope| {
            let list = &list;
            let handles: Vec<_> = (0..TH_CNT)
                .map(|id| {
                    scope.spawn(move || {
                        let mut rng = rand::rng();
                        let mut added = 0usize;
                        let mut removed = 0usize;
                        for _ in 0..LOOP_CNT {
                            let k = rng.random_range(0..key_range);
                            if list.add(k, id) {
                                added += 1;
                            }
                            if let Some(owner) = list.lookup(&k) {
                                if owner != id && list.remove(&k) {
                                    removed += 1;
                                }
                            }
                        }
                        (added, removed)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .fold((0, 0), |(a, r), (a1, r1)| (a + a1, r + r1))
        });

        let present = (0..key_range).filter(|k| list.contains_key(k)).count();
        assert_eq!(added - removed, present);
        assert_eq!(verify(&list)[0], present);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_skiplist_multithread_small_range() {
        conservation_stress(20);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_skiplist_multithread_wide_range() {
        conservation_stress(10_000);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_skiplist_bounded_under_contention() {
        // A limit of one gives up on the first failed validation. Whatever
        // mix of commits and give ups the threads see, a call that reported
        // Contended must have changed nothing.
        let list: SkipList<u32, usize> = SkipList::new().with_retry_limit(1);

        let (added, removed) = scope(|scope| {
            let list = &list;
            let handles: Vec<_> = (0..TH_CNT)
                .map(|id| {
                    scope.spawn(move || {
                        let mut rng = rand::rng();
                        let mut added = 0usize;
                        let mut removed = 0usize;
                        for _ in 0..LOOP_CNT {
                            let k = rng.random_range(0..8u32);
                            match list.try_add(k, id) {
                                Ok(true) => added += 1,
                                Ok(false) => {}
                                Err(e) => assert_eq!(e, Contended { attempts: 1 }),
                            }
                            match list.try_remove(&k) {
                                Ok(true) => removed += 1,
                                Ok(false) => {}
                                Err(e) => assert_eq!(e, Contended { attempts: 1 }),
                            }
                        }
                        (added, removed)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .fold((0, 0), |(a, r), (a1, r1)| (a + a1, r + r1))
        });

        let present = (0..8u32).filter(|k| list.contains_key(k)).count();
        assert_eq!(added - removed, present);
        assert_eq!(verify(&list)[0], present);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_skiplist_same_key_race() {
        for _ in 0..50 {
            let list: SkipList<u32, usize> = SkipList::new();
            let winners = AtomicUsize::new(0);
            let winner = scope(|scope| {
                let handles: Vec<_> = (0..8)
                    .map(|id| {
                        let list = &list;
                        let winners = &winners;
                        scope.spawn(move || {
                            if list.add(1, id) {
                                winners.fetch_add(1, Ordering::Relaxed);
                                Some(id)
                            } else {
                                None
                            }
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|h| h.join().unwrap())
                    .next()
            });
            assert_eq!(winners.load(Ordering::Relaxed), 1);
            assert_eq!(list.lookup(&1), winner);
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_skiplist_iter_during_writes() {
        let list: SkipList<u32, u32> = SkipList::new();
        for k in (0..400).step_by(2) {
            list.add(k, k);
        }

        scope(|scope| {
            let list = &list;
            let writers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(move || {
                        let mut rng = rand::rng();
                        for _ in 0..4000 {
                            let k = rng.random_range(0..200u32) * 2 + 1;
                            if rng.random_bool(0.5) {
                                list.add(k, k);
                            } else {
                                list.remove(&k);
                            }
                        }
                    })
                })
                .collect();

            for _ in 0..200 {
                let guard = crate::pin();
                let keys: Vec<u32> = list.iter(&guard).map(|(k, _)| *k).collect();
                assert!(keys.windows(2).all(|w| w[0] < w[1]));
                assert_eq!(keys.iter().filter(|k| *k % 2 == 0).count(), 200);
                // Readers see every untouched key.
                assert!((0..400).step_by(2).all(|k| list.contains_key(&k)));
            }

            for h in writers.into_iter() {
                h.join().unwrap();
            }
        });
        verify(&list);
    }
}
