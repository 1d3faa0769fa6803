//! LazyList - A sorted linked list with per-node locks
//!
//! A [LazyList] is a sorted, duplicate free map that many threads can insert
//! into, remove from and read at the same time through a shared reference.
//! There is no structure wide lock. Each node has its own mutex, and a writer
//! only ever holds the locks of the two nodes either side of the link it is
//! changing.
//!
//! Writers are optimistic. They walk the list without locking to find their
//! position, lock the predecessor and then the current node, and validate that
//! both are still present and still adjacent. If another writer got there first
//! they let go and start again. As every writer takes its two locks in list
//! order there is no circular wait.
//!
//! Removal is "lazy": a node is first marked, which removes it logically, and
//! then unlinked. Readers never lock. They simply skip marked nodes, which
//! makes lookups and iteration non-blocking.
//!
//! This is the list described in "The Art of Multiprocessor Programming" by
//! Herlihy and Shavit. Iteration is not a snapshot. It observes whatever
//! concurrent changes have taken effect by the time it reaches each node, but
//! it is always in key order and never yields a removed node or the same key
//! twice.

mod iter;

pub use iter::{Iter, Range};

use crossbeam_epoch as epoch;
use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;
use tracing::trace;

use std::fmt;
use std::ops::{RangeBounds, RangeFull};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::error::Contended;
use crate::order::{FnOrder, KeyOrder, NaturalOrder};
use crate::retry::{self, Attempt};
use crate::DEFAULT_RETRY_LIMIT;

struct Node<K, V> {
    // None for the head and tail sentinels.
    entry: Option<(K, V)>,
    next: Atomic<Node<K, V>>,
    marked: AtomicBool,
    lock: Mutex<()>,
}

impl<K, V> Node<K, V> {
    fn new(entry: Option<(K, V)>) -> Self {
        Node {
            entry,
            next: Atomic::null(),
            marked: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    #[inline]
    fn is_marked(&self) -> bool {
        self.marked.load(Acquire)
    }
}

/// A concurrent sorted map built on a lock coupled linked list.
///
/// All operations take `&self`, so the list can be shared between threads
/// with an `Arc` or a scoped borrow. See the [module documentation](self) for
/// the concurrency guarantees.
///
/// # Examples
/// ```
/// use lazyskip::lazylist::LazyList;
///
/// let list = LazyList::new();
/// assert!(list.add(2, "b"));
/// assert!(list.add(1, "a"));
/// // Keys are unique, the existing value is kept.
/// assert!(!list.add(1, "z"));
/// assert_eq!(list.lookup(&1), Some("a"));
///
/// let guard = lazyskip::pin();
/// let in_range: Vec<_> = list.range(1..2, &guard).collect();
/// assert_eq!(in_range, vec![(&1, &"a")]);
///
/// assert!(list.remove(&1));
/// assert_eq!(list.lookup(&1), None);
/// ```
pub struct LazyList<K, V, O = NaturalOrder> {
    head: Node<K, V>,
    order: O,
    retry_limit: usize,
}

impl<K, V> LazyList<K, V, NaturalOrder>
where
    K: Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create an empty list ordered by the key's [`Ord`] implementation.
    pub fn new() -> Self {
        Self::with_order(NaturalOrder)
    }
}

impl<K, V, L, E> LazyList<K, V, FnOrder<L, E>>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    L: Fn(&K, &K) -> bool,
    E: Fn(&K, &K) -> bool,
{
    /// Create an empty list ordered by a strict `less` predicate and the
    /// equality `eq` consistent with it.
    pub fn with_comparator(less: L, eq: E) -> Self {
        Self::with_order(FnOrder::new(less, eq))
    }
}

impl<K, V, O> LazyList<K, V, O>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    O: KeyOrder<K>,
{
    /// Create an empty list ordered by `order`.
    pub fn with_order(order: O) -> Self {
        let head = Node::new(None);
        head.next.store(Owned::new(Node::new(None)), Relaxed);
        LazyList {
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
            // The tail sorts after everything.
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

    /// Walk without locking to the last node before `key` and the node after
    /// it. Marked nodes are stepped over, validation rejects them later if one
    /// ends up as the predecessor.
    fn search<'g>(
        &'g self,
        key: &K,
        guard: &'g Guard,
    ) -> (&'g Node<K, V>, Shared<'g, Node<K, V>>, &'g Node<K, V>) {
        let mut pred = &self.head;
        let mut curr = pred.next.load(Acquire, guard);
        loop {
            // Only the tail has a null successor, and the walk stops at the tail.
            let node = unsafe { curr.deref() };
            if !(node.is_marked() || self.precedes(node, key)) {
                return (pred, curr, node);
            }
            pred = node;
            curr = node.next.load(Acquire, guard);
        }
    }

    /// Both nodes are still present and pred still links to curr. Must be
    /// called with both locks held.
    #[inline]
    fn validate<'g>(
        &self,
        pred: &Node<K, V>,
        curr_ptr: Shared<'g, Node<K, V>>,
        curr: &Node<K, V>,
        guard: &'g Guard,
    ) -> bool {
        !pred.is_marked() && !curr.is_marked() && pred.next.load(Acquire, guard) == curr_ptr
    }

    fn add_attempt<'g>(&'g self, key: K, value: V, guard: &'g Guard) -> Attempt<(K, V)> {
        let (pred, curr_ptr, curr) = self.search(&key, guard);
        // Always pred before curr.
        let _pred_lock = pred.lock.lock();
        let _curr_lock = curr.lock.lock();

        if !self.validate(pred, curr_ptr, curr, guard) {
            trace!("add validation failed, retrying");
            return Attempt::Retry((key, value));
        }
        if self.matches(curr, &key) {
            return Attempt::Done(false);
        }

        let node = Owned::new(Node::new(Some((key, value))));
        node.next.store(curr_ptr, Relaxed);
        pred.next.store(node, Release);
        Attempt::Done(true)
    }

    fn remove_attempt<'g>(&'g self, key: &K, guard: &'g Guard) -> Attempt<()> {
        let (pred, curr_ptr, curr) = self.search(key, guard);
        let pred_lock = pred.lock.lock();
        let curr_lock = curr.lock.lock();

        if !self.validate(pred, curr_ptr, curr, guard) {
            trace!("remove validation failed, retrying");
            return Attempt::Retry(());
        }
        if !self.matches(curr, key) {
            return Attempt::Done(false);
        }

        // Logical removal first, readers treat the node as absent from here.
        curr.marked.store(true, Release);
        pred.next.store(curr.next.load(Acquire, guard), Release);
        drop(curr_lock);
        drop(pred_lock);

        // We unlinked it while holding both locks, so no other thread can
        // unlink it again. Readers that are still on it keep it alive.
        unsafe { guard.defer_destroy(curr_ptr) };
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
        let mut curr = unsafe { self.head.next.load(Acquire, guard).deref() };
        while self.precedes(curr, key) {
            curr = unsafe { curr.next.load(Acquire, guard).deref() };
        }
        match &curr.entry {
            Some((k, v)) if self.order.equal(k, key) && !curr.is_marked() => Some(v),
            _ => None,
        }
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

    /// Iterate in key order over the entries that fall inside `range`.
    ///
    /// `list.range(lo..hi, &guard)` visits the half open interval `[lo, hi)`.
    /// Every call starts a new walk from the front of the list.
    pub fn range<'g, R>(&'g self, range: R, guard: &'g Guard) -> Range<'g, K, V, O, R>
    where
        R: RangeBounds<K>,
    {
        Range::new(self, range, guard)
    }

    /// Iterate over every entry in key order.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K, V, O> {
        self.range(RangeFull, guard)
    }

    /// True if no key is present.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.iter(&guard).next().is_none()
    }
}

impl<K, V, O> Drop for LazyList<K, V, O> {
    fn drop(&mut self) {
        // We have &mut self, so no operation is in flight and every node still
        // in the chain is owned by us alone. Removed nodes were already handed
        // to the collector.
        unsafe {
            let guard = epoch::unprotected();
            let mut curr = self.head.next.load(Relaxed, guard);
            while !curr.is_null() {
                let next = curr.deref().next.load(Relaxed, guard);
                drop(curr.into_owned());
                curr = next;
            }
        }
    }
}

impl<K, V> Default for LazyList<K, V, NaturalOrder>
where
    K: Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for LazyList<K, V, NaturalOrder>
where
    K: Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let list = LazyList::new();
        for (k, v) in iter {
            list.add(k, v);
        }
        list
    }
}

impl<K, V, O> fmt::Debug for LazyList<K, V, O>
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
