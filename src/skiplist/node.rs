use crossbeam_epoch::Atomic;
use parking_lot::Mutex;
use rand::Rng;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Acquire;

/// The highest level a node can occupy. Level 0 is the bottom level, so a
/// skip list has `MAX_LEVEL + 1` levels.
pub const MAX_LEVEL: usize = 7;
pub(super) const LEVELS: usize = MAX_LEVEL + 1;

pub(super) struct Node<K, V> {
    // None for the head and tail sentinels.
    pub(super) entry: Option<(K, V)>,
    pub(super) top_level: usize,
    pub(super) marked: AtomicBool,
    pub(super) fully_linked: AtomicBool,
    pub(super) lock: Mutex<()>,
    // One slot per level in 0..=top_level.
    pub(super) next: Box<[Atomic<Node<K, V>>]>,
}

impl<K, V> Node<K, V> {
    pub(super) fn new(entry: Option<(K, V)>, top_level: usize) -> Self {
        debug_assert!(top_level <= MAX_LEVEL);
        Node {
            entry,
            top_level,
            marked: AtomicBool::new(false),
            fully_linked: AtomicBool::new(false),
            lock: Mutex::new(()),
            next: (0..=top_level).map(|_| Atomic::null()).collect(),
        }
    }

    #[inline]
    pub(super) fn is_marked(&self) -> bool {
        self.marked.load(Acquire)
    }

    #[inline]
    pub(super) fn is_fully_linked(&self) -> bool {
        self.fully_linked.load(Acquire)
    }
}

/// Draw the top level for a new node.
///
/// Level `L` is chosen with probability `(3/4) * (1/4)^L`, so each level is
/// four times less likely than the one below it and three in four nodes live
/// on level 0 only. The little mass left over after level 6 goes to
/// [`MAX_LEVEL`].
pub fn random_level<R: Rng>(rng: &mut R) -> usize {
    // Two bits of entropy per level.
    let r: u32 = rng.random_range(0..1 << (LEVELS * 2));
    for level in 0..MAX_LEVEL {
        if r >= 1 << ((MAX_LEVEL - level) * 2) {
            return level;
        }
    }
    MAX_LEVEL
}
