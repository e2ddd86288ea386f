//! Probabilistic ordered index over byte-string keys, allocated from an
//! arena, with a lock-free single-writer/multi-reader concurrency protocol.
//!
//! Keys are immutable once inserted, and the caller is responsible for
//! guaranteeing uniqueness (the memtable's `(user_key, sequence)` pairing
//! discharges this for its own use). A single thread is expected to call
//! [`SkipList::insert`]; any number of threads may read concurrently through
//! [`SkipList::contains`] or an [`Iter`]. That contract is not enforced by
//! the type system — mirroring the reference implementation, it is an
//! invariant callers must uphold, which is why every mutation goes through
//! `&self` rather than `&mut self` and is backed by raw pointers and atomics
//! instead of ordinary owned fields.

use crate::arena::Arena;
use rand::Rng;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

const MAX_HEIGHT: usize = 12;
const BRANCHING_FACTOR: u32 = 4;

/// A comparator over raw keys as the skip list stores them.
pub trait KeyComparator: Send + Sync {
    fn compare_keys(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering;
}

#[repr(C)]
struct Node {
    key_ptr: *const u8,
    key_len: usize,
    height: usize,
    // `height` `AtomicPtr<Node>` slots follow immediately after this header
    // in the same arena allocation; accessed via `next_slot`.
}

impl Node {
    /// Size in bytes of a node with `height` tower levels.
    fn size_for_height(height: usize) -> usize {
        std::mem::size_of::<Node>() + height * std::mem::size_of::<AtomicPtr<Node>>()
    }

    unsafe fn next_slot(node: *mut Node, level: usize) -> *const AtomicPtr<Node> {
        debug_assert!(level < (*node).height);
        let base = (node as *const u8).add(std::mem::size_of::<Node>());
        (base as *const AtomicPtr<Node>).add(level)
    }

    unsafe fn next(node: *const Node, level: usize) -> *mut Node {
        (*Self::next_slot(node as *mut Node, level)).load(Ordering::Acquire)
    }

    unsafe fn set_next(node: *mut Node, level: usize, x: *mut Node) {
        (*Self::next_slot(node, level)).store(x, Ordering::Release);
    }

    unsafe fn key<'a>(node: *const Node) -> &'a [u8] {
        std::slice::from_raw_parts((*node).key_ptr, (*node).key_len)
    }
}

pub struct SkipList<Cmp> {
    comparator: Cmp,
    arena: UnsafeCell<Arena>,
    head: *mut Node,
    max_height: AtomicUsize,
}

// SAFETY: mutation (`insert`) is only sound when called by a single writer
// thread at a time, per this type's documented contract; reads
// (`contains`/`Iter`) only ever load through `Acquire` atomics paired with
// the writer's `Release` stores, so a reader that observes a node's
// successor pointer observes that node's fully initialized contents.
unsafe impl<Cmp: Send> Send for SkipList<Cmp> {}
unsafe impl<Cmp: Sync> Sync for SkipList<Cmp> {}

impl<Cmp: KeyComparator> SkipList<Cmp> {
    pub fn new(comparator: Cmp) -> Self {
        let mut arena = Arena::new();
        let head = Self::allocate_node_in(&mut arena, &[], MAX_HEIGHT);
        for level in 0..MAX_HEIGHT {
            unsafe { Node::set_next(head, level, std::ptr::null_mut()) };
        }
        SkipList {
            comparator,
            arena: UnsafeCell::new(arena),
            head,
            max_height: AtomicUsize::new(1),
        }
    }

    fn allocate_node_in(arena: &mut Arena, key: &[u8], height: usize) -> *mut Node {
        let node_size = Node::size_for_height(height);
        let ptr = arena.allocate_aligned(node_size) as *mut Node;
        let key_ptr = if key.is_empty() {
            std::ptr::null()
        } else {
            let dst = arena.allocate(key.len());
            // SAFETY: `dst` is a fresh allocation of exactly `key.len()` bytes.
            unsafe { std::ptr::copy_nonoverlapping(key.as_ptr(), dst, key.len()) };
            dst as *const u8
        };
        // SAFETY: `ptr` is a fresh, correctly sized and aligned allocation.
        unsafe {
            std::ptr::write(
                ptr,
                Node {
                    key_ptr,
                    key_len: key.len(),
                    height,
                },
            );
            for level in 0..height {
                Node::set_next(ptr, level, std::ptr::null_mut());
            }
        }
        ptr
    }

    fn random_height(&self) -> usize {
        let mut height = 1;
        let mut rng = rand::thread_rng();
        while height < MAX_HEIGHT && rng.gen_range(0..BRANCHING_FACTOR) == 0 {
            height += 1;
        }
        height
    }

    fn get_max_height(&self) -> usize {
        self.max_height.load(Ordering::Acquire)
    }

    fn key_is_after(&self, node: *const Node, key: &[u8]) -> bool {
        !node.is_null() && self.comparator.compare_keys(unsafe { Node::key(node) }, key) == std::cmp::Ordering::Less
    }

    /// Returns the first node with key `>= key`, filling `prev` (if given)
    /// with the last node seen at each level before it.
    fn find_greater_or_equal(&self, key: &[u8], mut prev: Option<&mut [*mut Node; MAX_HEIGHT]>) -> *mut Node {
        let mut level = self.get_max_height() - 1;
        let mut x = self.head;
        loop {
            let next = unsafe { Node::next(x, level) };
            if self.key_is_after(next, key) {
                x = next;
            } else {
                if let Some(prev) = prev.as_deref_mut() {
                    prev[level] = x;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    fn find_last(&self) -> *mut Node {
        let mut level = self.get_max_height() - 1;
        let mut x = self.head;
        loop {
            let next = unsafe { Node::next(x, level) };
            if next.is_null() {
                if level == 0 {
                    return x;
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }

    /// Inserts `key`. The caller guarantees no equal key is already present.
    ///
    /// Must not be called concurrently with itself; may be called
    /// concurrently with reads.
    pub fn insert(&self, key: &[u8]) {
        let mut prev: [*mut Node; MAX_HEIGHT] = [self.head; MAX_HEIGHT];
        let x = self.find_greater_or_equal(key, Some(&mut prev));
        debug_assert!(
            x.is_null() || self.comparator.compare_keys(unsafe { Node::key(x) }, key) != std::cmp::Ordering::Equal,
            "duplicate key inserted into skip list"
        );

        let height = self.random_height();
        let max_height = self.get_max_height();
        if height > max_height {
            for slot in prev.iter_mut().take(height).skip(max_height) {
                *slot = self.head;
            }
            // Published last, after the per-level links below are wired, so
            // a reader that observes the new height already observes a
            // fully linked node at every one of those levels.
        }

        // SAFETY: single-writer discipline; `self.arena` is mutated only
        // from this method, which the type's contract requires run on one
        // thread at a time.
        let arena = unsafe { &mut *self.arena.get() };
        let new_node = Self::allocate_node_in(arena, key, height);

        for level in 0..height {
            unsafe {
                Node::set_next(new_node, level, Node::next(prev[level], level));
                Node::set_next(prev[level], level, new_node);
            }
        }

        if height > max_height {
            self.max_height.store(height, Ordering::Release);
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let x = self.find_greater_or_equal(key, None);
        !x.is_null() && self.comparator.compare_keys(unsafe { Node::key(x) }, key) == std::cmp::Ordering::Equal
    }

    pub fn iter(&self) -> Iter<'_, Cmp> {
        Iter {
            list: self,
            node: std::ptr::null_mut(),
        }
    }

    /// A read-only pointer to the backing arena, for callers (the memtable)
    /// that want to report `memory_usage()` without this type exposing the
    /// arena as a public field.
    pub fn arena_ptr(&self) -> *const Arena {
        self.arena.get() as *const Arena
    }
}

/// A bidirectional iterator over a [`SkipList`]'s keys in comparator order.
pub struct Iter<'a, Cmp> {
    list: &'a SkipList<Cmp>,
    node: *mut Node,
}

impl<'a, Cmp: KeyComparator> Iter<'a, Cmp> {
    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    /// The key at the current position. Panics if the iterator is not
    /// positioned on a valid node.
    pub fn key(&self) -> &'a [u8] {
        assert!(self.valid());
        unsafe { Node::key(self.node) }
    }

    pub fn next(&mut self) {
        assert!(self.valid());
        self.node = unsafe { Node::next(self.node, 0) };
    }

    /// Moves to the last node with key `< self.key()`, implemented by
    /// re-seeking from the head: the skip list keeps no back pointers, so
    /// reverse iteration costs roughly twice the forward-seek cost.
    pub fn prev(&mut self) {
        assert!(self.valid());
        let key = unsafe { Node::key(self.node) }.to_vec();
        let node = self.list.find_greater_or_equal(&key, None);
        self.node = self.seek_to_last_before(node);
    }

    fn seek_to_last_before(&self, target: *mut Node) -> *mut Node {
        let mut level = self.list.get_max_height() - 1;
        let mut x = self.list.head;
        loop {
            let next = unsafe { Node::next(x, level) };
            if next.is_null() || next == target {
                if level == 0 {
                    return if x == self.list.head { std::ptr::null_mut() } else { x };
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }

    pub fn seek(&mut self, target: &[u8]) {
        self.node = self.list.find_greater_or_equal(target, None);
    }

    pub fn seek_to_first(&mut self) {
        self.node = unsafe { Node::next(self.list.head, 0) };
    }

    pub fn seek_to_last(&mut self) {
        let last = self.list.find_last();
        self.node = if last == self.list.head { std::ptr::null_mut() } else { last };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    struct Bytewise;
    impl KeyComparator for Bytewise {
        fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
            a.cmp(b)
        }
    }

    #[test]
    fn forward_iteration_visits_every_key_in_order() {
        let list = SkipList::new(Bytewise);
        let keys: Vec<Vec<u8>> = (0..200).map(|i: i32| format!("key{:04}", i).into_bytes()).collect();
        let mut shuffled = keys.clone();
        // deterministic pseudo-shuffle without pulling in an extra crate
        shuffled.sort_by_key(|k| {
            let mut h: u64 = 1469598103934665603;
            for &b in k {
                h ^= b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            h
        });
        for k in &shuffled {
            list.insert(k);
        }
        let mut it = list.iter();
        it.seek_to_first();
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(seen, keys);
    }

    #[test]
    fn contains_reflects_inserted_keys() {
        let list = SkipList::new(Bytewise);
        list.insert(b"alpha");
        list.insert(b"gamma");
        assert!(list.contains(b"alpha"));
        assert!(list.contains(b"gamma"));
        assert!(!list.contains(b"beta"));
    }

    #[test]
    fn seek_lands_on_first_key_greater_or_equal() {
        let list = SkipList::new(Bytewise);
        for k in ["a", "c", "e", "g"] {
            list.insert(k.as_bytes());
        }
        let mut it = list.iter();
        it.seek(b"d");
        assert!(it.valid());
        assert_eq!(it.key(), b"e");
    }

    #[test]
    fn prev_walks_backward() {
        let list = SkipList::new(Bytewise);
        for k in ["a", "b", "c"] {
            list.insert(k.as_bytes());
        }
        let mut it = list.iter();
        it.seek_to_last();
        assert_eq!(it.key(), b"c");
        it.prev();
        assert_eq!(it.key(), b"b");
        it.prev();
        assert_eq!(it.key(), b"a");
    }

    #[test]
    fn empty_list_has_no_valid_position() {
        let list: SkipList<Bytewise> = SkipList::new(Bytewise);
        let mut it = list.iter();
        it.seek_to_first();
        assert!(!it.valid());
        it.seek_to_last();
        assert!(!it.valid());
    }
}
