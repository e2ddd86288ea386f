//! Generic bounded key/value cache with reference-counted handles, an
//! external eviction (deleter) callback, and thread-safe concurrent access.
//!
//! Entries declare a non-negative "charge" toward the cache's capacity.
//! `insert`/`lookup` return a pinned [`Handle`] that the caller must match
//! with exactly one [`LruCache::release`]; the entry's deleter runs at most
//! once, when the entry is no longer in the table and its last handle is
//! released, and always without the cache's internal lock held.
//!
//! Implemented as an intrusive doubly linked list (LRU order, entries with
//! exactly one outstanding reference -- the cache's own) paired with a
//! `HashMap` for O(1) lookup, the shape the reference implementation's
//! `LRUHandle`/`LRUCache` uses and the pattern demonstrated end-to-end for a
//! hand-rolled Rust LRU in the retrieved corpus.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

type Deleter<K, V> = Box<dyn FnOnce(K, V) + Send>;

struct Entry<K, V> {
    key: K,
    value: V,
    charge: usize,
    /// While `in_cache`, the table itself holds one reference; additional
    /// handles add more. An entry is freed when this reaches zero.
    refs: usize,
    in_cache: bool,
    deleter: Option<Deleter<K, V>>,
    prev: *mut Entry<K, V>,
    next: *mut Entry<K, V>,
}

/// A pinned reference to a cache entry, owed exactly one matching
/// [`LruCache::release`].
pub struct Handle<K, V> {
    entry: *mut Entry<K, V>,
}

// SAFETY: a `Handle` is just an opaque reference-counted pointer into memory
// owned by the `LruCache`; all access to the pointee goes through the
// cache's own mutex.
unsafe impl<K: Send, V: Send> Send for Handle<K, V> {}

struct Shared<K, V> {
    table: HashMap<K, *mut Entry<K, V>>,
    lru_head: *mut Entry<K, V>,
    lru_tail: *mut Entry<K, V>,
    usage: usize,
}

impl<K, V> Shared<K, V> {
    fn list_push_front(&mut self, entry: *mut Entry<K, V>) {
        unsafe {
            (*entry).prev = std::ptr::null_mut();
            (*entry).next = self.lru_head;
            if !self.lru_head.is_null() {
                (*self.lru_head).prev = entry;
            } else {
                self.lru_tail = entry;
            }
        }
        self.lru_head = entry;
    }

    fn list_remove(&mut self, entry: *mut Entry<K, V>) {
        unsafe {
            if !(*entry).prev.is_null() {
                (*(*entry).prev).next = (*entry).next;
            } else {
                self.lru_head = (*entry).next;
            }
            if !(*entry).next.is_null() {
                (*(*entry).next).prev = (*entry).prev;
            } else {
                self.lru_tail = (*entry).prev;
            }
            (*entry).prev = std::ptr::null_mut();
            (*entry).next = std::ptr::null_mut();
        }
    }
}

/// A bounded, thread-safe, charge-aware LRU cache.
pub struct LruCache<K, V> {
    shared: Mutex<Shared<K, V>>,
    capacity: usize,
    next_id: AtomicU64,
}

// SAFETY: all access to entry pointers is mediated by `shared`'s mutex; the
// pointers never escape except wrapped in `Handle`, whose own `Send` bound
// carries the same justification.
unsafe impl<K: Send, V: Send> Send for LruCache<K, V> {}
unsafe impl<K: Send, V: Send> Sync for LruCache<K, V> {}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        LruCache {
            shared: Mutex::new(Shared {
                table: HashMap::new(),
                lru_head: std::ptr::null_mut(),
                lru_tail: std::ptr::null_mut(),
                usage: 0,
            }),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Installs `(key, value)` with the given `charge`, returning a pinned
    /// handle. If `key` was already present, the prior entry is unlinked
    /// from the table immediately and destroyed once its outstanding
    /// handles (if any) are released. Evicts from the LRU tail, after
    /// insertion, until usage is at or below capacity.
    pub fn insert(
        &self,
        key: K,
        value: V,
        charge: usize,
        deleter: impl FnOnce(K, V) + Send + 'static,
    ) -> Handle<K, V> {
        let entry = Box::into_raw(Box::new(Entry {
            key: key.clone(),
            value,
            charge,
            refs: 2, // one for the table, one for the handle returned here
            in_cache: true,
            deleter: Some(Box::new(deleter)),
            prev: std::ptr::null_mut(),
            next: std::ptr::null_mut(),
        }));

        let mut to_run = Vec::new();
        {
            let mut shared = self.shared.lock();
            if let Some(old) = shared.table.remove(&key) {
                Self::detach_for_removal(&mut shared, old, &mut to_run);
            }
            shared.table.insert(key, entry);
            shared.usage += charge;
            // Only the cache's own reference (not the handle held by the
            // caller) makes an entry evictable, so the freshly inserted
            // entry is intentionally left off the LRU list until its
            // caller-side reference is released via `release`.
            while shared.usage > self.capacity && !shared.lru_tail.is_null() {
                let victim = shared.lru_tail;
                shared.list_remove(victim);
                // SAFETY: `victim` was reached via the LRU list, so it is a
                // live, `in_cache` entry with refs == 1 (the table's own).
                unsafe {
                    shared.table.remove(&(*victim).key);
                    shared.usage -= (*victim).charge;
                    (*victim).in_cache = false;
                }
                Self::unref(&mut shared, victim, &mut to_run);
            }
        }
        Self::run_deleters(to_run);

        Handle { entry }
    }

    /// Looks up `key`, returning a pinned handle and moving the entry to the
    /// most-recently-used position, or `None` on a miss.
    pub fn lookup(&self, key: &K) -> Option<Handle<K, V>> {
        let mut shared = self.shared.lock();
        let entry = *shared.table.get(key)?;
        // SAFETY: `entry` is a live pointer owned by the table.
        unsafe {
            if (*entry).refs == 1 {
                // Currently only cache-referenced: it must be on the LRU
                // list; remove it, since it is about to gain a handle.
                shared.list_remove(entry);
            }
            (*entry).refs += 1;
        }
        Some(Handle { entry })
    }

    /// Returns the value behind `handle`.
    pub fn value<'a>(&self, handle: &'a Handle<K, V>) -> &'a V {
        // SAFETY: `handle` owns a reference, so `entry` is guaranteed live.
        unsafe { &(*handle.entry).value }
    }

    /// Drops one reference. Runs the entry's deleter, without the cache
    /// lock held, if this was the last reference and the entry is no longer
    /// in the table.
    pub fn release(&self, handle: Handle<K, V>) {
        let mut to_run = Vec::new();
        {
            let mut shared = self.shared.lock();
            let entry = handle.entry;
            // SAFETY: releasing a handle returns its reference; the entry
            // stays alive until this function (or a subsequent list removal
            // plus unref) actually frees it.
            unsafe {
                (*entry).refs -= 1;
                if (*entry).refs == 1 && (*entry).in_cache {
                    // Back down to only the cache's own reference: eligible
                    // for eviction again.
                    shared.list_push_front(entry);
                    return;
                }
            }
            Self::unref(&mut shared, entry, &mut to_run);
        }
        Self::run_deleters(to_run);
    }

    /// Removes `key` from the table and LRU list; destruction is deferred
    /// until outstanding handles are released.
    pub fn erase(&self, key: &K) {
        let mut to_run = Vec::new();
        {
            let mut shared = self.shared.lock();
            if let Some(entry) = shared.table.remove(key) {
                Self::detach_for_removal(&mut shared, entry, &mut to_run);
            }
        }
        Self::run_deleters(to_run);
    }

    /// A fresh 64-bit identifier, strictly increasing per cache instance.
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn usage(&self) -> usize {
        self.shared.lock().usage
    }

    /// Removes an entry already known to be out of the table (either
    /// overwritten by a new insert with the same key, or explicitly erased):
    /// unlinks it from the LRU list if present there and drops the table's
    /// own reference.
    fn detach_for_removal(
        shared: &mut Shared<K, V>,
        entry: *mut Entry<K, V>,
        to_run: &mut Vec<(Box<dyn FnOnce() + Send>,)>,
    ) {
        // SAFETY: `entry` was just removed from `shared.table`, so it is
        // still a live, owned allocation.
        unsafe {
            if (*entry).refs == 1 {
                shared.list_remove(entry);
            }
            (*entry).in_cache = false;
        }
        Self::unref(shared, entry, to_run);
    }

    /// Drops the cache's own reference to `entry`. If this brings the
    /// reference count to zero, reclaims the allocation and queues its
    /// deleter to run after the lock is released.
    fn unref(
        _shared: &mut Shared<K, V>,
        entry: *mut Entry<K, V>,
        to_run: &mut Vec<(Box<dyn FnOnce() + Send>,)>,
    ) {
        // SAFETY: caller guarantees `entry` is a live allocation this
        // function is entitled to drop one reference from.
        unsafe {
            (*entry).refs -= 1;
            if (*entry).refs == 0 {
                let mut boxed = Box::from_raw(entry);
                if let Some(deleter) = boxed.deleter.take() {
                    let key = std::ptr::read(&boxed.key);
                    let value = std::ptr::read(&boxed.value);
                    // `boxed`'s key/value are logically moved out above; forget
                    // it so its Drop impl does not double-drop them, while the
                    // allocation itself is still reclaimed by `Box::from_raw`
                    // going out of scope as a plain deallocation.
                    std::mem::forget(boxed);
                    to_run.push((Box::new(move || deleter(key, value)),));
                }
            }
        }
    }

    fn run_deleters(to_run: Vec<(Box<dyn FnOnce() + Send>,)>) {
        for (f,) in to_run {
            f();
        }
    }
}

impl<K, V> Drop for Entry<K, V> {
    fn drop(&mut self) {
        // The deleter (and the key/value it needs) is taken and run
        // explicitly by `LruCache::unref`; ordinary drop only runs when an
        // entry is dropped some other way (it is not, in this module, but
        // keeping this a no-op documents that key/value ownership is
        // resolved by `unref`, not by this impl).
    }
}
