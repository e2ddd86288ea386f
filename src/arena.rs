//! Bump-pointer block allocator.
//!
//! The arena owns a growing list of heap blocks and serves allocations by
//! advancing a pointer into the current block, falling back to a fresh block
//! (or, for large requests, a dedicated one) when the current block runs out
//! of room. Nothing is ever freed individually; the whole arena is released
//! at once when it is dropped.
//!
//! Not safe for concurrent mutation: the memtable's single-writer discipline
//! is what makes this sound. `memory_usage()` may be read from other threads
//! while the writer allocates, so that one counter is atomic.

use std::sync::atomic::{AtomicUsize, Ordering};

const BLOCK_SIZE: usize = 4096;

pub struct Arena {
    blocks: Vec<Vec<u8>>,
    alloc_ptr: *mut u8,
    alloc_bytes_remaining: usize,
    memory_usage: AtomicUsize,
}

// SAFETY: all mutation goes through `&mut self`; the raw pointers this type
// holds point only into blocks it owns and never outlive the arena itself.
// `memory_usage` is the only field read without exclusive access, and it is
// atomic.
unsafe impl Send for Arena {}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            blocks: Vec::new(),
            alloc_ptr: std::ptr::null_mut(),
            alloc_bytes_remaining: 0,
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Returns a pointer to `n` writable bytes whose lifetime equals the
    /// arena's own.
    pub fn allocate(&mut self, n: usize) -> *mut u8 {
        assert!(n > 0);
        if n <= self.alloc_bytes_remaining {
            let result = self.alloc_ptr;
            // SAFETY: `result` through `result + n` was reserved by a prior
            // block allocation and `n <= alloc_bytes_remaining` guarantees it
            // stays within that block.
            unsafe {
                self.alloc_ptr = self.alloc_ptr.add(n);
            }
            self.alloc_bytes_remaining -= n;
            return result;
        }
        self.allocate_fallback(n)
    }

    fn allocate_fallback(&mut self, n: usize) -> *mut u8 {
        if n > BLOCK_SIZE / 4 {
            // Large allocations get a dedicated block so they don't waste
            // the bulk of a fresh 4096-byte block; the current block's
            // remaining space is left for future small allocations.
            return self.allocate_new_block(n);
        }
        let ptr = self.allocate_new_block(BLOCK_SIZE);
        self.alloc_ptr = ptr;
        self.alloc_bytes_remaining = BLOCK_SIZE;
        // SAFETY: the block just allocated is exactly BLOCK_SIZE bytes.
        let result = self.alloc_ptr;
        unsafe {
            self.alloc_ptr = self.alloc_ptr.add(n);
        }
        self.alloc_bytes_remaining -= n;
        result
    }

    /// Returns `n` bytes aligned to at least the machine pointer size.
    pub fn allocate_aligned(&mut self, n: usize) -> *mut u8 {
        let align = std::mem::size_of::<usize>().max(8);
        assert!(align.is_power_of_two());
        let current_mod = (self.alloc_ptr as usize) & (align - 1);
        let slop = if current_mod == 0 { 0 } else { align - current_mod };
        let needed = n + slop;
        if needed <= self.alloc_bytes_remaining {
            // SAFETY: `needed` bytes were reserved within the current block.
            let result = unsafe { self.alloc_ptr.add(slop) };
            unsafe {
                self.alloc_ptr = self.alloc_ptr.add(needed);
            }
            self.alloc_bytes_remaining -= needed;
            debug_assert_eq!((result as usize) & (align - 1), 0);
            result
        } else {
            // `allocate_fallback` always hands back a block fresh from the
            // global allocator, which is already pointer-aligned.
            let result = self.allocate_fallback(n);
            debug_assert_eq!((result as usize) & (align - 1), 0);
            result
        }
    }

    fn allocate_new_block(&mut self, block_bytes: usize) -> *mut u8 {
        let mut block = vec![0u8; block_bytes];
        let ptr = block.as_mut_ptr();
        self.blocks.push(block);
        self.memory_usage.fetch_add(
            block_bytes + std::mem::size_of::<Vec<u8>>(),
            Ordering::Relaxed,
        );
        ptr
    }

    /// Total bytes allocated plus bookkeeping overhead for the block index.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_allocations_share_a_block() {
        let mut arena = Arena::new();
        let p1 = arena.allocate(8);
        let p2 = arena.allocate(8);
        assert_ne!(p1, p2);
        // SAFETY: both pointers are valid for 8 bytes and distinct.
        unsafe {
            std::ptr::write_bytes(p1, 0xAA, 8);
            std::ptr::write_bytes(p2, 0xBB, 8);
            assert_eq!(*p1, 0xAA);
            assert_eq!(*p2, 0xBB);
        }
    }

    #[test]
    fn oversized_allocation_gets_dedicated_block() {
        let mut arena = Arena::new();
        let big = arena.allocate(BLOCK_SIZE); // well above block_size/4
        assert!(!big.is_null());
        let usage_after_big = arena.memory_usage();
        let small = arena.allocate(8);
        assert!(!small.is_null());
        // The dedicated block shouldn't have been used to serve the small
        // allocation; a fresh standard block is allocated for it.
        assert!(arena.memory_usage() > usage_after_big);
    }

    #[test]
    fn aligned_allocation_is_pointer_aligned() {
        let mut arena = Arena::new();
        let _ = arena.allocate(1); // misalign the bump pointer
        let p = arena.allocate_aligned(16);
        let align = std::mem::size_of::<usize>();
        assert_eq!((p as usize) % align, 0);
    }

    #[test]
    fn memory_usage_grows_monotonically() {
        let mut arena = Arena::new();
        let mut last = arena.memory_usage();
        for _ in 0..100 {
            arena.allocate(64);
            let now = arena.memory_usage();
            assert!(now >= last);
            last = now;
        }
    }
}
