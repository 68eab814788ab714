//! The buddy engine: split-down on allocate, coalesce-up on free.
//!
//! This is the core of the crate. Everything else - platform substrate,
//! arena lifecycle, the public façade - exists to get a properly guarded,
//! locked arena in front of this module and a lock around every call into
//! it.

use crate::bitindex::BitTree;
use crate::bitmap::Bitset;
use crate::freelist::FreeLists;

/// The buddy allocator over a single arena.
///
/// Owns the two bitmaps and the free-list heads; does not own the arena
/// memory itself (that belongs to [`crate::arena::HeapState`]), only the
/// out-of-band bookkeeping describing it.
pub struct Buddy {
    tree: BitTree,
    present: Bitset,
    allocated: Bitset,
    freelists: FreeLists,
    arena_size: usize,
    l_max: u32,
}

impl Buddy {
    pub fn new(tree: BitTree, present: Bitset, allocated: Bitset, freelists: FreeLists, arena_size: usize, l_max: u32) -> Self {
        Self { tree, present, allocated, freelists, arena_size, l_max }
    }

    #[inline]
    fn width(&self, level: u32) -> usize {
        self.arena_size >> level
    }

    /// Largest `L` with `width(L) >= size`; `size == 0` is treated as a
    /// request for the smallest class (`L_max`), pinning the open question
    /// in the design notes.
    fn target_level(&self, size: usize) -> u32 {
        let want = size.max(1);
        let mut level = self.l_max;
        while level > 0 && self.width(level) < want {
            level -= 1;
        }
        level
    }

    /// Allocates a block able to hold `size` bytes, or `None` if the heap
    /// has no free block of a suitable class ("heap full" - not an error).
    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        if size > self.arena_size {
            return None;
        }
        let target = self.target_level(size);

        // Closest-fitting available block: walk from the target class
        // toward the root and take the first non-empty list, so an exact
        // fit (no split at all) is always preferred over splitting a
        // larger block.
        let mut split_from = None;
        for level in (0..=target).rev() {
            if self.freelists.head(level) != 0 {
                split_from = Some(level);
                break;
            }
        }
        let mut level = split_from?;

        while level < target {
            let block = self.freelists.head(level) as *mut u8;
            let next_level = level + 1;
            unsafe {
                self.freelists.unlink(block);
                self.tree.clear(&mut self.present, block, level);

                // Push the buddy (high half) before the original address
                // (low half), so the low half - the block's own address,
                // unchanged by the split - ends up on top of the LIFO
                // free list and is what a subsequent pop (including the
                // very next split iteration) sees first.
                let buddy = block.add(self.width(next_level));
                self.tree.set(&mut self.present, buddy, next_level);
                self.freelists.push(next_level, buddy);

                self.tree.set(&mut self.present, block, next_level);
                self.freelists.push(next_level, block);
            }
            level = next_level;
        }

        let chosen = self.freelists.head(target) as *mut u8;
        unsafe {
            self.freelists.unlink(chosen);
            self.tree.set(&mut self.allocated, chosen, target);
        }
        Some(chosen)
    }

    /// Returns `p` (previously returned by [`Self::allocate`]) to the free
    /// pool, coalescing with its buddy for as long as the buddy is present
    /// and unallocated. `p == null` is a no-op.
    pub fn free(&mut self, p: *mut u8) {
        if p.is_null() {
            return;
        }

        let mut level = self.tree.sh_getlist(p, &self.present);
        debug_assert!(self.tree.test(&self.present, p, level), "freeing a pointer with no present bit set");
        debug_assert!(self.tree.test(&self.allocated, p, level), "double free (or free of an unallocated pointer)");

        unsafe {
            self.tree.clear(&mut self.allocated, p, level);
            self.freelists.push(level, p);
        }

        let mut block = p;
        while level > 0 {
            let buddy = self.tree.buddy_of(block, level);
            let buddy_present = self.tree.test(&self.present, buddy, level);
            let buddy_allocated = buddy_present && self.tree.test(&self.allocated, buddy, level);
            if !buddy_present || buddy_allocated {
                break;
            }

            unsafe {
                self.tree.clear(&mut self.present, block, level);
                self.freelists.unlink(block);
                self.tree.clear(&mut self.present, buddy, level);
                self.freelists.unlink(buddy);
            }

            level -= 1;
            block = if (block as usize) < (buddy as usize) { block } else { buddy };

            unsafe {
                self.tree.set(&mut self.present, block, level);
                self.freelists.push(level, block);
            }
        }
    }

    /// Width of the size class `p` currently belongs to. Requires `p` to be
    /// inside the arena and present; undefined (debug-asserts) otherwise.
    pub fn actual_size(&self, p: *const u8) -> usize {
        let level = self.tree.sh_getlist(p, &self.present);
        self.width(level)
    }

    /// Seeds a freshly mapped arena: the whole arena is one free block at
    /// list 0.
    ///
    /// # Safety
    /// Must only be called once, immediately after construction, before any
    /// other call into the engine.
    pub unsafe fn seed(&mut self, arena_base: *mut u8) {
        self.tree.set(&mut self.present, arena_base, 0);
        self.freelists.push(0, arena_base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitindex::BitIndex;

    /// Builds a `Buddy` over a plain heap-allocated byte buffer, standing in
    /// for a real guarded mmap arena - the engine itself has no idea where
    /// its bytes came from.
    fn make_buddy(arena_size: usize, minsize: usize) -> (Buddy, Box<[u8]>, usize) {
        let mut backing = vec![0u8; arena_size].into_boxed_slice();
        let arena_base = backing.as_mut_ptr() as usize;
        let l_max = (arena_size / minsize).trailing_zeros();
        let bittable_bits = 2 * (arena_size / minsize);

        let index = BitIndex::new(arena_base, arena_size);
        let tree = BitTree::new(index, l_max, bittable_bits);
        let present = Bitset::new(bittable_bits);
        let allocated = Bitset::new(bittable_bits);
        let freelists = FreeLists::new(l_max as usize + 1);

        let mut buddy = Buddy::new(tree, present, allocated, freelists, arena_size, l_max);
        unsafe { buddy.seed(arena_base as *mut u8) };
        (buddy, backing, arena_base)
    }

    #[test]
    fn spec_scenario_arena_32_minsize_16() {
        let (mut buddy, _backing, base) = make_buddy(32, 16);

        let p = buddy.allocate(16).expect("first 16-byte alloc");
        assert_eq!(p as usize, base);
        assert_eq!(buddy.actual_size(p), 16);

        let q = buddy.allocate(16).expect("second 16-byte alloc");
        assert_eq!(q as usize, base + 16);

        assert!(buddy.allocate(16).is_none(), "heap should be full");

        buddy.free(p);
        buddy.free(q);

        // Fully coalesced: a fresh allocate(32) must return the arena base.
        let whole = buddy.allocate(32).expect("coalesced back to one block");
        assert_eq!(whole as usize, base);
    }

    #[test]
    fn spec_scenario_arena_64_minsize_16_mixed_sizes() {
        let (mut buddy, _backing, base) = make_buddy(64, 16);

        let a = buddy.allocate(16).unwrap();
        let b = buddy.allocate(16).unwrap();
        let c = buddy.allocate(32).unwrap();

        assert_eq!(a as usize, base);
        assert_eq!(b as usize, base + 16);
        assert_eq!(c as usize, base + 32);

        buddy.free(c);
        buddy.free(b);
        buddy.free(a);

        let whole = buddy.allocate(64).expect("fully coalesced arena");
        assert_eq!(whole as usize, base);
    }

    #[test]
    fn malloc_zero_is_minsize_class() {
        let (mut buddy, _backing, base) = make_buddy(32, 16);
        let p = buddy.allocate(0).expect("size 0 should get the smallest class");
        assert_eq!(buddy.actual_size(p), 16);
        assert_eq!(p as usize, base);
    }

    #[test]
    fn allocate_larger_than_arena_fails() {
        let (mut buddy, _backing, _base) = make_buddy(32, 16);
        assert!(buddy.allocate(33).is_none());
    }

    #[test]
    fn allocate_whole_arena_repeatedly_returns_same_pointer() {
        let (mut buddy, _backing, base) = make_buddy(32, 16);
        for _ in 0..3 {
            let p = buddy.allocate(32).expect("pristine heap should serve the whole arena");
            assert_eq!(p as usize, base);
            buddy.free(p);
        }
    }

    #[test]
    fn actual_size_is_between_n_and_2n() {
        let (mut buddy, _backing, _base) = make_buddy(4096, 32);
        for n in [1usize, 31, 33, 100, 200, 513] {
            let p = buddy.allocate(n).expect("arena has room");
            let size = buddy.actual_size(p);
            assert!(size >= n, "actual_size({}) = {} should be >= n", n, size);
            assert!(size < 2 * n.max(32), "actual_size({}) = {} should be < 2n (or minsize)", n, size);
            buddy.free(p);
        }
    }
}
