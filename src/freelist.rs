//! Per-size-class free list registry.
//!
//! Each size class's head pointer lives in the `heads` array (host memory,
//! never in the arena); the list itself is threaded through the free
//! blocks' own bytes via [`FreeListNode`], which requires
//! `minsize >= size_of::<FreeListNode>()`.

use std::mem::size_of;

/// Link cell embedded at the start of every free block.
///
/// `p_next` points at the predecessor's `next` slot - or at the owning
/// `heads` array entry for the head of the list - never at the
/// predecessor's start address, so `unlink` never has to special-case the
/// head.
#[repr(C)]
struct FreeListNode {
    next: usize,
    p_next: usize,
}

/// Minimum block size the free-list registry can thread a link through.
pub const MIN_NODE_SIZE: usize = size_of::<FreeListNode>();

/// Head pointers for every size class, `0` meaning empty.
pub struct FreeLists {
    heads: Vec<usize>,
}

impl FreeLists {
    pub fn new(levels: usize) -> Self {
        Self { heads: vec![0usize; levels] }
    }

    #[inline]
    pub fn head(&self, level: u32) -> usize {
        self.heads[level as usize]
    }

    /// Inserts `p` at the head of `level`'s list.
    ///
    /// # Safety
    /// `p` must point at a live, writable block of at least
    /// `MIN_NODE_SIZE` bytes inside the arena, and the caller must hold the
    /// heap lock.
    pub unsafe fn push(&mut self, level: u32, p: *mut u8) {
        let idx = level as usize;
        let node = p as *mut FreeListNode;
        let head_slot = &mut self.heads[idx] as *mut usize;
        let old_head = self.heads[idx];

        (*node).next = old_head;
        (*node).p_next = head_slot as usize;

        if old_head != 0 {
            let old_node = old_head as *mut FreeListNode;
            (*old_node).p_next = &mut (*node).next as *mut usize as usize;
        }

        self.heads[idx] = p as usize;
    }

    /// Removes `p` from whichever list it currently threads through.
    ///
    /// # Safety
    /// `p` must currently be a live member of some free list, and the
    /// caller must hold the heap lock.
    pub unsafe fn unlink(&mut self, p: *mut u8) {
        let node = p as *mut FreeListNode;
        let next = (*node).next;
        let p_next_slot = (*node).p_next as *mut usize;
        debug_assert!(!p_next_slot.is_null(), "free list node has a null back-pointer");

        *p_next_slot = next;
        if next != 0 {
            let next_node = next as *mut FreeListNode;
            (*next_node).p_next = p_next_slot as usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_single_level() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        let pa = a.as_mut_ptr();
        let pb = b.as_mut_ptr();

        let mut lists = FreeLists::new(1);
        unsafe {
            lists.push(0, pa);
            lists.push(0, pb);
        }
        // LIFO: b was pushed last, so it's the head.
        assert_eq!(lists.head(0), pb as usize);

        unsafe {
            lists.unlink(pb);
        }
        assert_eq!(lists.head(0), pa as usize);

        unsafe {
            lists.unlink(pa);
        }
        assert_eq!(lists.head(0), 0);
    }

    #[test]
    fn unlink_middle_element_preserves_neighbors() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        let mut c = [0u8; 64];
        let pa = a.as_mut_ptr();
        let pb = b.as_mut_ptr();
        let pc = c.as_mut_ptr();

        let mut lists = FreeLists::new(1);
        unsafe {
            lists.push(0, pa);
            lists.push(0, pb);
            lists.push(0, pc);
            // list is now c -> b -> a
            lists.unlink(pb);
        }
        // c -> a, b removed from the middle.
        assert_eq!(lists.head(0), pc as usize);
        unsafe {
            lists.unlink(pc);
        }
        assert_eq!(lists.head(0), pa as usize);
    }
}
