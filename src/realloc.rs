//! Resizing of live allocations.
//!
//! The cheapest resize is no resize: blocks are carved at granularity, so
//! small growth often fits in the slack the block already has. After that
//! we try everything that keeps the block at its address: absorbing free
//! neighbors to the right, and, for the last block in the heap, growing
//! the heap itself. Only when all of that falls short do we pay for a copy
//! to a freshly placed block.

use log::trace;

use crate::allocator::aligned_block_size;
use crate::block::{header_of, payload_of};
use crate::header::{MIN_BLOCK_SIZE, WSIZE};
use crate::source::HeapSource;
use crate::{HeapPtr, Segalloc};

impl<S: HeapSource> Segalloc<S> {
    /// Resizes the allocation at `ptr` to hold at least `size` bytes,
    /// returning its possibly relocated handle. The first
    /// `min(usable_size, size)` payload bytes are preserved.
    ///
    /// `resize(None, size)` behaves like [`alloc`](Self::alloc) and
    /// `resize(Some(ptr), 0)` like [`free`](Self::free), so the whole
    /// allocate / adjust / release lifecycle can be driven through this
    /// one entry point.
    ///
    /// Returns `None` when the new size cannot be served; the old block is
    /// untouched and its handle stays valid, though free neighbors that
    /// were absorbed along the way remain part of the block.
    pub fn resize(&mut self, ptr: Option<HeapPtr>, size: usize) -> Option<HeapPtr> {
        let Some(ptr) = ptr else {
            return self.alloc(size);
        };
        if size == 0 {
            self.free(ptr);
            return None;
        }
        self.debug_check_live(ptr);

        let hdr = header_of(ptr.raw());
        let target = aligned_block_size(size)?;

        // In place, cheapest first: eat the free neighbors to the right.
        self.backward_collect(hdr, target);

        // Still short, but nothing behind us except the epilogue: grow the
        // heap and eat the fresh space too. The block keeps its address.
        if self.heap.block_size(hdr) < target && self.tail_block(hdr) {
            let shortfall = (target - self.heap.block_size(hdr)) as usize;
            if self.extend_heap(shortfall, self.config.resize_chunk).is_ok() {
                self.backward_collect(hdr, target);
            }
        }

        if self.heap.block_size(hdr) >= target {
            self.shrink_in_place(hdr, target);
            return Some(ptr);
        }

        // No way around a move. Find or grow space for a new block, copy
        // the payload over and retire the old block.
        let new_hdr = match self.lists.find_fit(&self.heap, target, self.config.fit_policy) {
            Some(found) => found,
            None => self
                .extend_heap(self.shortfall(target), self.config.resize_chunk)
                .ok()?,
        };
        let new_hdr = self.place(new_hdr, target);
        trace!("relocating block {:#x} to {:#x}", hdr, new_hdr);

        let keep = ((self.heap.block_size(hdr) - WSIZE) as usize).min(size);
        self.heap.copy(payload_of(hdr), payload_of(new_hdr), keep);
        self.release_block(hdr);

        let new_ptr = HeapPtr::new(payload_of(new_hdr));
        #[cfg(debug_assertions)]
        {
            self.ledger.remove(&ptr.raw());
            self.ledger.insert(new_ptr.raw());
        }

        Some(new_ptr)
    }

    /// Absorbs free blocks to the right of the allocated block at `hdr`
    /// until it reaches `target` bytes or runs into an allocated neighbor.
    /// Absorbed space joins the block as is, without any copying.
    fn backward_collect(&mut self, hdr: u32, target: u32) {
        let mut size = self.heap.block_size(hdr);
        let mut next = self.heap.next_block(hdr);

        while size < target && !self.heap.is_allocated(next) {
            self.lists.remove(&mut self.heap, next);
            let extra = self.heap.block_size(next);
            self.heap.grow_block(hdr, extra);
            size += extra;
            next = self.heap.next_block(hdr);
        }

        self.heap.set_prev_allocated(next, true);
    }

    /// Whether the block at `hdr` is the last one before the epilogue.
    fn tail_block(&self, hdr: u32) -> bool {
        self.heap.next_block(hdr) == self.heap.epilogue()
    }

    /// Trims the allocated block at `hdr` down to `target` bytes. The
    /// remainder becomes a free block and is coalesced right away, in case
    /// the neighbor behind it is free as well.
    fn shrink_in_place(&mut self, hdr: u32, target: u32) {
        let remainder = self.heap.block_size(hdr) - target;
        if remainder < MIN_BLOCK_SIZE {
            return;
        }

        self.heap.write_allocated_block(hdr, target);
        let rest = hdr + target;
        self.heap.write_free_block(rest, remainder);
        self.lists.insert(&mut self.heap, rest);
        self.coalesce(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;

    #[test]
    fn resize_grows_in_place_when_the_neighbor_is_free() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        let ptr = allocator.alloc(512).unwrap();
        allocator.payload_mut(ptr)[..512].fill(0x5A);

        let grown = allocator.resize(Some(ptr), 640).unwrap();
        assert_eq!(grown, ptr);
        assert_eq!(allocator.usable_size(grown), 652);
        assert!(allocator.payload(grown)[..512].iter().all(|&b| b == 0x5A));

        assert_eq!(allocator.stats().free_blocks, 1);
        allocator.verify().unwrap();
    }

    #[test]
    fn growing_into_the_slack_stays_put() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        let ptr = allocator.alloc(50).unwrap();

        // 50 rounds up to a 64 byte block, which already holds 60 bytes.
        assert_eq!(allocator.resize(Some(ptr), 60), Some(ptr));
    }

    #[test]
    fn relocation_preserves_contents() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        let a = allocator.alloc(200).unwrap();
        let b = allocator.alloc(200).unwrap();
        allocator.payload_mut(a)[..200].fill(0xAA);
        allocator.payload_mut(b)[..200].fill(0xBB);

        // `a` is walled in by `b`, growing it has to move it.
        let moved = allocator.resize(Some(a), 1000).unwrap();
        assert_ne!(moved, a);
        assert!(allocator.usable_size(moved) >= 1000);
        assert!(allocator.payload(moved)[..200].iter().all(|&b| b == 0xAA));
        assert!(allocator.payload(b)[..200].iter().all(|&b| b == 0xBB));

        // The old block went back to the free lists.
        assert_eq!(allocator.stats().free_blocks, 2);
        allocator.verify().unwrap();
    }

    #[test]
    fn growing_the_tail_block_extends_the_heap() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        let ptr = allocator.alloc(4000).unwrap();
        allocator.payload_mut(ptr)[..8].copy_from_slice(b"tailward");

        let grown = allocator.resize(Some(ptr), 20000).unwrap();
        assert_eq!(grown, ptr);
        assert!(allocator.usable_size(grown) >= 20000);
        assert_eq!(&allocator.payload(grown)[..8], b"tailward");

        // One resize chunk on top of the initial arena, no copying around.
        assert_eq!(allocator.stats().heap_bytes, 8 + 4096 + 16384);
        allocator.verify().unwrap();
    }

    #[test]
    fn shrinking_merges_the_remainder_with_the_free_tail() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        let ptr = allocator.alloc(2000).unwrap();

        let shrunk = allocator.resize(Some(ptr), 100).unwrap();
        assert_eq!(shrunk, ptr);
        assert_eq!(allocator.usable_size(shrunk), 108);

        // The trimmed off space fuses with the free tail instead of
        // leaving two free blocks side by side.
        assert_eq!(allocator.stats().free_blocks, 1);
        allocator.verify().unwrap();
    }

    #[test]
    fn failed_growth_leaves_the_block_usable() {
        let source = VecSource::with_limit(8 + 4096);
        let mut allocator = Segalloc::new(source).unwrap();
        let ptr = allocator.alloc(1000).unwrap();
        allocator.payload_mut(ptr)[..4].copy_from_slice(b"keep");

        assert_eq!(allocator.resize(Some(ptr), 60000), None);

        // The handle survived. The block may have swallowed its free
        // neighbors while trying, but stays consistent and intact.
        assert_eq!(&allocator.payload(ptr)[..4], b"keep");
        assert_eq!(allocator.usable_size(ptr), 4092);
        allocator.verify().unwrap();
    }

    #[test]
    fn resize_covers_the_whole_lifecycle() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();

        let ptr = allocator.resize(None, 500).unwrap();
        assert!(allocator.usable_size(ptr) >= 500);

        assert_eq!(allocator.resize(Some(ptr), 0), None);
        assert_eq!(allocator.stats().free_blocks, 1);
        allocator.verify().unwrap();
    }
}
