//! Merging of neighboring free blocks.
//!
//! Freeing, growing the heap and splitting off remainders can all leave a
//! free block next to another free block. Coalescing merges such runs back
//! into one block immediately, so at every point in between operations no
//! two free blocks touch. That invariant is what keeps fragmentation from
//! compounding and what lets the rest of the code assume "my previous
//! block is free" means exactly one block, not a run of them.

use crate::source::HeapSource;
use crate::Segalloc;

impl<S: HeapSource> Segalloc<S> {
    /// Merges the free block at `hdr` with its free neighbors, if any, and
    /// returns the header of the block that survives. The block must
    /// already be filed in its size class; merged neighbors are pulled out
    /// of theirs and the survivor is refiled, since its size, and possibly
    /// its class, changed.
    ///
    /// The sentinels at both ends of the heap read as allocated, so the
    /// merge can never run off the heap.
    pub(crate) fn coalesce(&mut self, hdr: u32) -> u32 {
        let size = self.heap.block_size(hdr);
        let next = self.heap.next_block(hdr);

        match (self.heap.prev_is_allocated(hdr), self.heap.is_allocated(next)) {
            // Allocated on both sides, nothing to merge with.
            (true, true) => hdr,

            // Absorb the free block to the right.
            (true, false) => {
                let merged = size + self.heap.block_size(next);
                self.lists.remove(&mut self.heap, hdr);
                self.lists.remove(&mut self.heap, next);
                self.heap.write_free_block(hdr, merged);
                self.lists.insert(&mut self.heap, hdr);
                hdr
            }

            // The free block to the left absorbs us.
            (false, true) => {
                let prev = self.heap.prev_block(hdr);
                let merged = self.heap.block_size(prev) + size;
                self.lists.remove(&mut self.heap, hdr);
                self.lists.remove(&mut self.heap, prev);
                self.heap.write_free_block(prev, merged);
                self.lists.insert(&mut self.heap, prev);
                prev
            }

            // Free on both sides, all three become one.
            (false, false) => {
                let prev = self.heap.prev_block(hdr);
                let merged = self.heap.block_size(prev) + size + self.heap.block_size(next);
                self.lists.remove(&mut self.heap, hdr);
                self.lists.remove(&mut self.heap, prev);
                self.lists.remove(&mut self.heap, next);
                self.heap.write_free_block(prev, merged);
                self.lists.insert(&mut self.heap, prev);
                prev
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::source::VecSource;
    use crate::{HeapPtr, Segalloc};

    /// Three 512 byte allocated blocks at the front of a fresh arena, with
    /// the rest of the arena free behind them.
    fn three_in_a_row() -> (Segalloc<VecSource>, [HeapPtr; 3]) {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        let blocks = [(); 3].map(|()| allocator.alloc(508).unwrap());
        (allocator, blocks)
    }

    #[test]
    fn freeing_between_allocated_neighbors_does_not_merge() {
        let (mut allocator, [_, b, _]) = three_in_a_row();

        allocator.free(b);
        assert_eq!(allocator.stats().free_blocks, 2);

        // The hole is still its original size, an equal request gets it
        // back whole.
        assert_eq!(allocator.alloc(508), Some(b));
        allocator.verify().unwrap();
    }

    #[test]
    fn right_neighbor_is_absorbed() {
        let (mut allocator, [a, b, _]) = three_in_a_row();

        allocator.free(b);
        allocator.free(a);
        assert_eq!(allocator.stats().free_blocks, 2);

        // One 1024 byte block now starts where `a` did.
        assert_eq!(allocator.alloc(1020), Some(a));
        allocator.verify().unwrap();
    }

    #[test]
    fn left_neighbor_absorbs_us() {
        let (mut allocator, [a, b, _]) = three_in_a_row();

        allocator.free(a);
        allocator.free(b);
        assert_eq!(allocator.stats().free_blocks, 2);
        assert_eq!(allocator.alloc(1020), Some(a));
        allocator.verify().unwrap();
    }

    #[test]
    fn both_neighbors_merge_into_one() {
        let (mut allocator, [a, b, c]) = three_in_a_row();

        allocator.free(a);
        // `c` merges with the free tail of the arena right away.
        allocator.free(c);
        assert_eq!(allocator.stats().free_blocks, 2);

        // Freeing the middle one fuses everything back into a single
        // arena sized block.
        allocator.free(b);
        let stats = allocator.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free_block, 4096);
        allocator.verify().unwrap();
    }
}
