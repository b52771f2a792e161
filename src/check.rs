//! Heap introspection: invariant checking and accounting.
//!
//! Everything here is read only. [`verify`](Segalloc::verify) cross checks
//! the two views the allocator maintains of the same bytes, the address
//! ordered run of blocks and the segregated lists, and reports the first
//! disagreement it finds. The tests lean on it heavily: calling it after
//! every operation turns subtle metadata bugs into immediate failures
//! instead of corruption that surfaces thousands of operations later.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::bucket::{class_of, CLASS_COUNT};
use crate::freelist::{SegregatedLists, NIL};
use crate::header::{self, MIN_BLOCK_SIZE, WSIZE};
use crate::source::HeapSource;
use crate::Segalloc;

/// First structural problem found by [`verify`](Segalloc::verify). Offsets
/// are block header offsets into the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
    /// One of the two zero sized sentinel words was overwritten.
    #[error("sentinel word at {offset:#x} is damaged")]
    BadSentinel { offset: u32 },

    /// A block's recorded size is below the minimum or off granularity.
    #[error("block at {offset:#x} has unrepresentable size {size}")]
    BadBlockSize { offset: u32, size: u32 },

    /// A block's recorded size runs past the epilogue.
    #[error("block at {offset:#x} extends past the end of the heap")]
    BlockOutOfBounds { offset: u32 },

    /// A free block's footer is not a copy of its header.
    #[error("free block at {offset:#x} has footer {footer:#x} but header {header:#x}")]
    FooterMismatch { offset: u32, header: u32, footer: u32 },

    /// A header's previous-allocated bit contradicts the block before it.
    #[error("block at {offset:#x} disagrees with its neighbor about the previous-allocated bit")]
    PrevAllocMismatch { offset: u32 },

    /// Two free blocks touch, so a coalesce was missed.
    #[error("free blocks at {first:#x} and {second:#x} are adjacent")]
    AdjacentFreeBlocks { first: u32, second: u32 },

    /// A free block sits in a list of the wrong size class.
    #[error("free block at {offset:#x} of size {size} is filed in class {class}")]
    WrongClass { offset: u32, size: u32, class: usize },

    /// A list's back links don't mirror its forward links, or the same
    /// block is linked more than once.
    #[error("free list of class {class} has a broken link at {offset:#x}")]
    BrokenLink { class: usize, offset: u32 },

    /// A free block in the heap is missing from every list.
    #[error("free block at {offset:#x} is not filed in any size class")]
    UnlistedFreeBlock { offset: u32 },

    /// A list points at something that is not a free block.
    #[error("class {class} lists {offset:#x}, which is not a free block")]
    UnknownListedBlock { class: usize, offset: u32 },
}

/// Point in time snapshot of heap occupancy from [`stats`](Segalloc::stats).
/// Block sizes include their header word; the two sentinel words only show
/// up in [`heap_bytes`](Self::heap_bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Total footprint of the heap, sentinels included.
    pub heap_bytes: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    pub allocated_bytes: usize,
    pub free_bytes: usize,
    /// Biggest request currently servable without growing the heap,
    /// measured as a block size.
    pub largest_free_block: usize,
}

impl<S: HeapSource> Segalloc<S> {
    /// Checks every structural invariant of the heap and the segregated
    /// lists, returning the first violation found. A healthy allocator
    /// always passes; a failure means allocator metadata was overwritten,
    /// by a bug in here or by an out of bounds write through
    /// [`payload_mut`](Self::payload_mut).
    pub fn verify(&self) -> Result<(), Corruption> {
        let epilogue = self.heap.epilogue();

        let start = self.heap.word(0);
        if header::size_of(start) != 0 || !header::is_allocated(start) {
            return Err(Corruption::BadSentinel { offset: 0 });
        }
        let end = self.heap.word(epilogue);
        if header::size_of(end) != 0 || !header::is_allocated(end) {
            return Err(Corruption::BadSentinel { offset: epilogue });
        }

        // First pass: the address ordered walk. Collects the free blocks
        // so the list walk below can be reconciled against them.
        let mut free_blocks = BTreeSet::new();
        let mut prev_free: Option<u32> = None;
        let mut prev_allocated = true;
        let mut hdr = WSIZE;
        while hdr < epilogue {
            let size = self.heap.block_size(hdr);
            if size < MIN_BLOCK_SIZE || size % MIN_BLOCK_SIZE != 0 {
                return Err(Corruption::BadBlockSize { offset: hdr, size });
            }
            if hdr.checked_add(size).is_none_or(|limit| limit > epilogue) {
                return Err(Corruption::BlockOutOfBounds { offset: hdr });
            }
            if self.heap.prev_is_allocated(hdr) != prev_allocated {
                return Err(Corruption::PrevAllocMismatch { offset: hdr });
            }

            if self.heap.is_allocated(hdr) {
                prev_allocated = true;
                prev_free = None;
            } else {
                let header = self.heap.word(hdr);
                let footer = self.heap.word(hdr + size - WSIZE);
                if header != footer {
                    return Err(Corruption::FooterMismatch {
                        offset: hdr,
                        header,
                        footer,
                    });
                }
                if let Some(first) = prev_free {
                    return Err(Corruption::AdjacentFreeBlocks { first, second: hdr });
                }
                free_blocks.insert(hdr);
                prev_free = Some(hdr);
                prev_allocated = false;
            }

            hdr += size;
        }
        if self.heap.prev_is_allocated(epilogue) != prev_allocated {
            return Err(Corruption::PrevAllocMismatch { offset: epilogue });
        }

        // Second pass: the lists. Membership is checked before any word of
        // the member is trusted, so a wild link can't take the walk out of
        // bounds. The `listed` set doubles as the loop bound, a cycle gets
        // caught the moment it closes.
        let mut listed = BTreeSet::new();
        for class in 0..CLASS_COUNT {
            let mut prev = NIL;
            let mut cursor = self.lists.head(class);
            while cursor != NIL {
                if !free_blocks.contains(&cursor) {
                    return Err(Corruption::UnknownListedBlock {
                        class,
                        offset: cursor,
                    });
                }
                let size = self.heap.block_size(cursor);
                if class_of(size) != class {
                    return Err(Corruption::WrongClass {
                        offset: cursor,
                        size,
                        class,
                    });
                }
                if SegregatedLists::prev_of(&self.heap, cursor) != prev {
                    return Err(Corruption::BrokenLink {
                        class,
                        offset: cursor,
                    });
                }
                if !listed.insert(cursor) {
                    return Err(Corruption::BrokenLink {
                        class,
                        offset: cursor,
                    });
                }
                prev = cursor;
                cursor = SegregatedLists::next_of(&self.heap, cursor);
            }
        }

        if let Some(&offset) = free_blocks.difference(&listed).next() {
            return Err(Corruption::UnlistedFreeBlock { offset });
        }

        Ok(())
    }

    /// Walks the heap once and tallies it up. Unlike
    /// [`verify`](Self::verify) this never fails; on a corrupt heap the
    /// walk simply stops at the first block it can't step over.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_bytes: self.heap.len(),
            ..HeapStats::default()
        };

        let epilogue = self.heap.epilogue();
        let mut hdr = WSIZE;
        while hdr < epilogue {
            let size = self.heap.block_size(hdr);
            if size < MIN_BLOCK_SIZE {
                break;
            }
            if self.heap.is_allocated(hdr) {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += size as usize;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += size as usize;
                stats.largest_free_block = stats.largest_free_block.max(size as usize);
            }
            hdr += size;
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;

    #[test]
    fn a_healthy_heap_passes() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        let a = allocator.alloc(100).unwrap();
        let b = allocator.alloc(5000).unwrap();
        allocator.verify().unwrap();

        allocator.free(a);
        allocator.verify().unwrap();
        allocator.free(b);
        allocator.verify().unwrap();
    }

    #[test]
    fn stats_account_for_every_block() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        allocator.alloc(100).unwrap();
        allocator.alloc(2000).unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.heap_bytes, 8 + 4096);
        assert_eq!(stats.allocated_blocks, 2);
        assert_eq!(stats.allocated_bytes, 112 + 2016);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, 1968);
        assert_eq!(stats.largest_free_block, 1968);

        // Blocks and sentinels together cover the heap exactly.
        assert_eq!(
            stats.allocated_bytes + stats.free_bytes + 8,
            stats.heap_bytes
        );
    }

    #[test]
    fn a_smashed_sentinel_is_reported() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        allocator.heap.put_word(0, 0);
        assert_eq!(
            allocator.verify(),
            Err(Corruption::BadSentinel { offset: 0 })
        );
    }

    #[test]
    fn an_undersized_block_is_reported() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        // Size 8 with both flag bits set: below the minimum block size.
        allocator.heap.put_word(4, 0b1011);
        assert_eq!(
            allocator.verify(),
            Err(Corruption::BadBlockSize { offset: 4, size: 8 })
        );
    }

    #[test]
    fn a_bad_footer_is_reported() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        // The initial arena is one free block at 4 with its footer in the
        // last word before the epilogue.
        allocator.heap.put_word(4096, 0xDEAD_BEEF);
        assert!(matches!(
            allocator.verify(),
            Err(Corruption::FooterMismatch { offset: 4, .. })
        ));
    }

    #[test]
    fn a_tangled_list_is_reported() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        // Point the arena block's next link back at itself.
        allocator.heap.put_word(4 + 8, 4);
        assert!(matches!(
            allocator.verify(),
            Err(Corruption::BrokenLink { offset: 4, .. })
        ));
    }

    #[test]
    fn an_unlisted_free_block_is_reported() {
        let mut allocator = Segalloc::new(VecSource::new()).unwrap();
        allocator.lists.remove(&mut allocator.heap, 4);
        assert_eq!(
            allocator.verify(),
            Err(Corruption::UnlistedFreeBlock { offset: 4 })
        );
    }
}
