//! Block level operations over the heap.
//!
//! A block is a header word followed by payload. While a block is free its
//! first two payload words hold the free list links and its last word holds
//! the footer, a verbatim copy of the header:
//!
//! ```text
//!  free block                        allocated block
//! +--------------------+           +--------------------+
//! | header             |           | header             |
//! +--------------------+           +--------------------+
//! | prev link          |           |                    |
//! +--------------------+           |                    |
//! | next link          |           |    user payload    |
//! +--------------------+           |                    |
//! |       ......       |           |                    |
//! +--------------------+           |                    |
//! | footer (== header) |           |                    |
//! +--------------------+           +--------------------+
//! ```
//!
//! The footer is what makes the *previous* block reachable: subtract the
//! size stored right below our header and you land on its header. Allocated
//! blocks give that word to the user, so "is there a footer below me" has
//! to be answered by the previous-allocated bit in our own header.

use crate::header::{self, MIN_BLOCK_SIZE, WSIZE};
use crate::heap::Heap;
use crate::source::HeapSource;

/// First payload byte of the block at `hdr`.
#[inline]
pub(crate) fn payload_of(hdr: u32) -> u32 {
    hdr + WSIZE
}

/// Header of the block whose payload starts at `payload`.
#[inline]
pub(crate) fn header_of(payload: u32) -> u32 {
    payload - WSIZE
}

impl<S: HeapSource> Heap<S> {
    /// Size of the block at `hdr`, header and footer included.
    #[inline]
    pub fn block_size(&self, hdr: u32) -> u32 {
        header::size_of(self.word(hdr))
    }

    #[inline]
    pub fn is_allocated(&self, hdr: u32) -> bool {
        header::is_allocated(self.word(hdr))
    }

    #[inline]
    pub fn prev_is_allocated(&self, hdr: u32) -> bool {
        header::prev_is_allocated(self.word(hdr))
    }

    /// Header of the block immediately after `hdr`. For the last block
    /// this is the epilogue sentinel.
    #[inline]
    pub fn next_block(&self, hdr: u32) -> u32 {
        hdr + self.block_size(hdr)
    }

    /// Header of the free block immediately before `hdr`, found through
    /// its footer. Only callable when the previous block is actually free,
    /// otherwise the word below `hdr` is somebody's payload.
    #[inline]
    pub fn prev_block(&self, hdr: u32) -> u32 {
        debug_assert!(!self.prev_is_allocated(hdr));
        hdr - header::size_of(self.word(hdr - WSIZE))
    }

    /// Rewrites `hdr` as a free block of `size` bytes: header keeping the
    /// current previous-allocated bit, matching footer, and a cleared
    /// previous-allocated bit in the next block's header. Free list links
    /// are left to [`SegregatedLists::insert`](crate::freelist::SegregatedLists::insert).
    pub fn write_free_block(&mut self, hdr: u32, size: u32) {
        debug_assert!(size >= MIN_BLOCK_SIZE && size % MIN_BLOCK_SIZE == 0);
        let word = header::pack(size, false, self.prev_is_allocated(hdr));
        self.put_word(hdr, word);
        self.put_word(hdr + size - WSIZE, word);
        self.set_prev_allocated(hdr + size, false);
    }

    /// Rewrites `hdr` as an allocated block of `size` bytes, keeping the
    /// current previous-allocated bit and setting it in the next block's
    /// header. No footer: that word belongs to the payload now.
    pub fn write_allocated_block(&mut self, hdr: u32, size: u32) {
        debug_assert!(size >= MIN_BLOCK_SIZE && size % MIN_BLOCK_SIZE == 0);
        let word = header::pack(size, true, self.prev_is_allocated(hdr));
        self.put_word(hdr, word);
        self.set_prev_allocated(hdr + size, true);
    }

    /// Bumps the recorded size of the block at `hdr` by `extra` bytes,
    /// leaving both flag bits as they are. Used when absorbing the free
    /// neighbor to the right, whose space becomes ours without any copy.
    pub fn grow_block(&mut self, hdr: u32, extra: u32) {
        debug_assert_eq!(extra % MIN_BLOCK_SIZE, 0);
        let word = self.word(hdr);
        self.put_word(hdr, word + extra);
    }

    /// Forces the previous-allocated bit of the header at `hdr`.
    pub fn set_prev_allocated(&mut self, hdr: u32, allocated: bool) {
        let word = self.word(hdr);
        self.put_word(hdr, header::set_prev_allocated(word, allocated));
    }
}
