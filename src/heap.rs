//! The heap region.
//!
//! One contiguous run of bytes obtained from a [`HeapSource`], addressed by
//! byte offsets instead of pointers. Growth only ever appends, so an offset
//! handed out before an extension still names the same bytes after it, even
//! if the source moved its storage. All metadata is read and written as
//! native endian `u32` words through [`word`](Heap::word) and
//! [`put_word`](Heap::put_word).
//!
//! A freshly initialized heap is just the two sentinel words:
//!
//! ```text
//! offset:    0           4
//!         +----------+----------+
//!         | start    | epilogue |
//!         | padding  | sentinel |
//!         +----------+----------+
//! ```
//!
//! Every extension splices a new block in right where the epilogue used to
//! be and writes a fresh epilogue at the new end:
//!
//! ```text
//! offset:    0           4                             len-4
//!         +----------+----------+--------- ... ----+----------+
//!         | start    | block    |  more blocks     | epilogue |
//!         | padding  | header   |                  | sentinel |
//!         +----------+----------+--------- ... ----+----------+
//! ```
//!
//! Both sentinels have size zero and are marked allocated, which is what
//! stops coalescing from walking off either end of the heap. Block headers
//! land on offsets congruent to 4 mod 8, so payloads are 8 byte aligned.

use log::debug;

use crate::align::round_up_to_multiple;
use crate::header::{self, WSIZE};
use crate::source::{HeapSource, OutOfMemory};

/// Offsets are `u32`, so a heap can never exceed 4 GiB.
const MAX_HEAP: u64 = 1 << 32;

/// A growable heap: a [`HeapSource`] plus the sentinel layout above.
pub(crate) struct Heap<S> {
    source: S,
}

impl<S: HeapSource> Heap<S> {
    /// Sets up the smallest valid heap on a fresh source: start padding
    /// plus epilogue, nothing else. The epilogue starts with its
    /// previous-allocated bit set because there is no block before it yet.
    pub fn new(mut source: S) -> Result<Self, OutOfMemory> {
        debug_assert!(source.is_empty(), "heap source already contains data");
        source.grow(2 * WSIZE as usize)?;
        let mut heap = Self { source };
        heap.put_word(0, header::pack(0, true, false));
        heap.put_word(WSIZE, header::pack(0, true, true));
        Ok(heap)
    }

    /// Total heap length in bytes, sentinels included.
    #[inline]
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Offset of the epilogue sentinel word.
    #[inline]
    pub fn epilogue(&self) -> u32 {
        (self.len() - WSIZE as usize) as u32
    }

    /// Reads the word at `offset`.
    #[inline]
    pub fn word(&self, offset: u32) -> u32 {
        let i = offset as usize;
        let bytes = self.source.bytes();
        u32::from_ne_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
    }

    /// Writes the word at `offset`.
    #[inline]
    pub fn put_word(&mut self, offset: u32, word: u32) {
        let i = offset as usize;
        self.source.bytes_mut()[i..i + WSIZE as usize].copy_from_slice(&word.to_ne_bytes());
    }

    /// Borrow of `len` payload bytes starting at `offset`.
    #[inline]
    pub fn slice(&self, offset: u32, len: usize) -> &[u8] {
        &self.source.bytes()[offset as usize..offset as usize + len]
    }

    #[inline]
    pub fn slice_mut(&mut self, offset: u32, len: usize) -> &mut [u8] {
        &mut self.source.bytes_mut()[offset as usize..offset as usize + len]
    }

    /// Copies `len` bytes from offset `src` to offset `dst` within the
    /// heap. The ranges may overlap.
    pub fn copy(&mut self, src: u32, dst: u32, len: usize) {
        let src = src as usize;
        self.source
            .bytes_mut()
            .copy_within(src..src + len, dst as usize);
    }

    /// Grows the heap by at least `min_bytes`, rounded up to `chunk`
    /// granularity, and returns the header offset and size of the fresh
    /// space laid out as follows: the old epilogue word becomes the new
    /// block's header (conveniently keeping its previous-allocated bit,
    /// which now describes the block before the new one), and a fresh
    /// epilogue is written at the new end with its previous-allocated bit
    /// clear.
    ///
    /// The caller still has to write the block's free header and footer,
    /// file it into a size class and coalesce it with a free tail block.
    /// Nothing is modified when growth fails.
    pub fn extend(&mut self, min_bytes: usize, chunk: usize) -> Result<(u32, u32), OutOfMemory> {
        let grow_by = round_up_to_multiple(min_bytes as u64, chunk as u64);
        if self.len() as u64 + grow_by > MAX_HEAP {
            return Err(OutOfMemory);
        }

        let old_epilogue = self.epilogue();
        self.source.grow(grow_by as usize)?;
        debug!("heap extended by {grow_by} bytes to {}", self.len());

        self.put_word(self.epilogue(), header::pack(0, true, false));
        Ok((old_epilogue, grow_by as u32))
    }

    /// Tears the heap down, handing the backing source back.
    pub fn into_source(self) -> S {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;

    #[test]
    fn fresh_heap_is_two_sentinel_words() {
        let heap = Heap::new(VecSource::new()).unwrap();
        assert_eq!(heap.len(), 8);
        assert_eq!(heap.epilogue(), 4);

        let start = heap.word(0);
        assert_eq!(header::size_of(start), 0);
        assert!(header::is_allocated(start));

        let epilogue = heap.word(heap.epilogue());
        assert_eq!(header::size_of(epilogue), 0);
        assert!(header::is_allocated(epilogue));
        assert!(header::prev_is_allocated(epilogue));
    }

    #[test]
    fn extension_rounds_to_chunk_granularity() {
        let mut heap = Heap::new(VecSource::new()).unwrap();
        let (hdr, size) = heap.extend(100, 4096).unwrap();
        assert_eq!(hdr, 4);
        assert_eq!(size, 4096);
        assert_eq!(heap.len(), 8 + 4096);
        assert_eq!(heap.epilogue(), 4 + 4096);

        let epilogue = heap.word(heap.epilogue());
        assert_eq!(header::size_of(epilogue), 0);
        assert!(header::is_allocated(epilogue));
        assert!(!header::prev_is_allocated(epilogue));
    }

    #[test]
    fn back_to_back_extensions_append() {
        let mut heap = Heap::new(VecSource::new()).unwrap();
        let (first, _) = heap.extend(1, 4096).unwrap();
        let (second, size) = heap.extend(5000, 4096).unwrap();
        assert_eq!(first, 4);
        assert_eq!(second, 4 + 4096);
        assert_eq!(size, 8192);
        assert_eq!(heap.len(), 8 + 4096 + 8192);
    }

    #[test]
    fn failed_extension_leaves_the_heap_untouched() {
        let mut heap = Heap::new(VecSource::with_limit(8)).unwrap();
        let before = heap.word(heap.epilogue());
        assert_eq!(heap.extend(16, 4096), Err(OutOfMemory));
        assert_eq!(heap.len(), 8);
        assert_eq!(heap.word(heap.epilogue()), before);
    }

    #[test]
    fn words_survive_growth() {
        let mut heap = Heap::new(VecSource::new()).unwrap();
        heap.extend(16, 16).unwrap();
        heap.put_word(4, 0xAABB_CCDD);
        heap.extend(4096, 4096).unwrap();
        assert_eq!(heap.word(4), 0xAABB_CCDD);
    }
}
