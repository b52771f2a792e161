//! The allocator itself: placement policy, heap growth and the public
//! allocate / free entry points.

#[cfg(debug_assertions)]
use std::collections::BTreeSet;

use log::{info, warn};

use crate::align::round_up_to;
use crate::block::{header_of, payload_of};
use crate::config::HeapConfig;
use crate::freelist::SegregatedLists;
use crate::header::{MIN_BLOCK_SIZE, WSIZE};
use crate::heap::Heap;
use crate::source::{HeapSource, OutOfMemory};
use crate::HeapPtr;

/// Smallest block size that covers `size` payload bytes plus the header
/// word, or `None` when that doesn't fit in a header.
#[inline]
pub(crate) fn aligned_block_size(size: usize) -> Option<u32> {
    const MAX_BLOCK: usize = (u32::MAX & !(MIN_BLOCK_SIZE - 1)) as usize;
    let wanted = size.checked_add(WSIZE as usize)?;
    if wanted > MAX_BLOCK {
        return None;
    }
    Some(round_up_to(wanted, MIN_BLOCK_SIZE as usize) as u32)
}

/// Segregated free list allocator over a growable [`HeapSource`].
///
/// Once you've read [`crate::header`], [`crate::block`], [`crate::heap`],
/// [`crate::freelist`] and [`crate::bucket`], this is where all of it comes
/// together:
///
/// ```text
///                heads, one list per size class
///          +--------+--------+--------+--- ... ---+--------+
/// class:   |   0    |   1    |   2    |           |   27   |
///          +--------+--------+--------+--- ... ---+--------+
///              |                 |
///              |                 +------------------+
///              v                                    v
///  +-----+----------+---------+----------+---------+----------+----------+
///  | pad | Free     | Block   | Block    | Block   | Free     | epilogue |
///  |     | 16 B     |         |          |         | 96 B     |          |
///  +-----+----------+---------+----------+---------+----------+----------+
///  heap --------------------------------------------------------------->
/// ```
///
/// The heap is one contiguous run of blocks; the class heads point at the
/// free ones. When no list has a block big enough, the heap grows at its
/// high end and the fresh space becomes one more free block, merged with
/// the old tail if that happens to be free.
///
/// Handles returned by [`alloc`](Self::alloc) are stable offsets, so the
/// backing storage is free to move when it grows. Every operation takes
/// `&mut self`; to share an allocator across threads, wrap it in a
/// [`Mutex`](std::sync::Mutex).
///
/// # Examples
///
/// ```rust
/// use segalloc::{Segalloc, VecSource, ALIGNMENT};
///
/// let mut allocator = Segalloc::new(VecSource::new())?;
///
/// let ptr = allocator.alloc(64).ok_or("out of memory")?;
/// assert_eq!(ptr.offset() % ALIGNMENT, 0);
///
/// allocator.payload_mut(ptr)[..5].copy_from_slice(b"hello");
/// assert_eq!(&allocator.payload(ptr)[..5], b"hello");
///
/// // Growing preserves the payload, possibly at a new offset.
/// let ptr = allocator.resize(Some(ptr), 128).ok_or("out of memory")?;
/// assert!(allocator.usable_size(ptr) >= 128);
/// assert_eq!(&allocator.payload(ptr)[..5], b"hello");
///
/// allocator.free(ptr);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Segalloc<S> {
    pub(crate) heap: Heap<S>,
    pub(crate) lists: SegregatedLists,
    pub(crate) config: HeapConfig,
    /// Payload offsets of live allocations. Only kept in debug builds,
    /// where it turns double frees and made up handles into panics.
    #[cfg(debug_assertions)]
    pub(crate) ledger: BTreeSet<u32>,
}

impl<S: HeapSource> Segalloc<S> {
    /// Builds an allocator on `source` with the default [`HeapConfig`].
    pub fn new(source: S) -> Result<Self, OutOfMemory> {
        Self::with_config(source, HeapConfig::default())
    }

    /// Builds an allocator on `source` tuned by `config`. The source must
    /// be empty; the initial arena is grown from it right away, so this
    /// fails if the source can't provide even one chunk.
    pub fn with_config(source: S, config: HeapConfig) -> Result<Self, OutOfMemory> {
        let config = config.normalized();
        let mut allocator = Self {
            heap: Heap::new(source)?,
            lists: SegregatedLists::new(),
            config,
            #[cfg(debug_assertions)]
            ledger: BTreeSet::new(),
        };

        let chunk = allocator.config.growth_chunk;
        allocator.extend_heap(chunk, chunk)?;
        info!("heap initialized with {} bytes", allocator.heap.len());

        Ok(allocator)
    }

    /// Allocates `size` bytes and returns a handle to the payload, or
    /// `None` when `size` is zero, too big to represent, or the heap
    /// source refuses to grow. The payload is zeroed the first time its
    /// bytes come from the source, recycled blocks keep whatever was
    /// written there before.
    pub fn alloc(&mut self, size: usize) -> Option<HeapPtr> {
        if size == 0 {
            return None;
        }
        let asize = aligned_block_size(size)?;

        let hdr = match self.lists.find_fit(&self.heap, asize, self.config.fit_policy) {
            Some(hdr) => hdr,
            None => self
                .extend_heap(self.shortfall(asize), self.config.growth_chunk)
                .ok()?,
        };
        debug_assert!(self.heap.block_size(hdr) >= asize);

        let hdr = self.place(hdr, asize);
        let payload = payload_of(hdr);
        #[cfg(debug_assertions)]
        self.ledger.insert(payload);

        Some(HeapPtr::new(payload))
    }

    /// Returns the block at `ptr` to its size class. Freeing anything but
    /// a live handle from [`alloc`](Self::alloc) or
    /// [`resize`](Self::resize) is a bug; debug builds panic on it.
    pub fn free(&mut self, ptr: HeapPtr) {
        self.debug_check_live(ptr);
        #[cfg(debug_assertions)]
        self.ledger.remove(&ptr.raw());
        self.release_block(header_of(ptr.raw()));
    }

    /// Frees the block at `hdr` without touching the debug ledger. The
    /// relocation path uses this directly because the handle it retires is
    /// swapped for a new one, not dropped.
    pub(crate) fn release_block(&mut self, hdr: u32) {
        let size = self.heap.block_size(hdr);
        self.heap.write_free_block(hdr, size);
        self.lists.insert(&mut self.heap, hdr);
        self.coalesce(hdr);
    }

    /// Bytes the payload at `ptr` may use. At least what was asked for,
    /// since blocks are carved at [`MIN_BLOCK_SIZE`] granularity and the
    /// footer slot belongs to the payload while the block is allocated.
    pub fn usable_size(&self, ptr: HeapPtr) -> usize {
        self.debug_check_live(ptr);
        (self.heap.block_size(header_of(ptr.raw())) - WSIZE) as usize
    }

    /// Borrow of the full payload at `ptr`.
    pub fn payload(&self, ptr: HeapPtr) -> &[u8] {
        self.debug_check_live(ptr);
        let len = self.heap.block_size(header_of(ptr.raw())) - WSIZE;
        self.heap.slice(ptr.raw(), len as usize)
    }

    pub fn payload_mut(&mut self, ptr: HeapPtr) -> &mut [u8] {
        self.debug_check_live(ptr);
        let len = self.heap.block_size(header_of(ptr.raw())) - WSIZE;
        self.heap.slice_mut(ptr.raw(), len as usize)
    }

    /// The configuration this allocator runs with, after normalization.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Tears the allocator down and hands back the backing source with all
    /// its bytes intact.
    pub fn into_source(self) -> S {
        self.heap.into_source()
    }

    /// Grows the heap by at least `min_bytes` (in `chunk` granules), files
    /// the fresh space as a free block and merges it with the old tail
    /// block when that one is free. Returns the resulting block's header.
    pub(crate) fn extend_heap(&mut self, min_bytes: usize, chunk: usize) -> Result<u32, OutOfMemory> {
        let (hdr, size) = self.heap.extend(min_bytes, chunk).map_err(|oom| {
            warn!("heap source refused to grow by {min_bytes} bytes");
            oom
        })?;
        self.heap.write_free_block(hdr, size);
        self.lists.insert(&mut self.heap, hdr);
        Ok(self.coalesce(hdr))
    }

    /// How many bytes the heap is short of serving an `asize` request.
    /// When the tail block is free, growth only has to cover the
    /// difference: the fresh space will merge with it.
    pub(crate) fn shortfall(&self, asize: u32) -> usize {
        let epilogue = self.heap.epilogue();
        if self.heap.prev_is_allocated(epilogue) {
            return asize as usize;
        }
        let tail = self.heap.prev_block(epilogue);
        (asize - self.heap.block_size(tail)) as usize
    }

    /// Carves an `asize` byte allocated block out of the free block at
    /// `hdr` and returns the allocated block's header.
    ///
    /// Remainders too small to stand alone are handed to the caller as
    /// slack. Viable remainders stay free, and which end they keep depends
    /// on the request: small blocks are carved from the tail so that they
    /// pack together at high offsets, big blocks from the front so that a
    /// growing tail block keeps its header in place.
    pub(crate) fn place(&mut self, hdr: u32, asize: u32) -> u32 {
        let size = self.heap.block_size(hdr);
        debug_assert!(size >= asize);
        self.lists.remove(&mut self.heap, hdr);

        let remainder = size - asize;
        if remainder < MIN_BLOCK_SIZE {
            self.heap.write_allocated_block(hdr, size);
            return hdr;
        }

        if asize as usize <= self.config.tail_carve_limit {
            self.heap.write_free_block(hdr, remainder);
            self.lists.insert(&mut self.heap, hdr);
            let carved = hdr + remainder;
            self.heap.write_allocated_block(carved, asize);
            carved
        } else {
            self.heap.write_allocated_block(hdr, asize);
            let rest = hdr + asize;
            self.heap.write_free_block(rest, remainder);
            self.lists.insert(&mut self.heap, rest);
            hdr
        }
    }

    #[cfg(debug_assertions)]
    pub(crate) fn debug_check_live(&self, ptr: HeapPtr) {
        assert!(
            self.ledger.contains(&ptr.raw()),
            "offset {:#x} is not a live allocation",
            ptr.raw()
        );
    }

    #[cfg(not(debug_assertions))]
    pub(crate) fn debug_check_live(&self, _ptr: HeapPtr) {}
}
