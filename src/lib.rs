//! Segregated free list allocator over a growable, offset addressed heap.
//!
//! Blocks carry boundary tags, free blocks are filed into power of two
//! size classes, and the heap grows like a program break: append only, at
//! its high end. Start with [`Segalloc`] for the API and follow the module
//! docs from [`header`] upward for the on-heap layout.

mod align;
mod allocator;
mod block;
mod bucket;
mod check;
mod coalesce;
mod config;
mod freelist;
mod header;
mod heap;
mod realloc;
mod source;

pub use align::round_up_to;
pub use allocator::Segalloc;
pub use check::{Corruption, HeapStats};
pub use config::{FitPolicy, HeapConfig};
pub use header::ALIGNMENT;
#[cfg(unix)]
pub use source::MmapSource;
pub use source::{HeapSource, OutOfMemory, VecSource};

/// Handle to a live allocation: the payload's byte offset into the heap.
///
/// Handles are plain numbers, not borrows, so any number of them can be
/// held while the allocator stays free to mutate. The flip side is that
/// nothing ties a handle's lifetime to its block: using one after
/// [`free`](Segalloc::free) is the moral equivalent of a dangling
/// pointer, and debug builds panic on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapPtr(u32);

impl HeapPtr {
    #[inline]
    pub(crate) fn new(offset: u32) -> Self {
        Self(offset)
    }

    #[inline]
    pub(crate) fn raw(self) -> u32 {
        self.0
    }

    /// Byte offset of the payload from the start of the heap.
    #[inline]
    pub fn offset(self) -> usize {
        self.0 as usize
    }
}
