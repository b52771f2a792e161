//! Allocator tuning knobs.

use crate::align::round_up_to;
use crate::header::MIN_BLOCK_SIZE;

/// How [`find_fit`](crate::freelist::SegregatedLists::find_fit) picks among
/// candidate free blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
    /// Smallest fitting block within the lowest size class that has any
    /// fit. Not a global best fit: classes above the first one with a
    /// candidate are never scanned, which bounds the search cost.
    #[default]
    BestFit,
    /// First fitting block in list order. Cheaper per search, typically
    /// worse packing.
    FirstFit,
}

/// Tuning parameters for a [`Segalloc`](crate::Segalloc) heap.
///
/// The defaults match the classic setup: page sized growth on the
/// allocation path, a larger chunk on the resize path, best fit placement.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Granularity of heap extensions triggered by `alloc`, in bytes.
    pub growth_chunk: usize,
    /// Granularity of heap extensions triggered by `resize`. Kept larger
    /// than [`growth_chunk`](Self::growth_chunk) so that a block being
    /// grown over and over at the heap's tail causes fewer extensions.
    pub resize_chunk: usize,
    /// Free block search policy.
    pub fit_policy: FitPolicy,
    /// Aligned block sizes up to this many bytes are carved from the tail
    /// of their free block, packing small allocations toward the high end
    /// of the heap. Bigger requests are carved from the front.
    pub tail_carve_limit: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            growth_chunk: 4096,
            resize_chunk: 16384,
            fit_policy: FitPolicy::default(),
            tail_carve_limit: 128,
        }
    }
}

impl HeapConfig {
    /// Chunk sizes have to be non-zero multiples of the block granularity,
    /// otherwise heap extensions would produce blocks with unrepresentable
    /// sizes. Rounds anything the caller got wrong.
    pub(crate) fn normalized(mut self) -> Self {
        let granularity = MIN_BLOCK_SIZE as usize;
        self.growth_chunk = round_up_to(self.growth_chunk.max(granularity), granularity);
        self.resize_chunk = round_up_to(self.resize_chunk.max(granularity), granularity);
        self
    }
}
