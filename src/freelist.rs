//! Segregated free lists.
//!
//! See [`crate::block`] first. When a block is free we use its payload to
//! store list links: a doubly linked list of _only_ free blocks, one list
//! per size class. The links are plain word offsets into the heap, stored
//! right after the header:
//!
//! ```text
//! +----------------------+
//! | header               |
//! +----------------------+
//! | offset of prev free  | <--+
//! +----------------------+    | the block's free list node
//! | offset of next free  | <--+
//! +----------------------+
//! |    rest of payload   | <--- unused while free. This could be 0 bytes.
//! +----------------------+
//! | footer               |
//! +----------------------+
//! ```
//!
//! Every list is headed by one slot in the `heads` array, indexed by size
//! class:
//!
//! ```text
//! heads:   [0]      [1]      [2]     ...    [27]
//!           |        |        |
//!           v        |        v
//!          NIL       |     +-------+     +-------+
//!                    |     | 96 B  | <-> | 64 B  |
//!                    v     +-------+     +-------+
//!                 +-------+
//!                 | 48 B  |
//!                 +-------+
//! ```
//!
//! List members are linked in both directions, so removing a block only
//! needs the block itself, never a walk from the head. Offset `0` is the
//! heap's start padding word, which can never be a block header, so it
//! doubles as the null link [`NIL`].
//!
//! A block lives in exactly one list at a time, picked by its current size.
//! Merging or splitting changes the size, so the code doing that always
//! removes the block first and reinserts the result, which may land in a
//! different class.
//!
//! Insertion is LIFO: freshly freed blocks sit at the head of their list
//! and are the first candidates handed out again.

use crate::bucket::{class_of, CLASS_COUNT};
use crate::config::FitPolicy;
use crate::header::WSIZE;
use crate::heap::Heap;
use crate::source::HeapSource;

/// Null link. Offset 0 is the start padding word, never a block.
pub(crate) const NIL: u32 = 0;

/// Offset of a free block's previous link, relative to its header.
const PREV_LINK: u32 = WSIZE;

/// Offset of a free block's next link, relative to its header.
const NEXT_LINK: u32 = 2 * WSIZE;

/// One free list head per size class.
pub(crate) struct SegregatedLists {
    heads: [u32; CLASS_COUNT],
}

impl SegregatedLists {
    pub const fn new() -> Self {
        Self {
            heads: [NIL; CLASS_COUNT],
        }
    }

    /// Head of `class`'s list, or [`NIL`] when the class is empty.
    #[inline]
    pub fn head(&self, class: usize) -> u32 {
        self.heads[class]
    }

    #[inline]
    pub fn prev_of<S: HeapSource>(heap: &Heap<S>, hdr: u32) -> u32 {
        heap.word(hdr + PREV_LINK)
    }

    #[inline]
    pub fn next_of<S: HeapSource>(heap: &Heap<S>, hdr: u32) -> u32 {
        heap.word(hdr + NEXT_LINK)
    }

    fn set_prev<S: HeapSource>(heap: &mut Heap<S>, hdr: u32, link: u32) {
        heap.put_word(hdr + PREV_LINK, link);
    }

    fn set_next<S: HeapSource>(heap: &mut Heap<S>, hdr: u32, link: u32) {
        heap.put_word(hdr + NEXT_LINK, link);
    }

    /// Pushes the free block at `hdr` onto the head of its class's list.
    pub fn insert<S: HeapSource>(&mut self, heap: &mut Heap<S>, hdr: u32) {
        debug_assert!(!heap.is_allocated(hdr));
        let class = class_of(heap.block_size(hdr));
        let head = self.heads[class];

        Self::set_next(heap, hdr, head);
        Self::set_prev(heap, hdr, NIL);
        if head != NIL {
            Self::set_prev(heap, head, hdr);
        }
        self.heads[class] = hdr;
    }

    /// Unlinks the block at `hdr` from its class's list through its own
    /// links, without walking anything. The block must currently be a
    /// member of that list; debug builds check, release builds trust the
    /// caller.
    pub fn remove<S: HeapSource>(&mut self, heap: &mut Heap<S>, hdr: u32) {
        let class = class_of(heap.block_size(hdr));
        debug_assert!(
            self.contains(heap, class, hdr),
            "block at offset {hdr:#x} is not filed in class {class}"
        );

        let prev = Self::prev_of(heap, hdr);
        let next = Self::next_of(heap, hdr);
        if prev == NIL {
            self.heads[class] = next;
        } else {
            Self::set_next(heap, prev, next);
        }
        if next != NIL {
            Self::set_prev(heap, next, prev);
        }
    }

    /// Finds a free block of at least `asize` bytes, scanning classes from
    /// `class_of(asize)` upward.
    ///
    /// With [`FitPolicy::BestFit`] this settles on the smallest fitting
    /// block within the first class that has any fit at all; higher
    /// classes are left alone. With [`FitPolicy::FirstFit`] it takes the
    /// first fitting block in list order. Returns `None` when no list has
    /// a candidate, in which case the heap has to grow.
    pub fn find_fit<S: HeapSource>(
        &self,
        heap: &Heap<S>,
        asize: u32,
        policy: FitPolicy,
    ) -> Option<u32> {
        for class in class_of(asize)..CLASS_COUNT {
            let mut best: Option<(u32, u32)> = None;
            let mut cursor = self.heads[class];
            while cursor != NIL {
                let size = heap.block_size(cursor);
                if size >= asize {
                    if policy == FitPolicy::FirstFit {
                        return Some(cursor);
                    }
                    if best.is_none_or(|(_, best_size)| size < best_size) {
                        best = Some((cursor, size));
                    }
                }
                cursor = Self::next_of(heap, cursor);
            }
            if let Some((hdr, _)) = best {
                return Some(hdr);
            }
        }
        None
    }

    /// Linear membership scan backing the debug assertion in [`remove`](Self::remove).
    fn contains<S: HeapSource>(&self, heap: &Heap<S>, class: usize, hdr: u32) -> bool {
        let mut cursor = self.heads[class];
        while cursor != NIL {
            if cursor == hdr {
                return true;
            }
            cursor = Self::next_of(heap, cursor);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;

    /// One heap with three free blocks in the 64 byte class (sizes 96, 64,
    /// 112) and one in the 1024 byte class, in insertion order.
    fn populated() -> (Heap<VecSource>, SegregatedLists, [u32; 4]) {
        let mut heap = Heap::new(VecSource::new()).unwrap();
        heap.extend(4096, 4096).unwrap();
        let mut lists = SegregatedLists::new();

        let mut offsets = [0; 4];
        let mut hdr = 4;
        for (i, size) in [96, 64, 112, 1024].into_iter().enumerate() {
            heap.write_free_block(hdr, size);
            offsets[i] = hdr;
            hdr += size;
        }
        // Terminate the arena so the last block has an allocated neighbor.
        heap.write_allocated_block(hdr, 4096 - (96 + 64 + 112 + 1024));
        for offset in offsets {
            lists.insert(&mut heap, offset);
        }
        (heap, lists, offsets)
    }

    #[test]
    fn insertion_is_lifo() {
        let (heap, lists, [first, second, third, big]) = populated();

        let class = class_of(64);
        assert_eq!(lists.head(class), third);
        assert_eq!(SegregatedLists::next_of(&heap, third), second);
        assert_eq!(SegregatedLists::next_of(&heap, second), first);
        assert_eq!(SegregatedLists::next_of(&heap, first), NIL);
        assert_eq!(SegregatedLists::prev_of(&heap, first), second);
        assert_eq!(SegregatedLists::prev_of(&heap, third), NIL);

        assert_eq!(lists.head(class_of(1024)), big);
    }

    #[test]
    fn removal_relinks_neighbors() {
        let (mut heap, mut lists, [first, second, third, _]) = populated();
        let class = class_of(64);

        // Middle.
        lists.remove(&mut heap, second);
        assert_eq!(SegregatedLists::next_of(&heap, third), first);
        assert_eq!(SegregatedLists::prev_of(&heap, first), third);

        // Head.
        lists.remove(&mut heap, third);
        assert_eq!(lists.head(class), first);
        assert_eq!(SegregatedLists::prev_of(&heap, first), NIL);

        // Last member.
        lists.remove(&mut heap, first);
        assert_eq!(lists.head(class), NIL);
    }

    #[test]
    fn best_fit_picks_the_smallest_candidate_in_the_first_class() {
        let (heap, lists, [_, second, third, big]) = populated();

        // 64 is an exact fit even though 112 and 96 sit earlier in the list.
        assert_eq!(lists.find_fit(&heap, 64, FitPolicy::BestFit), Some(second));
        // 100 only fits the 112 byte block within the class.
        assert_eq!(lists.find_fit(&heap, 100, FitPolicy::BestFit), Some(third));
        // Nothing in the 64 byte class fits 200 bytes; the search moves up
        // in classes rather than settling for a near miss.
        assert_eq!(lists.find_fit(&heap, 200, FitPolicy::BestFit), Some(big));
    }

    #[test]
    fn first_fit_takes_the_head_of_the_list() {
        let (heap, lists, [_, _, third, big]) = populated();

        assert_eq!(lists.find_fit(&heap, 64, FitPolicy::FirstFit), Some(third));
        assert_eq!(lists.find_fit(&heap, 2000, FitPolicy::FirstFit), None);
        assert_eq!(lists.find_fit(&heap, 512, FitPolicy::FirstFit), Some(big));
    }

    #[test]
    fn find_fit_reports_exhaustion() {
        let (heap, lists, _) = populated();
        assert_eq!(lists.find_fit(&heap, 4096, FitPolicy::BestFit), None);
    }
}
