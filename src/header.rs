//! Boundary tag encoding.
//!
//! Every block begins with one 4 byte header word that packs the block size
//! together with two state bits:
//!
//! ```text
//!  31                                    3   2   1   0
//! +----------------------------------------+---+---+---+
//! |              size (high bits)          | - | p | a |
//! +----------------------------------------+---+---+---+
//!                                                |   |
//!                  previous block is allocated --+   +-- this block is allocated
//! ```
//!
//! Sizes are always multiples of [`MIN_BLOCK_SIZE`], so the low bits of the
//! size are guaranteed to be zero and we can reuse them as flag space. Free
//! blocks additionally carry a footer, a verbatim copy of the header, in
//! their last word. Allocated blocks don't: the footer slot is handed to the
//! user as payload, and the `p` bit in the *next* block's header is the only
//! record of whether a footer exists to our left. Every state change of a
//! block must therefore also fix up the `p` bit of the block after it.

use static_assertions::const_assert;
use static_assertions::const_assert_eq;

/// Size of a header or footer word in bytes.
pub(crate) const WSIZE: u32 = 4;

/// Payload alignment guaranteed by the allocator. Headers live at offsets
/// congruent to 4 mod 8, so the payload right after one is 8 byte aligned.
pub const ALIGNMENT: usize = 8;

/// Smallest block we can represent: header, two free list links and a
/// footer, one word each. Doubles as the block size granularity, which is
/// what keeps split remainders valid blocks.
pub(crate) const MIN_BLOCK_SIZE: u32 = 16;

/// This block is allocated.
const ALLOC_BIT: u32 = 0b001;

/// The block immediately before this one (by address) is allocated.
const PREV_ALLOC_BIT: u32 = 0b010;

/// The size lives in the high bits. Bit 2 is spare.
const SIZE_MASK: u32 = !0b111;

const_assert_eq!(MIN_BLOCK_SIZE, 4 * WSIZE);
const_assert!(MIN_BLOCK_SIZE as usize % ALIGNMENT == 0);
const_assert!(ALIGNMENT.is_power_of_two());

/// Builds a header (or footer) word.
#[inline]
pub(crate) fn pack(size: u32, allocated: bool, prev_allocated: bool) -> u32 {
    debug_assert_eq!(size & !SIZE_MASK, 0);
    let mut word = size;
    if allocated {
        word |= ALLOC_BIT;
    }
    if prev_allocated {
        word |= PREV_ALLOC_BIT;
    }
    word
}

/// Block size recorded in a header word.
#[inline]
pub(crate) fn size_of(word: u32) -> u32 {
    word & SIZE_MASK
}

#[inline]
pub(crate) fn is_allocated(word: u32) -> bool {
    word & ALLOC_BIT != 0
}

#[inline]
pub(crate) fn prev_is_allocated(word: u32) -> bool {
    word & PREV_ALLOC_BIT != 0
}

/// Returns the word with the previous-allocated bit forced to `allocated`.
#[inline]
pub(crate) fn set_prev_allocated(word: u32, allocated: bool) -> u32 {
    if allocated {
        word | PREV_ALLOC_BIT
    } else {
        word & !PREV_ALLOC_BIT
    }
}
