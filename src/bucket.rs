//! Size class buckets.
//!
//! Free blocks are segregated by size into power of two buckets so that a
//! search for "some block of at least N bytes" only has to look at lists
//! whose members are big enough to be candidates. Class `i` holds blocks
//! with sizes in `[2^(i+4), 2^(i+5))`:
//!
//! ```text
//! class:    0          1          2                     27
//!        [16, 32)   [32, 64)  [64, 128)   ...   [2^31, ..)
//! ```
//!
//! The table is tiny and static, so mapping a size to its class is a binary
//! search over 28 boundaries.

/// Number of size classes.
pub(crate) const CLASS_COUNT: usize = 28;

/// Lower bound of each size class: `2^4` through `2^31`.
pub(crate) const CLASS_BOUNDS: [u32; CLASS_COUNT] = class_bounds();

const fn class_bounds() -> [u32; CLASS_COUNT] {
    let mut bounds = [0; CLASS_COUNT];
    let mut i = 0;
    while i < CLASS_COUNT {
        bounds[i] = 1 << (i + 4);
        i += 1;
    }
    bounds
}

/// Maps a block size to its class index: the greatest `i` such that
/// `CLASS_BOUNDS[i] <= size`. Sizes beyond the last boundary simply land in
/// the last class.
#[inline]
pub(crate) fn class_of(size: u32) -> usize {
    debug_assert!(size >= CLASS_BOUNDS[0]);
    let mut low = 0;
    let mut high = CLASS_COUNT;
    while low < high {
        let mid = low + (high - low) / 2;
        if size < CLASS_BOUNDS[mid] {
            high = mid;
        } else {
            low = mid + 1;
        }
    }
    low - 1
}
