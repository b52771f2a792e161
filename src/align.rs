/// Rounds `size` up to the next multiple of `granularity`, which must be a
/// power of two.
///
/// # Examples
///
/// ```rust
/// use segalloc::round_up_to;
///
/// assert_eq!(round_up_to(13, 8), 16);
/// assert_eq!(round_up_to(16, 8), 16);
/// assert_eq!(round_up_to(52, 16), 64);
/// ```
#[inline]
pub fn round_up_to(size: usize, granularity: usize) -> usize {
    debug_assert!(granularity.is_power_of_two());
    (size + granularity - 1) & !(granularity - 1)
}

/// Same as [`round_up_to`] but for arbitrary multiples, not only powers of
/// two. Heap growth chunks are configurable, so we can't rely on the bit
/// trick there.
#[inline]
pub(crate) fn round_up_to_multiple(value: u64, multiple: u64) -> u64 {
    debug_assert!(multiple > 0);
    value.div_ceil(multiple) * multiple
}
