/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Like [`align_up`], but `None` instead of wrapping.
#[inline(always)]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Check if `value` is aligned to `align`.
#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Machine word used for guard words and slack rounding.
pub const WORD: usize = core::mem::size_of::<u64>();

/// Alignment of every pointer handed out (matches max_align_t on 64-bit).
pub const MIN_ALIGN: usize = 16;

/// Words in each thread's bootstrap arena (96 KiB).
pub const BOOTSTRAP_WORDS: usize = 0x3000;

/// Upper bound on threads whose bootstrap arena can be recognised by `free`.
pub const MAX_BOOTSTRAP_ARENAS: usize = 64;

/// Default number of frames kept in a call-site description.
pub const DEFAULT_TRACE_DEPTH: usize = 8;

/// Longest call-site description stored on a header, in bytes.
pub const MAX_TRACE_LEN: usize = 1024;
