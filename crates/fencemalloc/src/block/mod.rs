//! Framed block layout.
//!
//! Every tracked allocation is one underlying allocation laid out as
//!
//! ```plaintext
//! +-----------------------+ <- base (from the underlying allocator)
//! | alignment padding     |  only for over-aligned blocks
//! +-----------------------+ <- header = base + base_offset
//! | BlockHeader           |  identity, size, thread, base_offset,
//! |   .. guard[0..2]      |  links, 2 x HEADER_GUARD
//! +-----------------------+ <- user pointer (MIN_ALIGN aligned)
//! | requested bytes       |  header.size
//! +-----------------------+
//! | slack                 |  0..WORD-1 bytes, each = address & 0xFF
//! +-----------------------+ <- word aligned
//! | BlockTrailer          |  2 x TRAILER_GUARD
//! +-----------------------+
//! ```
//!
//! This module is the only place that computes offsets inside a block.
//! Everyone else goes through [`header_of`] / [`user_of`] and the accessor
//! methods on [`BlockHeader`].

pub mod integrity;
pub mod registry;

use crate::trace::CallSite;
use crate::util::{align_up, checked_align_up, MIN_ALIGN, WORD};
use core::mem::size_of;
use core::ptr::{self, addr_of, addr_of_mut};

/// Pattern of the two words just before the user region.
pub const HEADER_GUARD: u64 = 0xDEAD_BEEF_CAFE_F00D;
/// Pattern of the two words after the slack.
pub const TRAILER_GUARD: u64 = 0x0CAC_AFEC_EBAD_C0DE;
/// Guard words on each side.
pub const GUARD_WORDS: usize = 2;

/// Metadata in front of every tracked user region.
#[repr(C, align(16))]
pub struct BlockHeader {
    identity: CallSite,
    size: usize,
    thread: usize,
    base_offset: usize,
    pub(crate) next: *mut BlockHeader,
    pub(crate) prev: *mut BlockHeader,
    guard: [u64; GUARD_WORDS],
}

/// Guard words after the slack bytes.
#[repr(C)]
pub struct BlockTrailer {
    guard: [u64; GUARD_WORDS],
}

pub const HEADER_SIZE: usize = size_of::<BlockHeader>();
pub const TRAILER_SIZE: usize = size_of::<BlockTrailer>();

/// Bytes a block costs on top of its requested size, slack excluded.
pub const OVERHEAD: usize = HEADER_SIZE + TRAILER_SIZE;

const _: () = assert!(HEADER_SIZE % MIN_ALIGN == 0);
const _: () = assert!(TRAILER_SIZE % WORD == 0);

/// Underlying allocation size for a request of `size` bytes, or `None` if
/// it does not fit in `usize`.
#[inline]
pub const fn padded_size(size: usize) -> Option<usize> {
    match size.checked_add(OVERHEAD) {
        Some(total) => checked_align_up(total, WORD),
        None => None,
    }
}

/// Recover the header from a user pointer.
///
/// # Safety
/// `user` must be a pointer returned for a framed block.
#[inline(always)]
pub unsafe fn header_of(user: *mut u8) -> *mut BlockHeader {
    user.sub(HEADER_SIZE).cast()
}

/// The user pointer of a header.
#[inline(always)]
pub fn user_of(header: *mut BlockHeader) -> *mut u8 {
    header.cast::<u8>().wrapping_add(HEADER_SIZE)
}

/// Where the header of a block starting at `base` goes so that its user
/// pointer is aligned to `align`. Returns the header and its offset from
/// `base`, at most `align - MIN_ALIGN` for a `MIN_ALIGN`-aligned base.
#[inline]
pub fn aligned_header(base: *mut u8, align: usize) -> (*mut BlockHeader, usize) {
    let user = align_up(base as usize + HEADER_SIZE, align);
    let offset = user - HEADER_SIZE - base as usize;
    (base.wrapping_add(offset).cast(), offset)
}

/// The pointer the underlying allocator returned for this block.
///
/// # Safety
/// `header` must be a stamped block.
#[inline]
pub unsafe fn base_of(header: *mut BlockHeader) -> *mut u8 {
    header.cast::<u8>().sub(BlockHeader::base_offset(header))
}

impl BlockHeader {
    /// Requested size in bytes.
    #[inline]
    pub unsafe fn size(this: *const Self) -> usize {
        addr_of!((*this).size).read()
    }

    #[inline]
    pub unsafe fn identity(this: *const Self) -> CallSite {
        addr_of!((*this).identity).read()
    }

    /// Thread that last allocated or resized the block.
    #[inline]
    pub unsafe fn thread(this: *const Self) -> usize {
        addr_of!((*this).thread).read()
    }

    /// Padding between the underlying allocation and the header; non-zero
    /// only for over-aligned blocks.
    #[inline]
    pub unsafe fn base_offset(this: *const Self) -> usize {
        addr_of!((*this).base_offset).read()
    }

    #[inline]
    pub unsafe fn set_base_offset(this: *mut Self, offset: usize) {
        addr_of_mut!((*this).base_offset).write(offset);
    }

    #[inline]
    pub unsafe fn header_guard(this: *const Self, index: usize) -> u64 {
        addr_of!((*this).guard[index]).read()
    }

    /// First slack byte and how many slack bytes follow the user region.
    #[inline]
    pub unsafe fn slack(this: *mut Self) -> (*mut u8, usize) {
        let end = user_of(this).add(Self::size(this));
        let len = align_up(end as usize, WORD) - end as usize;
        (end, len)
    }

    #[inline]
    pub unsafe fn trailer(this: *mut Self) -> *mut BlockTrailer {
        let (slack, len) = Self::slack(this);
        slack.add(len).cast()
    }

    #[inline]
    pub unsafe fn trailer_guard(this: *mut Self, index: usize) -> u64 {
        let trailer = Self::trailer(this);
        addr_of!((*trailer).guard[index]).read()
    }
}

/// Byte pattern expected at `addr` in the slack.
#[inline(always)]
pub fn slack_pattern(addr: *const u8) -> u8 {
    (addr as usize & 0xFF) as u8
}

/// Write header fields, guard words, slack pattern and trailer of a block
/// whose underlying allocation starts at `header`. The registry links are
/// left for the registry to set.
///
/// # Safety
/// `header` must point to at least `padded_size(size)` writable bytes.
pub unsafe fn stamp(header: *mut BlockHeader, size: usize, identity: CallSite, thread: usize) {
    addr_of_mut!((*header).identity).write(identity);
    addr_of_mut!((*header).size).write(size);
    addr_of_mut!((*header).thread).write(thread);
    addr_of_mut!((*header).base_offset).write(0);
    addr_of_mut!((*header).next).write(ptr::null_mut());
    addr_of_mut!((*header).prev).write(registry::UNLINKED);
    addr_of_mut!((*header).guard).write([HEADER_GUARD; GUARD_WORDS]);

    let (slack, len) = BlockHeader::slack(header);
    for i in 0..len {
        let p = slack.add(i);
        p.write(slack_pattern(p));
    }

    let trailer = BlockHeader::trailer(header);
    addr_of_mut!((*trailer).guard).write([TRAILER_GUARD; GUARD_WORDS]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::is_aligned;

    /// Word-aligned scratch big enough for any block in these tests.
    #[repr(C, align(16))]
    struct Scratch([u8; 512]);

    #[test]
    fn header_keeps_user_pointer_aligned() {
        assert_eq!(HEADER_SIZE, 80);
        assert_eq!(TRAILER_SIZE, 16);
    }

    #[test]
    fn padded_size_rounds_to_word() {
        assert_eq!(padded_size(0), Some(OVERHEAD));
        assert_eq!(padded_size(1), Some(OVERHEAD + 8));
        assert_eq!(padded_size(8), Some(OVERHEAD + 8));
        assert_eq!(padded_size(9), Some(OVERHEAD + 16));
        assert_eq!(padded_size(usize::MAX), None);
        assert_eq!(padded_size(usize::MAX - OVERHEAD), None);
    }

    #[test]
    fn conversions_are_inverse() {
        let mut scratch = Scratch([0; 512]);
        let header = scratch.0.as_mut_ptr().cast::<BlockHeader>();
        let user = user_of(header);
        assert_eq!(user as usize - header as usize, HEADER_SIZE);
        assert_eq!(unsafe { header_of(user) }, header);
        assert!(is_aligned(user as usize, MIN_ALIGN));
    }

    #[test]
    fn aligned_header_puts_user_pointer_on_the_boundary() {
        let mut scratch = Scratch([0; 512]);
        let base = scratch.0.as_mut_ptr();
        for align in [16usize, 32, 64, 128, 256] {
            let (header, offset) = aligned_header(base, align);
            assert!(is_aligned(user_of(header) as usize, align));
            assert!(offset <= align - MIN_ALIGN);
            unsafe {
                stamp(header, 8, CallSite::untraced(), 0);
                BlockHeader::set_base_offset(header, offset);
                assert_eq!(base_of(header), base);
            }
        }
    }

    #[test]
    fn stamp_fills_slack_and_places_trailer_on_a_word() {
        for size in [0usize, 1, 7, 8, 13, 64] {
            let mut scratch = Scratch([0; 512]);
            let header = scratch.0.as_mut_ptr().cast::<BlockHeader>();
            unsafe {
                stamp(header, size, CallSite::untraced(), 7);
                assert_eq!(BlockHeader::size(header), size);
                assert_eq!(BlockHeader::thread(header), 7);
                let (slack, len) = BlockHeader::slack(header);
                assert_eq!(slack, user_of(header).add(size));
                assert_eq!(len, align_up(size, WORD) - size);
                for i in 0..len {
                    assert_eq!(*slack.add(i), slack_pattern(slack.add(i)));
                }
                let trailer = BlockHeader::trailer(header) as usize;
                assert!(is_aligned(trailer, WORD));
                assert!(trailer + TRAILER_SIZE - header as usize <= padded_size(size).unwrap());
                for i in 0..GUARD_WORDS {
                    assert_eq!(BlockHeader::header_guard(header, i), HEADER_GUARD);
                    assert_eq!(BlockHeader::trailer_guard(header, i), TRAILER_GUARD);
                }
            }
        }
    }
}
