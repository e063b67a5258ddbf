//! Guard-band and slack verification.

use super::{header_of, slack_pattern, BlockHeader, GUARD_WORDS, HEADER_GUARD, TRAILER_GUARD};
use crate::fault::{self, ErrorKind};
use crate::util::WORD;
use core::fmt;

/// What a failed check found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corruption {
    /// A word in front of the user region was overwritten (underrun or
    /// a pointer that never came from this tracker).
    HeaderGuard { index: usize, expected: u64, actual: u64 },
    /// A slack byte `past_end` bytes after the requested size changed.
    Slack { past_end: usize, expected: u8, actual: u8 },
    /// A trailer word was overwritten (overrun). `past_end` is the first
    /// changed byte, counted from the end of the requested size.
    TrailerGuard {
        index: usize,
        past_end: usize,
        expected: u64,
        actual: u64,
    },
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Corruption::HeaderGuard { index, expected, actual } => write!(
                f,
                "header guard word {} before the region: expected {:#018x}, found {:#018x}",
                index, expected, actual
            ),
            Corruption::Slack { past_end, expected, actual } => write!(
                f,
                "slack byte {} past the end of the region: expected {:#04x}, found {:#04x}",
                past_end, expected, actual
            ),
            Corruption::TrailerGuard {
                index,
                past_end,
                expected,
                actual,
            } => write!(
                f,
                "trailer guard word {} after the region, byte {} past the end: expected {:#018x}, found {:#018x}",
                index, past_end, expected, actual
            ),
        }
    }
}

/// Check the frame around `user` and return its header.
///
/// Header guards are checked first: if they are gone the recorded size is
/// not trustworthy either, so the slack and trailer are not touched.
///
/// # Safety
/// `user` must point just past a readable `BlockHeader`, and if the header
/// guards hold, the full padded block must be readable.
pub unsafe fn verify(user: *mut u8) -> Result<*mut BlockHeader, Corruption> {
    let header = header_of(user);

    for index in 0..GUARD_WORDS {
        let actual = BlockHeader::header_guard(header, index);
        if actual != HEADER_GUARD {
            return Err(Corruption::HeaderGuard {
                index,
                expected: HEADER_GUARD,
                actual,
            });
        }
    }

    let (slack, len) = BlockHeader::slack(header);
    for past_end in 0..len {
        let p = slack.add(past_end);
        let expected = slack_pattern(p);
        let actual = p.read();
        if actual != expected {
            return Err(Corruption::Slack {
                past_end,
                expected,
                actual,
            });
        }
    }

    for index in 0..GUARD_WORDS {
        let actual = BlockHeader::trailer_guard(header, index);
        if actual != TRAILER_GUARD {
            return Err(Corruption::TrailerGuard {
                index,
                past_end: len + index * WORD + first_changed_byte(TRAILER_GUARD, actual),
                expected: TRAILER_GUARD,
                actual,
            });
        }
    }

    Ok(header)
}

/// Position in memory of the first byte where two words differ.
fn first_changed_byte(expected: u64, actual: u64) -> usize {
    expected
        .to_ne_bytes()
        .iter()
        .zip(actual.to_ne_bytes())
        .position(|(&e, a)| e != a)
        .unwrap_or(0)
}

/// [`verify`], aborting the process with a HeapCorruption diagnostic on
/// failure.
///
/// # Safety
/// Same as [`verify`].
#[inline]
pub unsafe fn verify_or_abort(user: *mut u8) -> *mut BlockHeader {
    match verify(user) {
        Ok(header) => header,
        Err(corruption) => corrupted(user, corruption),
    }
}

#[cold]
#[inline(never)]
fn corrupted(user: *mut u8, corruption: Corruption) -> ! {
    match corruption {
        // The header is intact, so the size and identity can be shown.
        Corruption::Slack { .. } | Corruption::TrailerGuard { .. } => {
            let header = unsafe { header_of(user) };
            let (size, identity) = unsafe { (BlockHeader::size(header), BlockHeader::identity(header)) };
            fault::fatal(
                ErrorKind::HeapCorruption,
                format_args!(
                    "block {:p} (size {}, allocated by \"{}\"): {}",
                    user,
                    size,
                    identity.as_str(),
                    corruption
                ),
            )
        }
        Corruption::HeaderGuard { .. } => fault::fatal(
            ErrorKind::HeapCorruption,
            format_args!("block {:p}: {}", user, corruption),
        ),
    }
}
