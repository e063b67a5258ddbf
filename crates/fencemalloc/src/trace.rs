//! Call-site descriptions attached to block headers.
//!
//! With the `trace` feature every tracked block records who allocated it,
//! as a `caller<<-caller's caller<<-...` string. The string itself lives in
//! memory taken straight from the underlying allocator, so it is never a
//! tracked block and never shows up in leak reports.

use crate::allocator::UnderlyingAllocator;
use crate::diag::StackBuf;
use crate::reentrancy::ReentrancyGuard;
use core::fmt::Write;
use core::ptr;

static UNTRACED: [u8; 8] = *b"untraced";
static NESTED: [u8; 17] = *b"(instrumentation)";

/// Separator between frames, innermost first.
pub const FRAME_SEPARATOR: &str = "<<-";

/// Who allocated a block: either a fixed placeholder or an owned string.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct CallSite {
    ptr: *const u8,
    len: usize,
}

impl CallSite {
    /// Placeholder used when tracing is compiled out or unavailable.
    #[inline]
    pub fn untraced() -> Self {
        CallSite {
            ptr: UNTRACED.as_ptr(),
            len: UNTRACED.len(),
        }
    }

    /// Placeholder for blocks allocated by the instrumentation itself.
    #[inline]
    pub fn nested() -> Self {
        CallSite {
            ptr: NESTED.as_ptr(),
            len: NESTED.len(),
        }
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        !ptr::eq(self.ptr, UNTRACED.as_ptr()) && !ptr::eq(self.ptr, NESTED.as_ptr())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        // Built only from `&str` data by this module.
        unsafe { core::str::from_utf8_unchecked(core::slice::from_raw_parts(self.ptr, self.len)) }
    }

    /// Copy `text` into memory owned by `underlying`.
    #[cfg_attr(not(feature = "trace"), allow(dead_code))]
    fn copy_in<U: UnderlyingAllocator + ?Sized>(underlying: &U, text: &str) -> Option<Self> {
        if text.is_empty() {
            return None;
        }
        unsafe {
            let p = underlying.allocate(text.len());
            if p.is_null() {
                return None;
            }
            ptr::copy_nonoverlapping(text.as_ptr(), p, text.len());
            Some(CallSite {
                ptr: p,
                len: text.len(),
            })
        }
    }

    /// Give an owned description back to `underlying`. Placeholders are
    /// left alone.
    ///
    /// # Safety
    /// `self` must have been produced by [`capture`] with the same
    /// underlying allocator and not released before.
    #[inline]
    pub unsafe fn release<U: UnderlyingAllocator + ?Sized>(self, underlying: &U) {
        if self.is_owned() {
            underlying.free(self.ptr as *mut u8);
        }
    }
}

/// Describe the current call chain.
///
/// `_guard` proves diagnostics are suppressed on this thread, so the
/// allocations made while capturing are tracked but never traced.
#[cfg(feature = "trace")]
pub fn capture<U: UnderlyingAllocator + ?Sized>(
    underlying: &U,
    _guard: &ReentrancyGuard,
    depth: usize,
) -> CallSite {
    use crate::util::MAX_TRACE_LEN;

    let backtrace = std::backtrace::Backtrace::force_capture();
    if backtrace.status() != std::backtrace::BacktraceStatus::Captured {
        return CallSite::untraced();
    }
    let text = backtrace.to_string();
    let mut out = StackBuf::<MAX_TRACE_LEN>::new();
    describe(&text, depth, &mut out);
    CallSite::copy_in(underlying, out.as_str()).unwrap_or_else(CallSite::untraced)
}

#[cfg(not(feature = "trace"))]
#[inline]
pub fn capture<U: UnderlyingAllocator + ?Sized>(
    _underlying: &U,
    _guard: &ReentrancyGuard,
    _depth: usize,
) -> CallSite {
    CallSite::untraced()
}

/// Join up to `depth` caller frames of a rendered backtrace into `out`.
#[cfg_attr(not(feature = "trace"), allow(dead_code))]
pub(crate) fn describe<const N: usize>(rendered: &str, depth: usize, out: &mut StackBuf<N>) {
    for (i, name) in caller_frames(rendered).take(depth).enumerate() {
        if i > 0 {
            let _ = out.write_str(FRAME_SEPARATOR);
        }
        let _ = out.write_str(name);
        if out.is_truncated() {
            break;
        }
    }
}

/// Symbol names of the frames in a `std::backtrace` rendering, skipping
/// the capture machinery and this crate's own frames.
#[cfg_attr(not(feature = "trace"), allow(dead_code))]
fn caller_frames(rendered: &str) -> impl Iterator<Item = &str> {
    rendered
        .lines()
        .filter_map(frame_symbol)
        .map(strip_hash)
        .filter(|name| !is_internal(name))
}

/// `"  12: foo::bar::h0123..."` -> `"foo::bar::h0123..."`
fn frame_symbol(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let (index, rest) = line.split_once(':')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let name = rest.trim();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Drop the `::h<16 hex digits>` disambiguator rustc appends.
fn strip_hash(name: &str) -> &str {
    match name.rsplit_once("::h") {
        Some((head, hash)) if hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit()) => head,
        _ => name,
    }
}

fn is_internal(name: &str) -> bool {
    const PREFIXES: [&str; 5] = [
        "std::backtrace",
        "std::sys",
        "fencemalloc::",
        "<fencemalloc::",
        "__rust",
    ];
    PREFIXES.iter().any(|p| name.starts_with(p))
        || matches!(name, "malloc" | "calloc" | "realloc" | "free")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = "   0: std::backtrace_rs::backtrace::libunwind::trace::h0f1e2d3c4b5a6978
             at /rustc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: std::backtrace::Backtrace::create::h1111111111111111
   2: fencemalloc::trace::capture::h2222222222222222
   3: <fencemalloc::allocator::tracked::TrackingContext<U>>::allocate::h3333333333333333
   4: malloc
   5: app::load_config::h4444444444444444
             at ./src/config.rs:10:5
   6: app::main::h5555555555555555
   7: core::ops::function::FnOnce::call_once::h6666666666666666
";

    #[test]
    fn describe_keeps_only_caller_frames() {
        let mut out = StackBuf::<256>::new();
        describe(RENDERED, 8, &mut out);
        assert_eq!(
            out.as_str(),
            "app::load_config<<-app::main<<-core::ops::function::FnOnce::call_once"
        );
    }

    #[test]
    fn describe_respects_depth() {
        let mut out = StackBuf::<256>::new();
        describe(RENDERED, 1, &mut out);
        assert_eq!(out.as_str(), "app::load_config");
    }

    #[test]
    fn describe_stops_at_capacity() {
        let mut out = StackBuf::<20>::new();
        describe(RENDERED, 8, &mut out);
        assert_eq!(out.len(), 20);
        assert!(out.is_truncated());
    }

    #[test]
    fn strip_hash_leaves_plain_names_alone() {
        assert_eq!(strip_hash("main"), "main");
        assert_eq!(strip_hash("a::b::h0123456789abcdef"), "a::b");
        assert_eq!(strip_hash("a::hello"), "a::hello");
    }

    #[test]
    fn placeholders_are_not_owned() {
        assert!(!CallSite::untraced().is_owned());
        assert!(!CallSite::nested().is_owned());
        assert_eq!(CallSite::untraced().as_str(), "untraced");
        assert_eq!(CallSite::nested().as_str(), "(instrumentation)");
    }
}
