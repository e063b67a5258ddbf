//! Error taxonomy and the fatal path.
//!
//! Anything suggesting the tracking metadata can no longer be trusted ends
//! the process here. Ordinary exhaustion of the underlying allocator is the
//! only recoverable kind and surfaces as a null pointer instead.

use crate::diag::StderrWriter;
use crate::platform;
use crate::reentrancy::ReentrancyGuard;
use core::fmt::{self, Write};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A guard word or slack byte no longer holds its pattern.
    HeapCorruption,
    /// The bootstrap arena ran out before the binding resolved.
    BootstrapExhausted,
    /// `realloc` was called before the binding resolved.
    InitOrderViolation,
    /// The underlying allocator returned null.
    UnderlyingAllocatorFailure,
    /// The registry lock primitive itself failed.
    LockFailure,
    /// The real allocator entry points could not be found.
    BindingUnavailable,
}

impl ErrorKind {
    pub const fn is_fatal(self) -> bool {
        !matches!(self, ErrorKind::UnderlyingAllocatorFailure)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::HeapCorruption => "heap corruption",
            ErrorKind::BootstrapExhausted => "bootstrap arena exhausted",
            ErrorKind::InitOrderViolation => "initialization order violation",
            ErrorKind::UnderlyingAllocatorFailure => "underlying allocator failure",
            ErrorKind::LockFailure => "lock failure",
            ErrorKind::BindingUnavailable => "underlying allocator unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report `kind` with a formatted detail line on stderr and abort.
///
/// The reentrancy guard is claimed and never released, so nothing running
/// between here and `abort` can trace or log.
#[cold]
#[inline(never)]
pub fn fatal(kind: ErrorKind, detail: fmt::Arguments<'_>) -> ! {
    debug_assert!(kind.is_fatal());
    core::mem::forget(ReentrancyGuard::try_enter());
    let _ = writeln!(StderrWriter, "\nfencemalloc: {}: {}", kind, detail);
    platform::abort()
}

/// [`fatal`] for a failed system call.
#[cold]
#[inline(never)]
pub fn fatal_errno(kind: ErrorKind, what: &str, errno: libc::c_int) -> ! {
    fatal(kind, format_args!("{} (errno {})", what, errno))
}
