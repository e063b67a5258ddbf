//! Allocation-free diagnostic output.
//!
//! Everything here formats with `core::fmt` straight into a file descriptor
//! or a fixed stack buffer. Nothing may allocate: these writers run inside
//! `malloc` and on the abort path.

use crate::platform;
use crate::reentrancy::ReentrancyGuard;
use core::fmt;

/// `fmt::Write` sink for fd 2.
pub struct StderrWriter;

impl fmt::Write for StderrWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        platform::write_stderr(s.as_bytes());
        Ok(())
    }
}

/// `fmt::Write` sink for an arbitrary file descriptor.
pub struct FdWriter(pub libc::c_int);

impl fmt::Write for FdWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        platform::write_fd(self.0, s.as_bytes());
        Ok(())
    }
}

/// Fixed-capacity text buffer. Writes past the end are dropped.
pub struct StackBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> StackBuf<N> {
    pub const fn new() -> Self {
        StackBuf {
            buf: [0u8; N],
            len: 0,
            truncated: false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_str(&self) -> &str {
        // Only whole UTF-8 sequences are ever appended.
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn remaining(&self) -> usize {
        N - self.len
    }
}

impl<const N: usize> Default for StackBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for StackBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut take = s.len().min(self.remaining());
        while take < s.len() && !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}

/// Emit one verbose line. Requires the reentrancy guard so a logging path
/// can never trigger another log line.
#[cold]
pub fn emit(_guard: &ReentrancyGuard, args: fmt::Arguments<'_>) {
    let mut line = StackBuf::<512>::new();
    let _ = fmt::write(&mut line, args);
    platform::write_stderr(b"fencemalloc: ");
    platform::write_stderr(line.as_bytes());
    if line.is_truncated() {
        platform::write_stderr(b" ...");
    }
    platform::write_stderr(b"\n");
}

/// Per-call logging, compiled in with the `verbose` feature.
macro_rules! verbose {
    ($guard:expr, $($arg:tt)*) => {
        if cfg!(feature = "verbose") {
            $crate::diag::emit($guard, format_args!($($arg)*));
        }
    };
}

pub(crate) use verbose;
