use crate::util::DEFAULT_TRACE_DEPTH;
use core::ffi::CStr;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Cached config values (read once at init, never allocate).
static TRACE_DEPTH: AtomicUsize = AtomicUsize::new(DEFAULT_TRACE_DEPTH);
static EXIT_REPORT: AtomicBool = AtomicBool::new(true);

/// Read configuration from environment variables.
///
/// # Safety
/// Calls libc::getenv, so must run during init before other threads can
/// modify the environment.
pub unsafe fn read_config() {
    if let Some(depth) = getenv_usize(b"FENCEMALLOC_TRACE_DEPTH\0") {
        TRACE_DEPTH.store(depth, Ordering::Relaxed);
    }
    if getenv_usize(b"FENCEMALLOC_EXIT_REPORT\0") == Some(0) {
        EXIT_REPORT.store(false, Ordering::Relaxed);
    }
}

/// Check the kill switch: any value of `FENCEMALLOC_DISABLE` turns
/// tracking off for the whole process.
///
/// # Safety
/// Calls libc::getenv which is not thread-safe, so must be called during init.
pub unsafe fn is_disabled() -> bool {
    getenv(b"FENCEMALLOC_DISABLE\0").is_some()
}

pub fn trace_depth() -> usize {
    TRACE_DEPTH.load(Ordering::Relaxed)
}

/// Whether the leak listing is printed at exit.
pub fn exit_report() -> bool {
    EXIT_REPORT.load(Ordering::Relaxed)
}

unsafe fn getenv(key: &[u8]) -> Option<&'static [u8]> {
    let val = libc::getenv(key.as_ptr() as *const libc::c_char);
    if val.is_null() {
        None
    } else {
        Some(CStr::from_ptr(val).to_bytes())
    }
}

/// Parse an environment variable as a usize.
unsafe fn getenv_usize(key: &[u8]) -> Option<usize> {
    parse_usize(getenv(key)?)
}

/// Decimal digits only; anything else (including empty) is `None`.
fn parse_usize(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0usize, |acc, &byte| {
        if !byte.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add((byte - b'0') as usize)
    })
}

#[cfg(test)]
mod tests {
    use super::parse_usize;

    #[test]
    fn parses_plain_decimal() {
        assert_eq!(parse_usize(b"0"), Some(0));
        assert_eq!(parse_usize(b"16"), Some(16));
    }

    #[test]
    fn rejects_garbage_and_overflow() {
        assert_eq!(parse_usize(b""), None);
        assert_eq!(parse_usize(b"12a"), None);
        assert_eq!(parse_usize(b"-1"), None);
        assert_eq!(parse_usize(b"99999999999999999999999"), None);
    }
}
