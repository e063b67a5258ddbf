#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub use macos as sys;

/// Write raw bytes to stderr without allocating.
#[inline]
pub fn write_stderr(bytes: &[u8]) {
    write_fd(2, bytes);
}

/// Write raw bytes to an arbitrary descriptor without allocating.
#[inline]
pub fn write_fd(fd: libc::c_int, bytes: &[u8]) {
    let mut rest = bytes;
    while !rest.is_empty() {
        let n = unsafe { libc::write(fd, rest.as_ptr() as *const libc::c_void, rest.len()) };
        if n <= 0 {
            if n < 0 && last_errno() == libc::EINTR {
                continue;
            }
            return;
        }
        rest = &rest[n as usize..];
    }
}

/// Terminate the process immediately.
#[inline]
pub fn abort() -> ! {
    unsafe { libc::abort() }
}

/// The calling thread's errno.
#[inline]
pub fn last_errno() -> libc::c_int {
    sys::errno()
}

#[inline]
pub fn set_errno(value: libc::c_int) {
    sys::set_errno(value)
}

/// Runtime page size from `sysconf(_SC_PAGESIZE)`, cached after the first
/// call. Falls back to 4096 if sysconf fails.
pub fn page_size() -> usize {
    use core::sync::atomic::{AtomicUsize, Ordering};
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Get a cheap thread identifier recorded on every block header.
#[inline]
pub fn thread_id() -> usize {
    sys::thread_id()
}
