/// The calling thread's errno.
#[inline]
pub fn errno() -> libc::c_int {
    unsafe { *libc::__errno_location() }
}

#[inline]
pub fn set_errno(value: libc::c_int) {
    unsafe { *libc::__errno_location() = value }
}

/// Get the kernel thread id of the caller.
/// Cached in TLS to avoid a syscall on every allocation.
#[inline]
pub fn thread_id() -> usize {
    use std::cell::Cell;

    thread_local! {
        static CACHED_TID: Cell<usize> = const { Cell::new(0) };
    }

    CACHED_TID.with(|tid| {
        let cached = tid.get();
        if cached != 0 {
            return cached;
        }
        let new_tid = unsafe { libc::syscall(libc::SYS_gettid) as usize };
        tid.set(new_tid);
        new_tid
    })
}

/// Block until `*word` is no longer `expected`.
///
/// Returns `Err(errno)` only for failures other than a changed value or a
/// signal interruption.
#[inline]
pub fn futex_wait(word: &core::sync::atomic::AtomicI32, expected: i32) -> Result<(), libc::c_int> {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const core::sync::atomic::AtomicI32,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            core::ptr::null::<libc::timespec>(),
        )
    };
    if ret == 0 {
        return Ok(());
    }
    match errno() {
        libc::EAGAIN | libc::EINTR => Ok(()),
        e => Err(e),
    }
}

/// Wake one waiter blocked on `word`.
#[inline]
pub fn futex_wake_one(word: &core::sync::atomic::AtomicI32) -> Result<(), libc::c_int> {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const core::sync::atomic::AtomicI32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            1i32,
        )
    };
    if ret < 0 {
        Err(errno())
    } else {
        Ok(())
    }
}
