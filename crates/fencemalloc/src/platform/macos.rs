#[inline]
pub fn errno() -> libc::c_int {
    unsafe { *libc::__error() }
}

#[inline]
pub fn set_errno(value: libc::c_int) {
    unsafe { *libc::__error() = value }
}

#[inline]
pub fn thread_id() -> usize {
    unsafe {
        let mut tid: u64 = 0;
        libc::pthread_threadid_np(libc::pthread_self(), &mut tid);
        tid as usize
    }
}

// No futex on macOS: waiters spin.
#[inline]
pub fn futex_wait(_word: &core::sync::atomic::AtomicI32, _expected: i32) -> Result<(), libc::c_int> {
    core::hint::spin_loop();
    Ok(())
}

#[inline]
pub fn futex_wake_one(_word: &core::sync::atomic::AtomicI32) -> Result<(), libc::c_int> {
    Ok(())
}
