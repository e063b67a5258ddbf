//! Process-wide entry points.
//!
//! Every call dispatches on the binding state: tracked once the real
//! allocator is bound, the bootstrap arena while binding is in progress,
//! untracked passthrough when the kill switch is set.

use crate::allocator::{bootstrap, UnderlyingAllocator};
use crate::fault::{self, ErrorKind};
use crate::init::{self, STATE_DISABLED, STATE_INITIALIZING, STATE_READY};
use crate::platform;
use core::fmt;
use core::ptr;

// ============================================================================
// Allocation
// ============================================================================

pub unsafe fn allocate(size: usize) -> *mut u8 {
    match init::state() {
        STATE_READY => init::context().allocate(size),
        STATE_DISABLED => init::context().underlying().allocate(size),
        STATE_INITIALIZING => bootstrap::allocate(size),
        _ => {
            init::ensure_initialized();
            allocate(size)
        }
    }
}

pub unsafe fn zero_allocate(count: usize, size: usize) -> *mut u8 {
    match init::state() {
        STATE_READY => init::context().zero_allocate(count, size),
        STATE_DISABLED => init::context().underlying().zero_allocate(count, size),
        STATE_INITIALIZING => bootstrap::zero_allocate(count, size),
        _ => {
            init::ensure_initialized();
            zero_allocate(count, size)
        }
    }
}

pub unsafe fn reallocate(ptr: *mut u8, size: usize) -> *mut u8 {
    if ptr.is_null() {
        return allocate(size);
    }
    match init::state() {
        STATE_INITIALIZING if init::is_initializer() => fault::fatal(
            ErrorKind::InitOrderViolation,
            format_args!("realloc({:p}, {}) before the allocator was bound", ptr, size),
        ),
        STATE_INITIALIZING => {
            init::wait_settled();
            reallocate(ptr, size)
        }
        _ if bootstrap::contains(ptr) => relocate(ptr, size),
        STATE_READY => init::context().reallocate(ptr, size),
        STATE_DISABLED => init::context().underlying().reallocate(ptr, size),
        _ => {
            init::ensure_initialized();
            reallocate(ptr, size)
        }
    }
}

/// Move a bootstrap allocation into regular memory. Its size was never
/// recorded, so the copy stops at the end of its arena.
#[cold]
unsafe fn relocate(old: *mut u8, size: usize) -> *mut u8 {
    let new = allocate(size);
    if !new.is_null() {
        let len = size.min(bootstrap::remaining_from(old));
        ptr::copy_nonoverlapping(old, new, len);
    }
    new
}

pub unsafe fn deallocate(ptr: *mut u8) {
    if ptr.is_null() || bootstrap::contains(ptr) {
        return;
    }
    match init::state() {
        STATE_READY => init::context().deallocate(ptr),
        STATE_DISABLED => init::context().underlying().free(ptr),
        // Nothing but bootstrap memory exists before binding completes.
        STATE_INITIALIZING if init::is_initializer() => {}
        STATE_INITIALIZING => {
            init::wait_settled();
            deallocate(ptr)
        }
        _ => {
            init::ensure_initialized();
            deallocate(ptr)
        }
    }
}

/// Requested size of a tracked block. Bootstrap blocks report 0: their
/// size is not recorded.
pub unsafe fn usable_size(ptr: *mut u8) -> usize {
    if ptr.is_null() || bootstrap::contains(ptr) {
        return 0;
    }
    match init::state() {
        STATE_READY => init::context().usable_size(ptr),
        STATE_DISABLED => init::context().underlying().usable_size(ptr),
        _ => 0,
    }
}

/// A block aligned to `align` (a power of two). Tracked like any other
/// block and released with [`deallocate`].
pub unsafe fn aligned_allocate(align: usize, size: usize) -> *mut u8 {
    match init::state() {
        STATE_READY => init::context().aligned_allocate(align, size),
        STATE_DISABLED => init::context().underlying().aligned_allocate(align, size),
        STATE_INITIALIZING => bootstrap::allocate_aligned(size, align),
        _ => {
            init::ensure_initialized();
            aligned_allocate(align, size)
        }
    }
}

/// `reallocarray`: [`reallocate`] to `count * size` bytes, or null with
/// `ENOMEM` if the product overflows.
pub unsafe fn reallocate_array(ptr: *mut u8, count: usize, size: usize) -> *mut u8 {
    match count.checked_mul(size) {
        Some(total) => reallocate(ptr, total),
        None => {
            platform::set_errno(libc::ENOMEM);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Reporting
// ============================================================================

/// Requested bytes over all tracked blocks.
pub fn usage() -> usize {
    init::context().usage()
}

/// [`usage`] plus per-block header and trailer overhead.
pub fn real_usage() -> usize {
    init::context().real_usage()
}

pub fn allocation_count() -> usize {
    init::context().allocation_count()
}

/// Verify every tracked block; aborts the process on corruption.
pub fn check_integrity() {
    init::context().check_integrity()
}

pub fn show_allocations<W: fmt::Write + ?Sized>(sink: &mut W) -> fmt::Result {
    init::context().show_allocations(sink)
}

/// Stop tracking (and reporting) every block allocated so far.
pub fn ignore_current_allocations() -> usize {
    init::context().ignore_current_allocations()
}

// ============================================================================
// C ABI
// ============================================================================

#[cfg(feature = "export")]
pub mod exports {
    use crate::diag::FdWriter;
    use crate::platform;
    use crate::util::checked_align_up;
    use core::ffi::c_void;
    use core::{mem, ptr};

    #[no_mangle]
    pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
        super::allocate(size) as *mut c_void
    }

    #[no_mangle]
    pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
        super::zero_allocate(nmemb, size) as *mut c_void
    }

    #[no_mangle]
    pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
        super::reallocate(ptr as *mut u8, size) as *mut c_void
    }

    #[no_mangle]
    pub unsafe extern "C" fn free(ptr: *mut c_void) {
        super::deallocate(ptr as *mut u8)
    }

    #[no_mangle]
    pub unsafe extern "C" fn reallocarray(ptr: *mut c_void, nmemb: usize, size: usize) -> *mut c_void {
        super::reallocate_array(ptr as *mut u8, nmemb, size) as *mut c_void
    }

    // POSIX and C11 alignment entry points. Their blocks are framed and
    // tracked, so any of them may be handed to `free` or `realloc`.

    #[no_mangle]
    pub unsafe extern "C" fn posix_memalign(
        memptr: *mut *mut c_void,
        alignment: usize,
        size: usize,
    ) -> libc::c_int {
        if memptr.is_null() {
            return libc::EINVAL;
        }
        // A power of two and a multiple of sizeof(void*).
        if !alignment.is_power_of_two() || alignment < mem::size_of::<*mut c_void>() {
            return libc::EINVAL;
        }
        let ptr = super::aligned_allocate(alignment, size);
        if ptr.is_null() {
            return libc::ENOMEM;
        }
        *memptr = ptr as *mut c_void;
        0
    }

    #[no_mangle]
    pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
        if !alignment.is_power_of_two() {
            platform::set_errno(libc::EINVAL);
            return ptr::null_mut();
        }
        super::aligned_allocate(alignment, size) as *mut c_void
    }

    /// Alignments that are not a power of two are rounded up to one.
    #[no_mangle]
    pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
        match alignment.max(1).checked_next_power_of_two() {
            Some(alignment) => super::aligned_allocate(alignment, size) as *mut c_void,
            None => {
                platform::set_errno(libc::EINVAL);
                ptr::null_mut()
            }
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
        super::aligned_allocate(platform::page_size(), size) as *mut c_void
    }

    #[no_mangle]
    pub unsafe extern "C" fn pvalloc(size: usize) -> *mut c_void {
        let page_size = platform::page_size();
        match checked_align_up(size, page_size) {
            Some(rounded) => super::aligned_allocate(page_size, rounded) as *mut c_void,
            None => {
                platform::set_errno(libc::ENOMEM);
                ptr::null_mut()
            }
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
        super::usable_size(ptr as *mut u8)
    }

    #[no_mangle]
    pub extern "C" fn fencemalloc_usage() -> usize {
        super::usage()
    }

    #[no_mangle]
    pub extern "C" fn fencemalloc_real_usage() -> usize {
        super::real_usage()
    }

    #[no_mangle]
    pub extern "C" fn fencemalloc_allocation_count() -> usize {
        super::allocation_count()
    }

    #[no_mangle]
    pub extern "C" fn fencemalloc_check_integrity() {
        super::check_integrity()
    }

    /// Write the leak listing to `fd`. Returns 0, or -1 if the listing
    /// could not be rendered.
    #[no_mangle]
    pub extern "C" fn fencemalloc_show_allocations(fd: libc::c_int) -> libc::c_int {
        match super::show_allocations(&mut FdWriter(fd)) {
            Ok(()) => 0,
            Err(_) => -1,
        }
    }

    /// Returns how many blocks were detached.
    #[no_mangle]
    pub extern "C" fn fencemalloc_ignore_current_allocations() -> usize {
        super::ignore_current_allocations()
    }
}
