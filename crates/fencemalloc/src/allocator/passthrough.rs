//! The platform allocator, found with dlsym(RTLD_NEXT).
//!
//! Because our library exports `malloc`/`free` symbols, calling `libc::malloc`
//! from within our library would recurse back to us. We must use dlsym(RTLD_NEXT)
//! to find the next definition in lookup order.

use super::UnderlyingAllocator;
use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type PosixMemalignFn = unsafe extern "C" fn(*mut *mut c_void, usize, usize) -> libc::c_int;
type MallocUsableSizeFn = unsafe extern "C" fn(*mut c_void) -> usize;

/// Cached entry points, zero until resolved.
pub struct RealAllocator {
    malloc: AtomicUsize,
    calloc: AtomicUsize,
    realloc: AtomicUsize,
    free: AtomicUsize,
    posix_memalign: AtomicUsize,
    malloc_usable_size: AtomicUsize,
}

unsafe fn lookup(name: &[u8]) -> usize {
    debug_assert_eq!(name.last(), Some(&0));
    libc::dlsym(libc::RTLD_NEXT, name.as_ptr() as *const libc::c_char) as usize
}

impl RealAllocator {
    pub const fn new() -> Self {
        RealAllocator {
            malloc: AtomicUsize::new(0),
            calloc: AtomicUsize::new(0),
            realloc: AtomicUsize::new(0),
            free: AtomicUsize::new(0),
            posix_memalign: AtomicUsize::new(0),
            malloc_usable_size: AtomicUsize::new(0),
        }
    }

    /// Look up the real entry points. `malloc`, `realloc` and `free` are
    /// required; the name of the first missing one is returned.
    ///
    /// `dlsym` may itself allocate, so callers must route this thread's
    /// allocations elsewhere until it returns.
    pub fn resolve(&self) -> Result<(), &'static str> {
        let required: [(&AtomicUsize, &[u8], &'static str); 3] = [
            (&self.malloc, b"malloc\0", "malloc"),
            (&self.realloc, b"realloc\0", "realloc"),
            (&self.free, b"free\0", "free"),
        ];
        for (slot, symbol, name) in required {
            let f = unsafe { lookup(symbol) };
            if f == 0 {
                return Err(name);
            }
            slot.store(f, Ordering::Release);
        }

        // Optional: calloc falls back to malloc + memset, the others to null/0.
        let optional: [(&AtomicUsize, &[u8]); 3] = [
            (&self.calloc, b"calloc\0"),
            (&self.posix_memalign, b"posix_memalign\0"),
            (&self.malloc_usable_size, b"malloc_usable_size\0"),
        ];
        for (slot, symbol) in optional {
            slot.store(unsafe { lookup(symbol) }, Ordering::Release);
        }
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.malloc.load(Ordering::Acquire) != 0
            && self.realloc.load(Ordering::Acquire) != 0
            && self.free.load(Ordering::Acquire) != 0
    }

    /// The platform's idea of the usable size of one of its own pointers.
    #[inline]
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        let f = self.malloc_usable_size.load(Ordering::Acquire);
        if f == 0 || ptr.is_null() {
            return 0;
        }
        let func: MallocUsableSizeFn = core::mem::transmute(f);
        func(ptr as *mut c_void)
    }
}

impl Default for RealAllocator {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl UnderlyingAllocator for RealAllocator {
    #[inline]
    unsafe fn allocate(&self, size: usize) -> *mut u8 {
        let f = self.malloc.load(Ordering::Acquire);
        if f == 0 {
            return ptr::null_mut();
        }
        let func: MallocFn = core::mem::transmute(f);
        func(size) as *mut u8
    }

    #[inline]
    unsafe fn zero_allocate(&self, count: usize, size: usize) -> *mut u8 {
        let f = self.calloc.load(Ordering::Acquire);
        if f != 0 {
            let func: CallocFn = core::mem::transmute(f);
            return func(count, size) as *mut u8;
        }
        let total = match count.checked_mul(size) {
            Some(t) => t,
            None => return ptr::null_mut(),
        };
        let p = self.allocate(total);
        if !p.is_null() {
            ptr::write_bytes(p, 0, total);
        }
        p
    }

    #[inline]
    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let f = self.realloc.load(Ordering::Acquire);
        if f == 0 {
            return ptr::null_mut();
        }
        let func: ReallocFn = core::mem::transmute(f);
        func(ptr as *mut c_void, size) as *mut u8
    }

    #[inline]
    unsafe fn aligned_allocate(&self, align: usize, size: usize) -> *mut u8 {
        let f = self.posix_memalign.load(Ordering::Acquire);
        if f == 0 {
            return ptr::null_mut();
        }
        let func: PosixMemalignFn = core::mem::transmute(f);
        let mut out: *mut c_void = ptr::null_mut();
        // posix_memalign wants at least sizeof(void*).
        let align = align.max(core::mem::size_of::<*mut c_void>());
        if func(&mut out, align, size) == 0 {
            out as *mut u8
        } else {
            ptr::null_mut()
        }
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let f = self.free.load(Ordering::Acquire);
        if f != 0 {
            let func: FreeFn = core::mem::transmute(f);
            func(ptr as *mut c_void);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_and_round_trips() {
        let real = RealAllocator::new();
        assert!(!real.is_resolved());
        assert!(unsafe { real.allocate(8) }.is_null());
        real.resolve().unwrap();
        assert!(real.is_resolved());
        unsafe {
            let p = real.allocate(32);
            assert!(!p.is_null());
            #[cfg(target_os = "linux")]
            assert!(real.usable_size(p) >= 32);
            let p = real.reallocate(p, 4096);
            assert!(!p.is_null());
            real.free(p);

            let z = real.zero_allocate(4, 8);
            assert!(core::slice::from_raw_parts(z, 32).iter().all(|&b| b == 0));
            real.free(z);

            let a = real.aligned_allocate(256, 100);
            assert_eq!(a as usize % 256, 0);
            real.free(a);
        }
    }
}
