//! `#[global_allocator]` support.
//!
//! Routes a Rust program's own allocations through the process-wide
//! tracking context, without relying on symbol interposition:
//!
//! ```rust,ignore
//! use fencemalloc::FenceMalloc;
//!
//! #[global_allocator]
//! static GLOBAL: FenceMalloc = FenceMalloc;
//! ```

use crate::api;
use crate::util::MIN_ALIGN;
use core::alloc::{GlobalAlloc, Layout};

/// A zero-sized unit struct that implements [`GlobalAlloc`] by delegating to
/// the fencemalloc entry points. Layouts aligned beyond 16 bytes become
/// aligned tracked blocks.
pub struct FenceMalloc;

unsafe impl GlobalAlloc for FenceMalloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        let align = layout.align();

        // Zero-size types: return a well-aligned dangling pointer.
        if size == 0 {
            return align as *mut u8;
        }

        if align <= MIN_ALIGN {
            api::allocate(size)
        } else {
            api::aligned_allocate(align, size)
        }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        let align = layout.align();

        if size == 0 {
            return align as *mut u8;
        }

        if align <= MIN_ALIGN {
            api::zero_allocate(1, size)
        } else {
            let ptr = api::aligned_allocate(align, size);
            if !ptr.is_null() {
                core::ptr::write_bytes(ptr, 0, size);
            }
            ptr
        }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        api::deallocate(ptr)
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let old_size = layout.size();
        let align = layout.align();

        if old_size == 0 {
            return self.alloc(Layout::from_size_align_unchecked(new_size, align));
        }

        if align <= MIN_ALIGN {
            api::reallocate(ptr, new_size)
        } else {
            // realloc only guarantees MIN_ALIGN.
            let new_ptr = api::aligned_allocate(align, new_size);
            if !new_ptr.is_null() {
                core::ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
                api::deallocate(ptr);
            }
            new_ptr
        }
    }
}
