//! The tracking context: framed blocks on top of an underlying allocator.
//!
//! One context owns one registry. The process-wide interposer uses a
//! single static context; tests build private ones so their counts are not
//! disturbed by whatever else the process allocates.

use super::UnderlyingAllocator;
use crate::block::integrity::verify_or_abort;
use crate::block::registry::Registry;
use crate::block::{self, BlockHeader};
use crate::diag::verbose;
use crate::platform;
use crate::reentrancy::ReentrancyGuard;
use crate::sync::Mutex;
use crate::trace::{self, CallSite};
use crate::util::{DEFAULT_TRACE_DEPTH, MIN_ALIGN};
use core::{fmt, ptr};
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct TrackingContext<U> {
    underlying: U,
    pub(crate) registry: Mutex<Registry>,
    trace_depth: AtomicUsize,
}

impl<U: UnderlyingAllocator> TrackingContext<U> {
    pub const fn new(underlying: U) -> Self {
        TrackingContext {
            underlying,
            registry: Mutex::new(Registry::new()),
            trace_depth: AtomicUsize::new(DEFAULT_TRACE_DEPTH),
        }
    }

    #[inline]
    pub fn underlying(&self) -> &U {
        &self.underlying
    }

    /// Frames kept per call-site description (only used with `trace`).
    pub fn set_trace_depth(&self, depth: usize) {
        self.trace_depth.store(depth, Ordering::Relaxed);
    }

    fn identity(&self, guard: Option<&ReentrancyGuard>) -> CallSite {
        match guard {
            Some(guard) => trace::capture(
                &self.underlying,
                guard,
                self.trace_depth.load(Ordering::Relaxed),
            ),
            None => CallSite::nested(),
        }
    }

    /// Stamp a fresh header that sits `offset` bytes into its underlying
    /// allocation and link it. Returns the user pointer and the live count
    /// after insertion.
    unsafe fn link_new(
        &self,
        header: *mut BlockHeader,
        offset: usize,
        size: usize,
        guard: Option<&ReentrancyGuard>,
    ) -> (*mut u8, usize) {
        block::stamp(header, size, self.identity(guard), platform::thread_id());
        BlockHeader::set_base_offset(header, offset);
        let count = {
            let mut registry = self.registry.lock();
            registry.insert(header);
            registry.len()
        };
        (block::user_of(header), count)
    }

    /// `malloc`: a framed, registered block of `size` bytes, or null if the
    /// underlying allocator fails.
    pub unsafe fn allocate(&self, size: usize) -> *mut u8 {
        let padded = match block::padded_size(size) {
            Some(p) => p,
            None => return ptr::null_mut(),
        };
        let base = self.underlying.allocate(padded);
        if base.is_null() {
            return ptr::null_mut();
        }
        let guard = ReentrancyGuard::try_enter();
        let (user, count) = self.link_new(base.cast(), 0, size, guard.as_ref());
        if let Some(guard) = &guard {
            verbose!(
                guard,
                "malloc ({}) = {:p}, allocated by \"{}\", {}",
                size,
                user,
                BlockHeader::identity(block::header_of(user)).as_str(),
                count
            );
        }
        user
    }

    /// `calloc`: as [`allocate`](Self::allocate) for `count * size` zeroed
    /// bytes. Overflow yields null.
    pub unsafe fn zero_allocate(&self, count: usize, size: usize) -> *mut u8 {
        let total = match count.checked_mul(size) {
            Some(t) => t,
            None => return ptr::null_mut(),
        };
        let padded = match block::padded_size(total) {
            Some(p) => p,
            None => return ptr::null_mut(),
        };
        let base = self.underlying.zero_allocate(1, padded);
        if base.is_null() {
            return ptr::null_mut();
        }
        let guard = ReentrancyGuard::try_enter();
        let (user, live) = self.link_new(base.cast(), 0, total, guard.as_ref());
        if let Some(guard) = &guard {
            verbose!(
                guard,
                "calloc ({}, {}) = {:p}, allocated by \"{}\", {}",
                count,
                size,
                user,
                BlockHeader::identity(block::header_of(user)).as_str(),
                live
            );
        }
        user
    }

    /// `posix_memalign` and friends: a framed block whose user pointer is a
    /// multiple of `align`, which must be a power of two. The underlying
    /// allocation is larger by `align - MIN_ALIGN` and the header records
    /// how far into it the frame starts.
    pub unsafe fn aligned_allocate(&self, align: usize, size: usize) -> *mut u8 {
        debug_assert!(align.is_power_of_two());
        if align <= MIN_ALIGN {
            return self.allocate(size);
        }
        let total = match block::padded_size(size).and_then(|p| p.checked_add(align - MIN_ALIGN)) {
            Some(t) => t,
            None => return ptr::null_mut(),
        };
        let base = self.underlying.allocate(total);
        if base.is_null() {
            return ptr::null_mut();
        }
        let (header, offset) = block::aligned_header(base, align);
        let guard = ReentrancyGuard::try_enter();
        let (user, count) = self.link_new(header, offset, size, guard.as_ref());
        if let Some(guard) = &guard {
            verbose!(
                guard,
                "memalign ({}, {}) = {:p}, allocated by \"{}\", {}",
                align,
                size,
                user,
                BlockHeader::identity(header).as_str(),
                count
            );
        }
        user
    }

    /// `realloc`. A null `ptr` allocates. On failure null is returned and
    /// the old block is left registered and intact. A block detached
    /// by `ignore_current_allocations` stays detached.
    pub unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.allocate(size);
        }
        let header = verify_or_abort(ptr);
        let padded = match block::padded_size(size) {
            Some(p) => p,
            None => return ptr::null_mut(),
        };
        let old_size = BlockHeader::size(header);
        if BlockHeader::base_offset(header) != 0 {
            return self.move_block(ptr, header, size);
        }
        let old_identity = BlockHeader::identity(header);

        let was_member = self.registry.lock().remove(header);
        let base = self.underlying.reallocate(header.cast(), padded);
        if base.is_null() {
            if was_member {
                self.registry.lock().insert(header);
            }
            return ptr::null_mut();
        }

        let guard = ReentrancyGuard::try_enter();
        let header = base.cast::<BlockHeader>();
        block::stamp(header, size, self.identity(guard.as_ref()), platform::thread_id());
        let count = {
            let mut registry = self.registry.lock();
            if was_member {
                registry.insert(header);
            }
            registry.len()
        };
        let user = block::user_of(header);
        if let Some(guard) = &guard {
            verbose!(
                guard,
                "realloc ({:p}, {} -> {}) = {:p}, allocated by \"{}\", {}",
                ptr,
                old_size,
                size,
                user,
                BlockHeader::identity(header).as_str(),
                count
            );
        }
        old_identity.release(&self.underlying);
        user
    }

    /// Resize an offset block by copying: the underlying `realloc` would
    /// not keep the frame at its offset. Like `realloc`, the result only
    /// keeps `MIN_ALIGN`.
    unsafe fn move_block(&self, ptr: *mut u8, header: *mut BlockHeader, size: usize) -> *mut u8 {
        let moved = self.allocate(size);
        if moved.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(ptr, moved, BlockHeader::size(header).min(size));
        {
            let mut registry = self.registry.lock();
            if !Registry::is_linked(header) {
                registry.remove(block::header_of(moved));
            }
        }
        self.deallocate(ptr);
        moved
    }

    /// `free`. Null is a no-op. The live count only drops for blocks that
    /// were still registered.
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let header = verify_or_abort(ptr);
        let (was_member, count) = {
            let mut registry = self.registry.lock();
            let was_member = registry.remove(header);
            (was_member, registry.len())
        };
        let identity = BlockHeader::identity(header);
        if let Some(guard) = ReentrancyGuard::try_enter() {
            if cfg!(feature = "verbose") {
                let freed_by = self.identity(Some(&guard));
                verbose!(
                    &guard,
                    "{}",
                    FreeEvent {
                        ptr,
                        size: BlockHeader::size(header),
                        allocated_by: &identity,
                        freed_by: &freed_by,
                        live: count,
                        detached: !was_member,
                    }
                );
                freed_by.release(&self.underlying);
            }
        }
        identity.release(&self.underlying);
        self.underlying.free(block::base_of(header));
    }

    /// Requested size of a verified block.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        if ptr.is_null() {
            return 0;
        }
        BlockHeader::size(verify_or_abort(ptr))
    }
}

/// The verbose line for a `free`.
struct FreeEvent<'a> {
    ptr: *mut u8,
    size: usize,
    allocated_by: &'a CallSite,
    freed_by: &'a CallSite,
    live: usize,
    detached: bool,
}

impl fmt::Display for FreeEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "free ({:p}) size {}, allocated by \"{}\", freed by \"{}\", {}",
            self.ptr,
            self.size,
            self.allocated_by.as_str(),
            self.freed_by.as_str(),
            self.live
        )?;
        if self.detached {
            f.write_str(" (detached)")?;
        }
        Ok(())
    }
}
