pub mod bootstrap;
pub mod passthrough;
pub mod tracked;

pub use passthrough::RealAllocator;
pub use tracked::TrackingContext;

/// The allocator that actually provides memory for framed blocks.
///
/// # Safety
/// Implementations must behave like the C allocator family: returned
/// pointers are aligned to at least 16 bytes (or `align` for
/// `aligned_allocate`), valid for the requested size, and null on failure.
/// `free` and `reallocate` accept any pointer previously returned by the
/// same implementation.
pub unsafe trait UnderlyingAllocator {
    unsafe fn allocate(&self, size: usize) -> *mut u8;

    unsafe fn zero_allocate(&self, count: usize, size: usize) -> *mut u8;

    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8;

    unsafe fn aligned_allocate(&self, align: usize, size: usize) -> *mut u8;

    unsafe fn free(&self, ptr: *mut u8);
}
