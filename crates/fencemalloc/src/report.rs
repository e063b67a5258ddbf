//! Usage, leak and integrity queries over a tracking context.

use crate::allocator::{TrackingContext, UnderlyingAllocator};
use crate::block::integrity::verify_or_abort;
use crate::block::registry::Registry;
use crate::block::{self, BlockHeader, OVERHEAD};
use core::fmt::{self, Write};
use core::ptr;

/// Verify a registered block and return its requested size.
#[inline]
unsafe fn checked_size(header: *mut BlockHeader) -> usize {
    BlockHeader::size(verify_or_abort(block::user_of(header)))
}

impl<U: UnderlyingAllocator> TrackingContext<U> {
    /// Requested bytes over all registered blocks. Every block is verified.
    pub fn usage(&self) -> usize {
        let registry = self.registry.lock();
        registry
            .iter()
            .map(|header| unsafe { checked_size(header) })
            .sum()
    }

    /// [`usage`](Self::usage) plus the header and trailer of each block.
    pub fn real_usage(&self) -> usize {
        let registry = self.registry.lock();
        registry
            .iter()
            .map(|header| unsafe { checked_size(header) } + OVERHEAD)
            .sum()
    }

    pub fn allocation_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Verify every registered block, aborting on the first bad one.
    pub fn check_integrity(&self) {
        let registry = self.registry.lock();
        for header in registry.iter() {
            unsafe { verify_or_abort(block::user_of(header)) };
        }
    }

    /// Stop tracking everything currently registered. The blocks stay
    /// valid and can still be freed or resized. Returns how many were
    /// detached.
    pub fn ignore_current_allocations(&self) -> usize {
        self.registry.lock().detach_all()
    }

    /// Write the leak listing to `sink`.
    ///
    /// The text is rendered into memory from the underlying allocator and
    /// written out after unlocking, so `sink` may allocate through this
    /// same context. The buffer is only ever grown with the registry
    /// unlocked: if the listing no longer fits once the lock is held, the
    /// lock is dropped and the buffer resized to the measured length.
    pub fn show_allocations<W: fmt::Write + ?Sized>(&self, sink: &mut W) -> fmt::Result {
        let guess = self
            .allocation_count()
            .saturating_mul(LINE_HINT)
            .saturating_add(LINE_HINT);
        self.show_allocations_sized(sink, guess)
    }

    fn show_allocations_sized<W: fmt::Write + ?Sized>(&self, sink: &mut W, mut wanted: usize) -> fmt::Result {
        let mut text = RenderBuf::new(self.underlying());
        loop {
            text.reserve(wanted)?;
            let registry = self.registry.lock();
            let mut width = Width(0);
            render(&registry, &mut width)?;
            if width.0 <= text.capacity() {
                text.clear();
                render(&registry, &mut text)?;
                break;
            }
            drop(registry);
            wanted = width.0;
        }
        sink.write_str(text.as_str())
    }
}

/// Starting guess for the length of one listing line.
const LINE_HINT: usize = 128;

fn render(registry: &Registry, out: &mut impl Write) -> fmt::Result {
    let count = registry.len();
    if count == 0 {
        return out.write_str("No memory allocations currently\n");
    }
    let summary = Summary(count);
    let mut width = Width(0);
    write!(width, "{}", summary)?;
    write!(out, "\n{}\n", summary)?;
    for _ in 0..width.0 {
        out.write_char('-')?;
    }
    out.write_char('\n')?;
    for header in registry.iter() {
        let user = block::user_of(header);
        unsafe {
            let size = checked_size(header);
            writeln!(
                out,
                "  Address {:p} size of {}, allocated by \"{}\" on thread {}",
                user,
                size,
                BlockHeader::identity(header).as_str(),
                BlockHeader::thread(header)
            )?;
        }
    }
    out.write_char('\n')
}

struct Summary(usize);

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 1 {
            f.write_str("1 block remains allocated")
        } else {
            write!(f, "{} blocks remain allocated", self.0)
        }
    }
}

/// Counts bytes written.
struct Width(usize);

impl Write for Width {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

/// Text buffer backed directly by the underlying allocator, so rendering
/// never touches the registry it is describing. Writes never grow it: a
/// write past the reserved capacity fails.
struct RenderBuf<'a, U: UnderlyingAllocator + ?Sized> {
    underlying: &'a U,
    ptr: *mut u8,
    len: usize,
    cap: usize,
}

impl<'a, U: UnderlyingAllocator + ?Sized> RenderBuf<'a, U> {
    fn new(underlying: &'a U) -> Self {
        RenderBuf {
            underlying,
            ptr: ptr::null_mut(),
            len: 0,
            cap: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.cap
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    /// Make room for at least `cap` bytes in total.
    fn reserve(&mut self, cap: usize) -> fmt::Result {
        if cap <= self.cap {
            return Ok(());
        }
        let grown = unsafe { self.underlying.reallocate(self.ptr, cap) };
        if grown.is_null() {
            return Err(fmt::Error);
        }
        self.ptr = grown;
        self.cap = cap;
        Ok(())
    }

    fn as_str(&self) -> &str {
        if self.ptr.is_null() {
            return "";
        }
        // Only whole `&str`s are appended.
        unsafe { core::str::from_utf8_unchecked(core::slice::from_raw_parts(self.ptr, self.len)) }
    }
}

impl<U: UnderlyingAllocator + ?Sized> Write for RenderBuf<'_, U> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if s.len() > self.cap - self.len {
            return Err(fmt::Error);
        }
        unsafe { ptr::copy_nonoverlapping(s.as_ptr(), self.ptr.add(self.len), s.len()) };
        self.len += s.len();
        Ok(())
    }
}

impl<U: UnderlyingAllocator + ?Sized> Drop for RenderBuf<'_, U> {
    fn drop(&mut self) {
        unsafe { self.underlying.free(self.ptr) };
    }
}
