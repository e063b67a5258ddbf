//! Memory for allocations made before the real allocator is bound.
//!
//! `dlsym` and the dynamic loader may call `malloc`/`calloc` while we are
//! still resolving `malloc`. Those requests are served from a per-thread
//! bump arena: no metadata, no reuse, never released, never tracked.

use crate::fault::{self, ErrorKind};
use crate::util::{checked_align_up, BOOTSTRAP_WORDS, MAX_BOOTSTRAP_ARENAS, MIN_ALIGN, WORD};
use core::cell::{Cell, UnsafeCell};
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Bytes in each thread's arena.
pub const ARENA_BYTES: usize = BOOTSTRAP_WORDS * WORD;

/// Fixed-capacity bump allocator over `WORDS` machine words.
pub struct BumpArena<const WORDS: usize> {
    words: UnsafeCell<[u64; WORDS]>,
    used: Cell<usize>,
    published: Cell<bool>,
}

impl<const WORDS: usize> BumpArena<WORDS> {
    pub const CAPACITY: usize = WORDS * WORD;

    pub const fn new() -> Self {
        BumpArena {
            words: UnsafeCell::new([0; WORDS]),
            used: Cell::new(0),
            published: Cell::new(false),
        }
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.words.get().cast()
    }

    /// Bytes handed out so far, alignment padding included.
    #[inline]
    pub fn used(&self) -> usize {
        self.used.get()
    }

    /// Carve `size` bytes aligned to `align`, or `None` if they do not fit.
    /// Zero-byte requests still consume a byte so every pointer is distinct.
    pub fn allocate(&self, size: usize, align: usize) -> Option<*mut u8> {
        debug_assert!(align.is_power_of_two());
        let base = self.base() as usize;
        let start = checked_align_up(base + self.used.get(), align)? - base;
        let end = start.checked_add(size.max(1))?;
        if end > Self::CAPACITY {
            return None;
        }
        self.used.set(end);
        Some(self.base().wrapping_add(start))
    }

    #[inline]
    pub fn contains(&self, p: *const u8) -> bool {
        let base = self.base() as usize;
        (base..base + Self::CAPACITY).contains(&(p as usize))
    }
}

impl<const WORDS: usize> Default for BumpArena<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static ARENA: BumpArena<BOOTSTRAP_WORDS> = const { BumpArena::new() };
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: AtomicUsize = AtomicUsize::new(0);

/// Bases of every arena that has served a request, so any thread can
/// recognise bootstrap pointers.
static ARENAS: [AtomicUsize; MAX_BOOTSTRAP_ARENAS] = [EMPTY_SLOT; MAX_BOOTSTRAP_ARENAS];

fn publish(base: usize) {
    for slot in ARENAS.iter() {
        match slot.compare_exchange(0, base, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(existing) if existing == base => return,
            Err(_) => {}
        }
    }
    fault::fatal(
        ErrorKind::BootstrapExhausted,
        format_args!(
            "more than {} threads allocated before initialization",
            MAX_BOOTSTRAP_ARENAS
        ),
    )
}

/// Serve `size` bytes from this thread's arena. Exhaustion is fatal.
pub fn allocate(size: usize) -> *mut u8 {
    allocate_aligned(size, MIN_ALIGN)
}

pub fn allocate_aligned(size: usize, align: usize) -> *mut u8 {
    let served = ARENA.try_with(|arena| {
        if !arena.published.replace(true) {
            publish(arena.base() as usize);
        }
        arena.allocate(size, align).ok_or(arena.used())
    });
    match served {
        Ok(Ok(p)) => p,
        Ok(Err(used)) => fault::fatal(
            ErrorKind::BootstrapExhausted,
            format_args!(
                "{} bytes requested with {} of {} bytes used",
                size, used, ARENA_BYTES
            ),
        ),
        Err(_) => fault::fatal(
            ErrorKind::BootstrapExhausted,
            format_args!("thread-local arena unavailable"),
        ),
    }
}

/// Zeroed arena memory, or null if `count * size` overflows.
pub fn zero_allocate(count: usize, size: usize) -> *mut u8 {
    let total = match count.checked_mul(size) {
        Some(t) => t,
        None => return ptr::null_mut(),
    };
    let p = allocate(total);
    // Arena memory is never reused, but a thread's TLS block may be.
    unsafe { ptr::write_bytes(p, 0, total) };
    p
}

fn arena_of(p: *const u8) -> Option<usize> {
    let addr = p as usize;
    ARENAS
        .iter()
        .map(|slot| slot.load(Ordering::Acquire))
        .find(|&base| base != 0 && (base..base + ARENA_BYTES).contains(&addr))
}

/// Whether `p` was handed out by some thread's arena.
#[inline]
pub fn contains(p: *const u8) -> bool {
    arena_of(p).is_some()
}

/// Bytes from `p` to the end of its arena: the most that can be copied out
/// of a bootstrap allocation whose size was never recorded.
pub fn remaining_from(p: *const u8) -> usize {
    match arena_of(p) {
        Some(base) => base + ARENA_BYTES - p as usize,
        None => 0,
    }
}
