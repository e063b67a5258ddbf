#![no_main]

use fencemalloc::{RealAllocator, TrackingContext};
use libfuzzer_sys::fuzz_target;

/// Interprets a byte slice as a sequence of operations on a private
/// tracking context and checks the registry against a shadow model.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=malloc, 1=free, 2=realloc, 3=calloc, 4=detach, 5=memalign)
///   byte 1-2: size (little-endian u16)
///   byte 3: slot index (which tracked pointer to operate on)
const MAX_SLOTS: usize = 64;

#[derive(Clone, Copy)]
struct Slot {
    ptr: *mut u8,
    size: usize,
    fill: u8,
    registered: bool,
}

const EMPTY: Slot = Slot {
    ptr: std::ptr::null_mut(),
    size: 0,
    fill: 0,
    registered: false,
};

fn context() -> TrackingContext<RealAllocator> {
    let real = RealAllocator::new();
    if real.resolve().is_err() {
        std::process::abort();
    }
    TrackingContext::new(real)
}

unsafe fn assert_filled(slot: &Slot, len: usize) {
    let bytes = std::slice::from_raw_parts(slot.ptr, len.min(slot.size));
    assert!(bytes.iter().all(|&b| b == slot.fill), "block contents changed");
}

fuzz_target!(|data: &[u8]| {
    let ctx = context();
    let mut slots = [EMPTY; MAX_SLOTS];

    for (step, op) in data.chunks_exact(4).enumerate() {
        let opcode = op[0] % 6;
        let size = u16::from_le_bytes([op[1], op[2]]) as usize;
        let slot = &mut slots[op[3] as usize % MAX_SLOTS];
        let fill = step as u8;

        unsafe {
            match opcode {
                0 | 3 | 5 => {
                    if !slot.ptr.is_null() {
                        ctx.deallocate(slot.ptr);
                    }
                    let ptr = if opcode == 0 {
                        ctx.allocate(size)
                    } else if opcode == 5 {
                        let align = 32usize << (op[0] as usize >> 5);
                        let p = ctx.aligned_allocate(align, size);
                        assert_eq!(p as usize % align, 0);
                        p
                    } else {
                        let p = ctx.zero_allocate((size >> 8).max(1), size & 0xFF);
                        let total = (size >> 8).max(1) * (size & 0xFF);
                        assert!(std::slice::from_raw_parts(p, total).iter().all(|&b| b == 0));
                        p
                    };
                    assert!(!ptr.is_null());
                    *slot = Slot {
                        ptr,
                        size: ctx.usable_size(ptr),
                        fill,
                        registered: true,
                    };
                    std::ptr::write_bytes(ptr, fill, slot.size);
                }
                1 => {
                    if !slot.ptr.is_null() {
                        assert_filled(slot, slot.size);
                        ctx.deallocate(slot.ptr);
                        *slot = EMPTY;
                    }
                }
                2 => {
                    let ptr = ctx.reallocate(slot.ptr, size);
                    assert!(!ptr.is_null());
                    let old = *slot;
                    slot.ptr = ptr;
                    if !old.ptr.is_null() {
                        assert_filled(slot, size);
                    } else {
                        slot.registered = true;
                    }
                    slot.size = size;
                    slot.fill = fill;
                    std::ptr::write_bytes(ptr, fill, size);
                }
                4 => {
                    ctx.ignore_current_allocations();
                    for s in slots.iter_mut() {
                        s.registered = false;
                    }
                }
                _ => unreachable!(),
            }
        }

        let live = slots.iter().filter(|s| !s.ptr.is_null() && s.registered);
        let (count, bytes) = live.fold((0, 0), |(c, b), s| (c + 1, b + s.size));
        assert_eq!(ctx.allocation_count(), count);
        assert_eq!(ctx.usage(), bytes);
        ctx.check_integrity();
    }

    for slot in slots.iter().filter(|s| !s.ptr.is_null()) {
        unsafe { ctx.deallocate(slot.ptr) };
    }
    assert_eq!(ctx.allocation_count(), 0);
});
