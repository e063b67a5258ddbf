use crate::allocator::{RealAllocator, TrackingContext};
use crate::config;
use crate::diag::StderrWriter;
use crate::fault::{self, ErrorKind};
use crate::platform;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;
const DISABLED: u8 = 3;

pub static INIT_STATE: AtomicU8 = AtomicU8::new(UNINIT);

/// Thread id of the thread running `init`, 0 otherwise.
static INITIALIZER: AtomicUsize = AtomicUsize::new(0);
static SHUT_DOWN: AtomicBool = AtomicBool::new(false);

/// The process-wide tracking context behind `malloc` and friends.
static CONTEXT: TrackingContext<RealAllocator> = TrackingContext::new(RealAllocator::new());

/// Library constructor -- called before main().
#[cfg(any(feature = "export", feature = "global-allocator"))]
#[used]
#[cfg_attr(target_os = "linux", link_section = ".init_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_init_func")]
static CTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn fencemalloc_ctor() {
        init();
    }
    fencemalloc_ctor
};

/// Library destructor -- leak listing and a final integrity sweep.
#[cfg(any(feature = "export", feature = "global-allocator"))]
#[used]
#[cfg_attr(target_os = "linux", link_section = ".fini_array")]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_term_func")]
static DTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn fencemalloc_dtor() {
        shutdown();
    }
    fencemalloc_dtor
};

/// Bind the real allocator and read the configuration. Safe to call any
/// number of times from any thread; only the first call does the work.
pub fn init() {
    match INIT_STATE.compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {}
        Err(INITIALIZING) => {
            if !is_initializer() {
                wait_settled();
            }
            return;
        }
        Err(_) => return,
    }
    INITIALIZER.store(platform::thread_id(), Ordering::Release);

    // dlsym may allocate; this thread is served by the bootstrap arena
    // until the state leaves INITIALIZING.
    if let Err(name) = CONTEXT.underlying().resolve() {
        fault::fatal(
            ErrorKind::BindingUnavailable,
            format_args!("dlsym(RTLD_NEXT, \"{}\") found nothing", name),
        );
    }

    unsafe { config::read_config() };
    let next = if unsafe { config::is_disabled() } {
        DISABLED
    } else {
        CONTEXT.set_trace_depth(config::trace_depth());
        READY
    };

    INITIALIZER.store(0, Ordering::Release);
    INIT_STATE.store(next, Ordering::Release);
}

/// Print the leak listing (unless `FENCEMALLOC_EXIT_REPORT=0`) and verify
/// every registered block. Only the first call does anything.
pub fn shutdown() {
    if SHUT_DOWN.swap(true, Ordering::AcqRel) || state() != READY {
        return;
    }
    if config::exit_report() {
        let _ = CONTEXT.show_allocations(&mut StderrWriter);
    }
    CONTEXT.check_integrity();
}

#[cold]
#[inline(never)]
pub fn ensure_initialized() {
    init();
}

/// Spin until another thread's `init` has finished.
#[cold]
pub fn wait_settled() {
    while INIT_STATE.load(Ordering::Acquire) == INITIALIZING {
        core::hint::spin_loop();
    }
}

/// Whether the calling thread is the one running `init`.
#[inline]
pub fn is_initializer() -> bool {
    INITIALIZER.load(Ordering::Acquire) == platform::thread_id()
}

#[inline(always)]
pub fn context() -> &'static TrackingContext<RealAllocator> {
    &CONTEXT
}

#[inline(always)]
pub fn state() -> u8 {
    INIT_STATE.load(Ordering::Acquire)
}

pub const STATE_INITIALIZING: u8 = INITIALIZING;
pub const STATE_READY: u8 = READY;
pub const STATE_DISABLED: u8 = DISABLED;
