//! Per-thread suppression of diagnostic instrumentation.
//!
//! Tracing and verbose logging may allocate. Those nested allocations still
//! go through the interceptor and are still tracked, but they must not trace
//! or log again, otherwise a single `malloc` could recurse without bound.
//! Holding a [`ReentrancyGuard`] is the proof that the current thread is
//! already inside diagnostic code.

use core::cell::Cell;
use core::marker::PhantomData;

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Scoped ownership of the current thread's diagnostic slot.
/// Dropping the guard re-enables diagnostics on this thread.
pub struct ReentrancyGuard {
    // Tied to the thread that set the flag.
    _not_send: PhantomData<*const ()>,
}

impl ReentrancyGuard {
    /// Claim the diagnostic slot, or `None` if this thread already holds it
    /// (or its TLS is gone).
    #[inline]
    pub fn try_enter() -> Option<Self> {
        ACTIVE
            .try_with(|active| {
                if active.replace(true) {
                    None
                } else {
                    Some(ReentrancyGuard {
                        _not_send: PhantomData,
                    })
                }
            })
            .ok()
            .flatten()
    }

    /// Whether diagnostics are currently suppressed on this thread.
    #[inline]
    pub fn is_active() -> bool {
        ACTIVE.try_with(Cell::get).unwrap_or(true)
    }
}

impl Drop for ReentrancyGuard {
    #[inline]
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|active| active.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::ReentrancyGuard;

    #[test]
    fn second_enter_is_refused_until_drop() {
        let outer = ReentrancyGuard::try_enter().expect("slot free");
        assert!(ReentrancyGuard::is_active());
        assert!(ReentrancyGuard::try_enter().is_none());
        drop(outer);
        assert!(!ReentrancyGuard::is_active());
        assert!(ReentrancyGuard::try_enter().is_some());
    }

    #[test]
    fn flag_is_per_thread() {
        let _held = ReentrancyGuard::try_enter().expect("slot free");
        std::thread::spawn(|| {
            assert!(!ReentrancyGuard::is_active());
            assert!(ReentrancyGuard::try_enter().is_some());
        })
        .join()
        .unwrap();
    }
}
