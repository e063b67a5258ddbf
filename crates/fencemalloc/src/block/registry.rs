//! Intrusive doubly-linked set of live block headers.
//!
//! The registry owns nothing but the links. It is always used from behind
//! the tracking context's mutex.

use super::BlockHeader;
use core::ptr::{self, NonNull};

/// `prev` value of a header that is not in any registry. The head of the
/// list has a null `prev`, so the two states never collide.
pub const UNLINKED: *mut BlockHeader = NonNull::dangling().as_ptr();

pub struct Registry {
    head: *mut BlockHeader,
    count: usize,
}

// Headers are only reached through the owning mutex.
unsafe impl Send for Registry {}

impl Registry {
    pub const fn new() -> Self {
        Registry {
            head: ptr::null_mut(),
            count: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Link `header` at the front.
    ///
    /// # Safety
    /// `header` must be a stamped block that is not currently linked.
    pub unsafe fn insert(&mut self, header: *mut BlockHeader) {
        debug_assert!(!Self::is_linked(header));
        (*header).prev = ptr::null_mut();
        (*header).next = self.head;
        if !self.head.is_null() {
            (*self.head).prev = header;
        }
        self.head = header;
        self.count += 1;
    }

    /// Unlink `header`. Returns false, touching nothing, if it was already
    /// detached.
    ///
    /// # Safety
    /// `header` must be a stamped block that is either linked into this
    /// registry or detached.
    pub unsafe fn remove(&mut self, header: *mut BlockHeader) -> bool {
        if !Self::is_linked(header) {
            return false;
        }
        let prev = (*header).prev;
        let next = (*header).next;
        if prev.is_null() {
            self.head = next;
        } else {
            (*prev).next = next;
        }
        if !next.is_null() {
            (*next).prev = prev;
        }
        (*header).next = ptr::null_mut();
        (*header).prev = UNLINKED;
        self.count -= 1;
        true
    }

    /// Whether `header` is a member of some registry.
    ///
    /// # Safety
    /// `header` must be a stamped block.
    #[inline]
    pub unsafe fn is_linked(header: *const BlockHeader) -> bool {
        (*header).prev != UNLINKED
    }

    /// Forget every member without releasing any memory. Returns how many
    /// blocks were detached.
    pub fn detach_all(&mut self) -> usize {
        let detached = self.count;
        let mut cur = self.head;
        while !cur.is_null() {
            unsafe {
                let next = (*cur).next;
                (*cur).next = ptr::null_mut();
                (*cur).prev = UNLINKED;
                cur = next;
            }
        }
        self.head = ptr::null_mut();
        self.count = 0;
        detached
    }

    /// Members, most recently inserted first.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            cur: self.head,
            _registry: self,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a> {
    cur: *mut BlockHeader,
    _registry: &'a Registry,
}

impl Iterator for Iter<'_> {
    type Item = *mut BlockHeader;

    fn next(&mut self) -> Option<*mut BlockHeader> {
        if self.cur.is_null() {
            return None;
        }
        let header = self.cur;
        self.cur = unsafe { (*header).next };
        Some(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::stamp;
    use crate::trace::CallSite;

    #[repr(C, align(16))]
    struct Slot([u8; 128]);

    fn headers<const N: usize>(slots: &mut [Slot; N]) -> [*mut BlockHeader; N] {
        let mut out = [ptr::null_mut(); N];
        for (i, slot) in slots.iter_mut().enumerate() {
            let h = slot.0.as_mut_ptr().cast::<BlockHeader>();
            unsafe { stamp(h, i, CallSite::untraced(), 0) };
            out[i] = h;
        }
        out
    }

    #[test]
    fn insert_and_remove_any_position() {
        let mut slots: [Slot; 3] = core::array::from_fn(|_| Slot([0; 128]));
        let [a, b, c] = headers(&mut slots);
        let mut reg = Registry::new();
        unsafe {
            reg.insert(a);
            reg.insert(b);
            reg.insert(c);
        }
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.iter().collect::<Vec<_>>(), vec![c, b, a]);

        assert!(unsafe { reg.remove(b) });
        assert_eq!(reg.iter().collect::<Vec<_>>(), vec![c, a]);
        assert!(unsafe { reg.remove(c) });
        assert_eq!(reg.iter().collect::<Vec<_>>(), vec![a]);
        assert!(unsafe { reg.remove(a) });
        assert!(reg.is_empty());
        assert_eq!(reg.iter().count(), 0);
    }

    #[test]
    fn removing_a_detached_block_is_a_no_op() {
        let mut slots: [Slot; 2] = core::array::from_fn(|_| Slot([0; 128]));
        let [a, b] = headers(&mut slots);
        let mut reg = Registry::new();
        assert!(!unsafe { reg.remove(a) });
        unsafe {
            reg.insert(a);
            reg.insert(b);
        }
        assert_eq!(reg.detach_all(), 2);
        assert!(reg.is_empty());
        assert!(!unsafe { reg.remove(a) });
        assert!(!unsafe { reg.remove(b) });
        assert_eq!(reg.len(), 0);
        assert!(!unsafe { Registry::is_linked(a) });
    }

    #[test]
    fn detached_blocks_can_be_relinked() {
        let mut slots: [Slot; 1] = core::array::from_fn(|_| Slot([0; 128]));
        let [a] = headers(&mut slots);
        let mut reg = Registry::new();
        unsafe { reg.insert(a) };
        reg.detach_all();
        unsafe { reg.insert(a) };
        assert_eq!(reg.len(), 1);
        assert!(unsafe { Registry::is_linked(a) });
    }
}
