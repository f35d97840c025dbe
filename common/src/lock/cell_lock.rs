use lock_api::{GuardNoSend, RawMutex};
use std::cell::Cell;

/// A mutex for single-threaded use. Locking twice is a bug in the caller
/// (some borrow is still alive across a re-entrant call), so it panics
/// rather than deadlocking silently.
pub struct RawCellMutex {
    locked: Cell<bool>,
}

unsafe impl RawMutex for RawCellMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawCellMutex {
        locked: Cell::new(false),
    };

    type GuardMarker = GuardNoSend;

    #[inline]
    fn lock(&self) {
        if self.locked.get() {
            deadlock("Mutex")
        }
        self.locked.set(true)
    }

    #[inline]
    fn try_lock(&self) -> bool {
        if self.locked.get() {
            false
        } else {
            self.locked.set(true);
            true
        }
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.locked.set(false)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

#[cold]
#[inline(never)]
fn deadlock(lock_kind: &str) -> ! {
    panic!("deadlock: tried to re-acquire a {lock_kind} that is already held on this thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    type CellMutex<T> = lock_api::Mutex<RawCellMutex, T>;

    #[test]
    fn lock_release_relock() {
        let m = CellMutex::new(1);
        {
            let mut g = m.lock();
            *g += 1;
            assert!(m.try_lock().is_none());
        }
        assert_eq!(*m.lock(), 2);
    }

    #[test]
    #[should_panic(expected = "deadlock")]
    fn relock_panics() {
        let m = CellMutex::new(());
        let _g = m.lock();
        let _h = m.lock();
    }
}
