// SPDX-License-Identifier: MPL-2.0

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::trap::{disable_local, DisabledLocalIrqGuard};

/// A spin lock.
///
/// Acquiring captures the caller's local interrupt-enable state and
/// disables interrupts; releasing publishes the protected writes and
/// restores the captured state verbatim. A spin lock must never be held
/// across an operation that may block.
pub struct SpinLock<T: ?Sized> {
    lock: AtomicBool,
    val: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    /// Creates a new spin lock.
    pub const fn new(val: T) -> Self {
        Self {
            lock: AtomicBool::new(false),
            val: UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the spin lock, disabling local IRQs.
    ///
    /// This method runs in a busy loop until the lock can be acquired.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let irq_guard = disable_local();
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            irq_guard,
            _not_send: PhantomData,
        }
    }

    /// Tries acquiring the spin lock immediately.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let irq_guard = disable_local();
        if self.try_acquire_lock() {
            return Some(SpinLockGuard {
                lock: self,
                irq_guard,
                _not_send: PhantomData,
            });
        }
        None
    }

    fn acquire_lock(&self) {
        while !self.try_acquire_lock() {
            core::hint::spin_loop();
        }
    }

    fn try_acquire_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release_lock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(unsafe { &*self.val.get() }, f)
    }
}

// Safety. Only a single lock holder is permitted to access the inner data.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

/// The guard of a spin lock.
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    // Dropped after the lock release below, restoring the saved state.
    #[allow(dead_code)]
    irq_guard: DisabledLocalIrqGuard,
    _not_send: PhantomData<*mut ()>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.val.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.val.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_lock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// Safety. The guard only hands out shared references while it is shared.
unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::trap::is_local_enabled;

    #[test]
    fn irq_state_restored_exactly() {
        let lock = SpinLock::new(0u32);

        assert!(is_local_enabled());
        {
            let _guard = lock.lock();
            assert!(!is_local_enabled());
        }
        assert!(is_local_enabled());

        // An acquisition nested in a disabled section restores "disabled".
        let outer = disable_local();
        {
            let _guard = lock.lock();
            assert!(!is_local_enabled());
        }
        assert!(!is_local_enabled());
        drop(outer);
        assert!(is_local_enabled());
    }

    #[test]
    fn exclusive_increments() {
        // Two CPUs hammering one counter: every increment must survive.
        const N: u64 = 8_000_000;

        let counter = Arc::new(SpinLock::new(0u64));
        let threads: Vec<_> = (0..2)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..N {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*counter.lock(), 2 * N);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
