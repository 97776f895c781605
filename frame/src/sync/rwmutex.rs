// SPDX-License-Identifier: MPL-2.0

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::panic::Location;

use super::trace::{self, LockIntent, LockKind, LockStatus};
use super::{Mutex, Semaphore};

/// A blocking reader-writer mutex.
///
/// Readers bump a counter under a small mutex; the first reader acquires
/// the writer-admission semaphore and the last reader releases it. Writers
/// acquire the admission semaphore directly, so they exclude everyone.
/// There is no fairness guarantee.
pub struct RwMutex<T: ?Sized> {
    reader_count: Mutex<usize>,
    admission: Semaphore,
    val: UnsafeCell<T>,
}

impl<T> RwMutex<T> {
    /// Creates a new reader-writer mutex.
    pub const fn new(val: T) -> Self {
        Self {
            reader_count: Mutex::new(0),
            admission: Semaphore::new(1),
            val: UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> RwMutex<T> {
    /// Acquires a read lock, blocking while a writer holds the mutex.
    #[track_caller]
    pub fn read(&self) -> RwMutexReadGuard<'_, T> {
        let location = Location::caller();
        {
            let mut count = self.reader_count.lock();
            *count += 1;
            if *count == 1 {
                self.admission.down();
            }
        }
        self.trace(location, LockIntent::Shared, LockStatus::Acquired);
        RwMutexReadGuard {
            rwmutex: self,
            _not_send: PhantomData,
        }
    }

    /// Acquires the write lock, blocking until all readers and any writer
    /// have released.
    #[track_caller]
    pub fn write(&self) -> RwMutexWriteGuard<'_, T> {
        let location = Location::caller();
        self.admission.down();
        self.trace(location, LockIntent::Exclusive, LockStatus::Acquired);
        RwMutexWriteGuard {
            rwmutex: self,
            _not_send: PhantomData,
        }
    }

    #[track_caller]
    fn release_read(&self) {
        let mut count = self.reader_count.lock();
        *count -= 1;
        if *count == 0 {
            self.admission.up();
        }
        drop(count);
        self.trace(Location::caller(), LockIntent::Shared, LockStatus::Released);
    }

    #[track_caller]
    fn release_write(&self) {
        self.admission.up();
        self.trace(
            Location::caller(),
            LockIntent::Exclusive,
            LockStatus::Released,
        );
    }

    fn trace(&self, location: &'static Location<'static>, intent: LockIntent, status: LockStatus) {
        let addr = (self as *const Self).cast::<()>() as usize;
        trace::record(addr, LockKind::RwMutex, intent, location, status);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RwMutex").finish_non_exhaustive()
    }
}

unsafe impl<T: ?Sized + Send> Send for RwMutex<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwMutex<T> {}

/// The shared guard of a reader-writer mutex.
pub struct RwMutexReadGuard<'a, T: ?Sized> {
    rwmutex: &'a RwMutex<T>,
    _not_send: PhantomData<*mut ()>,
}

impl<T: ?Sized> Deref for RwMutexReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.rwmutex.val.get() }
    }
}

impl<T: ?Sized> Drop for RwMutexReadGuard<'_, T> {
    fn drop(&mut self) {
        self.rwmutex.release_read();
    }
}

unsafe impl<T: ?Sized + Sync> Sync for RwMutexReadGuard<'_, T> {}

/// The exclusive guard of a reader-writer mutex.
pub struct RwMutexWriteGuard<'a, T: ?Sized> {
    rwmutex: &'a RwMutex<T>,
    _not_send: PhantomData<*mut ()>,
}

impl<T: ?Sized> Deref for RwMutexWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.rwmutex.val.get() }
    }
}

impl<T: ?Sized> DerefMut for RwMutexWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.rwmutex.val.get() }
    }
}

impl<T: ?Sized> Drop for RwMutexWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.rwmutex.release_write();
    }
}

unsafe impl<T: ?Sized + Sync> Sync for RwMutexWriteGuard<'_, T> {}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn readers_admit_concurrently() {
        let lock = Arc::new(RwMutex::new(0u32));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let concurrent = concurrent.clone();
                let peak = peak.clone();
                std::thread::spawn(move || {
                    let _guard = lock.read();
                    let now = concurrent.fetch_add(1, Ordering::AcqRel) + 1;
                    peak.fetch_max(now, Ordering::AcqRel);
                    std::thread::sleep(Duration::from_millis(50));
                    concurrent.fetch_sub(1, Ordering::AcqRel);
                })
            })
            .collect();
        for t in readers {
            t.join().unwrap();
        }
        assert!(peak.load(Ordering::Acquire) > 1);
    }

    #[test]
    fn writer_waits_for_readers_then_readers_readmit() {
        let lock = Arc::new(RwMutex::new(0u32));

        let reader = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                let guard = lock.read();
                std::thread::sleep(Duration::from_millis(50));
                assert_eq!(*guard, 0);
            })
        };
        std::thread::sleep(Duration::from_millis(10));

        let writer = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                *lock.write() = 1;
            })
        };
        reader.join().unwrap();
        writer.join().unwrap();

        // After the writer releases, queued readers all admit.
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let lock = lock.clone();
                std::thread::spawn(move || *lock.read())
            })
            .collect();
        for t in readers {
            assert_eq!(t.join().unwrap(), 1);
        }
    }
}
