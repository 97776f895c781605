// SPDX-License-Identifier: MPL-2.0

//! Synchronization primitives.

mod atomic;
mod mutex;
mod rwmutex;
mod semaphore;
mod spin;
pub mod trace;
mod wait;

pub use self::atomic::{ordered_load, ordered_store};
pub use self::mutex::{Mutex, MutexGuard};
pub use self::rwmutex::{RwMutex, RwMutexReadGuard, RwMutexWriteGuard};
pub use self::semaphore::Semaphore;
pub use self::spin::{SpinLock, SpinLockGuard};
pub use self::wait::{WaitQueue, Waiter, Waker};
