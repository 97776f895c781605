// SPDX-License-Identifier: MPL-2.0

use std::collections::VecDeque;
use std::panic::Location;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::trace::{self, LockIntent, LockKind, LockStatus};
use super::{SpinLock, Waiter, Waker};
use crate::task::current_task;
use crate::time::ticks_to_duration;
use crate::{Error, Result};

const WAITING: u8 = 0;
const GRANTED: u8 = 1;
const CANCELLED: u8 = 2;

struct SemWaiter {
    state: AtomicU8,
    waker: Arc<Waker>,
}

struct Inner {
    count: isize,
    // FIFO: posts are granted in arrival order.
    waiters: VecDeque<Arc<SemWaiter>>,
}

/// A counting semaphore.
///
/// Tasks that find the count exhausted park on a FIFO queue. A waiter that
/// cancels (signal or timeout) leaves the queue atomically with the
/// cancellation: a post racing with the cancellation is either consumed by
/// the cancelling waiter, which then completes normally, or granted to
/// another waiter. It is never lost.
pub struct Semaphore {
    inner: SpinLock<Inner>,
}

impl Semaphore {
    /// Creates a semaphore with the given initial count.
    pub const fn new(count: isize) -> Self {
        Self {
            inner: SpinLock::new(Inner {
                count,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Decrements the count, blocking until a post arrives if it is zero.
    #[track_caller]
    pub fn down(&self) {
        let location = Location::caller();
        // An uncancellable down cannot fail.
        let _ = self.down_common(location, None, None);
    }

    /// Like [`Semaphore::down`], but gives up when `cancel` turns true.
    ///
    /// The cancel condition is tested before the first sleep and after
    /// every wakeup; the caller arranges for the condition's edge to also
    /// wake this task (see `Task::wake_signalled`). Returns
    /// [`Error::Interrupted`] when cancelled.
    #[track_caller]
    pub fn down_cancellable<F: Fn() -> bool>(&self, cancel: F) -> Result<()> {
        self.down_common(Location::caller(), Some(&cancel), None)
    }

    /// Like [`Semaphore::down`], but waits at most `ticks` clock ticks.
    ///
    /// Returns [`Error::TimedOut`] when the deadline elapses first.
    #[track_caller]
    pub fn down_timed(&self, ticks: u64) -> Result<()> {
        let deadline = Instant::now() + ticks_to_duration(ticks);
        self.down_common(Location::caller(), None, Some(deadline))
    }

    /// Decrements the count, or returns [`Error::WouldBlock`] if it is zero.
    #[track_caller]
    pub fn try_down(&self) -> Result<()> {
        let location = Location::caller();
        let mut inner = self.inner.lock();
        if inner.count > 0 {
            inner.count -= 1;
            drop(inner);
            self.trace(location, LockStatus::Acquired);
            Ok(())
        } else {
            drop(inner);
            self.trace(location, LockStatus::WouldBlock);
            Err(Error::WouldBlock)
        }
    }

    /// Increments the count and wakes the first waiter, if any.
    ///
    /// The post is granted to the front-most waiter that has not
    /// cancelled; cancelled entries never consume it.
    #[track_caller]
    pub fn up(&self) {
        let location = Location::caller();
        let mut inner = self.inner.lock();
        loop {
            let Some(waiter) = inner.waiters.pop_front() else {
                inner.count += 1;
                break;
            };
            if waiter
                .state
                .compare_exchange(WAITING, GRANTED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                drop(inner);
                waiter.waker.wake_up();
                break;
            }
            // A cancelled entry: skip it and look for a live waiter.
        }
        self.trace(location, LockStatus::Released);
    }

    /// Returns the current count. Only a snapshot: the value may be stale
    /// by the time the caller looks at it.
    pub fn count(&self) -> isize {
        self.inner.lock().count
    }

    fn down_common(
        &self,
        location: &'static Location<'static>,
        cancel: Option<&dyn Fn() -> bool>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let (waiter, node) = {
            let mut inner = self.inner.lock();
            if inner.count > 0 {
                inner.count -= 1;
                drop(inner);
                self.trace(location, LockStatus::Acquired);
                return Ok(());
            }
            let (waiter, waker) = Waiter::new_pair();
            let node = Arc::new(SemWaiter {
                state: AtomicU8::new(WAITING),
                waker,
            });
            inner.waiters.push_back(node.clone());
            (waiter, node)
        };
        self.trace(location, LockStatus::Requested);

        let current = current_task();
        if cancel.is_some() {
            current.set_signalled_waker(node.waker.clone());
        }

        let result = loop {
            if node.state.load(Ordering::Acquire) == GRANTED {
                break Ok(());
            }

            if let Some(cancel) = cancel {
                if cancel() {
                    if self.try_cancel(&node) {
                        break Err(Error::Interrupted);
                    }
                    // The grant raced in: the post is ours.
                    break Ok(());
                }
            }

            match deadline {
                None => waiter.wait(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline || !waiter.wait_timeout(deadline - now) {
                        if self.try_cancel(&node) {
                            break Err(Error::TimedOut);
                        }
                        break Ok(());
                    }
                }
            }
        };

        if cancel.is_some() {
            current.clear_signalled_waker();
        }
        let status = match result {
            Ok(()) => LockStatus::Acquired,
            Err(Error::Interrupted) => LockStatus::Cancelled,
            Err(_) => LockStatus::TimedOut,
        };
        self.trace(location, status);
        result
    }

    /// Removes `node` from the queue. Returns false if a post already
    /// granted it, in which case the caller owns the post.
    fn try_cancel(&self, node: &Arc<SemWaiter>) -> bool {
        let mut inner = self.inner.lock();
        if node
            .state
            .compare_exchange(WAITING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            inner.waiters.retain(|w| !Arc::ptr_eq(w, node));
            true
        } else {
            false
        }
    }

    fn trace(&self, location: &'static Location<'static>, status: LockStatus) {
        trace::record(
            self as *const _ as usize,
            LockKind::Semaphore,
            LockIntent::Exclusive,
            location,
            status,
        );
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use super::*;

    #[test]
    fn posters_drain_waiters() {
        const N: usize = 8;

        let sem = Arc::new(Semaphore::new(0));
        let waiters: Vec<_> = (0..N)
            .map(|_| {
                let sem = sem.clone();
                std::thread::spawn(move || sem.down())
            })
            .collect();
        let posters: Vec<_> = (0..N)
            .map(|_| {
                let sem = sem.clone();
                std::thread::spawn(move || sem.up())
            })
            .collect();
        for t in posters {
            t.join().unwrap();
        }
        for t in waiters {
            t.join().unwrap();
        }
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn try_down_does_not_block() {
        let sem = Semaphore::new(1);
        assert!(sem.try_down().is_ok());
        assert_eq!(sem.try_down(), Err(Error::WouldBlock));
    }

    #[test]
    fn timed_down_expires() {
        let sem = Semaphore::new(0);
        let start = Instant::now();
        assert_eq!(sem.down_timed(2), Err(Error::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancelled_waiter_does_not_consume_post() {
        let sem = Arc::new(Semaphore::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let victim_task = Arc::new(SpinLock::new(None));

        let victim = {
            let sem = sem.clone();
            let cancelled = cancelled.clone();
            let victim_task = victim_task.clone();
            std::thread::spawn(move || {
                *victim_task.lock() = Some(current_task());
                sem.down_cancellable(|| cancelled.load(Ordering::Acquire))
            })
        };
        // Let the victim park, then cancel it the way a signal sender
        // would: flip the condition, then wake through the task's waker.
        std::thread::sleep(Duration::from_millis(20));
        cancelled.store(true, Ordering::Release);
        loop {
            if let Some(task) = victim_task.lock().clone() {
                task.wake_signalled();
                break;
            }
        }
        assert_eq!(victim.join().unwrap(), Err(Error::Interrupted));

        // A post issued after the cancellation stays available.
        sem.up();
        assert!(sem.try_down().is_ok());
    }

    #[test]
    fn cancel_pending_at_wait_time_returns_immediately() {
        let sem = Semaphore::new(0);
        let result = sem.down_cancellable(|| true);
        assert_eq!(result, Err(Error::Interrupted));
        // No post was consumed.
        sem.up();
        assert!(sem.try_down().is_ok());
    }
}
