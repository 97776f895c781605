// SPDX-License-Identifier: MPL-2.0

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::SpinLock;
use crate::task::{current_task, Task};

/// A wait queue.
///
/// One may wait on a wait queue to put its executing task to sleep.
/// Multiple tasks may be the waiters of a wait queue. Other tasks may
/// invoke the `wake`-family methods of a wait queue to wake up one or many
/// waiter tasks.
pub struct WaitQueue {
    // A copy of `wakers.len()`, used for the lock-free fast path in
    // `wake_one` and `wake_all`.
    num_wakers: AtomicU32,
    wakers: SpinLock<VecDeque<Arc<Waker>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            num_wakers: AtomicU32::new(0),
            wakers: SpinLock::new(VecDeque::new()),
        }
    }

    /// Waits until some condition becomes true.
    ///
    /// This method takes a closure that tests a user-given condition and
    /// only returns once the condition returns `Some(_)`. A waker task
    /// should first make the condition `Some(_)`, then invoke a
    /// `wake`-family method; that ordering guarantees no wakeup is lost.
    pub fn wait_until<F, R>(&self, mut cond: F) -> R
    where
        F: FnMut() -> Option<R>,
    {
        if let Some(res) = cond() {
            return res;
        }

        let (waiter, _) = Waiter::new_pair();
        self.wait_until_or_cancelled(cond, waiter, || false)
            .expect("an uncancellable wait was cancelled")
    }

    /// Waits until the condition becomes true or `cancel_cond` turns true.
    ///
    /// Returns `Some(_)` when the condition is met; when the cancel
    /// condition fires first, the condition is tested one final time and
    /// its result returned regardless, so a wakeup racing with the
    /// cancellation is never lost.
    pub fn wait_until_or_cancelled<F, R, FCancel>(
        &self,
        mut cond: F,
        waiter: Waiter,
        cancel_cond: FCancel,
    ) -> Option<R>
    where
        F: FnMut() -> Option<R>,
        FCancel: Fn() -> bool,
    {
        let waker = waiter.waker();
        let current = current_task();
        current.set_signalled_waker(waker.clone());

        let res = loop {
            // Enqueue the waker before testing `cond()` to avoid races.
            self.enqueue(waker.clone());

            if let Some(res) = cond() {
                break Some(res);
            }

            if cancel_cond() {
                // Drop the waiter and test once more so a concurrent wake
                // event is not missed.
                drop(waiter);
                current.clear_signalled_waker();
                return cond();
            }

            waiter.wait();
        };

        current.clear_signalled_waker();
        res
    }

    /// Wakes up one waiting task.
    pub fn wake_one(&self) {
        // Fast path
        if self.is_empty() {
            return;
        }

        loop {
            let mut wakers = self.wakers.lock();
            let Some(waker) = wakers.pop_front() else {
                break;
            };
            self.num_wakers.fetch_sub(1, Ordering::Release);
            // Avoid holding the lock when calling `wake_up`.
            drop(wakers);

            if waker.wake_up() {
                return;
            }
        }
    }

    /// Wakes up all waiting tasks.
    pub fn wake_all(&self) {
        // Fast path
        if self.is_empty() {
            return;
        }

        loop {
            let mut wakers = self.wakers.lock();
            let Some(waker) = wakers.pop_front() else {
                break;
            };
            self.num_wakers.fetch_sub(1, Ordering::Release);
            drop(wakers);

            waker.wake_up();
        }
    }

    /// Returns whether the wait queue currently has no enqueued waker.
    pub fn is_empty(&self) -> bool {
        self.num_wakers.load(Ordering::Acquire) == 0
    }

    fn enqueue(&self, waker: Arc<Waker>) {
        let mut wakers = self.wakers.lock();
        wakers.push_back(waker);
        self.num_wakers.fetch_add(1, Ordering::Release);
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A waiter that can put the current task to sleep until it is woken up by
/// the associated [`Waker`].
///
/// A waiter belongs to the task that created it; it cannot be sent to or
/// shared with other tasks.
pub struct Waiter {
    waker: Arc<Waker>,
    _not_send: PhantomData<*mut ()>,
}

/// A waker that wakes up the associated [`Waiter`].
pub struct Waker {
    has_woken: AtomicBool,
    task: Arc<Task>,
}

impl Waiter {
    /// Creates a waiter and its associated [`Waker`].
    pub fn new_pair() -> (Self, Arc<Waker>) {
        let waker = Arc::new(Waker {
            has_woken: AtomicBool::new(false),
            task: current_task(),
        });
        let waiter = Self {
            waker: waker.clone(),
            _not_send: PhantomData,
        };
        (waiter, waker)
    }

    /// Waits until the waiter is woken by the associated [`Waker`].
    ///
    /// Returns immediately if the waiter has been woken since the last call;
    /// otherwise puts the current task to sleep.
    pub fn wait(&self) {
        self.waker.do_wait(None);
    }

    /// Waits like [`Waiter::wait`], for at most `timeout`.
    ///
    /// Returns `true` if woken, `false` if the timeout elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.waker.do_wait(Some(Instant::now() + timeout))
    }

    /// Gets the associated [`Waker`].
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // Close the waker so that waking the dropped waiter is a no-op.
        self.waker.close();
    }
}

impl Waker {
    /// Wakes up the associated [`Waiter`].
    ///
    /// Returns `true` if the waiter is woken by this call, `false` if it
    /// was already woken or has been dropped.
    pub fn wake_up(&self) -> bool {
        if self.has_woken.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.task.unpark();
        true
    }

    fn do_wait(&self, deadline: Option<Instant>) -> bool {
        while !self.has_woken.load(Ordering::Acquire) {
            match deadline {
                None => Task::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    Task::park_timeout(deadline - now);
                }
            }
        }

        self.has_woken.store(false, Ordering::Release);
        true
    }

    fn close(&self) {
        self.has_woken.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn wait_until_sees_published_value() {
        let queue = Arc::new(WaitQueue::new());
        let value = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let queue = queue.clone();
            let value = value.clone();
            std::thread::spawn(move || {
                queue.wait_until(|| {
                    let v = value.load(Ordering::Acquire);
                    (v != 0).then_some(v)
                })
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        value.store(7, Ordering::Release);
        queue.wake_one();

        assert_eq!(waiter.join().unwrap(), 7);
    }

    #[test]
    fn woken_waiter_returns_immediately() {
        let (waiter, waker) = Waiter::new_pair();
        assert!(waker.wake_up());
        assert!(!waker.wake_up());
        waiter.wait();
    }

    #[test]
    fn wait_timeout_expires() {
        let (waiter, _waker) = Waiter::new_pair();
        assert!(!waiter.wait_timeout(Duration::from_millis(10)));
    }
}
