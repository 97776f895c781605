// SPDX-License-Identifier: MPL-2.0

//! Kernel tasks and the parking substrate.
//!
//! A [`Task`] is the schedulable unit the blocking primitives operate on.
//! The scheduler itself is an external collaborator: this module only needs
//! the ability to park the current task and to unpark a task from another
//! CPU, which the host reference platform maps onto thread parking.
//!
//! Every thread entering the kernel is lazily registered, so
//! [`current_task`] is total.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::Thread;

use crate::sync::SpinLock;
use crate::sync::Waker;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

/// A kernel task.
pub struct Task {
    id: u64,
    thread: Thread,
    /// The waker of the interruptible wait this task is currently parked
    /// in, if any. A signal sender wakes it through [`Task::wake_signalled`].
    signalled_waker: SpinLock<Option<Arc<Waker>>>,
}

impl Task {
    fn new_for_current_thread() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            thread: std::thread::current(),
            signalled_waker: SpinLock::new(None),
        })
    }

    /// Returns the unique id of this task.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Makes the task runnable again after a park.
    pub fn unpark(&self) {
        self.thread.unpark();
    }

    /// Parks the current task until some other task unparks it.
    ///
    /// May return spuriously; callers recheck their condition in a loop.
    pub fn park() {
        std::thread::park();
    }

    /// Parks the current task for at most `timeout`.
    pub fn park_timeout(timeout: core::time::Duration) {
        std::thread::park_timeout(timeout);
    }

    /// Installs `waker` as the target of [`Task::wake_signalled`].
    ///
    /// Used by interruptible waits: the waiting side installs its waker
    /// before going to sleep so that a signal sender can cut the sleep
    /// short without knowing which lock the task is blocked on.
    pub fn set_signalled_waker(&self, waker: Arc<Waker>) {
        *self.signalled_waker.lock() = Some(waker);
    }

    /// Clears the waker installed by [`Task::set_signalled_waker`].
    pub fn clear_signalled_waker(&self) {
        *self.signalled_waker.lock() = None;
    }

    /// Wakes the task if it is parked in an interruptible wait.
    pub fn wake_signalled(&self) {
        let waker = self.signalled_waker.lock().clone();
        if let Some(waker) = waker {
            waker.wake_up();
        }
    }
}

/// Returns the task of the calling thread, registering it on first use.
pub fn current_task() -> Arc<Task> {
    CURRENT_TASK.with(|slot| {
        slot.borrow_mut()
            .get_or_insert_with(Task::new_for_current_thread)
            .clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_task_is_stable_per_thread() {
        let a = current_task();
        let b = current_task();
        assert_eq!(a.id(), b.id());

        let other = std::thread::spawn(|| current_task().id()).join().unwrap();
        assert_ne!(a.id(), other);
    }
}
