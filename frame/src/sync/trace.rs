// SPDX-License-Identifier: MPL-2.0

//! Blocking-lock tracing.
//!
//! Every blocking-lock acquire, release and cancellation passes through
//! [`record`]. When tracing is enabled the events land in a fixed-capacity
//! ring that the debugger snapshots; when disabled the hook is a cheap
//! flag test. The recorder takes only its own spin lock, so it is safe to
//! call while holding the lock being traced.

use std::collections::VecDeque;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};

use super::SpinLock;
use crate::task::current_task;

const TRACE_CAPACITY: usize = 1024;

/// The kind of lock an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Semaphore,
    Mutex,
    RwMutex,
}

/// Whether the operation wanted shared or exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockIntent {
    Shared,
    Exclusive,
}

/// What happened at the hook point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The task queued behind the lock.
    Requested,
    Acquired,
    Released,
    /// The wait was cancelled by a signal.
    Cancelled,
    /// The wait timed out.
    TimedOut,
    /// A non-blocking attempt failed.
    WouldBlock,
}

/// One traced lock event.
#[derive(Debug, Clone, Copy)]
pub struct LockEvent {
    pub addr: usize,
    pub kind: LockKind,
    pub intent: LockIntent,
    pub task: u64,
    pub location: &'static Location<'static>,
    pub status: LockStatus,
}

static ENABLED: AtomicBool = AtomicBool::new(false);
static EVENTS: SpinLock<VecDeque<LockEvent>> = SpinLock::new(VecDeque::new());

/// Turns event recording on or off. The hook surface stays live either way.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Release);
}

pub(crate) fn record(
    addr: usize,
    kind: LockKind,
    intent: LockIntent,
    location: &'static Location<'static>,
    status: LockStatus,
) {
    if !ENABLED.load(Ordering::Acquire) {
        return;
    }

    let event = LockEvent {
        addr,
        kind,
        intent,
        task: current_task().id(),
        location,
        status,
    };
    let mut events = EVENTS.lock();
    if events.len() == TRACE_CAPACITY {
        events.pop_front();
    }
    events.push_back(event);
}

/// Returns a snapshot of the recorded events, oldest first.
pub fn snapshot() -> Vec<LockEvent> {
    EVENTS.lock().iter().copied().collect()
}

/// Discards all recorded events.
pub fn clear() {
    EVENTS.lock().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Semaphore;

    #[test]
    fn semaphore_ops_are_traced() {
        set_enabled(true);
        clear();

        let sem = Semaphore::new(1);
        sem.down();
        sem.up();

        let events = snapshot();
        set_enabled(false);

        let addr = &sem as *const _ as usize;
        let ours: Vec<_> = events.iter().filter(|e| e.addr == addr).collect();
        assert!(ours
            .iter()
            .any(|e| e.status == LockStatus::Acquired && e.kind == LockKind::Semaphore));
        assert!(ours.iter().any(|e| e.status == LockStatus::Released));
        let me = current_task().id();
        assert!(ours.iter().all(|e| e.task == me));
    }
}
