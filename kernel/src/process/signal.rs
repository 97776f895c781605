// SPDX-License-Identifier: MPL-2.0

//! Signal numbers, masks, dispositions, and the pause-aware wait
//! wrappers that bridge the frame's cancellable primitives to the
//! "paused-for-signal" outcome.

use kestrel_frame::sync::{Semaphore, WaitQueue, Waiter};

use crate::prelude::*;

/// A signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SigNum(u8);

pub const SIGHUP: SigNum = SigNum(1);
pub const SIGINT: SigNum = SigNum(2);
pub const SIGQUIT: SigNum = SigNum(3);
pub const SIGKILL: SigNum = SigNum(9);
pub const SIGPIPE: SigNum = SigNum(13);
pub const SIGALRM: SigNum = SigNum(14);
pub const SIGTERM: SigNum = SigNum(15);
pub const SIGCHLD: SigNum = SigNum(17);
pub const SIGCONT: SigNum = SigNum(18);
pub const SIGSTOP: SigNum = SigNum(19);
pub const SIGTSTP: SigNum = SigNum(20);
pub const SIGTTIN: SigNum = SigNum(21);
pub const SIGTTOU: SigNum = SigNum(22);

const SIG_MAX: u8 = 32;

impl SigNum {
    pub fn from_u8(num: u8) -> Result<Self> {
        if num == 0 || num >= SIG_MAX {
            return_errno_with_message!(Errno::EINVAL, "invalid signal number");
        }
        Ok(SigNum(num))
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

/// A set of signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SigSet(u64);

impl SigSet {
    pub const fn new_empty() -> Self {
        SigSet(0)
    }

    pub fn contains(&self, sig: SigNum) -> bool {
        self.0 & (1 << sig.0) != 0
    }

    pub fn insert(&mut self, sig: SigNum) {
        self.0 |= 1 << sig.0;
    }

    pub fn remove(&mut self, sig: SigNum) {
        self.0 &= !(1 << sig.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// The lowest-numbered signal in the set.
    pub fn lowest(&self) -> Option<SigNum> {
        if self.0 == 0 {
            return None;
        }
        Some(SigNum(self.0.trailing_zeros() as u8))
    }

    pub fn minus(&self, other: SigSet) -> SigSet {
        SigSet(self.0 & !other.0)
    }
}

/// What a process does with a delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigAction {
    Default,
    Ignore,
    /// A user handler; `restart` mirrors SA_RESTART.
    Handler { restart: bool },
}

/// The per-process disposition table.
#[derive(Debug, Clone)]
pub struct SigDispositions([SigAction; SIG_MAX as usize]);

impl SigDispositions {
    pub fn new() -> Self {
        Self([SigAction::Default; SIG_MAX as usize])
    }

    pub fn get(&self, sig: SigNum) -> SigAction {
        self.0[sig.0 as usize]
    }

    pub fn set(&mut self, sig: SigNum, action: SigAction) {
        self.0[sig.0 as usize] = action;
    }
}

impl Default for SigDispositions {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks on `sem` until a post arrives or a signal turns pending for the
/// current process. The pause outcome is `ERESTARTSYS`; the system-call
/// layer decides between restarting and surfacing `EINTR`.
pub fn down_intr(sem: &Semaphore) -> Result<()> {
    sem.down_cancellable(|| current!().has_pending())
        .map_err(|_| Error::with_message(Errno::ERESTARTSYS, "wait paused by a signal"))
}

/// Waits on `queue` until `cond` yields a value or a signal turns pending
/// for the current process.
pub fn wait_until_interruptible<F, R>(queue: &WaitQueue, cond: F) -> Result<R>
where
    F: FnMut() -> Option<R>,
{
    let (waiter, _) = Waiter::new_pair();
    queue
        .wait_until_or_cancelled(cond, waiter, || current!().has_pending())
        .ok_or(Error::with_message(
            Errno::ERESTARTSYS,
            "wait paused by a signal",
        ))
}
