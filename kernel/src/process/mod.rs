// SPDX-License-Identifier: MPL-2.0

//! A minimal process model: identity, process groups, per-process
//! file-system state and descriptor table, and signal bookkeeping.
//!
//! Scheduling itself belongs to the frame; a process here is the owner of
//! kernel resources and the target of signals. Kernel threads attach to a
//! process, and the thread that first enters the kernel is adopted by the
//! init process.

pub mod signal;

use std::cell::RefCell;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use hashbrown::HashMap;
use kestrel_frame::task::{current_task, Task};
use spin::Once;

use self::signal::{SigAction, SigDispositions, SigNum, SigSet, SIGKILL, SIGSTOP};
use crate::fs::file_table::FileTable;
use crate::fs::path::FsResolver;
use crate::prelude::*;
use crate::tty::Tty;

pub type Pid = u32;
pub type Pgid = u32;

const DEFAULT_UMASK: u16 = 0o022;

pub struct Process {
    pid: Pid,
    ppid: Pid,
    pgid: AtomicU32,
    umask: AtomicU16,
    tasks: SpinLock<Vec<Arc<Task>>>,
    fs: RwMutex<FsResolver>,
    file_table: SpinLock<FileTable>,
    ctty: SpinLock<Option<Arc<Tty>>>,
    blocked: SpinLock<SigSet>,
    pending: SpinLock<SigSet>,
    dispositions: SpinLock<SigDispositions>,
}

static NEXT_PID: AtomicU32 = AtomicU32::new(2);
static INIT_PROCESS: Once<Arc<Process>> = Once::new();
static PROCESS_TABLE: Once<SpinLock<HashMap<Pid, Weak<Process>>>> = Once::new();

std::thread_local! {
    static CURRENT_PROCESS: RefCell<Option<Arc<Process>>> = const { RefCell::new(None) };
}

fn table() -> &'static SpinLock<HashMap<Pid, Weak<Process>>> {
    PROCESS_TABLE.call_once(|| SpinLock::new(HashMap::new()))
}

fn init_process() -> Arc<Process> {
    INIT_PROCESS
        .call_once(|| {
            let process = Arc::new(Process {
                pid: 1,
                ppid: 0,
                pgid: AtomicU32::new(1),
                umask: AtomicU16::new(DEFAULT_UMASK),
                tasks: SpinLock::new(Vec::new()),
                fs: RwMutex::new(FsResolver::new()),
                file_table: SpinLock::new(FileTable::new()),
                ctty: SpinLock::new(None),
                blocked: SpinLock::new(SigSet::new_empty()),
                pending: SpinLock::new(SigSet::new_empty()),
                dispositions: SpinLock::new(SigDispositions::new()),
            });
            table().lock().insert(1, Arc::downgrade(&process));
            process
        })
        .clone()
}

/// Returns the process of the calling task. A task that never attached
/// anywhere is adopted by init.
pub fn current() -> Arc<Process> {
    CURRENT_PROCESS.with(|slot| {
        slot.borrow_mut()
            .get_or_insert_with(|| {
                let init = init_process();
                init.adopt_current_task();
                init
            })
            .clone()
    })
}

fn attach_current_thread(process: &Arc<Process>) {
    CURRENT_PROCESS.with(|slot| {
        *slot.borrow_mut() = Some(process.clone());
    });
    process.adopt_current_task();
}

/// Posts `sig` to every process in the group `pgid`.
pub fn kill_group(pgid: Pgid, sig: SigNum) {
    let members: Vec<Arc<Process>> = table()
        .lock()
        .values()
        .filter_map(Weak::upgrade)
        .filter(|p| p.pgid() == pgid)
        .collect();
    for process in members {
        process.post_signal(sig);
    }
}

/// Looks a process up by pid.
pub fn process_of(pid: Pid) -> Option<Arc<Process>> {
    table().lock().get(&pid).and_then(Weak::upgrade)
}

impl Process {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn ppid(&self) -> Pid {
        self.ppid
    }

    pub fn pgid(&self) -> Pgid {
        self.pgid.load(Ordering::Acquire)
    }

    pub fn set_pgid(&self, pgid: Pgid) {
        self.pgid.store(pgid, Ordering::Release);
    }

    pub fn umask(&self) -> u16 {
        self.umask.load(Ordering::Acquire)
    }

    /// Replaces the umask, returning the previous value.
    pub fn set_umask(&self, mask: u16) -> u16 {
        self.umask.swap(mask & 0o777, Ordering::AcqRel)
    }

    pub fn fs(&self) -> &RwMutex<FsResolver> {
        &self.fs
    }

    pub fn file_table(&self) -> &SpinLock<FileTable> {
        &self.file_table
    }

    pub fn ctty(&self) -> Option<Arc<Tty>> {
        self.ctty.lock().clone()
    }

    pub fn set_ctty(&self, tty: Arc<Tty>) {
        *self.ctty.lock() = Some(tty);
    }

    /// The fork copy: descriptor table slot-for-slot (sharing open
    /// files), current working directory, umask, signal state; pending
    /// signals start empty.
    pub fn fork(self: &Arc<Self>) -> Arc<Process> {
        let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
        let child = Arc::new(Process {
            pid,
            ppid: self.pid,
            pgid: AtomicU32::new(self.pgid()),
            umask: AtomicU16::new(self.umask()),
            tasks: SpinLock::new(Vec::new()),
            fs: RwMutex::new(self.fs.read().clone()),
            file_table: SpinLock::new(self.file_table.lock().clone()),
            ctty: SpinLock::new(self.ctty()),
            blocked: SpinLock::new(*self.blocked.lock()),
            pending: SpinLock::new(SigSet::new_empty()),
            dispositions: SpinLock::new(self.dispositions.lock().clone()),
        });
        table().lock().insert(pid, Arc::downgrade(&child));
        child
    }

    /// The exec sweep over the descriptor table. The closed files are
    /// dropped after the table lock is released, since release hooks may
    /// block.
    pub fn exec(&self) {
        let closed_files = {
            let mut file_table = self.file_table.lock();
            file_table.close_files_on_exec()
        };
        drop(closed_files);
    }

    /// Runs `f` on a new kernel thread attached to `process`.
    pub fn spawn_kthread<F, T>(process: &Arc<Process>, f: F) -> std::thread::JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let process = process.clone();
        std::thread::spawn(move || {
            attach_current_thread(&process);
            let result = f();
            process.disown_current_task();
            result
        })
    }

    fn adopt_current_task(&self) {
        let task = current_task();
        let mut tasks = self.tasks.lock();
        if !tasks.iter().any(|t| t.id() == task.id()) {
            tasks.push(task);
        }
    }

    fn disown_current_task(&self) {
        let task = current_task();
        self.tasks.lock().retain(|t| t.id() != task.id());
    }

    /// Posts a signal to this process: records it pending (unless
    /// ignored) and wakes any task parked in an interruptible wait.
    pub fn post_signal(&self, sig: SigNum) {
        let disposition = self.dispositions.lock().get(sig);
        if disposition == SigAction::Ignore && sig != SIGKILL && sig != SIGSTOP {
            return;
        }
        self.pending.lock().insert(sig);

        let tasks: Vec<Arc<Task>> = self.tasks.lock().clone();
        for task in tasks {
            task.wake_signalled();
        }
    }

    /// Whether a deliverable (non-blocked) signal is pending.
    pub fn has_pending(&self) -> bool {
        let pending = *self.pending.lock();
        let blocked = *self.blocked.lock();
        !pending.minus(blocked).is_empty()
    }

    /// A snapshot of the pending set.
    pub fn pending_signals(&self) -> SigSet {
        *self.pending.lock()
    }

    /// The lowest-numbered deliverable signal, left in place.
    pub fn first_deliverable_signal(&self) -> Option<SigNum> {
        let pending = *self.pending.lock();
        let blocked = *self.blocked.lock();
        pending.minus(blocked).lowest()
    }

    /// Dequeues the lowest-numbered deliverable signal.
    pub fn take_pending_signal(&self) -> Option<SigNum> {
        let blocked = *self.blocked.lock();
        let mut pending = self.pending.lock();
        let sig = pending.minus(blocked).lowest()?;
        pending.remove(sig);
        Some(sig)
    }

    pub fn block_signal(&self, sig: SigNum) {
        self.blocked.lock().insert(sig);
    }

    pub fn unblock_signal(&self, sig: SigNum) {
        self.blocked.lock().remove(sig);
    }

    pub fn disposition_of(&self, sig: SigNum) -> SigAction {
        self.dispositions.lock().get(sig)
    }

    pub fn set_disposition(&self, sig: SigNum, action: SigAction) {
        self.dispositions.lock().set(sig, action);
    }

    /// The background-read predicate: whether `sig` would be swallowed.
    pub fn is_signal_blocked_or_ignored(&self, sig: SigNum) -> bool {
        self.blocked.lock().contains(sig) || self.disposition_of(sig) == SigAction::Ignore
    }
}

impl Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("pgid", &self.pgid())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::signal::SIGTERM;
    use super::*;

    #[test]
    fn fork_copies_identity_and_state() {
        let parent = current();
        parent.set_umask(0o027);
        let child = parent.fork();
        assert_eq!(child.ppid(), parent.pid());
        assert_eq!(child.pgid(), parent.pgid());
        assert_eq!(child.umask(), 0o027);
        assert!(child.pending_signals().is_empty());
        parent.set_umask(DEFAULT_UMASK);
    }

    #[test]
    fn ignored_signal_is_discarded() {
        let process = current().fork();
        process.set_disposition(SIGTERM, SigAction::Ignore);
        process.post_signal(SIGTERM);
        assert!(process.pending_signals().is_empty());

        process.set_disposition(SIGTERM, SigAction::Default);
        process.post_signal(SIGTERM);
        assert!(process.pending_signals().contains(SIGTERM));
    }

    #[test]
    fn blocked_signal_is_pending_but_not_deliverable() {
        let process = current().fork();
        process.block_signal(SIGTERM);
        process.post_signal(SIGTERM);
        assert!(!process.has_pending());
        process.unblock_signal(SIGTERM);
        assert!(process.has_pending());
        assert_eq!(process.take_pending_signal(), Some(SIGTERM));
    }
}
