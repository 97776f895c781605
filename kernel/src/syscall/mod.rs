// SPDX-License-Identifier: MPL-2.0

//! The system-call surface.
//!
//! Every entry returns `Result`; [`as_retval`] produces the negated-errno
//! convention for the trap layer. Calls that can pause on a signal are
//! wrapped in [`with_restart`], which delivers the interrupting signal
//! and either retries (SA_RESTART dispositions) or surfaces `EINTR`.

pub mod fs;
pub mod socket;
pub mod tty;

use crate::prelude::*;
use crate::process::signal::SigAction;

/// Folds a result into the `0 / non-negative or negated errno` calling
/// convention.
pub fn as_retval(result: Result<isize>) -> isize {
    match result {
        Ok(val) => val,
        Err(e) => -(e.error() as i32 as isize),
    }
}

/// Runs `f`, transparently restarting it when it was paused by a signal
/// whose handler carries the restart flag. All other pauses surface as
/// `EINTR`.
///
/// Handler dispositions consume the signal here (the stand-in for
/// running the handler); default-action signals stay pending for the
/// delivery layer.
pub fn with_restart<T, F>(mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    loop {
        match f() {
            Err(e) if e.error() == Errno::ERESTARTSYS => {
                let current = current!();
                let Some(sig) = current.first_deliverable_signal() else {
                    // The signal was consumed elsewhere; just retry.
                    continue;
                };
                match current.disposition_of(sig) {
                    SigAction::Handler { restart } => {
                        current.take_pending_signal();
                        if restart {
                            continue;
                        }
                        return_errno_with_message!(Errno::EINTR, "interrupted by a signal")
                    }
                    _ => return_errno_with_message!(Errno::EINTR, "interrupted by a signal"),
                }
            }
            other => return other,
        }
    }
}
