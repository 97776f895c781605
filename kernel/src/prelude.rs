// SPDX-License-Identifier: MPL-2.0

#![allow(unused)]

pub(crate) use std::any::Any;
pub(crate) use std::collections::{BTreeMap, VecDeque};
pub(crate) use std::fmt::Debug;
pub(crate) use std::sync::{Arc, Weak};

pub(crate) use bitflags::bitflags;
pub(crate) use kestrel_frame::sync::{
    Mutex, MutexGuard, RwMutex, RwMutexReadGuard, RwMutexWriteGuard, Semaphore, SpinLock,
    SpinLockGuard, WaitQueue,
};
pub(crate) use log::{debug, error, info, warn};

pub(crate) use crate::error::{Errno, Error};
pub(crate) use crate::{current, return_errno, return_errno_with_message};

pub(crate) type Result<T> = core::result::Result<T, Error>;

/// Returns the current process.
#[macro_export]
macro_rules! current {
    () => {
        $crate::process::current()
    };
}
