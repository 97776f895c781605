// SPDX-License-Identifier: MPL-2.0

//! The process-global open-file registry.
//!
//! Every inode-backed open file registers here for its lifetime. Unmount
//! consults the registry to refuse tearing down a device with open files.
//!
//! A handle's drop may block (device close hooks), so no code path here
//! lets an upgraded `Arc` die while the registry spin lock is held.

use super::inode_handle::InodeHandle;
use crate::prelude::*;

static OPEN_FILES: SpinLock<Vec<Weak<InodeHandle>>> = SpinLock::new(Vec::new());

pub(super) fn register(handle: &Arc<InodeHandle>) {
    let mut files = OPEN_FILES.lock();
    files.retain(|weak| weak.strong_count() > 0);
    files.push(Arc::downgrade(handle));
}

pub(super) fn deregister(handle: &InodeHandle) {
    let mut files = OPEN_FILES.lock();
    files.retain(|weak| {
        weak.strong_count() > 0 && !core::ptr::eq(weak.as_ptr(), handle as *const InodeHandle)
    });
}

/// Whether any live open file references an inode of `dev`.
pub(crate) fn any_on_device(dev: u64) -> bool {
    // The upgraded handles outlive the lock: their drop may block.
    let files: Vec<Arc<InodeHandle>> = {
        let guard = OPEN_FILES.lock();
        guard.iter().filter_map(Weak::upgrade).collect()
    };
    files.iter().any(|handle| handle.vnode().dev() == dev)
}
