// SPDX-License-Identifier: MPL-2.0

//! VFS-side inode state.
//!
//! A [`Vnode`] pairs a driver inode with the state the VFS owns and the
//! driver must not know about: the inode reader-writer lock, the
//! mount-point flag and the `(device, inode-number)` identity. A global
//! cache guarantees one `Vnode` per identity, so every path to an inode
//! shares the same lock and flag.

use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;
use spin::Once;

use super::utils::{DirEntry, FileSystem, Inode, InodeMode, InodeType, Metadata, UnlinkFlags};
use crate::prelude::*;

pub struct Vnode {
    inode: Arc<dyn Inode>,
    dev: u64,
    ino: u64,
    // Serializes driver calls on this inode. Lock order: child before
    // parent; the open-file cursor is taken before this lock.
    rwlock: RwMutex<()>,
    is_mount_point: AtomicBool,
}

static VNODE_CACHE: Once<SpinLock<HashMap<(u64, u64), Weak<Vnode>>>> = Once::new();

fn cache() -> &'static SpinLock<HashMap<(u64, u64), Weak<Vnode>>> {
    VNODE_CACHE.call_once(|| SpinLock::new(HashMap::new()))
}

impl Vnode {
    /// Returns the vnode of `inode`, creating it on first sight.
    pub fn get(inode: Arc<dyn Inode>) -> Result<Arc<Vnode>> {
        let fs = inode
            .fs()
            .upgrade()
            .ok_or(Error::with_message(Errno::ENODEV, "file system is gone"))?;
        let dev = fs.device_id();
        let ino = inode.ino();

        let mut cache = cache().lock();
        if let Some(existing) = cache.get(&(dev, ino)).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let vnode = Arc::new(Vnode {
            inode,
            dev,
            ino,
            rwlock: RwMutex::new(()),
            is_mount_point: AtomicBool::new(false),
        });
        cache.insert((dev, ino), Arc::downgrade(&vnode));
        Ok(vnode)
    }

    pub fn inode(&self) -> &Arc<dyn Inode> {
        &self.inode
    }

    pub fn fs(&self) -> Result<Arc<dyn FileSystem>> {
        self.inode
            .fs()
            .upgrade()
            .ok_or(Error::with_message(Errno::ENODEV, "file system is gone"))
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn type_(&self) -> InodeType {
        self.inode.type_()
    }

    pub fn metadata(&self) -> Metadata {
        self.inode.metadata()
    }

    pub fn size(&self) -> usize {
        self.inode.metadata().size
    }

    pub fn read_lock(&self) -> RwMutexReadGuard<'_, ()> {
        self.rwlock.read()
    }

    pub fn write_lock(&self) -> RwMutexWriteGuard<'_, ()> {
        self.rwlock.write()
    }

    pub fn is_mount_point(&self) -> bool {
        self.is_mount_point.load(Ordering::Acquire)
    }

    pub(super) fn set_mount_point(&self, is_mount_point: bool) {
        self.is_mount_point.store(is_mount_point, Ordering::Release);
    }

    /// Finds the child named `name`, scanning under the vnode read lock.
    pub fn lookup(self: &Arc<Self>, name: &str) -> Result<Arc<Vnode>> {
        let _guard = self.read_lock();
        self.lookup_unlocked(name)
    }

    /// Like [`Vnode::lookup`]; the caller holds this vnode's lock.
    pub(crate) fn lookup_unlocked(&self, name: &str) -> Result<Arc<Vnode>> {
        let entry = self
            .scan_unlocked(name)?
            .ok_or(Error::with_message(Errno::ENOENT, "no such entry"))?;
        let inode = self.fs()?.get_inode(entry.ino)?;
        Vnode::get(inode)
    }

    /// Creates a child; the caller holds this vnode's write lock.
    pub(crate) fn create_unlocked(
        &self,
        name: &str,
        type_: InodeType,
        mode: InodeMode,
    ) -> Result<Arc<Vnode>> {
        let inode = self.inode.create(name, type_, mode)?;
        Vnode::get(inode)
    }

    /// Creates a device node; the caller holds this vnode's write lock.
    pub(crate) fn mknod_unlocked(
        &self,
        name: &str,
        mode: InodeMode,
        type_: InodeType,
        rdev: u64,
    ) -> Result<Arc<Vnode>> {
        let inode = self.inode.mknod(name, mode, type_, rdev)?;
        Vnode::get(inode)
    }

    /// Links `target` under `name`; the caller holds this vnode's write
    /// lock.
    pub(crate) fn link_unlocked(&self, target: &Arc<Vnode>, name: &str) -> Result<()> {
        self.inode.link(&target.inode, name)
    }

    /// Unlinks `name`; the caller holds this vnode's write lock.
    pub(crate) fn unlink_unlocked(&self, name: &str, flags: UnlinkFlags) -> Result<()> {
        self.inode.unlink(name, flags)
    }

    /// Returns the name this directory gives to inode `child_ino`,
    /// skipping the `.` and `..` entries. Scans under the read lock.
    pub fn name_of_child(self: &Arc<Self>, child_ino: u64) -> Result<String> {
        let _guard = self.read_lock();
        let mut idx = 0;
        while let Some(entry) = self.inode.entry_at(idx)? {
            if entry.ino == child_ino && entry.name != "." && entry.name != ".." {
                return Ok(entry.name);
            }
            idx += 1;
        }
        return_errno_with_message!(Errno::ENOENT, "child has no name in this directory")
    }

    fn scan_unlocked(&self, name: &str) -> Result<Option<DirEntry>> {
        if !self.type_().is_directory() {
            return_errno_with_message!(Errno::ENOTDIR, "not a directory");
        }
        let mut idx = 0;
        while let Some(entry) = self.inode.entry_at(idx)? {
            // Names match byte-for-byte; no normalization.
            if entry.name.as_bytes() == name.as_bytes() {
                return Ok(Some(entry));
            }
            idx += 1;
        }
        Ok(None)
    }

    /// Whether this directory holds any entry besides `.` and `..`.
    pub(crate) fn is_empty_dir_unlocked(&self) -> Result<bool> {
        if !self.type_().is_directory() {
            return_errno_with_message!(Errno::ENOTDIR, "not a directory");
        }
        let mut idx = 0;
        while let Some(entry) = self.inode.entry_at(idx)? {
            if entry.name != "." && entry.name != ".." {
                return Ok(false);
            }
            idx += 1;
        }
        Ok(true)
    }
}

impl Drop for Vnode {
    fn drop(&mut self) {
        let mut cache = cache().lock();
        if let Some(weak) = cache.get(&(self.dev, self.ino)) {
            if weak.strong_count() == 0 {
                cache.remove(&(self.dev, self.ino));
            }
        }
    }
}

impl Debug for Vnode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Vnode")
            .field("dev", &self.dev)
            .field("ino", &self.ino)
            .field("type", &self.type_())
            .finish_non_exhaustive()
    }
}
