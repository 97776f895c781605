// SPDX-License-Identifier: MPL-2.0

//! The mount graph.
//!
//! Mounts form an ordered list of `{device, mounted-on vnode, mounted-fs
//! root vnode}` triples guarded by one reader-writer lock. The root file
//! system is implicit: it is not in the list and cannot be unmounted.
//! Path resolution holds the read lock for an entire walk, so a walk is
//! atomic with respect to mount and unmount.

use spin::Once;

use super::super::open_files;
use super::super::utils::FileSystem;
use super::super::vnode::Vnode;
use crate::prelude::*;

pub struct MountEntry {
    dev: u64,
    mounted_on: Arc<Vnode>,
    root: Arc<Vnode>,
    fs: Arc<dyn FileSystem>,
}

impl MountEntry {
    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn mounted_on(&self) -> &Arc<Vnode> {
        &self.mounted_on
    }

    pub fn root(&self) -> &Arc<Vnode> {
        &self.root
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }
}

static MOUNTS: RwMutex<Vec<MountEntry>> = RwMutex::new(Vec::new());
static ROOT: Once<Arc<Vnode>> = Once::new();

/// Installs the root file system. Must happen before any resolution.
pub fn init_rootfs(fs: Arc<dyn FileSystem>) -> Result<()> {
    let root = Vnode::get(fs.root_inode())?;
    ROOT.call_once(|| root);
    Ok(())
}

/// The root vnode of the VFS.
pub fn root_vnode() -> Arc<Vnode> {
    ROOT.get().expect("root file system not mounted").clone()
}

/// Returns the mount list read-locked for the duration of a walk.
pub(crate) fn read() -> RwMutexReadGuard<'static, Vec<MountEntry>> {
    MOUNTS.read()
}

/// Mounts `fs` on the directory `mount_on`.
pub fn mount(fs: Arc<dyn FileSystem>, mount_on: &Arc<Vnode>) -> Result<()> {
    let mut entries = MOUNTS.write();
    if !mount_on.type_().is_directory() {
        return_errno_with_message!(Errno::ENOTDIR, "mount point is not a directory");
    }
    if mount_on.is_mount_point() {
        return_errno_with_message!(Errno::EBUSY, "already a mount point");
    }
    if Arc::ptr_eq(mount_on, &root_vnode()) {
        return_errno_with_message!(Errno::EBUSY, "cannot mount over the root");
    }

    let root = Vnode::get(fs.root_inode())?;
    debug!(
        "mounting device {} on inode ({}, {})",
        fs.device_id(),
        mount_on.dev(),
        mount_on.ino()
    );
    entries.push(MountEntry {
        dev: fs.device_id(),
        mounted_on: mount_on.clone(),
        root,
        fs,
    });
    mount_on.set_mount_point(true);
    Ok(())
}

/// Unmounts the file system whose root is `root`.
///
/// Fails with `EBUSY` while the superblock reports itself busy, while any
/// open file lives on the device, or while another mount sits on one of
/// the device's inodes.
pub fn unmount(root: &Arc<Vnode>) -> Result<()> {
    let mut entries = MOUNTS.write();
    let idx = entries
        .iter()
        .position(|entry| Arc::ptr_eq(&entry.root, root))
        .ok_or(Error::with_message(
            Errno::EINVAL,
            "not the root of a mounted file system",
        ))?;
    let dev = entries[idx].dev;

    if entries[idx].fs.is_busy() {
        return_errno_with_message!(Errno::EBUSY, "file system is busy");
    }
    if open_files::any_on_device(dev) {
        return_errno_with_message!(Errno::EBUSY, "open files remain on the device");
    }
    if entries
        .iter()
        .enumerate()
        .any(|(i, entry)| i != idx && entry.mounted_on.dev() == dev)
    {
        return_errno_with_message!(Errno::EBUSY, "another mount sits on this device");
    }

    let entry = entries.remove(idx);
    entry.mounted_on.set_mount_point(false);
    debug!("unmounted device {}", dev);
    Ok(())
}

/// Follows mounts downward: while `vnode` carries the mount-point flag,
/// switch to the root of the file system mounted on it.
pub(crate) fn cross_down(entries: &[MountEntry], vnode: Arc<Vnode>) -> Arc<Vnode> {
    let mut cur = vnode;
    while cur.is_mount_point() {
        let Some(entry) = entries
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.mounted_on, &cur))
        else {
            break;
        };
        cur = entry.root.clone();
    }
    cur
}

/// Follows a mount upward: if `vnode` is the root of a mounted file
/// system, returns the vnode it is mounted on.
pub(crate) fn cross_up(entries: &[MountEntry], vnode: &Arc<Vnode>) -> Option<Arc<Vnode>> {
    entries
        .iter()
        .find(|entry| Arc::ptr_eq(&entry.root, vnode))
        .map(|entry| entry.mounted_on.clone())
}
