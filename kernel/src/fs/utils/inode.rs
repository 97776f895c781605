// SPDX-License-Identifier: MPL-2.0

use core::time::Duration;

use super::{DirEntry, FileSystem, InodeMode, InodeType, Metadata, UnlinkFlags};
use crate::prelude::*;

/// The per-inode operation vector a file-system driver supplies.
///
/// Reference counting is expressed through `Arc`: cloning the handle is
/// the clone hook and dropping the last handle is the release hook, both
/// driver-managed. A release may block on I/O, so an `Arc<dyn Inode>` is
/// never dropped while a spin lock is held.
///
/// There is deliberately no `lookup` operation: the VFS scans
/// [`Inode::entry_at`] output for a byte-for-byte name match, and no
/// `rename`: the VFS composes rename from [`Inode::link`] and
/// [`Inode::unlink`].
pub trait Inode: Any + Send + Sync {
    /// The inode number, unique within its file system.
    fn ino(&self) -> u64;

    fn type_(&self) -> InodeType;

    fn metadata(&self) -> Metadata;

    /// The file system this inode belongs to. Non-owning back-pointer.
    fn fs(&self) -> Weak<dyn FileSystem>;

    fn set_mode(&self, mode: InodeMode) -> Result<()>;

    fn set_times(&self, atime: Duration, mtime: Duration) -> Result<()>;

    /// Truncates or extends the file to `new_size`.
    fn resize(&self, new_size: usize) -> Result<()> {
        let _ = new_size;
        return_errno_with_message!(Errno::EISDIR, "cannot resize a non-file")
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let (_, _) = (offset, buf);
        return_errno_with_message!(Errno::EISDIR, "cannot read a non-file")
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let (_, _) = (offset, buf);
        return_errno_with_message!(Errno::EISDIR, "cannot write a non-file")
    }

    /// Returns the `idx`-th directory entry, or `None` past the last one.
    fn entry_at(&self, idx: usize) -> Result<Option<DirEntry>> {
        let _ = idx;
        return_errno_with_message!(Errno::ENOTDIR, "cannot list a non-directory")
    }

    /// Creates a regular file or directory named `name` in this directory.
    fn create(&self, name: &str, type_: InodeType, mode: InodeMode) -> Result<Arc<dyn Inode>> {
        let (_, _, _) = (name, type_, mode);
        return_errno_with_message!(Errno::ENOTDIR, "cannot create below a non-directory")
    }

    /// Creates a device node named `name` in this directory.
    fn mknod(
        &self,
        name: &str,
        mode: InodeMode,
        type_: InodeType,
        rdev: u64,
    ) -> Result<Arc<dyn Inode>> {
        let (_, _, _, _) = (name, mode, type_, rdev);
        return_errno_with_message!(Errno::ENOTDIR, "cannot create below a non-directory")
    }

    /// Adds a hard link to `inode` named `name` in this directory.
    fn link(&self, inode: &Arc<dyn Inode>, name: &str) -> Result<()> {
        let (_, _) = (inode, name);
        return_errno_with_message!(Errno::ENOTDIR, "cannot link below a non-directory")
    }

    /// Removes the entry `name` from this directory.
    fn unlink(&self, name: &str, flags: UnlinkFlags) -> Result<()> {
        let (_, _) = (name, flags);
        return_errno_with_message!(Errno::ENOTDIR, "cannot unlink below a non-directory")
    }

    /// Writes back any driver-side state for this inode.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl dyn Inode {
    pub fn downcast_ref<T: Inode>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}

impl Debug for dyn Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino())
            .field("type", &self.type_())
            .finish_non_exhaustive()
    }
}
