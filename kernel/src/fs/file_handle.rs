// SPDX-License-Identifier: MPL-2.0

//! The basic operations defined on an open file.

use super::utils::{AccessMode, IoEvents, IoctlCmd, Metadata, SeekFrom, StatusFlags};
use crate::net::Socket;
use crate::prelude::*;
use crate::tty::Tty;

/// An open-file description: one open instance of an inode, pipe end or
/// socket. Descriptors share it on dup and fork through `Arc`.
pub trait FileLike: Any + Send + Sync {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let _ = buf;
        return_errno_with_message!(Errno::EBADF, "the file is not valid for reading");
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let _ = buf;
        return_errno_with_message!(Errno::EBADF, "the file is not valid for writing");
    }

    /// Moves the byte cursor. Anything that is neither a regular file nor
    /// a character device has no cursor.
    fn seek(&self, pos: SeekFrom) -> Result<usize> {
        let _ = pos;
        return_errno_with_message!(Errno::ESPIPE, "the file is not seekable");
    }

    fn resize(&self, new_size: usize) -> Result<()> {
        let _ = new_size;
        return_errno_with_message!(Errno::EINVAL, "the file cannot be resized");
    }

    fn metadata(&self) -> Result<Metadata> {
        return_errno_with_message!(Errno::EBADF, "the file has no metadata");
    }

    fn ioctl(&self, cmd: IoctlCmd, arg: usize) -> Result<i32> {
        let (_, _) = (cmd, arg);
        return_errno_with_message!(Errno::ENOTTY, "the file accepts no control requests");
    }

    /// Readiness for select: which of the requested events are ready now.
    fn poll(&self, mask: IoEvents) -> IoEvents {
        mask & (IoEvents::IN | IoEvents::OUT)
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::empty()
    }

    fn set_status_flags(&self, new_flags: StatusFlags) -> Result<()> {
        let _ = new_flags;
        return_errno_with_message!(Errno::EINVAL, "the file accepts no status flags");
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::O_RDWR
    }

    /// Flushes driver state on the way to close.
    fn clean_for_close(&self) -> Result<()> {
        Ok(())
    }

    fn as_socket(self: Arc<Self>) -> Option<Arc<dyn Socket>> {
        None
    }

    fn as_tty(&self) -> Option<Arc<Tty>> {
        None
    }
}

impl dyn FileLike {
    pub fn downcast_ref<T: FileLike>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}

impl Debug for dyn FileLike {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("FileLike").finish_non_exhaustive()
    }
}
