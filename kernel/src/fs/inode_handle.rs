// SPDX-License-Identifier: MPL-2.0

//! The inode-backed open-file description.

use std::sync::atomic::{AtomicU32, Ordering};

use super::open_files;
use super::utils::{
    AccessMode, CreationFlags, DirEntry, InodeType, IoEvents, IoctlCmd, Metadata, SeekFrom,
    StatusFlags,
};
use super::vnode::Vnode;
use crate::device::{self, CharDevice, DeviceId};
use crate::fs::file_handle::FileLike;
use crate::prelude::*;
use crate::tty::{self, Tty};

/// One open instance of an inode: the byte cursor, the open flags and,
/// for device inodes, the resolved driver.
///
/// The cursor is serialized by its own mutex (the cursor semaphore),
/// which is acquired before the inode lock and held across the driver
/// call.
pub struct InodeHandle {
    vnode: Arc<Vnode>,
    offset: Mutex<usize>,
    access_mode: AccessMode,
    status_flags: AtomicU32,
    char_device: Option<(DeviceId, Arc<dyn CharDevice>)>,
    tty: Option<Arc<Tty>>,
}

impl InodeHandle {
    /// Builds the open-file description for `vnode`, invoking the
    /// character-device open hook and attaching the controlling terminal
    /// where applicable.
    pub fn new(
        vnode: Arc<Vnode>,
        access_mode: AccessMode,
        status_flags: StatusFlags,
        creation_flags: CreationFlags,
    ) -> Result<Arc<Self>> {
        let mut char_device = None;
        let mut tty = None;
        if vnode.type_() == InodeType::CharDevice {
            let rdev = DeviceId::from_encoded_u64(vnode.metadata().rdev);
            let ops = device::char_device(rdev.major)?;
            ops.open(rdev.minor)?;
            tty = tty::tty_of(rdev);
            char_device = Some((rdev, ops));
        }

        let handle = Arc::new(Self {
            vnode,
            offset: Mutex::new(0),
            access_mode,
            status_flags: AtomicU32::new(status_flags.bits()),
            char_device,
            tty,
        });
        open_files::register(&handle);

        if let Some(tty) = &handle.tty {
            if !creation_flags.contains(CreationFlags::O_NOCTTY) {
                let current = current!();
                if current.ctty().is_none() {
                    current.set_ctty(tty.clone());
                }
            }
        }
        Ok(handle)
    }

    pub fn vnode(&self) -> &Arc<Vnode> {
        &self.vnode
    }

    /// Reads the directory entry at the cursor and advances it.
    pub fn read_dir_entry(&self) -> Result<Option<DirEntry>> {
        if !self.vnode.type_().is_directory() {
            return_errno_with_message!(Errno::ENOTDIR, "not a directory");
        }
        let mut offset = self.offset.lock();
        let entry = {
            let _guard = self.vnode.read_lock();
            self.vnode.inode().entry_at(*offset)?
        };
        if entry.is_some() {
            *offset += 1;
        }
        Ok(entry)
    }
}

impl FileLike for InodeHandle {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.access_mode.is_readable() {
            return_errno_with_message!(Errno::EBADF, "the file is not opened for reading");
        }
        match self.vnode.type_() {
            InodeType::File => {
                let mut offset = self.offset.lock();
                let read_len = {
                    let _guard = self.vnode.read_lock();
                    self.vnode.inode().read_at(*offset, buf)?
                };
                *offset += read_len;
                Ok(read_len)
            }
            InodeType::CharDevice => {
                let (rdev, ops) = self.char_device.as_ref().expect("char device not resolved");
                ops.read(rdev.minor, buf, self.status_flags())
            }
            InodeType::Dir => return_errno_with_message!(Errno::EISDIR, "cannot read a directory"),
            _ => return_errno_with_message!(Errno::EINVAL, "unsupported inode kind"),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.access_mode.is_writable() {
            return_errno_with_message!(Errno::EBADF, "the file is not opened for writing");
        }
        match self.vnode.type_() {
            InodeType::File => {
                let mut offset = self.offset.lock();
                let _guard = self.vnode.write_lock();
                if self.status_flags().contains(StatusFlags::O_APPEND) {
                    // The cursor moves to the size right before the write,
                    // under the same inode write lock.
                    *offset = self.vnode.size();
                }
                let written_len = self.vnode.inode().write_at(*offset, buf)?;
                *offset += written_len;
                Ok(written_len)
            }
            InodeType::CharDevice => {
                let (rdev, ops) = self.char_device.as_ref().expect("char device not resolved");
                ops.write(rdev.minor, buf)
            }
            InodeType::Dir => {
                return_errno_with_message!(Errno::EISDIR, "cannot write a directory")
            }
            _ => return_errno_with_message!(Errno::EINVAL, "unsupported inode kind"),
        }
    }

    fn seek(&self, pos: SeekFrom) -> Result<usize> {
        let type_ = self.vnode.type_();
        if !type_.is_regular_file() && type_ != InodeType::CharDevice {
            // Pipes and sockets included.
            return_errno_with_message!(Errno::ESPIPE, "the file is not seekable");
        }

        let mut offset = self.offset.lock();
        let new_offset = match pos {
            SeekFrom::Start(off) => off as isize,
            SeekFrom::Current(delta) => (*offset as isize)
                .checked_add(delta)
                .ok_or(Error::with_message(Errno::EOVERFLOW, "cursor overflow"))?,
            SeekFrom::End(delta) => (self.vnode.size() as isize)
                .checked_add(delta)
                .ok_or(Error::with_message(Errno::EOVERFLOW, "cursor overflow"))?,
        };
        if new_offset < 0 {
            return_errno_with_message!(Errno::EINVAL, "the cursor cannot go negative");
        }

        if let Some((rdev, ops)) = &self.char_device {
            ops.seek(rdev.minor, new_offset as usize)?;
        }
        *offset = new_offset as usize;
        Ok(*offset)
    }

    fn resize(&self, new_size: usize) -> Result<()> {
        if !self.access_mode.is_writable() {
            return_errno_with_message!(Errno::EBADF, "the file is not opened for writing");
        }
        if !self.vnode.type_().is_regular_file() {
            return_errno_with_message!(Errno::EINVAL, "only regular files can be resized");
        }
        let _guard = self.vnode.write_lock();
        self.vnode.inode().resize(new_size)
    }

    fn metadata(&self) -> Result<Metadata> {
        Ok(self.vnode.metadata())
    }

    fn ioctl(&self, cmd: IoctlCmd, arg: usize) -> Result<i32> {
        match &self.tty {
            Some(tty) => tty.ioctl(cmd, arg),
            None => return_errno_with_message!(Errno::ENOTTY, "not a terminal"),
        }
    }

    fn poll(&self, mask: IoEvents) -> IoEvents {
        match &self.tty {
            Some(tty) => tty.poll(mask),
            None => mask & (IoEvents::IN | IoEvents::OUT),
        }
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status_flags.load(Ordering::Relaxed))
    }

    fn set_status_flags(&self, new_flags: StatusFlags) -> Result<()> {
        self.status_flags.store(new_flags.bits(), Ordering::Relaxed);
        Ok(())
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    fn clean_for_close(&self) -> Result<()> {
        self.vnode.inode().flush()
    }

    fn as_tty(&self) -> Option<Arc<Tty>> {
        self.tty.clone()
    }
}

impl Drop for InodeHandle {
    fn drop(&mut self) {
        open_files::deregister(self);
        // The close hook may block; nothing is locked here.
        if let Some((rdev, ops)) = &self.char_device {
            if let Err(e) = ops.close(rdev.minor) {
                warn!("char device ({}, {}) close: {:?}", rdev.major, rdev.minor, e);
            }
        }
    }
}

impl Debug for InodeHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("InodeHandle")
            .field("vnode", &self.vnode)
            .field("access_mode", &self.access_mode)
            .finish_non_exhaustive()
    }
}
